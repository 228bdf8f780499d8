//! Canonical wire codec for protocol messages.
//!
//! # Wire Format
//!
//! ```text
//! [type tag: u8][fields...]
//! ```
//!
//! - Integers are little-endian.
//! - Variable-length byte fields are `u32` length-prefixed.
//! - Bitsets are a `u32` bit length followed by 32-bit little-endian
//!   blocks.
//! - BLS signatures and keys use blst's canonical compressed encodings.
//! - A quorum certificate's `quorum_met` flag is local state and is
//!   never serialized.
//!
//! The enclosing transport supplies framing length and checksums.

use crate::{HsMessage, NewBlockMessage, NewViewMessage, ProposalMessage, VoteMessage};
use finalis_types::{
    BlockId, BlsSignature, FinalizerName, ProposalId, QuorumCertificate, SignerBitset,
};
use thiserror::Error;

/// Message type tag: leader rotation hand-off.
pub const TAG_NEW_VIEW: u8 = 1;
/// Message type tag: block availability announcement.
pub const TAG_NEW_BLOCK: u8 = 2;
/// Structure tag: embedded quorum certificate.
pub const TAG_QC: u8 = 3;
/// Message type tag: finalizer vote.
pub const TAG_VOTE: u8 = 4;
/// Message type tag: leader proposal.
pub const TAG_PROPOSAL: u8 = 5;

/// Errors that can occur during message decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unknown type tag: {0}")]
    UnknownTag(u8),

    #[error("expected tag {expected}, got {got}")]
    WrongTag { expected: u8, got: u8 },

    #[error("malformed bitset")]
    MalformedBitset,

    #[error("malformed signature bytes")]
    MalformedSignature,

    #[error("finalizer name is not valid UTF-8")]
    MalformedName,

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Encode a protocol message to its canonical byte form.
pub fn encode_message(msg: &HsMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    match msg {
        HsMessage::NewView(m) => {
            out.push(TAG_NEW_VIEW);
            put_qc(&mut out, &m.high_qc);
        }
        HsMessage::NewBlock(m) => {
            out.push(TAG_NEW_BLOCK);
            out.extend_from_slice(m.block_id.as_bytes());
            put_qc(&mut out, &m.justify);
        }
        HsMessage::Vote(m) => {
            out.push(TAG_VOTE);
            out.extend_from_slice(m.proposal_id.as_bytes());
            put_var_bytes(&mut out, m.finalizer.as_str().as_bytes());
            out.extend_from_slice(&m.signature.to_bytes());
        }
        HsMessage::Proposal(m) => {
            out.push(TAG_PROPOSAL);
            out.extend_from_slice(m.proposal_id.as_bytes());
            out.extend_from_slice(m.block_id.as_bytes());
            out.extend_from_slice(m.parent_id.as_bytes());
            out.extend_from_slice(m.final_on_qc.as_bytes());
            put_qc(&mut out, &m.justify);
            out.push(m.phase_counter);
        }
    }
    out
}

/// Decode a protocol message from its canonical byte form.
///
/// The whole buffer must be consumed; trailing bytes are an error.
pub fn decode_message(data: &[u8]) -> Result<HsMessage, WireError> {
    let mut r = Reader::new(data);
    let tag = r.u8()?;
    let msg = match tag {
        TAG_NEW_VIEW => HsMessage::NewView(NewViewMessage { high_qc: r.qc()? }),
        TAG_NEW_BLOCK => HsMessage::NewBlock(NewBlockMessage {
            block_id: BlockId::from_bytes(r.array()?),
            justify: r.qc()?,
        }),
        TAG_VOTE => HsMessage::Vote(VoteMessage {
            proposal_id: ProposalId::from_bytes(r.array()?),
            finalizer: r.name()?,
            signature: r.signature()?,
        }),
        TAG_PROPOSAL => HsMessage::Proposal(ProposalMessage {
            proposal_id: ProposalId::from_bytes(r.array()?),
            block_id: BlockId::from_bytes(r.array()?),
            parent_id: ProposalId::from_bytes(r.array()?),
            final_on_qc: ProposalId::from_bytes(r.array()?),
            justify: r.qc()?,
            phase_counter: r.u8()?,
        }),
        other => return Err(WireError::UnknownTag(other)),
    };
    if r.remaining() != 0 {
        return Err(WireError::TrailingBytes(r.remaining()));
    }
    Ok(msg)
}

fn put_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn put_qc(out: &mut Vec<u8>, qc: &QuorumCertificate) {
    out.push(TAG_QC);
    out.extend_from_slice(qc.proposal_id().as_bytes());
    let bitset = qc.active_finalizers();
    out.extend_from_slice(&(bitset.len() as u32).to_le_bytes());
    for block in bitset.blocks() {
        out.extend_from_slice(&block.to_le_bytes());
    }
    match qc.active_agg_sig() {
        Some(sig) => put_var_bytes(out, &sig.to_bytes()),
        None => put_var_bytes(out, &[]),
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEnd);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn array(&mut self) -> Result<[u8; 32], WireError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }

    fn var_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn name(&mut self) -> Result<FinalizerName, WireError> {
        let bytes = self.var_bytes()?;
        let s = std::str::from_utf8(bytes).map_err(|_| WireError::MalformedName)?;
        Ok(FinalizerName::new(s))
    }

    fn signature(&mut self) -> Result<BlsSignature, WireError> {
        let bytes = self.take(96)?;
        BlsSignature::from_bytes(bytes).map_err(|_| WireError::MalformedSignature)
    }

    fn qc(&mut self) -> Result<QuorumCertificate, WireError> {
        let tag = self.u8()?;
        if tag != TAG_QC {
            return Err(WireError::WrongTag {
                expected: TAG_QC,
                got: tag,
            });
        }
        let proposal_id = ProposalId::from_bytes(self.array()?);
        let bits = self.u32()? as usize;
        let block_count = bits.div_ceil(32);
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(self.u32()?);
        }
        let bitset =
            SignerBitset::from_blocks(bits, blocks).ok_or(WireError::MalformedBitset)?;
        let sig_bytes = self.var_bytes()?;
        let agg_sig = if sig_bytes.is_empty() {
            None
        } else {
            Some(BlsSignature::from_bytes(sig_bytes).map_err(|_| WireError::MalformedSignature)?)
        };
        Ok(QuorumCertificate::from_parts(proposal_id, bitset, agg_sig))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finalis_types::{proposal_digest, BlsKeyPair};

    fn make_proposal() -> ProposalMessage {
        let block_id = BlockId::from_number(1, 0x01);
        let final_on_qc = ProposalId::NULL;
        let mut justify = QuorumCertificate::new(4);
        let kp = BlsKeyPair::from_seed(&[1u8; 32]);
        justify.reset(ProposalId::from_bytes([7u8; 32]), 4);
        justify.add_vote(0, &kp.sign(b"d"));
        justify.add_vote(2, &kp.sign(b"d2"));
        ProposalMessage {
            proposal_id: proposal_digest(&block_id, 1, &final_on_qc),
            block_id,
            parent_id: ProposalId::from_bytes([3u8; 32]),
            final_on_qc,
            justify,
            phase_counter: 1,
        }
    }

    #[test]
    fn test_type_tags() {
        let p = make_proposal();
        let vote = VoteMessage {
            proposal_id: p.proposal_id,
            finalizer: "r1".into(),
            signature: BlsKeyPair::from_seed(&[2u8; 32]).sign(b"x"),
        };

        assert_eq!(encode_message(&HsMessage::NewView(NewViewMessage {
            high_qc: QuorumCertificate::new(4),
        }))[0], TAG_NEW_VIEW);
        assert_eq!(encode_message(&HsMessage::NewBlock(NewBlockMessage {
            block_id: p.block_id,
            justify: QuorumCertificate::new(4),
        }))[0], TAG_NEW_BLOCK);
        assert_eq!(encode_message(&HsMessage::Vote(vote))[0], TAG_VOTE);
        assert_eq!(encode_message(&HsMessage::Proposal(p))[0], TAG_PROPOSAL);
    }

    #[test]
    fn test_proposal_roundtrip() {
        let p = make_proposal();
        let bytes = encode_message(&HsMessage::Proposal(p.clone()));
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded, HsMessage::Proposal(p));
    }

    #[test]
    fn test_quorum_met_is_not_serialized() {
        let mut qc = QuorumCertificate::new(4);
        let kp = BlsKeyPair::from_seed(&[3u8; 32]);
        qc.reset(ProposalId::from_bytes([1u8; 32]), 4);
        qc.add_vote(1, &kp.sign(b"d"));
        qc.set_quorum_met();

        let bytes = encode_message(&HsMessage::NewView(NewViewMessage { high_qc: qc }));
        let HsMessage::NewView(decoded) = decode_message(&bytes).unwrap() else {
            panic!("expected NewView");
        };
        // The receiver must re-derive quorum locally.
        assert!(!decoded.high_qc.is_quorum_met());
        assert_eq!(decoded.high_qc.vote_count(), 1);
    }

    #[test]
    fn test_bitset_block_layout() {
        let mut qc = QuorumCertificate::new(40);
        let kp = BlsKeyPair::from_seed(&[4u8; 32]);
        qc.reset(ProposalId::NULL, 40);
        qc.add_vote(33, &kp.sign(b"d"));

        let bytes = encode_message(&HsMessage::NewView(NewViewMessage { high_qc: qc }));
        // tag(new_view) + tag(qc) + proposal_id(32) => bit length at offset 34.
        assert_eq!(&bytes[34..38], &40u32.to_le_bytes());
        // First block empty, second block has bit 1 set (index 33 = 32 + 1).
        assert_eq!(&bytes[38..42], &0u32.to_le_bytes());
        assert_eq!(&bytes[42..46], &2u32.to_le_bytes());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let bytes = encode_message(&HsMessage::Proposal(make_proposal()));
        for cut in [0, 1, 10, bytes.len() - 1] {
            assert!(decode_message(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert_eq!(decode_message(&[99, 0, 0]), Err(WireError::UnknownTag(99)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_message(&HsMessage::NewView(NewViewMessage {
            high_qc: QuorumCertificate::new(4),
        }));
        bytes.push(0);
        assert_eq!(decode_message(&bytes), Err(WireError::TrailingBytes(1)));
    }
}
