//! BLS12-381 signing primitives.
//!
//! Thin wrappers over `blst` providing key generation, sign/verify, and
//! signature/public-key aggregation. Aggregation uses the min_pk variant:
//! 48-byte public keys in G1, 96-byte signatures in G2.

use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use thiserror::Error;

/// Domain separation tag for BLS signatures (Ethereum 2.0 compatible).
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Errors from key handling and aggregation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("invalid signature bytes")]
    InvalidSignature,

    #[error("aggregation failed")]
    AggregationFailed,

    #[error("empty input")]
    EmptyInput,
}

/// BLS public key (48 bytes compressed).
#[derive(Clone)]
pub struct BlsPublicKey(PublicKey);

impl BlsPublicKey {
    /// Deserialize from the canonical 48-byte compressed form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        PublicKey::from_bytes(bytes)
            .map(BlsPublicKey)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Serialize to the canonical 48-byte compressed form.
    pub fn to_bytes(&self) -> [u8; 48] {
        self.0.to_bytes()
    }

    /// Verify a single signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> bool {
        signature.0.verify(true, message, DST, &[], &self.0, true) == BLST_ERROR::BLST_SUCCESS
    }

    /// Aggregate several public keys into one.
    pub fn aggregate(keys: &[&BlsPublicKey]) -> Result<Self, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        let refs: Vec<&PublicKey> = keys.iter().map(|k| &k.0).collect();
        AggregatePublicKey::aggregate(&refs, false)
            .map(|apk| BlsPublicKey(apk.to_public_key()))
            .map_err(|_| CryptoError::AggregationFailed)
    }
}

impl PartialEq for BlsPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsPublicKey {}

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsPublicKey({})", &hex::encode(self.to_bytes())[..16])
    }
}

/// BLS signature (96 bytes compressed).
#[derive(Clone)]
pub struct BlsSignature(Signature);

impl BlsSignature {
    /// Deserialize from the canonical 96-byte compressed form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Signature::from_bytes(bytes)
            .map(BlsSignature)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Serialize to the canonical 96-byte compressed form.
    pub fn to_bytes(&self) -> [u8; 96] {
        self.0.to_bytes()
    }

    /// Aggregate several signatures into one.
    ///
    /// Aggregation is commutative and associative; callers are responsible
    /// for not feeding the same signature twice.
    pub fn aggregate(sigs: &[&BlsSignature]) -> Result<Self, CryptoError> {
        if sigs.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        let refs: Vec<&Signature> = sigs.iter().map(|s| &s.0).collect();
        AggregateSignature::aggregate(&refs, false)
            .map(|asig| BlsSignature(asig.to_signature()))
            .map_err(|_| CryptoError::AggregationFailed)
    }

    /// Verify this signature as an aggregate over `message`, signed by the
    /// given set of public keys.
    pub fn verify_aggregate(&self, message: &[u8], keys: &[&BlsPublicKey]) -> bool {
        let Ok(agg_pk) = BlsPublicKey::aggregate(keys) else {
            return false;
        };
        agg_pk.verify(message, self)
    }
}

impl PartialEq for BlsSignature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsSignature {}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsSignature({})", &hex::encode(self.to_bytes())[..16])
    }
}

/// BLS key pair for signing.
#[derive(Clone)]
pub struct BlsKeyPair {
    secret: SecretKey,
    public: BlsPublicKey,
}

impl BlsKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut ikm);
        Self::from_seed(&ikm)
    }

    /// Derive a key pair from 32 bytes of input key material.
    ///
    /// Deterministic: the same seed always yields the same key pair.
    pub fn from_seed(ikm: &[u8; 32]) -> Self {
        let secret = SecretKey::key_gen(ikm, &[]).expect("32 bytes of IKM is always valid");
        let public = BlsPublicKey(secret.sk_to_pk());
        Self { secret, public }
    }

    /// Restore a key pair from secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public = BlsPublicKey(secret.sk_to_pk());
        Ok(Self { secret, public })
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature(self.secret.sign(message, DST, &[]))
    }

    /// Get the public key.
    pub fn public_key(&self) -> &BlsPublicKey {
        &self.public
    }
}

impl std::fmt::Debug for BlsKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let kp = BlsKeyPair::generate();
        let sig = kp.sign(b"message");
        assert!(kp.public_key().verify(b"message", &sig));
        assert!(!kp.public_key().verify(b"other message", &sig));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let kp1 = BlsKeyPair::generate();
        let kp2 = BlsKeyPair::generate();
        let sig = kp1.sign(b"message");
        assert!(!kp2.public_key().verify(b"message", &sig));
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = BlsKeyPair::from_seed(&[7u8; 32]);
        let b = BlsKeyPair::from_seed(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign(b"m"), b.sign(b"m"));
    }

    #[test]
    fn test_aggregate_verifies_against_key_subset() {
        let kps: Vec<BlsKeyPair> = (0..3).map(|_| BlsKeyPair::generate()).collect();
        let msg = b"same message";

        let sigs: Vec<BlsSignature> = kps.iter().map(|k| k.sign(msg)).collect();
        let agg = BlsSignature::aggregate(&sigs.iter().collect::<Vec<_>>()).unwrap();

        let keys: Vec<&BlsPublicKey> = kps.iter().map(|k| k.public_key()).collect();
        assert!(agg.verify_aggregate(msg, &keys));

        // Missing one signer's key must fail verification.
        assert!(!agg.verify_aggregate(msg, &keys[..2]));
    }

    #[test]
    fn test_aggregate_empty_fails() {
        assert_eq!(BlsSignature::aggregate(&[]), Err(CryptoError::EmptyInput));
        assert_eq!(BlsPublicKey::aggregate(&[]), Err(CryptoError::EmptyInput));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let kp = BlsKeyPair::generate();
        let sig = kp.sign(b"bytes");

        let pk = BlsPublicKey::from_bytes(&kp.public_key().to_bytes()).unwrap();
        let sg = BlsSignature::from_bytes(&sig.to_bytes()).unwrap();
        assert!(pk.verify(b"bytes", &sg));
    }
}
