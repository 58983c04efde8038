//! Attestation signatures
//!
//! The verifiers above never look at signatures. This module is the seam
//! through which a caller plugs one in: [`SignatureVerifier`] resolves a
//! signer and checks a detached signature over the attestation payload.
//!
//! Ed25519 is provided out of the box:
//! - `KeyPair`: signing key, used by producers and tests
//! - `PublicKey`: verifying key bound to a signer id
//! - `KeyRing`: signer id → public key lookup implementing the trait

use crate::error::{GenesisError, Result};
use crate::types::Attestation;
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Checks attestation signatures for known signers
pub trait SignatureVerifier: Send + Sync {
    /// Verify `attestation.signature` over `attestation.payload`
    ///
    /// Fails with `UnknownSigner` when no key is registered for the signer.
    fn verify_attestation(&self, attestation: &Attestation) -> Result<()>;
}

/// Ed25519 signing key for a signer id
#[derive(Clone)]
pub struct KeyPair {
    signer_id: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("signer_id", &self.signer_id)
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(signer_id: impl Into<String>) -> Self {
        Self {
            signer_id: signer_id.into(),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create a key pair from a 32-byte seed
    pub fn from_bytes(signer_id: impl Into<String>, bytes: &[u8; 32]) -> Self {
        Self {
            signer_id: signer_id.into(),
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn signer_id(&self) -> &str {
        &self.signer_id
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            signer_id: self.signer_id.clone(),
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Detached signature over raw bytes
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Sign the attestation payload, filling in signer id and signature
    pub fn sign_attestation(&self, attestation: Attestation) -> Attestation {
        let signature = self.sign(&attestation.payload);
        Attestation {
            signer_id: self.signer_id.clone(),
            signature,
            ..attestation
        }
    }
}

/// Ed25519 verifying key for a signer id
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    signer_id: String,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("signer_id", &self.signer_id)
            .finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(signer_id: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)?;
        Ok(Self {
            signer_id: signer_id.into(),
            verifying_key,
        })
    }

    pub fn signer_id(&self) -> &str {
        &self.signer_id
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a detached signature over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| GenesisError::CryptoError(format!("invalid signature length {}", signature.len())))?;
        let signature = Signature::from_bytes(&signature_bytes);
        self.verifying_key.verify(message, &signature)?;
        Ok(())
    }
}

/// Public key in its transport form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializablePublicKey {
    pub signer_id: String,

    /// Base64-encoded 32-byte Ed25519 key
    pub key: String,
}

impl From<&PublicKey> for SerializablePublicKey {
    fn from(pk: &PublicKey) -> Self {
        Self {
            signer_id: pk.signer_id.clone(),
            key: STANDARD.encode(pk.to_bytes()),
        }
    }
}

impl TryFrom<SerializablePublicKey> for PublicKey {
    type Error = GenesisError;

    fn try_from(spk: SerializablePublicKey) -> Result<Self> {
        let bytes = STANDARD.decode(&spk.key)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GenesisError::CryptoError("invalid key length".into()))?;
        PublicKey::from_bytes(spk.signer_id, &bytes)
    }
}

/// Ed25519 keys indexed by signer id
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: BTreeMap<String, PublicKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key of its signer
    pub fn insert(&mut self, key: PublicKey) {
        self.keys.insert(key.signer_id.clone(), key);
    }

    pub fn with_key(mut self, key: PublicKey) -> Self {
        self.insert(key);
        self
    }

    pub fn get(&self, signer_id: &str) -> Option<&PublicKey> {
        self.keys.get(signer_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<PublicKey> for KeyRing {
    fn from_iter<I: IntoIterator<Item = PublicKey>>(iter: I) -> Self {
        let mut ring = KeyRing::new();
        for key in iter {
            ring.insert(key);
        }
        ring
    }
}

impl SignatureVerifier for KeyRing {
    fn verify_attestation(&self, attestation: &Attestation) -> Result<()> {
        let key = self
            .get(&attestation.signer_id)
            .ok_or_else(|| GenesisError::UnknownSigner(attestation.signer_id.clone()))?;
        key.verify(&attestation.payload, &attestation.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_sign_and_verify_attestation() {
        let kp = KeyPair::generate("did:web:lab");
        let att = kp.sign_attestation(Attestation::new("ignored", b"claim".to_vec(), Utc::now()));
        assert_eq!(att.signer_id, "did:web:lab");

        let ring = KeyRing::new().with_key(kp.public_key());
        ring.verify_attestation(&att).unwrap();
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let kp = KeyPair::generate("did:web:lab");
        let mut att = kp.sign_attestation(Attestation::new("x", b"claim".to_vec(), Utc::now()));
        att.payload = b"other claim".to_vec();

        let ring: KeyRing = std::iter::once(kp.public_key()).collect();
        assert!(matches!(
            ring.verify_attestation(&att),
            Err(GenesisError::CryptoError(_))
        ));
    }

    #[test]
    fn test_unknown_signer() {
        let kp = KeyPair::generate("did:web:lab");
        let att = kp.sign_attestation(Attestation::new("x", b"claim".to_vec(), Utc::now()));
        assert!(matches!(
            KeyRing::new().verify_attestation(&att),
            Err(GenesisError::UnknownSigner(_))
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let kp1 = KeyPair::generate("did:web:lab");
        let kp2 = KeyPair::from_bytes("did:web:lab", &[7u8; 32]);
        let att = kp1.sign_attestation(Attestation::new("x", b"claim".to_vec(), Utc::now()));
        let ring = KeyRing::new().with_key(kp2.public_key());
        assert!(ring.verify_attestation(&att).is_err());
    }

    #[test]
    fn test_serializable_key_round_trip() {
        let pk = KeyPair::generate("signer").public_key();
        let spk = SerializablePublicKey::from(&pk);
        assert_eq!(PublicKey::try_from(spk).unwrap(), pk);

        let bad = SerializablePublicKey {
            signer_id: "signer".into(),
            key: STANDARD.encode([1u8; 16]),
        };
        assert!(PublicKey::try_from(bad).is_err());
    }

    #[test]
    fn test_short_signature_rejected() {
        let pk = KeyPair::generate("s").public_key();
        assert!(matches!(
            pk.verify(b"msg", &[0u8; 10]),
            Err(GenesisError::CryptoError(_))
        ));
    }
}
