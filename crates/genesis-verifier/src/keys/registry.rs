//! Key Registry for the verification service
//!
//! Holds the Ed25519 public keys of attestation signers. Documents submitted
//! with `verify_signatures` are checked against this registry.

use genesis_core::{
    crypto::{KeyRing, PublicKey, SignatureVerifier},
    error::{GenesisError, Result},
    Attestation,
};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::info;

/// Thread-safe signer id → public key map
#[derive(Debug, Default)]
pub struct KeyRegistry {
    signer_keys: RwLock<BTreeMap<String, PublicKey>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Signer Key Management
    // =========================================================================

    /// Register (or replace) a signer's public key
    pub fn register_signer(&self, key: PublicKey) {
        let mut keys = self.signer_keys.write().unwrap_or_else(PoisonError::into_inner);
        info!(signer_id = %key.signer_id(), "Registered signer key");
        keys.insert(key.signer_id().to_string(), key);
    }

    pub fn get_signer(&self, signer_id: &str) -> Option<PublicKey> {
        let keys = self.signer_keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.get(signer_id).cloned()
    }

    pub fn has_signer(&self, signer_id: &str) -> bool {
        let keys = self.signer_keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.contains_key(signer_id)
    }

    /// Registered signer ids, sorted
    pub fn list_signer_ids(&self) -> Vec<String> {
        let keys = self.signer_keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.keys().cloned().collect()
    }

    pub fn signer_count(&self) -> usize {
        let keys = self.signer_keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.len()
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Point-in-time copy for use off the async runtime
    pub fn snapshot(&self) -> KeyRing {
        let keys = self.signer_keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.values().cloned().collect()
    }
}

impl SignatureVerifier for KeyRegistry {
    fn verify_attestation(&self, attestation: &Attestation) -> Result<()> {
        let key = self
            .get_signer(&attestation.signer_id)
            .ok_or_else(|| GenesisError::UnknownSigner(attestation.signer_id.clone()))?;
        key.verify(&attestation.payload, &attestation.signature)
    }
}
