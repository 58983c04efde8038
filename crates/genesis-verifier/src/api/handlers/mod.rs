//! API request handlers

pub mod delegation;
pub mod document;
pub mod keys;
pub mod lifecycle;
pub mod logs;
pub mod transparency;

use genesis_core::{Quorum, VerifierConfig};
use std::sync::Arc;

use crate::keys::KeyRegistry;
use crate::storage::CheckpointStore;

pub use delegation::{validate_delegation_chain, ValidateDelegationRequest};
pub use document::{validate_document, ValidateDocumentRequest};
pub use keys::{list_signers, register_signer, ListSignersResponse, RegisterSignerRequest, RegisterSignerResponse};
pub use lifecycle::{validate_document_lifecycle, ValidateLifecycleRequest, ValidateLifecycleResponse};
pub use logs::{get_checkpoint, list_checkpoints, ListCheckpointsResponse};
pub use transparency::{verify_attestation_transparency, VerifyTransparencyRequest, VerifyTransparencyResponse};

/// Service configuration
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Instance name reported by `/ready`
    pub name: String,

    /// Defaults for every verification request
    pub verifier: VerifierConfig,
}

impl ServiceConfig {
    /// Quorum for requests that do not name one
    pub fn default_quorum(&self) -> Quorum {
        Quorum::AtLeast(self.verifier.quorum)
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Attestation signer keys
    pub registry: KeyRegistry,
    /// Per-log checkpoints
    pub store: Arc<dyn CheckpointStore>,
    pub config: ServiceConfig,
}
