//! Signer Key Management Handlers
//!
//! Handles registration and listing of attestation signer public keys.

use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use genesis_core::crypto::PublicKey;

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

/// Longest accepted signer id
pub const MAX_SIGNER_ID_LENGTH: usize = 256;

/// Request to register a signer's public key
#[derive(Debug, Deserialize)]
pub struct RegisterSignerRequest {
    /// Signer identifier, as it appears in `Attestation::signer_id`
    pub signer_id: String,

    /// Base64-encoded Ed25519 public key (32 bytes)
    pub public_key: String,
}

/// Response from signer registration
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterSignerResponse {
    pub signer_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSignersResponse {
    pub signers: Vec<String>,
    pub count: usize,
}

/// Register a signer's public key
///
/// POST /v1/keys/signer
pub async fn register_signer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterSignerRequest>,
) -> Result<Json<RegisterSignerResponse>, ApiError> {
    if request.signer_id.is_empty() {
        return Err(ApiError::BadRequest("Signer ID cannot be empty".into()));
    }

    if request.signer_id.len() > MAX_SIGNER_ID_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Signer ID too long (max {} chars)",
            MAX_SIGNER_ID_LENGTH
        )));
    }

    let key_bytes = STANDARD.decode(&request.public_key)?;

    let key_bytes: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key_bytes.len()
        ))
    })?;

    let public_key = PublicKey::from_bytes(&request.signer_id, &key_bytes)
        .map_err(|e| ApiError::BadRequest(format!("Invalid public key: {}", e)))?;

    if state.registry.has_signer(&request.signer_id) {
        info!(signer_id = %request.signer_id, "Updating existing signer key");
    } else {
        info!(signer_id = %request.signer_id, "Registering new signer key");
    }

    state.registry.register_signer(public_key);

    Ok(Json(RegisterSignerResponse {
        signer_id: request.signer_id,
        message: "Signer key registered successfully".into(),
    }))
}

/// List registered signer ids
///
/// GET /v1/keys/signer
pub async fn list_signers(State(state): State<Arc<AppState>>) -> Json<ListSignersResponse> {
    let signers = state.registry.list_signer_ids();
    let count = signers.len();

    Json(ListSignersResponse { signers, count })
}
