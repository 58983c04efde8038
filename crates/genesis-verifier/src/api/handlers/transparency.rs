//! Transparency Verification Handler
//!
//! Checks an attestation's log references against the service's checkpoints
//! and advances those checkpoints with whatever the references prove. When
//! another request advances a checkpoint first, the attestation is verified
//! again against the new checkpoint.

use axum::{extract::State, Json};
use chrono::Utc;
use genesis_core::{verify_transparency, Attestation, Quorum, TreeState, VerificationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;
use crate::core::{merge_known_states, record_observed, MAX_RECORD_ATTEMPTS};
use crate::storage::StorageError;

/// Request to verify one attestation's transparency anchoring
#[derive(Debug, Deserialize)]
pub struct VerifyTransparencyRequest {
    pub attestation: Attestation,

    /// Tree states the caller has observed; only used for logs the service
    /// has no checkpoint for
    #[serde(default)]
    pub known_tree_states: BTreeMap<String, TreeState>,

    /// Defaults to the configured quorum
    #[serde(default)]
    pub quorum: Option<Quorum>,
}

/// Response from transparency verification
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyTransparencyResponse {
    #[serde(flatten)]
    pub result: VerificationResult,

    /// Logs whose checkpoint was created or advanced
    pub checkpoints_updated: Vec<String>,
}

/// Verify an attestation's transparency anchoring
///
/// POST /v1/verify/transparency
pub async fn verify_attestation_transparency(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyTransparencyRequest>,
) -> Result<Json<VerifyTransparencyResponse>, ApiError> {
    let quorum = request.quorum.unwrap_or_else(|| state.config.default_quorum());
    let limits = state.config.verifier.limits;
    let attestation = Arc::new(request.attestation);
    let label = attestation.label();

    let mut attempt = 1;
    let (result, checkpoints_updated) = loop {
        let stored = state.store.known_states().await?;
        let known = merge_known_states(stored.clone(), request.known_tree_states.clone());
        let attestation = Arc::clone(&attestation);
        let result =
            task::spawn_blocking(move || verify_transparency(&attestation, &known, quorum, &limits)).await?;

        match record_observed(state.store.as_ref(), result.observed_states(), &stored, Utc::now()).await {
            Ok(updated) => break (result, updated),
            Err(StorageError::Stale { log_id }) if attempt < MAX_RECORD_ATTEMPTS => {
                debug!(attestation = %label, log_id = %log_id, attempt, "Checkpoint moved; verifying again");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    };

    if result.anchored {
        info!(
            attestation = %label,
            logs = result.verified_logs().len(),
            "Attestation anchored"
        );
    } else {
        warn!(
            attestation = %label,
            errors = result.errors.len(),
            "Attestation not anchored"
        );
    }

    Ok(Json(VerifyTransparencyResponse {
        result,
        checkpoints_updated,
    }))
}
