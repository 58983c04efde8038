//! Document Validation Handler
//!
//! Runs every check the service offers over one provenance document:
//! lifecycles, transparency anchoring of each attestation, each delegation
//! chain and, on request, attestation signatures.

use axum::{extract::State, Json};
use chrono::Utc;
use genesis_core::{DelegationRequest, ProvenanceDocument, Quorum, Timestamp};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;
use crate::core::{record_observed, verify_document, DocumentOptions, DocumentReport, MAX_RECORD_ATTEMPTS};
use crate::storage::StorageError;

/// Request to validate a whole document
#[derive(Debug, Deserialize)]
pub struct ValidateDocumentRequest {
    pub document: ProvenanceDocument,
    pub at_time: Timestamp,

    #[serde(default)]
    pub strict: Option<bool>,

    #[serde(default)]
    pub resolve_replacements: Option<bool>,

    #[serde(default)]
    pub quorum: Option<Quorum>,

    /// Check attestation signatures against registered signer keys
    #[serde(default)]
    pub verify_signatures: bool,

    /// Applied to every delegation chain; by default each chain is checked
    /// for the capability of its last link
    #[serde(default)]
    pub delegation_request: Option<DelegationRequest>,
}

/// Validate a provenance document
///
/// POST /v1/validate/document
pub async fn validate_document(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateDocumentRequest>,
) -> Result<Json<DocumentReport>, ApiError> {
    let config = &state.config.verifier;

    let mut options = DocumentOptions::new(request.at_time, config);
    if let Some(strict) = request.strict {
        options.strict = strict;
    }
    if let Some(resolve) = request.resolve_replacements {
        options.resolve_replacements = resolve;
    }
    if let Some(quorum) = request.quorum {
        options.quorum = quorum;
    }
    options.delegation_request = request.delegation_request;
    if request.verify_signatures {
        options.signer_keys = Some(state.registry.snapshot());
    }

    let document = Arc::new(request.document);
    let mut attempt = 1;
    let report = loop {
        let stored = state.store.known_states().await?;
        let report = verify_document(Arc::clone(&document), stored.clone(), options.clone(), config).await?;

        match record_observed(state.store.as_ref(), report.observed_states(), &stored, Utc::now()).await {
            Ok(_) => break report,
            Err(StorageError::Stale { log_id }) if attempt < MAX_RECORD_ATTEMPTS => {
                debug!(log_id = %log_id, attempt, "Checkpoint moved; validating again");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    };

    info!(
        valid = report.valid,
        at_time = %request.at_time,
        "Document validated"
    );

    Ok(Json(report))
}
