//! Lifecycle Validation Handler

use axum::{extract::State, Json};
use genesis_core::{validate_lifecycle, LifecycleOptions, LifecycleReport, ProvenanceDocument, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task;
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

/// Request to validate a document's lifecycles at a point in time
#[derive(Debug, Deserialize)]
pub struct ValidateLifecycleRequest {
    pub document: ProvenanceDocument,
    pub at_time: Timestamp,

    /// Fail on warnings; defaults to the configured mode
    #[serde(default)]
    pub strict: Option<bool>,

    #[serde(default)]
    pub resolve_replacements: Option<bool>,
}

/// Response from lifecycle validation
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateLifecycleResponse {
    pub passed: bool,
    pub strict: bool,

    #[serde(flatten)]
    pub report: LifecycleReport,
}

/// Validate entity, tool and attestation lifecycles
///
/// POST /v1/validate/lifecycle
pub async fn validate_document_lifecycle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateLifecycleRequest>,
) -> Result<Json<ValidateLifecycleResponse>, ApiError> {
    let config = &state.config.verifier;
    let strict = request.strict.unwrap_or(config.strict);
    let options = LifecycleOptions::from(config)
        .with_resolve_replacements(request.resolve_replacements.unwrap_or(config.resolve_replacements));
    let document = request.document;
    let at = request.at_time;

    let report = task::spawn_blocking(move || validate_lifecycle(&document, at, &options)).await?;
    let passed = report.passed(strict);

    debug!(
        at_time = %at,
        passed = passed,
        invalid = report.invalid_records.len(),
        tainted = report.tainted_records.len(),
        "Lifecycle validated"
    );

    Ok(Json(ValidateLifecycleResponse { passed, strict, report }))
}
