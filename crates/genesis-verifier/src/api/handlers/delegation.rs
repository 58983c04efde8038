//! Delegation Validation Handler

use axum::{extract::State, Json};
use genesis_core::{
    validate_delegation, DelegationChain, DelegationPolicy, DelegationRequest, DelegationResult,
    PolicyDecision, Timestamp, UsageValue,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task;
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

/// Request to validate one delegation chain
#[derive(Debug, Deserialize)]
pub struct ValidateDelegationRequest {
    pub chain: DelegationChain,
    pub at_time: Timestamp,

    /// Capability the operation needs
    pub capability: String,

    #[serde(default)]
    pub usage: BTreeMap<String, UsageValue>,

    #[serde(default)]
    pub policy_decision: Option<PolicyDecision>,
}

/// Validate a delegation chain for a requested capability
///
/// POST /v1/validate/delegation
pub async fn validate_delegation_chain(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateDelegationRequest>,
) -> Result<Json<DelegationResult>, ApiError> {
    if request.capability.is_empty() {
        return Err(ApiError::BadRequest("Capability cannot be empty".into()));
    }

    let policy = DelegationPolicy::from(&state.config.verifier);
    let delegation_request = DelegationRequest {
        capability: request.capability,
        usage: request.usage,
        policy_decision: request.policy_decision,
    };
    let chain = request.chain;
    let at = request.at_time;
    let holder = chain.holder().unwrap_or_default().to_string();

    let result = task::spawn_blocking(move || validate_delegation(&chain, at, &delegation_request, &policy)).await?;

    if result.authorized {
        info!(holder = %holder, "Delegation authorized");
    } else {
        warn!(
            holder = %holder,
            errors = result.errors.len(),
            "Delegation rejected"
        );
    }

    Ok(Json(result))
}
