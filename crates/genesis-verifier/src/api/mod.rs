//! API module for the verification service

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub name: String,
    pub signer_count: usize,
    pub tracked_logs: usize,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let tracked_logs = state.store.list().await.map(|v| v.len()).unwrap_or(0);

    Json(ReadyResponse {
        ready: true,
        name: state.config.name.clone(),
        signer_count: state.registry.signer_count(),
        tracked_logs,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration for browser-based SDKs
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Verification endpoints
        .route("/v1/verify/transparency", post(handlers::verify_attestation_transparency))
        .route("/v1/validate/lifecycle", post(handlers::validate_document_lifecycle))
        .route("/v1/validate/delegation", post(handlers::validate_delegation_chain))
        .route("/v1/validate/document", post(handlers::validate_document))
        // Key management endpoints
        .route("/v1/keys/signer", post(handlers::register_signer).get(handlers::list_signers))
        // Checkpoint endpoints
        .route("/v1/logs", get(handlers::list_checkpoints))
        .route("/v1/logs/{log_id}", get(handlers::get_checkpoint))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
