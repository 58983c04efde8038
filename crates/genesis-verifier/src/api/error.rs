//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use genesis_core::GenesisError;

use crate::storage::StorageError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unknown signer: {0}")]
    UnknownSigner(String),

    #[error("Invalid signature")]
    InvalidSignature(String),

    #[error("Checkpoint regression")]
    CheckpointRegression {
        log_id: String,
        known: u64,
        offered: u64,
    },
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone(), None),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
            ApiError::UnknownSigner(signer_id) => (
                StatusCode::UNAUTHORIZED,
                "UNKNOWN_SIGNER",
                format!("Signer '{}' is not registered", signer_id),
                None,
            ),
            ApiError::InvalidSignature(msg) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE",
                msg.clone(),
                None,
            ),
            ApiError::CheckpointRegression { log_id, known, offered } => (
                StatusCode::CONFLICT,
                "CHECKPOINT_REGRESSION",
                format!("Tree size for '{}' would move backwards", log_id),
                Some(serde_json::json!({
                    "log_id": log_id,
                    "known_tree_size": known,
                    "offered_tree_size": offered,
                })),
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<GenesisError> for ApiError {
    fn from(err: GenesisError) -> Self {
        match err {
            GenesisError::UnknownSigner(signer_id) => ApiError::UnknownSigner(signer_id),
            GenesisError::CryptoError(msg) => ApiError::InvalidSignature(msg),
            GenesisError::SerializationError(msg) => {
                ApiError::BadRequest(format!("Serialization error: {}", msg))
            }
            GenesisError::InvalidConfig(msg) => ApiError::BadRequest(format!("Invalid configuration: {}", msg)),
            GenesisError::InvalidReference(_)
            | GenesisError::InvalidHash(_)
            | GenesisError::InvalidEntry(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(log_id) => ApiError::NotFound(format!("No checkpoint for '{}'", log_id)),
            StorageError::Regression { log_id, known, offered } => {
                ApiError::CheckpointRegression { log_id, known, offered }
            }
            StorageError::Conflict { .. } | StorageError::Stale { .. } => ApiError::Conflict(err.to_string()),
            StorageError::Poisoned => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(err: base64::DecodeError) -> Self {
        ApiError::BadRequest(format!("Invalid base64 encoding: {}", err))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Verification worker failed: {}", err))
    }
}
