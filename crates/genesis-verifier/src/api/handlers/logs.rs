//! Checkpoint Query Handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::handlers::AppState;
use crate::storage::{Checkpoint, StorageError};

#[derive(Debug, Serialize, Deserialize)]
pub struct ListCheckpointsResponse {
    pub logs: Vec<Checkpoint>,
    pub count: usize,
}

/// List recorded checkpoints
///
/// GET /v1/logs
pub async fn list_checkpoints(State(state): State<Arc<AppState>>) -> Result<Json<ListCheckpointsResponse>, ApiError> {
    let logs = state.store.list().await?;
    let count = logs.len();

    Ok(Json(ListCheckpointsResponse { logs, count }))
}

/// Get the checkpoint of one log
///
/// GET /v1/logs/{log_id}
pub async fn get_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(log_id): Path<String>,
) -> Result<Json<Checkpoint>, ApiError> {
    let checkpoint = state.store.get(&log_id).await?;
    match checkpoint {
        Some(checkpoint) => Ok(Json(checkpoint)),
        None => Err(StorageError::NotFound(log_id).into()),
    }
}
