//! Checkpoint storage for the verification service
//!
//! A checkpoint is the latest tree state the service has *proven* for a
//! transparency log. Later verifications against the same log must be
//! consistent with it, so the store only ever moves a log forward:
//!
//! - a larger tree size replaces the checkpoint
//! - the same size with the same root is a no-op
//! - a smaller size, or the same size with another root, is refused
//!
//! Recording is a compare-and-swap against the checkpoint the new state was
//! proven from. If another request moved the log in between, the record is
//! refused as stale and the caller must verify again.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use genesis_core::{Hash, TreeState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Tree size regression for {log_id}: have {known}, offered {offered}")]
    Regression {
        log_id: String,
        known: u64,
        offered: u64,
    },

    #[error("Conflicting root for {log_id} at tree size {tree_size}")]
    Conflict { log_id: String, tree_size: u64 },

    #[error("Checkpoint for {log_id} changed since it was read")]
    Stale { log_id: String },

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Latest proven state of one transparency log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub log_id: String,
    pub tree_size: u64,
    pub root_hash: Hash,

    /// When this state was first recorded
    pub observed_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(log_id: impl Into<String>, state: TreeState, observed_at: DateTime<Utc>) -> Self {
        Self {
            log_id: log_id.into(),
            tree_size: state.tree_size,
            root_hash: state.root_hash,
            observed_at,
        }
    }

    pub fn state(&self) -> TreeState {
        TreeState::new(self.tree_size, self.root_hash)
    }
}

/// What [`CheckpointStore::record`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// First checkpoint for the log
    Created,
    /// Tree grew
    Advanced,
    /// Same state as before
    Unchanged,
}

/// Storage backend for per-log checkpoints
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// Checkpoint of one log
    async fn get(&self, log_id: &str) -> Result<Option<Checkpoint>, StorageError>;

    /// All checkpoints, ordered by log id
    async fn list(&self) -> Result<Vec<Checkpoint>, StorageError>;

    /// Record a state proven consistent with `base`
    ///
    /// `base` is the checkpoint state the proof was checked against (`None`
    /// when the log had none). Fails with [`StorageError::Stale`] when the
    /// stored checkpoint is no longer `base`, and refuses to move a log
    /// backwards.
    async fn record(
        &self,
        checkpoint: Checkpoint,
        base: Option<TreeState>,
    ) -> Result<RecordOutcome, StorageError>;

    /// Known tree states in the form the kernel consumes
    async fn known_states(&self) -> Result<BTreeMap<String, TreeState>, StorageError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|c| (c.log_id.clone(), c.state()))
            .collect())
    }
}
