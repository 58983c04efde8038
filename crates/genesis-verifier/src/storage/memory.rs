//! In-memory storage backend
//!
//! Default storage implementation using an in-memory map.
//! Suitable for development and single-instance deployments.
//! Data is lost on restart.

use async_trait::async_trait;
use genesis_core::TreeState;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{info, warn};

use super::{Checkpoint, CheckpointStore, RecordOutcome, StorageError};

/// In-memory checkpoint store
#[derive(Debug, Default)]
pub struct MemoryStore {
    checkpoints: RwLock<BTreeMap<String, Checkpoint>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, log_id: &str) -> Result<Option<Checkpoint>, StorageError> {
        let checkpoints = self.checkpoints.read().map_err(|_| StorageError::Poisoned)?;
        Ok(checkpoints.get(log_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, StorageError> {
        let checkpoints = self.checkpoints.read().map_err(|_| StorageError::Poisoned)?;
        Ok(checkpoints.values().cloned().collect())
    }

    async fn record(
        &self,
        checkpoint: Checkpoint,
        base: Option<TreeState>,
    ) -> Result<RecordOutcome, StorageError> {
        let mut checkpoints = self.checkpoints.write().map_err(|_| StorageError::Poisoned)?;

        match checkpoints.entry(checkpoint.log_id.clone()) {
            Entry::Vacant(slot) => {
                if base.is_some() {
                    return Err(StorageError::Stale {
                        log_id: checkpoint.log_id,
                    });
                }
                info!(
                    log_id = %checkpoint.log_id,
                    tree_size = checkpoint.tree_size,
                    "Recording first checkpoint"
                );
                slot.insert(checkpoint);
                Ok(RecordOutcome::Created)
            }
            Entry::Occupied(mut slot) => {
                let known = slot.get();
                if known.state() == checkpoint.state() {
                    return Ok(RecordOutcome::Unchanged);
                }
                if base != Some(known.state()) {
                    warn!(
                        log_id = %checkpoint.log_id,
                        stored = known.tree_size,
                        base = ?base.map(|b| b.tree_size),
                        "Checkpoint moved during verification"
                    );
                    return Err(StorageError::Stale {
                        log_id: checkpoint.log_id,
                    });
                }
                if checkpoint.tree_size < known.tree_size {
                    warn!(
                        log_id = %checkpoint.log_id,
                        known = known.tree_size,
                        offered = checkpoint.tree_size,
                        "Refusing checkpoint regression"
                    );
                    return Err(StorageError::Regression {
                        log_id: checkpoint.log_id,
                        known: known.tree_size,
                        offered: checkpoint.tree_size,
                    });
                }
                if checkpoint.tree_size == known.tree_size {
                    warn!(
                        log_id = %checkpoint.log_id,
                        tree_size = checkpoint.tree_size,
                        "SECURITY: conflicting roots for one tree size"
                    );
                    return Err(StorageError::Conflict {
                        log_id: checkpoint.log_id,
                        tree_size: checkpoint.tree_size,
                    });
                }
                info!(
                    log_id = %checkpoint.log_id,
                    from = known.tree_size,
                    to = checkpoint.tree_size,
                    "Advancing checkpoint"
                );
                slot.insert(checkpoint);
                Ok(RecordOutcome::Advanced)
            }
        }
    }
}
