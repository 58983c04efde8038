//! GenesisGraph Verification Service
//!
//! HTTP front end over the `genesis-core` kernel. The service adds two
//! pieces of state the kernel deliberately does not keep:
//! - per-log checkpoints, so every later proof must be consistent with
//!   what the service has already seen
//! - a registry of attestation signer keys
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with signer and log counts
//! - `POST /v1/verify/transparency` - Verify an attestation's log anchoring
//! - `POST /v1/validate/lifecycle` - Validate document lifecycles at a time
//! - `POST /v1/validate/delegation` - Validate a delegation chain
//! - `POST /v1/validate/document` - Run every check over a whole document
//! - `POST /v1/keys/signer` - Register a signer public key
//! - `GET /v1/keys/signer` - List registered signer ids
//! - `GET /v1/logs` - List recorded checkpoints
//! - `GET /v1/logs/{log_id}` - Get one log's checkpoint

pub mod api;
pub mod core;
pub mod keys;
pub mod storage;

pub use api::create_router;
pub use api::handlers::{AppState, ServiceConfig};
pub use keys::KeyRegistry;
pub use storage::{Checkpoint, CheckpointStore, MemoryStore, StorageError};
