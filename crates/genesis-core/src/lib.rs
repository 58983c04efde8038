//! # Genesis Core
//!
//! Verification kernel for GenesisGraph provenance documents.
//!
//! ## Components
//!
//! - **Merkle engine** ([`merkle`]): RFC 6962 leaf/node hashing, inclusion and
//!   consistency proof verification, and a reference tree for provers
//! - **Witness coordinator** ([`transparency`]): an attestation is anchored
//!   once a quorum of distinct transparency logs prove it
//! - **Lifecycle validator** ([`lifecycle`]): "was this valid at time T" for
//!   entities, tools and attestations, with taint propagation through the
//!   derivation graph
//! - **Delegation validator** ([`delegation`]): linkage, temporal bounds,
//!   typed constraints and policy evidence of a capability chain
//!
//! Every function is a pure function of its inputs and the evaluation time.
//! Findings are collected, not thrown; only resource limits cut a call short.

pub mod config;
pub mod crypto;
pub mod delegation;
pub mod error;
pub mod lifecycle;
pub mod merkle;
pub mod transparency;
pub mod types;

pub use config::{Limits, VerifierConfig};
pub use crypto::{KeyPair, KeyRing, PublicKey, SerializablePublicKey, SignatureVerifier};
pub use delegation::{
    capability_covers, validate_delegation, Constraint, Decision, DelegationChain, DelegationLink,
    DelegationPolicy, DelegationRequest, DelegationResult, PolicyDecision, UsageValue,
};
pub use error::{GenesisError, Result, VerificationError, Warning};
pub use lifecycle::{
    validate_lifecycle, LifecycleOptions, LifecycleReport, LifecycleState, ReplacementSuggestion,
};
pub use merkle::{
    consistency_holds, hash_children, hash_leaf, inclusion_holds, verify_consistency,
    verify_inclusion, MerkleError, MerkleTree,
};
pub use transparency::{verify_transparency, verify_transparency_all, LogResult, Quorum, VerificationResult};
pub use types::{
    Attestation, Entity, EntityRef, Hash, Lifecycle, ProvenanceDocument, Timestamp, Tool, ToolKind,
    TransparencyLogRef, TreeState, ValidityWindow,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
