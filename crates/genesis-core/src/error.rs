//! Error types for the GenesisGraph verifier
//!
//! Two families live here:
//!
//! - [`GenesisError`] is the operational error returned through [`Result`]
//!   when input cannot even be interpreted (bad encodings, bad keys, bad
//!   configuration).
//! - [`VerificationError`] and [`Warning`] are *findings*. Validators never
//!   stop at the first finding; they collect every one of them into a report.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using GenesisError
pub type Result<T> = std::result::Result<T, GenesisError>;

/// Errors raised while decoding or preparing verification input
#[derive(Error, Debug)]
pub enum GenesisError {
    /// Malformed `id@version` reference
    #[error("Invalid entity reference: {0}")]
    InvalidReference(String),

    /// Hash with the wrong length or encoding
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    /// Malformed transparency log entry
    #[error("Invalid transparency entry: {0}")]
    InvalidEntry(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Signer has no registered key
    #[error("Unknown signer: {0}")]
    UnknownSigner(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for GenesisError {
    fn from(err: serde_json::Error) -> Self {
        GenesisError::SerializationError(err.to_string())
    }
}

impl From<hex::FromHexError> for GenesisError {
    fn from(err: hex::FromHexError) -> Self {
        GenesisError::InvalidHash(err.to_string())
    }
}

impl From<base64::DecodeError> for GenesisError {
    fn from(err: base64::DecodeError) -> Self {
        GenesisError::SerializationError(format!("invalid base64: {}", err))
    }
}

impl From<ed25519_dalek::SignatureError> for GenesisError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        GenesisError::CryptoError(err.to_string())
    }
}

/// A hard verification failure
///
/// Every variant is recoverable by the caller. Reports carry complete lists
/// of these, except for [`VerificationError::ResourceLimitExceeded`], which
/// aborts the call before any work is done.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationError {
    /// Proof material could not be interpreted (bad lengths, missing roots)
    #[error("Malformed proof for {context}: {reason}")]
    MalformedProof { context: String, reason: String },

    /// Proof was well-formed but did not reconstruct the claimed root(s)
    #[error("Proof invalid for {context}: {reason}")]
    ProofInvalid { context: String, reason: String },

    /// Proof exceeds the hard node ceiling
    #[error("Proof for {context} too large: {nodes} nodes (max {max})")]
    ProofTooLarge {
        context: String,
        nodes: usize,
        max: usize,
    },

    /// Tree size is zero, out of order, or regressed
    #[error("Invalid tree size for {context}: {reason}")]
    InvalidTreeSize { context: String, reason: String },

    /// Grantee of one link is not the grantor of the next (or root mismatch)
    #[error("Broken delegation chain at link {index}: expected grantor '{expected}', got '{actual}'")]
    BrokenChain {
        index: usize,
        expected: String,
        actual: String,
    },

    /// Link was not yet issued, already expired, or revoked at evaluation time
    #[error("Delegation link {index} not valid at evaluation time: {reason}")]
    LinkExpiredOrRevoked { index: usize, reason: String },

    /// Usage does not satisfy a link constraint
    #[error("Constraint '{constraint}' on link {index} violated: {reason}")]
    ConstraintViolated {
        index: usize,
        constraint: String,
        reason: String,
    },

    /// Policy decision was evaluated too far from the evaluation time
    #[error("Policy decision evaluated at {evaluated_at} is stale for {at_time} (tolerance {tolerance_secs}s)")]
    StalePolicyDecision {
        evaluated_at: Timestamp,
        at_time: Timestamp,
        tolerance_secs: i64,
    },

    /// Derivation graph contains a cycle
    #[error("Cyclic derivation among: {}", members.join(", "))]
    CyclicDerivation { members: Vec<String> },

    /// Record did not exist (or was not yet active) at evaluation time
    #[error("{record} not valid until {activates_at}")]
    NotYetCreated {
        record: String,
        activates_at: Timestamp,
    },

    /// Record was revoked at or before evaluation time
    #[error("{record} revoked at {revoked_at}{}", reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Revoked {
        record: String,
        revoked_at: Timestamp,
        reason: Option<String>,
    },

    /// Record expired at or before evaluation time
    #[error("{record} expired at {expired_at}")]
    Expired {
        record: String,
        expired_at: Timestamp,
    },

    /// Input exceeds a configured bound
    #[error("Resource limit exceeded for {resource}: {actual} > {limit}")]
    ResourceLimitExceeded {
        resource: String,
        actual: usize,
        limit: usize,
    },

    /// Quorum of zero witnesses requested
    #[error("Invalid quorum: {quorum}")]
    InvalidQuorum { quorum: usize },

    /// Delegation chain has no links
    #[error("Delegation chain is empty")]
    EmptyChain,

    /// Final link does not grant the requested capability
    #[error("Capability '{requested}' not granted by final link capability '{granted}'")]
    CapabilityMismatch { requested: String, granted: String },

    /// Link grants more than its predecessor holds
    #[error("Link {index} capability '{capability}' exceeds predecessor capability '{parent}'")]
    CapabilityEscalation {
        index: usize,
        capability: String,
        parent: String,
    },

    /// External policy engine denied the operation
    #[error("Policy decision denied{}", policy_id.as_deref().map(|p| format!(" by {}", p)).unwrap_or_default())]
    PolicyDenied { policy_id: Option<String> },

    /// A policy decision is required but none was supplied
    #[error("Policy decision required but missing")]
    MissingPolicyDecision,

    /// Two records share the same identity
    #[error("Duplicate record: {record}")]
    DuplicateRecord { record: String },
}

impl VerificationError {
    /// Stable snake_case name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationError::MalformedProof { .. } => "malformed_proof",
            VerificationError::ProofInvalid { .. } => "proof_invalid",
            VerificationError::ProofTooLarge { .. } => "proof_too_large",
            VerificationError::InvalidTreeSize { .. } => "invalid_tree_size",
            VerificationError::BrokenChain { .. } => "broken_chain",
            VerificationError::LinkExpiredOrRevoked { .. } => "link_expired_or_revoked",
            VerificationError::ConstraintViolated { .. } => "constraint_violated",
            VerificationError::StalePolicyDecision { .. } => "stale_policy_decision",
            VerificationError::CyclicDerivation { .. } => "cyclic_derivation",
            VerificationError::NotYetCreated { .. } => "not_yet_created",
            VerificationError::Revoked { .. } => "revoked",
            VerificationError::Expired { .. } => "expired",
            VerificationError::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
            VerificationError::InvalidQuorum { .. } => "invalid_quorum",
            VerificationError::EmptyChain => "empty_chain",
            VerificationError::CapabilityMismatch { .. } => "capability_mismatch",
            VerificationError::CapabilityEscalation { .. } => "capability_escalation",
            VerificationError::PolicyDenied { .. } => "policy_denied",
            VerificationError::MissingPolicyDecision => "missing_policy_decision",
            VerificationError::DuplicateRecord { .. } => "duplicate_record",
        }
    }

    /// Whether this error aborted the call before processing
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, VerificationError::ResourceLimitExceeded { .. })
    }

    pub(crate) fn resource_limit(resource: impl Into<String>, actual: usize, limit: usize) -> Self {
        VerificationError::ResourceLimitExceeded {
            resource: resource.into(),
            actual,
            limit,
        }
    }
}

/// Advisory finding; never fails a report unless strict mode is on
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Record is deprecated but still usable
    #[error("{record} deprecated since {deprecated_at}")]
    Deprecated {
        record: String,
        deprecated_at: Timestamp,
    },

    /// Record derives (transitively) from an invalid record
    #[error("{record} tainted by {}", sources.join(", "))]
    Tainted { record: String, sources: Vec<String> },
}

impl Warning {
    /// The record this warning is about
    pub fn record(&self) -> &str {
        match self {
            Warning::Deprecated { record, .. } | Warning::Tainted { record, .. } => record,
        }
    }
}
