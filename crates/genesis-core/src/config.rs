//! Verifier configuration
//!
//! [`Limits`] bound the work a single call may do; every validator checks
//! them before touching the input. [`VerifierConfig`] carries the defaults a
//! caller would otherwise pass on each call.

use crate::error::{GenesisError, Result};
use crate::merkle::MAX_PROOF_NODES;
use serde::{Deserialize, Serialize};

/// Maximum byte length of a transparency log id
pub const MAX_LOG_ID_LENGTH: usize = 256;

/// Default tolerance between a policy decision and the evaluation time
pub const DEFAULT_POLICY_TOLERANCE_SECS: i64 = 300;

/// Resource bounds checked before processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Nodes per inclusion or consistency proof (never above 64)
    pub max_proof_nodes: usize,

    /// Links per delegation chain
    pub max_chain_length: usize,

    /// Transparency references per attestation
    pub max_transparency_entries: usize,

    /// Hops followed when resolving replacements
    pub max_replacement_depth: usize,

    /// Bytes per log id
    pub max_log_id_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_proof_nodes: MAX_PROOF_NODES,
            max_chain_length: 32,
            max_transparency_entries: 16,
            max_replacement_depth: 8,
            max_log_id_length: MAX_LOG_ID_LENGTH,
        }
    }
}

impl Limits {
    pub fn with_max_proof_nodes(mut self, n: usize) -> Self {
        self.max_proof_nodes = n;
        self
    }

    pub fn with_max_chain_length(mut self, n: usize) -> Self {
        self.max_chain_length = n;
        self
    }

    pub fn with_max_transparency_entries(mut self, n: usize) -> Self {
        self.max_transparency_entries = n;
        self
    }

    pub fn with_max_replacement_depth(mut self, n: usize) -> Self {
        self.max_replacement_depth = n;
        self
    }

    /// Reject limits that are zero or above the hard proof ceiling
    pub fn validate(&self) -> Result<()> {
        if self.max_proof_nodes == 0 || self.max_proof_nodes > MAX_PROOF_NODES {
            return Err(GenesisError::InvalidConfig(format!(
                "max_proof_nodes must be in 1..={}, got {}",
                MAX_PROOF_NODES, self.max_proof_nodes
            )));
        }
        if self.max_chain_length == 0 {
            return Err(GenesisError::InvalidConfig(
                "max_chain_length must be positive".into(),
            ));
        }
        if self.max_transparency_entries == 0 {
            return Err(GenesisError::InvalidConfig(
                "max_transparency_entries must be positive".into(),
            ));
        }
        if self.max_log_id_length == 0 {
            return Err(GenesisError::InvalidConfig(
                "max_log_id_length must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Defaults applied by callers that do not pass explicit options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub limits: Limits,

    /// Distinct logs required to anchor an attestation
    pub quorum: usize,

    /// Allowed distance between a policy decision and the evaluation time
    pub policy_tolerance_secs: i64,

    /// Treat warnings as failures
    pub strict: bool,

    /// Suggest replacements for revoked and expired records
    pub resolve_replacements: bool,

    /// Fail delegations that carry no policy decision
    pub require_policy_decision: bool,

    /// Require each link to be covered by its predecessor's capability
    pub enforce_attenuation: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            quorum: 1,
            policy_tolerance_secs: DEFAULT_POLICY_TOLERANCE_SECS,
            strict: false,
            resolve_replacements: false,
            require_policy_decision: false,
            enforce_attenuation: false,
        }
    }
}

impl VerifierConfig {
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_policy_tolerance_secs(mut self, secs: i64) -> Self {
        self.policy_tolerance_secs = secs;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_resolve_replacements(mut self, resolve: bool) -> Self {
        self.resolve_replacements = resolve;
        self
    }

    pub fn with_require_policy_decision(mut self, require: bool) -> Self {
        self.require_policy_decision = require;
        self
    }

    pub fn with_enforce_attenuation(mut self, enforce: bool) -> Self {
        self.enforce_attenuation = enforce;
        self
    }

    /// Check every field; used by the service at startup
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        if self.quorum == 0 {
            return Err(GenesisError::InvalidConfig("quorum must be positive".into()));
        }
        if self.policy_tolerance_secs < 0 {
            return Err(GenesisError::InvalidConfig(
                "policy_tolerance_secs must not be negative".into(),
            ));
        }
        Ok(())
    }
}
