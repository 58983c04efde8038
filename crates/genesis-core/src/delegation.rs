//! Delegation chain validation
//!
//! A chain is an ordered list of grantor → grantee capability grants from a
//! root authority down to the acting party. The validator checks evidence;
//! it never evaluates policy itself. An external engine's decision is taken
//! as input and only checked for freshness and outcome.
//!
//! Checks, all collected:
//! 1. Linkage: `links[i].grantee_id == links[i + 1].grantor_id`
//! 2. Temporal bounds at the evaluation time
//! 3. Typed constraints against the supplied usage
//! 4. Policy decision freshness and outcome
//! 5. Capability coverage of the final link (and optional attenuation)

use crate::config::{Limits, VerifierConfig, DEFAULT_POLICY_TOLERANCE_SECS};
use crate::error::VerificationError;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// A value of actual usage, compared against constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UsageValue {
    Number(f64),
    Text(String),
    Flag(bool),
}

impl fmt::Display for UsageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageValue::Number(n) => write!(f, "{}", n),
            UsageValue::Text(s) => write!(f, "'{}'", s),
            UsageValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for UsageValue {
    fn from(n: f64) -> Self {
        UsageValue::Number(n)
    }
}

impl From<i64> for UsageValue {
    fn from(n: i64) -> Self {
        UsageValue::Number(n as f64)
    }
}

impl From<&str> for UsageValue {
    fn from(s: &str) -> Self {
        UsageValue::Text(s.to_string())
    }
}

impl From<bool> for UsageValue {
    fn from(b: bool) -> Self {
        UsageValue::Flag(b)
    }
}

/// A limit attached to a delegation link
///
/// Closed set of typed comparisons; anything richer belongs to the
/// external policy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Usage must not exceed `max`
    Threshold { max: f64 },
    /// Usage must lie in `[min, max]`
    Range { min: f64, max: f64 },
    /// Usage must be one of `values`
    OneOf { values: Vec<UsageValue> },
    /// Usage must equal `value`
    Equals { value: UsageValue },
}

impl Constraint {
    /// Check `actual`; on failure returns the reason
    pub fn check(&self, actual: Option<&UsageValue>) -> Result<(), String> {
        let Some(actual) = actual else {
            return Err("no usage value supplied".into());
        };
        match (self, actual) {
            (Constraint::Threshold { max }, UsageValue::Number(n)) => {
                if n <= max {
                    Ok(())
                } else {
                    Err(format!("{} exceeds maximum {}", n, max))
                }
            }
            (Constraint::Range { min, max }, UsageValue::Number(n)) => {
                if n >= min && n <= max {
                    Ok(())
                } else {
                    Err(format!("{} outside range [{}, {}]", n, min, max))
                }
            }
            (Constraint::Threshold { .. } | Constraint::Range { .. }, other) => {
                Err(format!("expected a number, got {}", other))
            }
            (Constraint::OneOf { values }, value) => {
                if values.contains(value) {
                    Ok(())
                } else {
                    Err(format!("{} is not an allowed value", value))
                }
            }
            (Constraint::Equals { value: expected }, value) => {
                if value == expected {
                    Ok(())
                } else {
                    Err(format!("{} does not equal {}", value, expected))
                }
            }
        }
    }
}

/// One capability grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationLink {
    pub grantor_id: String,
    pub grantee_id: String,

    /// Granted capability; `*` and trailing `prefix*` wildcards allowed
    pub capability: String,

    pub issued_at: Timestamp,

    /// `None` means no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, Constraint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<Timestamp>,
}

impl DelegationLink {
    pub fn new(
        grantor_id: impl Into<String>,
        grantee_id: impl Into<String>,
        capability: impl Into<String>,
        issued_at: Timestamp,
    ) -> Self {
        Self {
            grantor_id: grantor_id.into(),
            grantee_id: grantee_id.into(),
            capability: capability.into(),
            issued_at,
            expires_at: None,
            constraints: BTreeMap::new(),
            revoked_at: None,
        }
    }

    pub fn with_expiry(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_revocation(mut self, at: Timestamp) -> Self {
        self.revoked_at = Some(at);
        self
    }

    pub fn with_constraint(mut self, name: impl Into<String>, constraint: Constraint) -> Self {
        self.constraints.insert(name.into(), constraint);
        self
    }

    /// Why this link is unusable at `at`, if it is
    fn temporal_fault(&self, at: Timestamp) -> Option<String> {
        if at < self.issued_at {
            return Some(format!("not issued until {}", self.issued_at));
        }
        if let Some(revoked_at) = self.revoked_at {
            if at >= revoked_at {
                return Some(format!("revoked at {}", revoked_at));
            }
        }
        match self.expires_at {
            Some(expires_at) if at >= expires_at => Some(format!("expired at {}", expires_at)),
            _ => None,
        }
    }
}

/// Ordered chain of grants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegationChain {
    pub links: Vec<DelegationLink>,

    /// Ultimate authority the first grantor must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_authority: Option<String>,
}

impl DelegationChain {
    pub fn new(links: Vec<DelegationLink>) -> Self {
        Self {
            links,
            root_authority: None,
        }
    }

    pub fn with_root_authority(mut self, authority: impl Into<String>) -> Self {
        self.root_authority = Some(authority.into());
        self
    }

    /// Party at the end of the chain
    pub fn holder(&self) -> Option<&str> {
        self.links.last().map(|l| l.grantee_id.as_str())
    }
}

/// Outcome reported by the external policy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Permit,
    Deny,
}

/// Recorded policy evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub evaluated_at: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

impl PolicyDecision {
    pub fn permit(evaluated_at: Timestamp) -> Self {
        Self {
            decision: Decision::Permit,
            evaluated_at,
            policy_id: None,
        }
    }

    pub fn deny(evaluated_at: Timestamp) -> Self {
        Self {
            decision: Decision::Deny,
            evaluated_at,
            policy_id: None,
        }
    }

    pub fn with_policy_id(mut self, id: impl Into<String>) -> Self {
        self.policy_id = Some(id.into());
        self
    }
}

/// The operation being authorized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRequest {
    /// Capability the operation needs
    pub capability: String,

    /// Actual usage, by constraint name
    #[serde(default)]
    pub usage: BTreeMap<String, UsageValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_decision: Option<PolicyDecision>,
}

impl DelegationRequest {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            usage: BTreeMap::new(),
            policy_decision: None,
        }
    }

    pub fn with_usage(mut self, name: impl Into<String>, value: impl Into<UsageValue>) -> Self {
        self.usage.insert(name.into(), value.into());
        self
    }

    pub fn with_policy_decision(mut self, decision: PolicyDecision) -> Self {
        self.policy_decision = Some(decision);
        self
    }
}

/// Caller-configurable knobs of [`validate_delegation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationPolicy {
    pub policy_tolerance_secs: i64,
    pub require_policy_decision: bool,
    pub enforce_attenuation: bool,
    pub max_chain_length: usize,
}

impl Default for DelegationPolicy {
    fn default() -> Self {
        Self {
            policy_tolerance_secs: DEFAULT_POLICY_TOLERANCE_SECS,
            require_policy_decision: false,
            enforce_attenuation: false,
            max_chain_length: Limits::default().max_chain_length,
        }
    }
}

impl DelegationPolicy {
    pub fn with_tolerance_secs(mut self, secs: i64) -> Self {
        self.policy_tolerance_secs = secs;
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

    pub fn with_max_chain_length(mut self, n: usize) -> Self {
        self.max_chain_length = n;
        self
    }
}

impl From<&VerifierConfig> for DelegationPolicy {
    fn from(config: &VerifierConfig) -> Self {
        Self {
            policy_tolerance_secs: config.policy_tolerance_secs,
            require_policy_decision: config.require_policy_decision,
            enforce_attenuation: config.enforce_attenuation,
            max_chain_length: config.limits.max_chain_length,
        }
    }
}

/// Outcome of [`validate_delegation`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationResult {
    pub authorized: bool,
    pub errors: Vec<VerificationError>,
}

impl DelegationResult {
    fn from_errors(errors: Vec<VerificationError>) -> Self {
        Self {
            authorized: errors.is_empty(),
            errors,
        }
    }
}

/// Decide whether `chain` authorized `request` at `at`
pub fn validate_delegation(
    chain: &DelegationChain,
    at: Timestamp,
    request: &DelegationRequest,
    policy: &DelegationPolicy,
) -> DelegationResult {
    let links = &chain.links;
    if links.len() > policy.max_chain_length {
        return DelegationResult::from_errors(vec![VerificationError::resource_limit(
            "delegation chain length",
            links.len(),
            policy.max_chain_length,
        )]);
    }
    if links.is_empty() {
        return DelegationResult::from_errors(vec![VerificationError::EmptyChain]);
    }

    let mut errors = Vec::new();
    check_linkage(chain, &mut errors);
    check_links(links, at, request, policy, &mut errors);
    check_policy_decision(request.policy_decision.as_ref(), at, policy, &mut errors);

    if let Some(last) = links.last() {
        if !capability_covers(&last.capability, &request.capability) {
            errors.push(VerificationError::CapabilityMismatch {
                requested: request.capability.clone(),
                granted: last.capability.clone(),
            });
        }
    }

    let result = DelegationResult::from_errors(errors);
    debug!(
        links = links.len(),
        capability = %request.capability,
        authorized = result.authorized,
        "Delegation validation complete"
    );
    result
}

fn check_linkage(chain: &DelegationChain, errors: &mut Vec<VerificationError>) {
    if let (Some(root), Some(first)) = (&chain.root_authority, chain.links.first()) {
        if &first.grantor_id != root {
            warn!(expected = %root, actual = %first.grantor_id, "SECURITY: delegation chain does not start at root authority");
            errors.push(VerificationError::BrokenChain {
                index: 0,
                expected: root.clone(),
                actual: first.grantor_id.clone(),
            });
        }
    }

    for (i, pair) in chain.links.windows(2).enumerate() {
        if pair[0].grantee_id != pair[1].grantor_id {
            warn!(
                index = i + 1,
                expected = %pair[0].grantee_id,
                actual = %pair[1].grantor_id,
                "SECURITY: broken delegation chain"
            );
            errors.push(VerificationError::BrokenChain {
                index: i + 1,
                expected: pair[0].grantee_id.clone(),
                actual: pair[1].grantor_id.clone(),
            });
        }
    }
}

fn check_links(
    links: &[DelegationLink],
    at: Timestamp,
    request: &DelegationRequest,
    policy: &DelegationPolicy,
    errors: &mut Vec<VerificationError>,
) {
    for (i, link) in links.iter().enumerate() {
        if let Some(reason) = link.temporal_fault(at) {
            errors.push(VerificationError::LinkExpiredOrRevoked { index: i, reason });
        }

        for (name, constraint) in &link.constraints {
            if let Err(reason) = constraint.check(request.usage.get(name)) {
                errors.push(VerificationError::ConstraintViolated {
                    index: i,
                    constraint: name.clone(),
                    reason,
                });
            }
        }

        if policy.enforce_attenuation && i > 0 {
            let parent = &links[i - 1].capability;
            if !capability_covers(parent, &link.capability) {
                warn!(
                    index = i,
                    capability = %link.capability,
                    parent = %parent,
                    "SECURITY: delegation escalates capability"
                );
                errors.push(VerificationError::CapabilityEscalation {
                    index: i,
                    capability: link.capability.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }
}

fn check_policy_decision(
    decision: Option<&PolicyDecision>,
    at: Timestamp,
    policy: &DelegationPolicy,
    errors: &mut Vec<VerificationError>,
) {
    let Some(decision) = decision else {
        if policy.require_policy_decision {
            errors.push(VerificationError::MissingPolicyDecision);
        }
        return;
    };

    let skew_ms = (decision.evaluated_at - at).num_milliseconds().abs();
    if skew_ms > policy.policy_tolerance_secs.saturating_mul(1000) {
        errors.push(VerificationError::StalePolicyDecision {
            evaluated_at: decision.evaluated_at,
            at_time: at,
            tolerance_secs: policy.policy_tolerance_secs,
        });
    }
    if decision.decision == Decision::Deny {
        errors.push(VerificationError::PolicyDenied {
            policy_id: decision.policy_id.clone(),
        });
    }
}

/// Whether `granted` covers `requested`
///
/// - `*` covers everything
/// - `read:*` covers `read:claims:123`
/// - otherwise an exact match is required
pub fn capability_covers(granted: &str, requested: &str) -> bool {
    if granted == "*" || granted == requested {
        return true;
    }
    match granted.strip_suffix('*') {
        Some(prefix) => requested.starts_with(prefix),
        None => false,
    }
}
