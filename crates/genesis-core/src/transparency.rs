//! Multi-witness transparency anchoring
//!
//! An attestation is *anchored* when enough distinct transparency logs prove
//! that its payload was logged. Each reference is checked with the Merkle
//! engine: inclusion against the claimed root, and when a tree state for the
//! same log was seen before, consistency from that state to the new one.
//!
//! Counting is by distinct `log_id`: a log that appears twice still counts
//! once, so one compromised log cannot satisfy a multi-witness quorum alone.

use crate::config::Limits;
use crate::error::{GenesisError, Result, VerificationError};
use crate::merkle::{decode_proof, verify_consistency, verify_inclusion, MerkleError};
use crate::types::{Attestation, Hash, TransparencyLogRef, TreeState};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Maximum length of a textual entry id
pub const MAX_ENTRY_ID_LENGTH: usize = 128;

/// How many distinct logs must verify
///
/// Deserializes from a bare count (`2`), `"all"`, or `{"at_least": 2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "QuorumRepr")]
pub enum Quorum {
    /// Every reference must verify
    All,
    /// At least this many distinct logs must verify
    AtLeast(usize),
}

impl Default for Quorum {
    fn default() -> Self {
        Quorum::AtLeast(1)
    }
}

impl From<usize> for Quorum {
    fn from(n: usize) -> Self {
        Quorum::AtLeast(n)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuorumRepr {
    Count(usize),
    Named(NamedQuorum),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum NamedQuorum {
    All,
    AtLeast(usize),
}

impl From<QuorumRepr> for Quorum {
    fn from(repr: QuorumRepr) -> Self {
        match repr {
            QuorumRepr::Count(n) | QuorumRepr::Named(NamedQuorum::AtLeast(n)) => Quorum::AtLeast(n),
            QuorumRepr::Named(NamedQuorum::All) => Quorum::All,
        }
    }
}

/// Outcome for one transparency reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogResult {
    pub log_id: String,
    pub entry_index: u64,
    pub tree_size: u64,

    /// Root the inclusion proof was checked against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_hash: Option<Hash>,

    pub verified: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<VerificationError>,
}

/// Outcome of [`verify_transparency`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub anchored: bool,

    /// One entry per reference, in input order
    pub per_log_results: Vec<LogResult>,

    /// Every finding across all references
    pub errors: Vec<VerificationError>,
}

impl VerificationResult {
    fn rejected(error: VerificationError) -> Self {
        Self {
            anchored: false,
            per_log_results: Vec::new(),
            errors: vec![error],
        }
    }

    /// Distinct log ids with at least one verified reference
    pub fn verified_logs(&self) -> BTreeSet<&str> {
        self.per_log_results
            .iter()
            .filter(|r| r.verified)
            .map(|r| r.log_id.as_str())
            .collect()
    }

    /// Tree states proven by verified references, largest per log
    pub fn observed_states(&self) -> BTreeMap<String, TreeState> {
        let mut states: BTreeMap<String, TreeState> = BTreeMap::new();
        for result in self.per_log_results.iter().filter(|r| r.verified) {
            let Some(root) = result.root_hash else {
                continue;
            };
            let candidate = TreeState::new(result.tree_size, root);
            states
                .entry(result.log_id.clone())
                .and_modify(|s| {
                    if candidate.tree_size > s.tree_size {
                        *s = candidate;
                    }
                })
                .or_insert(candidate);
        }
        states
    }
}

/// Decide whether `attestation` is anchored in at least `quorum` distinct logs
///
/// `known` holds previously observed tree states per log; references to
/// those logs must be consistent with them.
pub fn verify_transparency(
    attestation: &Attestation,
    known: &BTreeMap<String, TreeState>,
    quorum: Quorum,
    limits: &Limits,
) -> VerificationResult {
    verify_transparency_all(&[attestation], known, quorum, limits)
        .pop()
        .unwrap_or_default()
}

/// Verify several attestations as one set of observations
///
/// Every pair of tree states seen for one log, whether in one attestation
/// or across attestations, must be consistent. References are checked in
/// ascending tree size: each one is verified against the largest state
/// already proven for its log (from `known` or an earlier reference), so a
/// larger reference must carry a consistency proof from that state. When
/// two references to a log disagree, every reference to that log fails.
///
/// Returns one result per attestation, in input order.
pub fn verify_transparency_all(
    attestations: &[&Attestation],
    known: &BTreeMap<String, TreeState>,
    quorum: Quorum,
    limits: &Limits,
) -> Vec<VerificationResult> {
    let rejections: Vec<Option<VerificationError>> = attestations
        .iter()
        .map(|attestation| check_limits(attestation, quorum, limits))
        .collect();

    let mut pending: Vec<(usize, usize)> = attestations
        .iter()
        .enumerate()
        .filter(|(a, _)| rejections[*a].is_none())
        .flat_map(|(a, attestation)| (0..attestation.transparency_entries.len()).map(move |e| (a, e)))
        .collect();
    pending.sort_by_key(|&(a, e)| attestations[a].transparency_entries[e].tree_size);

    let leaves: Vec<Hash> = attestations.iter().map(|a| a.leaf_hash()).collect();
    let mut slots: Vec<Vec<Option<LogResult>>> = attestations
        .iter()
        .map(|a| vec![None; a.transparency_entries.len()])
        .collect();
    let mut proven: BTreeMap<&str, TreeState> = BTreeMap::new();
    let mut forked: BTreeSet<&str> = BTreeSet::new();

    for (a, e) in pending {
        let entry = &attestations[a].transparency_entries[e];
        let earlier = proven.get(entry.log_id.as_str()).copied();
        let base = earlier.or_else(|| known.get(&entry.log_id).copied());

        let mut result = verify_entry(&leaves[a], entry, base.as_ref());
        if let (Some(root), Some(state)) = (result.root_hash, base.as_ref()) {
            if let Some(err) = check_against_known(entry, &root, state, &entry.log_id) {
                result.errors.push(err);
                if earlier.is_some() {
                    forked.insert(entry.log_id.as_str());
                }
            }
        }
        result.verified = result.errors.is_empty();
        debug!(
            log_id = %entry.log_id,
            index = entry.entry_index,
            tree_size = entry.tree_size,
            verified = result.verified,
            "Checked transparency reference"
        );

        if let (true, Some(root)) = (result.verified, result.root_hash) {
            proven.insert(entry.log_id.as_str(), TreeState::new(entry.tree_size, root));
        }
        slots[a][e] = Some(result);
    }

    for log_id in &forked {
        warn!(log_id = %log_id, "SECURITY: transparency log presented inconsistent views");
    }

    attestations
        .iter()
        .zip(rejections)
        .zip(slots)
        .map(|((attestation, rejection), slots)| {
            if let Some(err) = rejection {
                return VerificationResult::rejected(err);
            }
            let mut per_log_results: Vec<LogResult> = slots.into_iter().flatten().collect();
            for result in per_log_results.iter_mut() {
                if result.verified && forked.contains(result.log_id.as_str()) {
                    result.verified = false;
                    result.errors.push(VerificationError::ProofInvalid {
                        context: result.log_id.clone(),
                        reason: "another reference to this log is inconsistent with this one".into(),
                    });
                }
            }
            summarize(attestation, per_log_results, quorum)
        })
        .collect()
}

fn check_limits(attestation: &Attestation, quorum: Quorum, limits: &Limits) -> Option<VerificationError> {
    let entries = &attestation.transparency_entries;
    if entries.len() > limits.max_transparency_entries {
        return Some(VerificationError::resource_limit(
            "transparency entries",
            entries.len(),
            limits.max_transparency_entries,
        ));
    }
    if let Some(err) = entries.iter().find_map(|entry| check_entry_limits(entry, limits)) {
        return Some(err);
    }
    if let Quorum::AtLeast(0) = quorum {
        return Some(VerificationError::InvalidQuorum { quorum: 0 });
    }
    None
}

fn summarize(attestation: &Attestation, per_log_results: Vec<LogResult>, quorum: Quorum) -> VerificationResult {
    let distinct_verified = per_log_results
        .iter()
        .filter(|r| r.verified)
        .map(|r| r.log_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    let anchored = match quorum {
        Quorum::All => !per_log_results.is_empty() && per_log_results.iter().all(|r| r.verified),
        Quorum::AtLeast(n) => distinct_verified >= n,
    };

    debug!(
        signer = %attestation.signer_id,
        references = per_log_results.len(),
        distinct_verified,
        anchored,
        "Transparency verification complete"
    );

    let errors = per_log_results
        .iter()
        .flat_map(|r| r.errors.iter().cloned())
        .collect();

    VerificationResult {
        anchored,
        per_log_results,
        errors,
    }
}

fn check_entry_limits(entry: &TransparencyLogRef, limits: &Limits) -> Option<VerificationError> {
    if entry.log_id.len() > limits.max_log_id_length {
        return Some(VerificationError::resource_limit(
            "log id length",
            entry.log_id.len(),
            limits.max_log_id_length,
        ));
    }
    if entry.inclusion_proof.len() > limits.max_proof_nodes {
        return Some(VerificationError::resource_limit(
            format!("inclusion proof nodes ({})", entry.log_id),
            entry.inclusion_proof.len(),
            limits.max_proof_nodes,
        ));
    }
    match &entry.consistency_proof {
        Some(proof) if proof.len() > limits.max_proof_nodes => {
            Some(VerificationError::resource_limit(
                format!("consistency proof nodes ({})", entry.log_id),
                proof.len(),
                limits.max_proof_nodes,
            ))
        }
        _ => None,
    }
}

/// Resolve the root and check inclusion; `base` supplies a missing root
fn verify_entry(leaf: &Hash, entry: &TransparencyLogRef, base: Option<&TreeState>) -> LogResult {
    let mut result = LogResult {
        log_id: entry.log_id.clone(),
        entry_index: entry.entry_index,
        tree_size: entry.tree_size,
        root_hash: None,
        verified: false,
        errors: Vec::new(),
    };

    if entry.log_id.is_empty() {
        result.errors.push(VerificationError::MalformedProof {
            context: "<unnamed log>".into(),
            reason: "missing log id".into(),
        });
        return result;
    }
    let context = entry.log_id.clone();

    let root = match (entry.root_hash, base) {
        (Some(root), _) => root,
        (None, Some(state)) if state.tree_size == entry.tree_size => state.root_hash,
        _ => {
            result.errors.push(VerificationError::MalformedProof {
                context,
                reason: format!("no root hash available for tree size {}", entry.tree_size),
            });
            return result;
        }
    };
    result.root_hash = Some(root);

    if let Err(err) = verify_inclusion(
        leaf,
        entry.entry_index,
        entry.tree_size,
        &entry.inclusion_proof,
        &root,
    ) {
        if matches!(err, MerkleError::ProofInvalid(_)) {
            warn!(log_id = %entry.log_id, index = entry.entry_index, error = %err, "Inclusion proof rejected");
        }
        result.errors.push(err.into_finding(context));
    }
    result
}

fn check_against_known(
    entry: &TransparencyLogRef,
    root: &Hash,
    state: &TreeState,
    context: &str,
) -> Option<VerificationError> {
    if entry.tree_size < state.tree_size {
        warn!(
            log_id = %entry.log_id,
            known = state.tree_size,
            claimed = entry.tree_size,
            "SECURITY: transparency log tree size regressed"
        );
        return Some(VerificationError::InvalidTreeSize {
            context: context.to_string(),
            reason: format!(
                "tree size {} is smaller than previously observed size {}",
                entry.tree_size, state.tree_size
            ),
        });
    }

    if entry.tree_size == state.tree_size {
        if !root.ct_eq(&state.root_hash) {
            warn!(
                log_id = %entry.log_id,
                tree_size = entry.tree_size,
                "SECURITY: transparency log presented two roots for one tree size"
            );
            return Some(VerificationError::ProofInvalid {
                context: context.to_string(),
                reason: format!(
                    "root {} differs from previously observed root {} at size {}",
                    root, state.root_hash, state.tree_size
                ),
            });
        }
        return None;
    }

    let Some(proof) = &entry.consistency_proof else {
        return Some(VerificationError::MalformedProof {
            context: context.to_string(),
            reason: format!(
                "consistency proof from size {} to {} is required",
                state.tree_size, entry.tree_size
            ),
        });
    };

    match verify_consistency(state.tree_size, entry.tree_size, &state.root_hash, root, proof) {
        Ok(()) => None,
        Err(err) => {
            warn!(
                log_id = %entry.log_id,
                from = state.tree_size,
                to = entry.tree_size,
                error = %err,
                "SECURITY: transparency log consistency check failed"
            );
            Some(err.into_finding(context))
        }
    }
}

/// Parse an entry id given as decimal or `0x` hex
pub fn parse_entry_index(entry_id: &str) -> Result<u64> {
    if entry_id.len() > MAX_ENTRY_ID_LENGTH {
        return Err(GenesisError::InvalidEntry(format!(
            "entry id too long: {} (max {})",
            entry_id.len(),
            MAX_ENTRY_ID_LENGTH
        )));
    }
    let parsed = match entry_id
        .strip_prefix("0x")
        .or_else(|| entry_id.strip_prefix("0X"))
    {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
        None => entry_id.parse::<u64>(),
    };
    parsed.map_err(|e| GenesisError::InvalidEntry(format!("invalid entry id '{}': {}", entry_id, e)))
}

/// Decode a base64 proof (optionally prefixed `base64:`) into nodes
pub fn decode_proof_base64(encoded: &str) -> Result<Vec<Hash>> {
    let encoded = encoded.strip_prefix("base64:").unwrap_or(encoded);
    let bytes = STANDARD.decode(encoded)?;
    decode_proof(&bytes).map_err(|e| GenesisError::InvalidEntry(e.to_string()))
}

/// Transparency reference in the textual form found in documents
///
/// `entry_id` is decimal or `0x` hex, proofs are base64 concatenations of
/// 32-byte nodes and the root may carry a `sha256:` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedLogRef {
    pub log_id: String,
    pub entry_id: String,
    pub tree_size: u64,
    pub inclusion_proof: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency_proof: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_hash: Option<String>,
}

impl EncodedLogRef {
    /// Decode into a typed reference
    pub fn decode(&self) -> Result<TransparencyLogRef> {
        if self.log_id.is_empty() {
            return Err(GenesisError::InvalidEntry("missing log_id".into()));
        }
        if self.tree_size == 0 {
            return Err(GenesisError::InvalidEntry("tree_size must be positive".into()));
        }
        Ok(TransparencyLogRef {
            log_id: self.log_id.clone(),
            entry_index: parse_entry_index(&self.entry_id)?,
            tree_size: self.tree_size,
            inclusion_proof: decode_proof_base64(&self.inclusion_proof)?,
            consistency_proof: self
                .consistency_proof
                .as_deref()
                .map(decode_proof_base64)
                .transpose()?,
            root_hash: self.root_hash.as_deref().map(Hash::from_hex).transpose()?,
        })
    }
}

impl TryFrom<&EncodedLogRef> for TransparencyLogRef {
    type Error = GenesisError;

    fn try_from(encoded: &EncodedLogRef) -> Result<Self> {
        encoded.decode()
    }
}
