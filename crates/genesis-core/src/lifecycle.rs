//! Point-in-time lifecycle validation
//!
//! Every question here is "was this record valid at time T", with T passed
//! by the caller. Revocation applies from `revoked_at` onward and never
//! reaches back before it.
//!
//! Entities are held in an arena keyed by `id@version`. The derivation graph
//! is sorted once (Kahn) and taint flows from invalid entities to everything
//! derived from them in a single pass over that order. A cycle is reported
//! as a hard error; its members and their descendants cannot be ordered and
//! carry no taint findings.

use crate::config::{Limits, VerifierConfig};
use crate::error::{VerificationError, Warning};
use crate::types::{Attestation, Entity, EntityRef, Lifecycle, ProvenanceDocument, Timestamp, Tool};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

/// State of a lifecycle-bearing record at a given time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Active,
    Deprecated,
    Revoked,
    Expired,
}

impl LifecycleState {
    /// Revoked and Expired admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Revoked | LifecycleState::Expired)
    }

    /// Active or Deprecated
    pub fn is_usable(&self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::Deprecated)
    }
}

/// Result of evaluating one record at one time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub state: LifecycleState,
    pub error: Option<VerificationError>,
    pub warning: Option<Warning>,
}

impl Evaluation {
    fn ok(state: LifecycleState) -> Self {
        Self {
            state,
            error: None,
            warning: None,
        }
    }

    fn failed(state: LifecycleState, error: VerificationError) -> Self {
        Self {
            state,
            error: Some(error),
            warning: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Evaluate a lifecycle at `at`; `record` labels any finding
pub fn evaluate(lifecycle: &Lifecycle, record: &str, at: Timestamp) -> Evaluation {
    if at < lifecycle.created_at {
        return Evaluation::failed(
            LifecycleState::Created,
            VerificationError::NotYetCreated {
                record: record.to_string(),
                activates_at: lifecycle.created_at,
            },
        );
    }
    if let Some(valid_from) = lifecycle.valid_from {
        if at < valid_from {
            return Evaluation::failed(
                LifecycleState::Created,
                VerificationError::NotYetCreated {
                    record: record.to_string(),
                    activates_at: valid_from,
                },
            );
        }
    }
    if let Some(revoked_at) = lifecycle.revoked_at {
        if at >= revoked_at {
            return Evaluation::failed(
                LifecycleState::Revoked,
                VerificationError::Revoked {
                    record: record.to_string(),
                    revoked_at,
                    reason: lifecycle.revocation_reason.clone(),
                },
            );
        }
    }
    if let Some(valid_until) = lifecycle.valid_until {
        if at >= valid_until {
            return Evaluation::failed(
                LifecycleState::Expired,
                VerificationError::Expired {
                    record: record.to_string(),
                    expired_at: valid_until,
                },
            );
        }
    }
    if let Some(deprecated_at) = lifecycle.deprecated_at {
        if at >= deprecated_at {
            return Evaluation {
                state: LifecycleState::Deprecated,
                error: None,
                warning: Some(Warning::Deprecated {
                    record: record.to_string(),
                    deprecated_at,
                }),
            };
        }
    }
    Evaluation::ok(LifecycleState::Active)
}

/// Evaluate an entity at `at`
pub fn evaluate_entity(entity: &Entity, at: Timestamp) -> Evaluation {
    evaluate(&entity.lifecycle, &entity.reference().to_string(), at)
}

/// Evaluate a tool at `at`, including its license window
///
/// Revocation findings name the tool's CVEs.
pub fn evaluate_tool(tool: &Tool, at: Timestamp) -> Evaluation {
    let label = tool_label(tool);
    let mut lifecycle = tool.lifecycle.clone();
    if !tool.cve_ids.is_empty() {
        let cves = tool.cve_ids.join(", ");
        lifecycle.revocation_reason = Some(match lifecycle.revocation_reason.take() {
            Some(reason) => format!("{} ({})", reason, cves),
            None => cves,
        });
    }

    let base = evaluate(&lifecycle, &label, at);
    if !base.is_valid() {
        return base;
    }

    if let Some(window) = &tool.license_window {
        if let Some(from) = window.valid_from {
            if at < from {
                return Evaluation::failed(
                    LifecycleState::Created,
                    VerificationError::NotYetCreated {
                        record: format!("{} license", label),
                        activates_at: from,
                    },
                );
            }
        }
        if let Some(until) = window.valid_until {
            if at >= until {
                return Evaluation::failed(
                    LifecycleState::Expired,
                    VerificationError::Expired {
                        record: format!("{} license", label),
                        expired_at: until,
                    },
                );
            }
        }
    }
    base
}

/// Evaluate an attestation at `at` (`issued_at` plays the role of creation)
pub fn evaluate_attestation(attestation: &Attestation, at: Timestamp) -> Evaluation {
    let lifecycle = Lifecycle {
        created_at: attestation.issued_at,
        valid_from: None,
        deprecated_at: None,
        revoked_at: attestation.revoked_at,
        revocation_reason: attestation.revocation_reason.clone(),
        valid_until: attestation.expires_at,
        replacement: None,
    };
    evaluate(&lifecycle, &attestation.label(), at)
}

fn tool_label(tool: &Tool) -> String {
    format!("tool:{}", tool.reference())
}

/// Options for [`validate_lifecycle`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Follow `replacement` links of revoked and expired records
    pub resolve_replacements: bool,
    pub limits: Limits,
}

impl LifecycleOptions {
    pub fn with_resolve_replacements(mut self, resolve: bool) -> Self {
        self.resolve_replacements = resolve;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

impl From<&VerifierConfig> for LifecycleOptions {
    fn from(config: &VerifierConfig) -> Self {
        Self {
            resolve_replacements: config.resolve_replacements,
            limits: config.limits,
        }
    }
}

/// Kind of record a finding is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Entity,
    Tool,
    Attestation,
}

/// A record that is not valid at the evaluation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidRecord {
    pub record: String,
    pub kind: RecordKind,
    pub state: LifecycleState,
}

/// Substitute suggested for a revoked or expired record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementSuggestion {
    /// The revoked or expired record
    pub record: String,

    /// Replacements followed, in order
    pub chain: Vec<EntityRef>,

    /// First replacement valid at the evaluation time, if any
    pub suggested: Option<EntityRef>,
}

/// Outcome of [`validate_lifecycle`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub invalid_records: Vec<InvalidRecord>,

    /// Entities derived (transitively) from an invalid entity
    pub tainted_records: Vec<String>,

    /// Deprecation and taint warnings
    pub warnings: Vec<Warning>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replacements: Vec<ReplacementSuggestion>,

    /// Every hard finding, including one per invalid record
    pub errors: Vec<VerificationError>,
}

impl LifecycleReport {
    /// No hard errors; with `strict`, no warnings either
    pub fn passed(&self, strict: bool) -> bool {
        self.errors.is_empty() && self.invalid_records.is_empty() && (!strict || self.warnings.is_empty())
    }

    fn record(&mut self, record: String, kind: RecordKind, eval: Evaluation) {
        if let Some(warning) = eval.warning {
            self.warnings.push(warning);
        }
        if let Some(error) = eval.error {
            self.invalid_records.push(InvalidRecord {
                record,
                kind,
                state: eval.state,
            });
            self.errors.push(error);
        }
    }
}

/// Validate every entity, tool and attestation of `document` at `at`
pub fn validate_lifecycle(
    document: &ProvenanceDocument,
    at: Timestamp,
    options: &LifecycleOptions,
) -> LifecycleReport {
    let mut report = LifecycleReport::default();

    // Arena of entities keyed by id@version; later duplicates are dropped
    let mut index: BTreeMap<EntityRef, usize> = BTreeMap::new();
    let mut arena: Vec<&Entity> = Vec::new();
    for entity in &document.entities {
        let key = entity.reference();
        if index.contains_key(&key) {
            report.errors.push(VerificationError::DuplicateRecord {
                record: key.to_string(),
            });
            continue;
        }
        index.insert(key, arena.len());
        arena.push(entity);
    }

    let mut tools: BTreeMap<EntityRef, &Tool> = BTreeMap::new();
    for tool in &document.tools {
        match tools.entry(tool.reference()) {
            Entry::Vacant(slot) => {
                slot.insert(tool);
            }
            Entry::Occupied(_) => report.errors.push(VerificationError::DuplicateRecord {
                record: tool_label(tool),
            }),
        }
    }

    let mut states = Vec::with_capacity(arena.len());
    for entity in &arena {
        let eval = evaluate_entity(entity, at);
        debug!(record = %entity.reference(), state = ?eval.state, "Evaluated entity");
        states.push(eval.state);
        report.record(entity.reference().to_string(), RecordKind::Entity, eval);
    }

    let mut tool_states: BTreeMap<EntityRef, LifecycleState> = BTreeMap::new();
    for (key, tool) in &tools {
        let eval = evaluate_tool(tool, at);
        tool_states.insert(key.clone(), eval.state);
        report.record(tool_label(tool), RecordKind::Tool, eval);
    }

    for attestation in &document.attestations {
        let eval = evaluate_attestation(attestation, at);
        report.record(attestation.label(), RecordKind::Attestation, eval);
    }

    let parents = in_document_parents(&arena, &index);
    let (order, unordered) = topological_order(&parents);
    let invalid: Vec<bool> = states.iter().map(|s| !s.is_usable()).collect();
    propagate_taint(&arena, &parents, &order, &invalid, &mut report);
    if !unordered.is_empty() {
        let mut members: Vec<String> = unordered
            .into_iter()
            .map(|i| arena[i].reference().to_string())
            .collect();
        members.sort();
        warn!(members = ?members, "Cyclic derivation graph; taint not propagated through it");
        report.errors.push(VerificationError::CyclicDerivation { members });
    }

    if options.resolve_replacements {
        let lookup = RecordLookup {
            entities: &arena,
            index: &index,
            tools: &tools,
        };
        for (entity, state) in arena.iter().zip(&states) {
            if let (true, Some(first)) = (state.is_terminal(), &entity.lifecycle.replacement) {
                report.replacements.push(lookup.resolve(
                    entity.reference().to_string(),
                    first,
                    at,
                    options.limits.max_replacement_depth,
                ));
            }
        }
        for (key, tool) in &tools {
            let terminal = tool_states.get(key).is_some_and(|s| s.is_terminal());
            if let (true, Some(first)) = (terminal, &tool.lifecycle.replacement) {
                report.replacements.push(lookup.resolve(
                    tool_label(tool),
                    first,
                    at,
                    options.limits.max_replacement_depth,
                ));
            }
        }
    }

    report
}

/// Parent indices of each arena entry; references outside the document are skipped
fn in_document_parents(arena: &[&Entity], index: &BTreeMap<EntityRef, usize>) -> Vec<Vec<usize>> {
    arena
        .iter()
        .map(|entity| {
            let mut seen = BTreeSet::new();
            entity
                .derived_from
                .iter()
                .filter_map(|r| index.get(r).copied())
                .filter(|p| seen.insert(*p))
                .collect()
        })
        .collect()
}

/// Kahn's algorithm: the nodes it could order, then those on or below a cycle
fn topological_order(parents: &[Vec<usize>]) -> (Vec<usize>, Vec<usize>) {
    let n = parents.len();
    let mut pending: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (child, ps) in parents.iter().enumerate() {
        for &p in ps {
            children[p].push(child);
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &child in &children[node] {
            pending[child] -= 1;
            if pending[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    let unordered = (0..n).filter(|&i| pending[i] > 0).collect();
    (order, unordered)
}

fn propagate_taint(
    arena: &[&Entity],
    parents: &[Vec<usize>],
    order: &[usize],
    invalid: &[bool],
    report: &mut LifecycleReport,
) {
    let mut sources: Vec<BTreeSet<String>> = vec![BTreeSet::new(); arena.len()];
    for &node in order {
        let mut inherited = BTreeSet::new();
        for &p in &parents[node] {
            if invalid[p] {
                inherited.insert(arena[p].reference().to_string());
            }
            inherited.extend(sources[p].iter().cloned());
        }
        sources[node] = inherited;
    }

    // Report in document order
    for (i, entity) in arena.iter().enumerate() {
        if sources[i].is_empty() {
            continue;
        }
        let record = entity.reference().to_string();
        debug!(record = %record, sources = ?sources[i], "Entity tainted");
        report.tainted_records.push(record.clone());
        report.warnings.push(Warning::Tainted {
            record,
            sources: sources[i].iter().cloned().collect(),
        });
    }
}

struct RecordLookup<'a> {
    entities: &'a [&'a Entity],
    index: &'a BTreeMap<EntityRef, usize>,
    tools: &'a BTreeMap<EntityRef, &'a Tool>,
}

impl RecordLookup<'_> {
    /// Evaluation and next replacement of a referenced record, if it is in the document
    fn evaluate(&self, reference: &EntityRef, at: Timestamp) -> Option<(Evaluation, Option<EntityRef>)> {
        if let Some(&i) = self.index.get(reference) {
            let entity = self.entities[i];
            return Some((evaluate_entity(entity, at), entity.lifecycle.replacement.clone()));
        }
        self.tools
            .get(reference)
            .map(|tool| (evaluate_tool(tool, at), tool.lifecycle.replacement.clone()))
    }

    fn resolve(&self, record: String, first: &EntityRef, at: Timestamp, max_depth: usize) -> ReplacementSuggestion {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::new();
        let mut current = first.clone();
        let mut suggested = None;

        while chain.len() < max_depth && visited.insert(current.clone()) {
            chain.push(current.clone());
            let Some((eval, next)) = self.evaluate(&current, at) else {
                break;
            };
            if eval.is_valid() {
                suggested = Some(current);
                break;
            }
            match next {
                Some(next) if eval.state.is_terminal() => current = next,
                _ => break,
            }
        }

        debug!(record = %record, suggested = ?suggested, hops = chain.len(), "Resolved replacement");
        ReplacementSuggestion {
            record,
            chain,
            suggested,
        }
    }
}
