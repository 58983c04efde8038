//! Verification orchestration
//!
//! The kernel functions are pure and CPU-bound. The service runs them on
//! the blocking pool, joins the results, and keeps the checkpoint store in
//! step with what was proven.

use chrono::{DateTime, Utc};
use genesis_core::{
    validate_delegation, validate_lifecycle, verify_transparency_all, Attestation, DelegationPolicy,
    DelegationRequest, DelegationResult, KeyRing, LifecycleOptions, LifecycleReport,
    ProvenanceDocument, Quorum, SignatureVerifier, Timestamp, TreeState, VerificationResult,
    VerifierConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::{self, JoinError};
use tracing::debug;

use crate::storage::{Checkpoint, CheckpointStore, RecordOutcome, StorageError};

// =============================================================================
// Checkpoints
// =============================================================================

/// Combine stored checkpoints with caller-supplied tree states
///
/// A stored checkpoint always wins: callers may only seed logs the service
/// has not observed yet. Everything later recorded for a log is therefore
/// proven against the service's own baseline.
pub fn merge_known_states(
    stored: BTreeMap<String, TreeState>,
    supplied: BTreeMap<String, TreeState>,
) -> BTreeMap<String, TreeState> {
    let mut merged = stored;
    for (log_id, state) in supplied {
        if let Some(known) = merged.get(&log_id) {
            if *known != state {
                debug!(log_id = %log_id, "Ignoring supplied state for checkpointed log");
            }
            continue;
        }
        merged.insert(log_id, state);
    }
    merged
}

/// Verifications a handler runs before giving up on a moving checkpoint
pub const MAX_RECORD_ATTEMPTS: usize = 3;

/// Record tree states proven by a verification
///
/// `base` is the stored checkpoint map the verification ran against; each
/// state is recorded only if its log's checkpoint is still the one it was
/// proven from. Returns the log ids whose checkpoint was created or
/// advanced. A [`StorageError::Stale`] means another request moved a
/// checkpoint in between and the verification must be repeated.
pub async fn record_observed(
    store: &dyn CheckpointStore,
    observed: BTreeMap<String, TreeState>,
    base: &BTreeMap<String, TreeState>,
    observed_at: DateTime<Utc>,
) -> Result<Vec<String>, StorageError> {
    let mut updated = Vec::new();
    for (log_id, state) in observed {
        let from = base.get(&log_id).copied();
        match store.record(Checkpoint::new(log_id.clone(), state, observed_at), from).await? {
            RecordOutcome::Created | RecordOutcome::Advanced => updated.push(log_id),
            RecordOutcome::Unchanged => {}
        }
    }
    Ok(updated)
}

// =============================================================================
// Document aggregation
// =============================================================================

/// Per-request settings for [`verify_document`]
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    pub at: Timestamp,
    pub strict: bool,
    pub resolve_replacements: bool,
    pub quorum: Quorum,

    /// Applied to every chain; `None` asks each chain for its holder's capability
    pub delegation_request: Option<DelegationRequest>,

    /// Check attestation signatures against these keys
    pub signer_keys: Option<KeyRing>,
}

impl DocumentOptions {
    /// Options taking every default from `config`
    pub fn new(at: Timestamp, config: &VerifierConfig) -> Self {
        Self {
            at,
            strict: config.strict,
            resolve_replacements: config.resolve_replacements,
            quorum: Quorum::AtLeast(config.quorum),
            delegation_request: None,
            signer_keys: None,
        }
    }
}

/// Transparency outcome for one attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationAnchoring {
    pub attestation: String,
    #[serde(flatten)]
    pub result: VerificationResult,
}

/// Attestation whose signature did not verify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureFailure {
    pub attestation: String,
    pub error: String,
}

/// Aggregate outcome for a whole document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub valid: bool,
    pub lifecycle: LifecycleReport,

    /// One entry per attestation that references transparency logs
    pub transparency: Vec<AttestationAnchoring>,

    /// One entry per delegation chain, in document order
    pub delegations: Vec<DelegationResult>,

    pub signature_errors: Vec<SignatureFailure>,
}

impl DocumentReport {
    /// Tree states proven across all anchored attestations
    pub fn observed_states(&self) -> BTreeMap<String, TreeState> {
        let mut states: BTreeMap<String, TreeState> = BTreeMap::new();
        for anchoring in &self.transparency {
            for (log_id, candidate) in anchoring.result.observed_states() {
                states
                    .entry(log_id)
                    .and_modify(|s| {
                        if candidate.tree_size > s.tree_size {
                            *s = candidate;
                        }
                    })
                    .or_insert(candidate);
            }
        }
        states
    }
}

/// Validate every part of `document` concurrently and aggregate the findings
pub async fn verify_document(
    document: Arc<ProvenanceDocument>,
    known: BTreeMap<String, TreeState>,
    options: DocumentOptions,
    config: &VerifierConfig,
) -> Result<DocumentReport, JoinError> {
    let at = options.at;
    let limits = config.limits;

    let lifecycle_task = {
        let document = Arc::clone(&document);
        let lifecycle_options =
            LifecycleOptions::from(config).with_resolve_replacements(options.resolve_replacements);
        task::spawn_blocking(move || validate_lifecycle(&document, at, &lifecycle_options))
    };

    // One task for all attestations: states of one log must agree across them
    let transparency_task = {
        let document = Arc::clone(&document);
        let quorum = options.quorum;
        task::spawn_blocking(move || {
            let anchored: Vec<&Attestation> = document
                .attestations
                .iter()
                .filter(|attestation| !attestation.transparency_entries.is_empty())
                .collect();
            verify_transparency_all(&anchored, &known, quorum, &limits)
                .into_iter()
                .zip(&anchored)
                .map(|(result, attestation)| AttestationAnchoring {
                    attestation: attestation.label(),
                    result,
                })
                .collect::<Vec<_>>()
        })
    };

    let policy = DelegationPolicy::from(config);
    let delegation_tasks: Vec<_> = (0..document.delegations.len())
        .map(|index| {
            let document = Arc::clone(&document);
            let request = options.delegation_request.clone();
            task::spawn_blocking(move || {
                let chain = &document.delegations[index];
                let request = request.unwrap_or_else(|| {
                    DelegationRequest::new(chain.links.last().map(|l| l.capability.as_str()).unwrap_or_default())
                });
                validate_delegation(chain, at, &request, &policy)
            })
        })
        .collect();

    let signature_task = options.signer_keys.map(|keys| {
        let document = Arc::clone(&document);
        task::spawn_blocking(move || {
            document
                .attestations
                .iter()
                .filter_map(|attestation| {
                    keys.verify_attestation(attestation).err().map(|err| SignatureFailure {
                        attestation: attestation.label(),
                        error: err.to_string(),
                    })
                })
                .collect::<Vec<_>>()
        })
    });

    let lifecycle = lifecycle_task.await?;

    let transparency = transparency_task.await?;

    let mut delegations = Vec::with_capacity(delegation_tasks.len());
    for handle in delegation_tasks {
        delegations.push(handle.await?);
    }

    let signature_errors = match signature_task {
        Some(handle) => handle.await?,
        None => Vec::new(),
    };

    let valid = lifecycle.passed(options.strict)
        && transparency.iter().all(|t| t.result.anchored)
        && delegations.iter().all(|d| d.authorized)
        && signature_errors.is_empty();

    debug!(
        valid = valid,
        attestations = transparency.len(),
        delegations = delegations.len(),
        signature_errors = signature_errors.len(),
        "Document verified"
    );

    Ok(DocumentReport {
        valid,
        lifecycle,
        transparency,
        delegations,
        signature_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::Duration;
    use genesis_core::{
        Attestation, DelegationChain, DelegationLink, Entity, Hash, KeyPair, Lifecycle, MerkleTree,
        TransparencyLogRef,
    };

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn anchored(payload: &[u8], log_id: &str) -> (Attestation, MerkleTree) {
        let tree = MerkleTree::from_leaves(&[b"a".to_vec(), payload.to_vec(), b"c".to_vec()]);
        let attestation = Attestation::new("did:web:builder", payload.to_vec(), ts("2025-01-01T00:00:00Z"))
            .with_transparency_entry(TransparencyLogRef {
                log_id: log_id.into(),
                entry_index: 1,
                tree_size: 3,
                inclusion_proof: tree.inclusion_proof(1, 3).unwrap(),
                consistency_proof: None,
                root_hash: Some(tree.root()),
            });
        (attestation, tree)
    }

    #[test]
    fn test_stored_state_wins() {
        let stored: BTreeMap<_, _> = [("log-a".to_string(), TreeState::new(5, Hash::digest(b"a5")))].into();
        let supplied: BTreeMap<_, _> = [
            ("log-a".to_string(), TreeState::new(9, Hash::digest(b"forged"))),
            ("log-b".to_string(), TreeState::new(2, Hash::digest(b"b2"))),
        ]
        .into();

        let merged = merge_known_states(stored, supplied);
        assert_eq!(merged["log-a"].tree_size, 5);
        assert_eq!(merged["log-b"].tree_size, 2);
    }

    #[tokio::test]
    async fn test_record_observed_against_base() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let none = BTreeMap::new();
        let first: BTreeMap<_, _> = [("log".to_string(), TreeState::new(4, Hash::digest(b"r4")))].into();
        assert_eq!(record_observed(&store, first.clone(), &none, now).await.unwrap(), vec!["log"]);
        assert!(record_observed(&store, first.clone(), &first, now).await.unwrap().is_empty());

        let older: BTreeMap<_, _> = [("log".to_string(), TreeState::new(2, Hash::digest(b"r2")))].into();
        assert!(matches!(
            record_observed(&store, older, &first, now).await,
            Err(StorageError::Regression { known: 4, offered: 2, .. })
        ));

        // Two verifications from size 4; the slower one finds its base gone
        let eight: BTreeMap<_, _> = [("log".to_string(), TreeState::new(8, Hash::digest(b"r8")))].into();
        let ten: BTreeMap<_, _> = [("log".to_string(), TreeState::new(10, Hash::digest(b"r10")))].into();
        assert_eq!(record_observed(&store, eight, &first, now).await.unwrap(), vec!["log"]);
        assert!(matches!(
            record_observed(&store, ten, &first, now).await,
            Err(StorageError::Stale { .. })
        ));
        assert_eq!(store.get("log").await.unwrap().unwrap().tree_size, 8);
    }

    #[tokio::test]
    async fn test_verify_document_aggregates() {
        let kp = KeyPair::generate("did:web:builder");
        let (attestation, _) = anchored(b"payload", "rekor");
        let attestation = kp.sign_attestation(attestation);
        let t = ts("2025-06-01T00:00:00Z");

        let document = ProvenanceDocument::new()
            .with_entity(Entity::new("model", "1.0", Hash::digest(b"w"), ts("2025-01-01T00:00:00Z")))
            .with_attestation(attestation)
            .with_delegation(DelegationChain::new(vec![DelegationLink::new(
                "acme",
                "agent",
                "deploy:model",
                t - Duration::days(1),
            )]));

        let config = VerifierConfig::default();
        let mut options = DocumentOptions::new(t, &config);
        options.signer_keys = Some(KeyRing::new().with_key(kp.public_key()));

        let report = verify_document(Arc::new(document), BTreeMap::new(), options, &config)
            .await
            .unwrap();
        assert!(report.valid, "{:?}", report);
        assert_eq!(report.transparency.len(), 1);
        assert_eq!(report.delegations.len(), 1);
        assert_eq!(report.observed_states()["rekor"].tree_size, 3);
    }

    #[tokio::test]
    async fn test_verify_document_reports_every_failure() {
        let t = ts("2025-06-01T00:00:00Z");
        let (mut attestation, _) = anchored(b"payload", "rekor");
        attestation.payload = b"swapped".to_vec();

        let document = ProvenanceDocument::new()
            .with_entity(
                Entity::new("data", "1", Hash::digest(b"d"), ts("2025-01-01T00:00:00Z"))
                    .with_lifecycle(Lifecycle::created(ts("2025-01-01T00:00:00Z")).with_expiry(ts("2025-03-01T00:00:00Z"))),
            )
            .with_attestation(attestation)
            .with_delegation(DelegationChain::new(vec![]));

        let config = VerifierConfig::default();
        let mut options = DocumentOptions::new(t, &config);
        options.signer_keys = Some(KeyRing::new());

        let report = verify_document(Arc::new(document), BTreeMap::new(), options, &config)
            .await
            .unwrap();
        assert!(!report.valid);
        assert!(!report.lifecycle.passed(false));
        assert!(!report.transparency[0].result.anchored);
        assert!(!report.delegations[0].authorized);
        assert_eq!(report.signature_errors.len(), 1);
        assert!(report.observed_states().is_empty());
    }

    #[tokio::test]
    async fn test_verify_document_cross_checks_attestations() {
        let t = ts("2025-06-01T00:00:00Z");
        let (first, _) = anchored(b"first", "rekor");
        let (second, _) = anchored(b"second", "rekor");
        let (third, _) = anchored(b"third", "witness");

        let document = ProvenanceDocument::new()
            .with_attestation(first)
            .with_attestation(second)
            .with_attestation(third);

        let config = VerifierConfig::default();
        let report = verify_document(Arc::new(document), BTreeMap::new(), DocumentOptions::new(t, &config), &config)
            .await
            .unwrap();
        assert!(!report.valid);
        assert!(!report.transparency[0].result.anchored);
        assert!(!report.transparency[1].result.anchored);
        assert!(report.transparency[2].result.anchored);
        assert_eq!(report.observed_states().keys().collect::<Vec<_>>(), vec!["witness"]);
    }
}
