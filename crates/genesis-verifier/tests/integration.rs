//! Integration Tests for the verification service
//!
//! These tests drive the HTTP API end to end:
//! - Transparency verification and checkpoint tracking
//! - Lifecycle and delegation validation
//! - Whole-document validation with signature checks
//! - Signer key registration and error responses

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use genesis_core::{
    Attestation, DelegationChain, DelegationLink, Entity, EntityRef, Hash, KeyPair, Lifecycle,
    MerkleTree, ProvenanceDocument, TransparencyLogRef, VerifierConfig,
};
use genesis_verifier::{create_router, AppState, KeyRegistry, MemoryStore, ServiceConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

// =============================================================================
// Test Helpers
// =============================================================================

fn app() -> Router {
    app_with(VerifierConfig::default())
}

fn app_with(verifier: VerifierConfig) -> Router {
    let state = Arc::new(AppState {
        registry: KeyRegistry::new(),
        store: Arc::new(MemoryStore::new()),
        config: ServiceConfig {
            name: "test-verifier".into(),
            verifier,
        },
    });
    create_router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// Log of `size` entries with `payload` at `index`
fn log_with(payload: &[u8], index: usize, size: usize) -> MerkleTree {
    let leaves: Vec<Vec<u8>> = (0..size)
        .map(|i| if i == index { payload.to_vec() } else { format!("entry-{}", i).into_bytes() })
        .collect();
    MerkleTree::from_leaves(&leaves)
}

fn log_ref(log_id: &str, tree: &MerkleTree, index: u64) -> TransparencyLogRef {
    let size = tree.len();
    TransparencyLogRef {
        log_id: log_id.into(),
        entry_index: index,
        tree_size: size,
        inclusion_proof: tree.inclusion_proof(index, size).unwrap(),
        consistency_proof: None,
        root_hash: Some(tree.root()),
    }
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_and_ready() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "test-verifier");
    assert_eq!(body["signer_count"], 0);
    assert_eq!(body["tracked_logs"], 0);
}

// =============================================================================
// Transparency
// =============================================================================

#[tokio::test]
async fn test_transparency_records_checkpoint() {
    let app = app();
    let payload = b"build attestation";
    let tree = log_with(payload, 3, 8);
    let attestation = Attestation::new("did:web:builder", payload.to_vec(), ts("2025-01-01T00:00:00Z"))
        .with_transparency_entry(log_ref("rekor", &tree, 3));

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/verify/transparency",
        Some(json!({ "attestation": attestation })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["anchored"], true);
    assert_eq!(body["checkpoints_updated"], json!(["rekor"]));

    let (status, body) = send(&app, Method::GET, "/v1/logs/rekor", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tree_size"], 8);
    assert_eq!(body["root_hash"], tree.root().to_hex());

    let (_, body) = send(&app, Method::GET, "/v1/logs", None).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_transparency_rejects_fork_of_checkpoint() {
    let app = app();
    let payload = b"release";
    let honest = log_with(payload, 1, 4);
    let first = Attestation::new("did:web:builder", payload.to_vec(), ts("2025-01-01T00:00:00Z"))
        .with_transparency_entry(log_ref("rekor", &honest, 1));
    send(&app, Method::POST, "/v1/verify/transparency", Some(json!({ "attestation": first }))).await;

    // Same size, different history
    let forked = log_with(payload, 1, 4);
    let forked = MerkleTree::from_leaf_hashes(
        (0..4u64)
            .map(|i| if i == 3 { Hash::digest(b"rewritten") } else { forked.leaf(i).unwrap() })
            .collect(),
    );
    let second = Attestation::new("did:web:builder", payload.to_vec(), ts("2025-01-01T00:00:00Z"))
        .with_transparency_entry(log_ref("rekor", &forked, 1));

    // A caller-supplied state cannot override the stored checkpoint
    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/verify/transparency",
        Some(json!({
            "attestation": second,
            "known_tree_states": { "rekor": { "tree_size": 4, "root_hash": forked.root() } },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["anchored"], false);
    assert_eq!(body["errors"][0]["kind"], "proof_invalid");

    let (_, body) = send(&app, Method::GET, "/v1/logs/rekor", None).await;
    assert_eq!(body["root_hash"], honest.root().to_hex());
}

#[tokio::test]
async fn test_transparency_quorum_override() {
    let app = app();
    let payload = b"sbom";
    let rekor = log_with(payload, 0, 5);
    let witness = log_with(payload, 2, 6);
    let attestation = Attestation::new("did:web:builder", payload.to_vec(), ts("2025-01-01T00:00:00Z"))
        .with_transparency_entry(log_ref("rekor", &rekor, 0))
        .with_transparency_entry(log_ref("witness", &witness, 2));

    let (_, body) = send(
        &app,
        Method::POST,
        "/v1/verify/transparency",
        Some(json!({ "attestation": attestation, "quorum": { "at_least": 3 } })),
    )
    .await;
    assert_eq!(body["anchored"], false);

    let (_, body) = send(
        &app,
        Method::POST,
        "/v1/verify/transparency",
        Some(json!({ "attestation": attestation, "quorum": "all" })),
    )
    .await;
    assert_eq!(body["anchored"], true);

    // A bare count means "at least"
    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/verify/transparency",
        Some(json!({ "attestation": attestation, "quorum": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["anchored"], true);

    let (_, body) = send(
        &app,
        Method::POST,
        "/v1/verify/transparency",
        Some(json!({ "attestation": attestation, "quorum": 3 })),
    )
    .await;
    assert_eq!(body["anchored"], false);
}

#[tokio::test]
async fn test_transparency_split_view_in_one_request() {
    let app = app();
    let payload = b"release";
    let honest = log_with(payload, 0, 4);
    let other = MerkleTree::from_leaves(&[payload.to_vec(), b"x1".to_vec(), b"x2".to_vec(), b"x3".to_vec()]);
    let attestation = Attestation::new("did:web:builder", payload.to_vec(), ts("2025-01-01T00:00:00Z"))
        .with_transparency_entry(log_ref("rekor", &honest, 0))
        .with_transparency_entry(log_ref("rekor", &other, 0));

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/verify/transparency",
        Some(json!({ "attestation": attestation })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["anchored"], false);
    assert_eq!(body["checkpoints_updated"], json!([]));

    let (status, _) = send(&app, Method::GET, "/v1/logs/rekor", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_unknown_checkpoint() {
    let (status, body) = send(&app(), Method::GET, "/v1/logs/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_lifecycle_taint_and_replacement() {
    let app = app();
    let created = ts("2024-01-01T00:00:00Z");
    let document = ProvenanceDocument::new()
        .with_entity(
            Entity::new("dataset", "1", Hash::digest(b"rows"), created).with_lifecycle(
                Lifecycle::created(created)
                    .with_revocation(ts("2025-01-01T00:00:00Z"), "license withdrawn")
                    .with_replacement(EntityRef::new("dataset", "2")),
            ),
        )
        .with_entity(Entity::new("dataset", "2", Hash::digest(b"rows v2"), created))
        .with_entity(
            Entity::new("model", "1", Hash::digest(b"weights"), created).derived_from(EntityRef::new("dataset", "1")),
        );

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/validate/lifecycle",
        Some(json!({
            "document": document,
            "at_time": "2025-06-01T00:00:00Z",
            "resolve_replacements": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["passed"], false);
    assert_eq!(body["tainted_records"], json!(["model@1"]));
    assert_eq!(body["replacements"][0]["suggested"], "dataset@2");

    let (_, body) = send(
        &app,
        Method::POST,
        "/v1/validate/lifecycle",
        Some(json!({ "document": document, "at_time": "2024-06-01T00:00:00Z" })),
    )
    .await;
    assert_eq!(body["passed"], true);
}

#[tokio::test]
async fn test_lifecycle_rejects_malformed_body() {
    let (status, _) = send(
        &app(),
        Method::POST,
        "/v1/validate/lifecycle",
        Some(json!({ "document": {}, "at_time": "yesterday" })),
    )
    .await;
    assert!(status.is_client_error());
}

// =============================================================================
// Delegation
// =============================================================================

#[tokio::test]
async fn test_delegation_with_expired_first_link() {
    let t0 = ts("2025-05-01T00:00:00Z");
    let chain = DelegationChain::new(vec![
        DelegationLink::new("acme", "ml-team", "dataset:*", t0 - Duration::days(30)).with_expiry(t0),
        DelegationLink::new("ml-team", "agent-7", "dataset:read", t0 - Duration::days(1)),
    ]);

    let (status, body) = send(
        &app(),
        Method::POST,
        "/v1/validate/delegation",
        Some(json!({
            "chain": chain,
            "at_time": (t0 + Duration::hours(1)).to_rfc3339(),
            "capability": "dataset:read",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorized"], false);
    assert_eq!(body["errors"][0]["kind"], "link_expired_or_revoked");
    assert_eq!(body["errors"][0]["index"], 0);
}

#[tokio::test]
async fn test_delegation_constraints_and_policy() {
    let app = app_with(VerifierConfig::default().with_require_policy_decision(true));
    let t = ts("2025-04-01T12:00:00Z");
    let chain = json!({
        "links": [{
            "grantor_id": "did:web:acme",
            "grantee_id": "agent:42",
            "capability": "inference:*",
            "issued_at": "2025-01-01T00:00:00Z",
            "constraints": { "max_calls": { "type": "threshold", "max": 100.0 } },
        }],
    });

    let (_, body) = send(
        &app,
        Method::POST,
        "/v1/validate/delegation",
        Some(json!({
            "chain": chain,
            "at_time": t.to_rfc3339(),
            "capability": "inference:run",
            "usage": { "max_calls": 40 },
            "policy_decision": { "decision": "permit", "evaluated_at": (t - Duration::seconds(10)).to_rfc3339() },
        })),
    )
    .await;
    assert_eq!(body["authorized"], true, "{}", body);

    let (_, body) = send(
        &app,
        Method::POST,
        "/v1/validate/delegation",
        Some(json!({
            "chain": chain,
            "at_time": t.to_rfc3339(),
            "capability": "inference:run",
            "usage": { "max_calls": 400 },
        })),
    )
    .await;
    assert_eq!(body["authorized"], false);
    let kinds: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"constraint_violated"));
    assert!(kinds.contains(&"missing_policy_decision"));
}

#[tokio::test]
async fn test_delegation_requires_capability() {
    let (status, body) = send(
        &app(),
        Method::POST,
        "/v1/validate/delegation",
        Some(json!({ "chain": { "links": [] }, "at_time": "2025-01-01T00:00:00Z", "capability": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

// =============================================================================
// Keys
// =============================================================================

#[tokio::test]
async fn test_signer_registration() {
    let app = app();
    let kp = KeyPair::generate("did:web:builder");

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/keys/signer",
        Some(json!({
            "signer_id": "did:web:builder",
            "public_key": STANDARD.encode(kp.public_key().to_bytes()),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["signer_id"], "did:web:builder");

    let (_, body) = send(&app, Method::GET, "/v1/keys/signer", None).await;
    assert_eq!(body["signers"], json!(["did:web:builder"]));
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_signer_registration_validation() {
    let app = app();

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/keys/signer",
        Some(json!({ "signer_id": "x".repeat(257), "public_key": STANDARD.encode([0u8; 32]) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/keys/signer",
        Some(json!({ "signer_id": "short-key", "public_key": STANDARD.encode([1u8; 16]) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/keys/signer",
        Some(json!({ "signer_id": "bad-base64", "public_key": "not base64!" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Document
// =============================================================================

#[tokio::test]
async fn test_document_validation_with_signatures() {
    let app = app();
    let kp = KeyPair::generate("did:web:builder");
    send(
        &app,
        Method::POST,
        "/v1/keys/signer",
        Some(json!({
            "signer_id": "did:web:builder",
            "public_key": STANDARD.encode(kp.public_key().to_bytes()),
        })),
    )
    .await;

    let payload = br#"{"artifact":"model@1"}"#;
    let tree = log_with(payload, 2, 7);
    let signed = kp.sign_attestation(
        Attestation::new("", payload.to_vec(), ts("2025-01-01T00:00:00Z"))
            .with_transparency_entry(log_ref("rekor", &tree, 2)),
    );
    let created = ts("2024-12-01T00:00:00Z");
    let document = ProvenanceDocument::new()
        .with_entity(Entity::new("model", "1", Hash::digest(b"weights"), created))
        .with_attestation(signed.clone())
        .with_delegation(DelegationChain::new(vec![DelegationLink::new(
            "did:web:acme",
            "did:web:builder",
            "publish:model",
            created,
        )]));

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/validate/document",
        Some(json!({
            "document": document,
            "at_time": "2025-02-01T00:00:00Z",
            "verify_signatures": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true, "{}", body);
    assert_eq!(body["transparency"][0]["anchored"], true);
    assert_eq!(body["delegations"][0]["authorized"], true);
    assert_eq!(body["signature_errors"], json!([]));

    let (_, body) = send(&app, Method::GET, "/v1/logs/rekor", None).await;
    assert_eq!(body["tree_size"], 7);

    // An unregistered signer invalidates the document
    let stranger = KeyPair::generate("did:web:stranger").sign_attestation(signed);
    let document = ProvenanceDocument::new().with_attestation(stranger);
    let (_, body) = send(
        &app,
        Method::POST,
        "/v1/validate/document",
        Some(json!({
            "document": document,
            "at_time": "2025-02-01T00:00:00Z",
            "verify_signatures": true,
        })),
    )
    .await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["signature_errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_document_split_view_across_attestations() {
    let app = app();
    let honest = log_with(b"first", 0, 4);
    let other = MerkleTree::from_leaves(&[b"y0".to_vec(), b"second".to_vec(), b"y2".to_vec(), b"y3".to_vec()]);
    let issued = ts("2025-01-01T00:00:00Z");
    let document = ProvenanceDocument::new()
        .with_attestation(
            Attestation::new("did:web:a", b"first".to_vec(), issued).with_transparency_entry(log_ref("rekor", &honest, 0)),
        )
        .with_attestation(
            Attestation::new("did:web:b", b"second".to_vec(), issued).with_transparency_entry(log_ref("rekor", &other, 1)),
        );

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/validate/document",
        Some(json!({ "document": document, "at_time": "2025-02-01T00:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["transparency"][0]["anchored"], false);
    assert_eq!(body["transparency"][1]["anchored"], false);

    let (status, _) = send(&app, Method::GET, "/v1/logs/rekor", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_document_strict_mode() {
    let app = app();
    let created = ts("2024-01-01T00:00:00Z");
    let document = ProvenanceDocument::new().with_entity(
        Entity::new("lib", "0.9", Hash::digest(b"src"), created)
            .with_lifecycle(Lifecycle::created(created).with_deprecation(ts("2024-06-01T00:00:00Z"))),
    );

    let (_, lenient) = send(
        &app,
        Method::POST,
        "/v1/validate/document",
        Some(json!({ "document": document, "at_time": "2025-01-01T00:00:00Z" })),
    )
    .await;
    assert_eq!(lenient["valid"], true);
    assert_eq!(lenient["lifecycle"]["warnings"][0]["kind"], "deprecated");

    let (_, strict) = send(
        &app,
        Method::POST,
        "/v1/validate/document",
        Some(json!({ "document": document, "at_time": "2025-01-01T00:00:00Z", "strict": true })),
    )
    .await;
    assert_eq!(strict["valid"], false);
}
