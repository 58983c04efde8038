//! Property-Based Tests for the verification kernel
//!
//! These tests check that the core guarantees hold for arbitrary inputs:
//! 1. MERKLE: honest proofs verify, any tampering is rejected
//! 2. TIME: revocation applies from its timestamp onward, never before
//! 3. TAINT: invalidity flows to everything derived from it
//! 4. DELEGATION: a broken link can never be authorized
//! 5. PURITY: identical inputs give identical results
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use chrono::{DateTime, Duration, Utc};
use genesis_core::{
    validate_delegation, validate_lifecycle, verify_consistency, verify_inclusion,
    verify_transparency, Attestation, DelegationChain, DelegationLink, DelegationPolicy,
    DelegationRequest, Entity, EntityRef, Hash, Lifecycle, LifecycleOptions, Limits, MerkleTree,
    ProvenanceDocument, Quorum, TransparencyLogRef, VerificationError,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

// =============================================================================
// MERKLE: inclusion proofs
// =============================================================================

proptest! {
    /// Every leaf of every tree verifies with its honest proof
    #[test]
    fn prop_inclusion_holds_for_every_index(
        seed in "[a-z]{1,8}",
        size in 1usize..70,
    ) {
        let tree = tree_of(&seed, size);
        let root = tree.root();
        for index in 0..size as u64 {
            let proof = tree.inclusion_proof(index, size as u64).unwrap();
            let leaf = tree.leaf(index).unwrap();
            prop_assert!(
                verify_inclusion(&leaf, index, size as u64, &proof, &root).is_ok(),
                "index {} of size {} must verify",
                index,
                size
            );
        }
    }

    /// Flipping any single bit of any proof node breaks verification
    #[test]
    fn prop_inclusion_rejects_flipped_byte(
        seed in "[a-z]{1,8}",
        size in 2usize..70,
        index_pick in any::<prop::sample::Index>(),
        node_pick in any::<prop::sample::Index>(),
        byte in 0usize..32,
        bit in 0u8..8,
    ) {
        let tree = tree_of(&seed, size);
        let index = index_pick.index(size) as u64;
        let mut proof = tree.inclusion_proof(index, size as u64).unwrap();
        prop_assume!(!proof.is_empty());

        let node = node_pick.index(proof.len());
        proof[node] = flip(&proof[node], byte, bit);

        let leaf = tree.leaf(index).unwrap();
        prop_assert!(
            verify_inclusion(&leaf, index, size as u64, &proof, &tree.root()).is_err(),
            "tampered node {} must be rejected",
            node
        );
    }

    /// A proof for one index does not verify a different leaf
    #[test]
    fn prop_inclusion_rejects_wrong_leaf(
        seed in "[a-z]{1,8}",
        size in 2usize..40,
        pick in any::<prop::sample::Index>(),
    ) {
        let tree = tree_of(&seed, size);
        let index = pick.index(size) as u64;
        let other = (index + 1) % size as u64;
        let proof = tree.inclusion_proof(index, size as u64).unwrap();
        let wrong_leaf = tree.leaf(other).unwrap();
        prop_assert!(verify_inclusion(&wrong_leaf, index, size as u64, &proof, &tree.root()).is_err());
    }
}

// =============================================================================
// MERKLE: consistency proofs
// =============================================================================

proptest! {
    /// Append-only growth always has a valid consistency proof
    #[test]
    fn prop_consistency_holds_for_append_only(
        seed in "[a-z]{1,8}",
        size2 in 1usize..70,
        pick in any::<prop::sample::Index>(),
    ) {
        let size1 = pick.index(size2) + 1;
        let tree = tree_of(&seed, size2);
        let proof = tree.consistency_proof(size1 as u64, size2 as u64).unwrap();
        let root1 = tree.root_at(size1 as u64).unwrap();

        prop_assert!(
            verify_consistency(size1 as u64, size2 as u64, &root1, &tree.root(), &proof).is_ok(),
            "consistency {} -> {} must verify",
            size1,
            size2
        );
    }

    /// Rewriting history before size1 is detected
    #[test]
    fn prop_consistency_rejects_reordered_history(
        seed in "[a-z]{1,8}",
        size2 in 2usize..70,
        picks in (any::<prop::sample::Index>(), any::<prop::sample::Index>(), any::<prop::sample::Index>()),
    ) {
        let size1 = picks.0.index(size2 - 1) + 2;
        let i = picks.1.index(size1);
        let j = picks.2.index(size1);
        prop_assume!(i != j);

        let original = tree_of(&seed, size2);
        let root1 = original.root_at(size1 as u64).unwrap();

        let mut leaves: Vec<Hash> = (0..size2 as u64).map(|k| original.leaf(k).unwrap()).collect();
        leaves.swap(i, j);
        let rewritten = MerkleTree::from_leaf_hashes(leaves);
        let proof = rewritten.consistency_proof(size1 as u64, size2 as u64).unwrap();

        prop_assert!(
            verify_consistency(size1 as u64, size2 as u64, &root1, &rewritten.root(), &proof).is_err(),
            "swapping leaves {} and {} below size {} must be detected",
            i,
            j,
            size1
        );
    }
}

// =============================================================================
// TIME: revocation is not retroactive
// =============================================================================

proptest! {
    #[test]
    fn prop_revocation_not_retroactive(
        revoked_after in 1i64..1_000_000,
        probe in 0i64..2_000_000,
    ) {
        let created = base_time();
        let revoked_at = created + Duration::seconds(revoked_after);
        let at = created + Duration::seconds(probe);

        let doc = ProvenanceDocument::new().with_entity(
            Entity::new("artifact", "1", Hash::digest(b"a"), created)
                .with_lifecycle(Lifecycle::created(created).with_revocation(revoked_at, "withdrawn")),
        );
        let report = validate_lifecycle(&doc, at, &LifecycleOptions::default());
        let revoked = report
            .errors
            .iter()
            .any(|e| matches!(e, VerificationError::Revoked { .. }));

        prop_assert_eq!(revoked, at >= revoked_at);
    }
}

// =============================================================================
// TAINT: invalidity propagates down the derivation graph
// =============================================================================

proptest! {
    /// Every descendant of a revoked root is tainted once the revocation applies
    #[test]
    fn prop_taint_reaches_all_descendants(
        depth in 1usize..20,
        offset in 0i64..10_000,
    ) {
        let created = base_time();
        let revoked_at = created + Duration::seconds(100);
        let at = revoked_at + Duration::seconds(offset);

        let mut doc = ProvenanceDocument::new().with_entity(
            Entity::new("e0", "1", Hash::digest(b"0"), created)
                .with_lifecycle(Lifecycle::created(created).with_revocation(revoked_at, "poisoned")),
        );
        for k in 1..=depth {
            doc = doc.with_entity(
                Entity::new(format!("e{}", k), "1", Hash::digest(k.to_string().as_bytes()), created)
                    .derived_from(EntityRef::new(format!("e{}", k - 1), "1")),
            );
        }

        let report = validate_lifecycle(&doc, at, &LifecycleOptions::default());
        prop_assert_eq!(report.tainted_records.len(), depth);
        for k in 1..=depth {
            let record = format!("e{}@1", k);
            prop_assert!(report.tainted_records.contains(&record), "{} must be tainted", record);
        }

        let before = validate_lifecycle(&doc, revoked_at - Duration::seconds(1), &LifecycleOptions::default());
        prop_assert!(before.tainted_records.is_empty());
    }
}

// =============================================================================
// DELEGATION: broken chains are never authorized
// =============================================================================

proptest! {
    #[test]
    fn prop_broken_link_never_authorized(
        len in 2usize..10,
        pick in any::<prop::sample::Index>(),
        intruder in "[a-z]{3,8}",
    ) {
        let issued = base_time();
        let mut links: Vec<DelegationLink> = (0..len)
            .map(|i| DelegationLink::new(format!("party{}", i), format!("party{}", i + 1), "*", issued))
            .collect();
        let broken = pick.index(len - 1) + 1;
        links[broken].grantor_id = format!("intruder-{}", intruder);

        let chain = DelegationChain::new(links);
        let result = validate_delegation(
            &chain,
            issued + Duration::hours(1),
            &DelegationRequest::new("anything"),
            &DelegationPolicy::default(),
        );

        prop_assert!(!result.authorized);
        let has_broken_chain = result
            .errors
            .iter()
            .any(|e| matches!(e, VerificationError::BrokenChain { index, .. } if *index == broken));
        prop_assert!(has_broken_chain);
    }
}

// =============================================================================
// PURITY: repeated calls agree
// =============================================================================

proptest! {
    #[test]
    fn prop_verification_is_idempotent(
        seed in "[a-z]{1,8}",
        size in 1usize..30,
        pick in any::<prop::sample::Index>(),
    ) {
        let tree = tree_of(&seed, size);
        let index = pick.index(size) as u64;
        let payload = format!("{}-{}", seed, index).into_bytes();
        let attestation = Attestation::new("did:web:signer", payload, base_time())
            .with_transparency_entry(TransparencyLogRef {
                log_id: "log-a".into(),
                entry_index: index,
                tree_size: size as u64,
                inclusion_proof: tree.inclusion_proof(index, size as u64).unwrap(),
                consistency_proof: None,
                root_hash: Some(tree.root()),
            });

        let known = BTreeMap::new();
        let first = verify_transparency(&attestation, &known, Quorum::default(), &Limits::default());
        let second = verify_transparency(&attestation, &known, Quorum::default(), &Limits::default());
        prop_assert!(first.anchored);
        prop_assert_eq!(first, second);

        let doc = ProvenanceDocument::new().with_attestation(attestation);
        let at = base_time() + Duration::days(1);
        prop_assert_eq!(
            validate_lifecycle(&doc, at, &LifecycleOptions::default()),
            validate_lifecycle(&doc, at, &LifecycleOptions::default())
        );
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn tree_of(seed: &str, size: usize) -> MerkleTree {
    let leaves: Vec<Vec<u8>> = (0..size).map(|i| format!("{}-{}", seed, i).into_bytes()).collect();
    MerkleTree::from_leaves(&leaves)
}

fn flip(hash: &Hash, byte: usize, bit: u8) -> Hash {
    let mut bytes = *hash.as_bytes();
    bytes[byte] ^= 1 << bit;
    Hash::new(bytes)
}

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}
