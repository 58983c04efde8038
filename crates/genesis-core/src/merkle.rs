//! RFC 6962 Merkle tree proofs
//!
//! Leaves and interior nodes are domain separated:
//!
//! - leaf: `SHA-256(0x00 || data)`
//! - node: `SHA-256(0x01 || left || right)`
//!
//! Verification follows the audit-path and consistency algorithms of
//! RFC 9162 §2.1.3.2 and §2.1.4.2, which handle unbalanced trees by deriving
//! the path shape from the leaf index and tree size.
//!
//! [`MerkleTree`] is an in-memory tree built per RFC 6962 §2.1 (`MTH`, `PATH`,
//! `PROOF`). Honest provers and test fixtures use it to produce proofs.

use crate::error::VerificationError;
use crate::types::{Hash, HASH_LEN};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hard ceiling on proof nodes; enough for trees of up to 2^64 leaves
pub const MAX_PROOF_NODES: usize = 64;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Errors from proof verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("invalid tree size: {0}")]
    InvalidTreeSize(String),

    #[error("leaf index {index} out of range for tree size {tree_size}")]
    LeafIndexOutOfRange { index: u64, tree_size: u64 },

    #[error("proof has {nodes} nodes, maximum is {max}")]
    ProofTooLarge { nodes: usize, max: usize },

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("proof invalid: {0}")]
    ProofInvalid(String),
}

impl MerkleError {
    /// Attach a context label (usually the log id) and turn into a finding
    pub fn into_finding(self, context: impl Into<String>) -> VerificationError {
        let context = context.into();
        match self {
            MerkleError::InvalidTreeSize(reason) => {
                VerificationError::InvalidTreeSize { context, reason }
            }
            err @ MerkleError::LeafIndexOutOfRange { .. } => VerificationError::ProofInvalid {
                context,
                reason: err.to_string(),
            },
            MerkleError::ProofTooLarge { nodes, max } => VerificationError::ProofTooLarge {
                context,
                nodes,
                max,
            },
            MerkleError::MalformedProof(reason) => {
                VerificationError::MalformedProof { context, reason }
            }
            MerkleError::ProofInvalid(reason) => VerificationError::ProofInvalid { context, reason },
        }
    }
}

impl From<MerkleError> for VerificationError {
    fn from(err: MerkleError) -> Self {
        err.into_finding("merkle proof")
    }
}

/// Hash of a leaf: `SHA-256(0x00 || data)`
pub fn hash_leaf(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    Hash::new(hasher.finalize().into())
}

/// Hash of an interior node: `SHA-256(0x01 || left || right)`
///
/// Order matters; `hash_children(a, b) != hash_children(b, a)`.
pub fn hash_children(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash::new(hasher.finalize().into())
}

fn check_proof_len(proof: &[Hash]) -> Result<(), MerkleError> {
    if proof.len() > MAX_PROOF_NODES {
        return Err(MerkleError::ProofTooLarge {
            nodes: proof.len(),
            max: MAX_PROOF_NODES,
        });
    }
    Ok(())
}

/// Verify that `leaf_hash` sits at `leaf_index` in the tree of `tree_size`
/// leaves whose root is `expected_root`
pub fn verify_inclusion(
    leaf_hash: &Hash,
    leaf_index: u64,
    tree_size: u64,
    proof: &[Hash],
    expected_root: &Hash,
) -> Result<(), MerkleError> {
    if tree_size == 0 {
        return Err(MerkleError::InvalidTreeSize("tree size must be positive".into()));
    }
    if leaf_index >= tree_size {
        return Err(MerkleError::LeafIndexOutOfRange {
            index: leaf_index,
            tree_size,
        });
    }
    check_proof_len(proof)?;

    let mut fnode = leaf_index;
    let mut snode = tree_size - 1;
    let mut running = *leaf_hash;

    for sibling in proof {
        if snode == 0 {
            return Err(MerkleError::ProofInvalid(format!(
                "proof of {} nodes is longer than the audit path for index {} in size {}",
                proof.len(),
                leaf_index,
                tree_size
            )));
        }
        if fnode & 1 == 1 || fnode == snode {
            running = hash_children(sibling, &running);
            // Right-edge node without a sibling: climb until we are a right child
            while fnode & 1 == 0 && fnode != 0 {
                fnode >>= 1;
                snode >>= 1;
            }
        } else {
            running = hash_children(&running, sibling);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    if snode != 0 {
        return Err(MerkleError::ProofInvalid(format!(
            "proof of {} nodes is shorter than the audit path for index {} in size {}",
            proof.len(),
            leaf_index,
            tree_size
        )));
    }
    if !running.ct_eq(expected_root) {
        return Err(MerkleError::ProofInvalid(format!(
            "computed root {} does not match expected root {}",
            running, expected_root
        )));
    }
    Ok(())
}

/// Verify that the tree of `size2` leaves is an append-only extension of
/// the tree of `size1` leaves
pub fn verify_consistency(
    size1: u64,
    size2: u64,
    root1: &Hash,
    root2: &Hash,
    proof: &[Hash],
) -> Result<(), MerkleError> {
    if size1 == 0 {
        return Err(MerkleError::InvalidTreeSize(
            "first tree size must be positive".into(),
        ));
    }
    if size1 > size2 {
        return Err(MerkleError::InvalidTreeSize(format!(
            "first tree size {} exceeds second tree size {}",
            size1, size2
        )));
    }
    check_proof_len(proof)?;

    if size1 == size2 {
        if !proof.is_empty() {
            return Err(MerkleError::ProofInvalid(
                "proof must be empty for equal tree sizes".into(),
            ));
        }
        if !root1.ct_eq(root2) {
            return Err(MerkleError::ProofInvalid(
                "roots differ for equal tree sizes".into(),
            ));
        }
        return Ok(());
    }

    if proof.is_empty() {
        return Err(MerkleError::ProofInvalid("empty consistency proof".into()));
    }

    // The old root is itself a node of the path when size1 is a full subtree
    let mut path: Vec<Hash> = Vec::with_capacity(proof.len() + 1);
    if size1.is_power_of_two() {
        path.push(*root1);
    }
    path.extend_from_slice(proof);

    let mut fnode = size1 - 1;
    let mut snode = size2 - 1;
    while fnode & 1 == 1 {
        fnode >>= 1;
        snode >>= 1;
    }

    let mut first = path[0];
    let mut second = path[0];
    for node in &path[1..] {
        if snode == 0 {
            return Err(MerkleError::ProofInvalid(
                "consistency proof longer than expected".into(),
            ));
        }
        if fnode & 1 == 1 || fnode == snode {
            first = hash_children(node, &first);
            second = hash_children(node, &second);
            while fnode & 1 == 0 && fnode != 0 {
                fnode >>= 1;
                snode >>= 1;
            }
        } else {
            second = hash_children(&second, node);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    if snode != 0 {
        return Err(MerkleError::ProofInvalid(
            "consistency proof shorter than expected".into(),
        ));
    }
    if !first.ct_eq(root1) {
        return Err(MerkleError::ProofInvalid(format!(
            "reconstructed old root {} does not match {}",
            first, root1
        )));
    }
    if !second.ct_eq(root2) {
        return Err(MerkleError::ProofInvalid(format!(
            "reconstructed new root {} does not match {}",
            second, root2
        )));
    }
    Ok(())
}

/// Predicate form of [`verify_inclusion`]
pub fn inclusion_holds(
    leaf_hash: &Hash,
    leaf_index: u64,
    tree_size: u64,
    proof: &[Hash],
    expected_root: &Hash,
) -> bool {
    verify_inclusion(leaf_hash, leaf_index, tree_size, proof, expected_root).is_ok()
}

/// Predicate form of [`verify_consistency`]
pub fn consistency_holds(size1: u64, size2: u64, root1: &Hash, root2: &Hash, proof: &[Hash]) -> bool {
    verify_consistency(size1, size2, root1, root2, proof).is_ok()
}

/// Split concatenated 32-byte nodes into a proof
pub fn decode_proof(bytes: &[u8]) -> Result<Vec<Hash>, MerkleError> {
    if bytes.len() % HASH_LEN != 0 {
        return Err(MerkleError::MalformedProof(format!(
            "proof length {} is not a multiple of {}",
            bytes.len(),
            HASH_LEN
        )));
    }
    let nodes = bytes.len() / HASH_LEN;
    if nodes > MAX_PROOF_NODES {
        return Err(MerkleError::ProofTooLarge {
            nodes,
            max: MAX_PROOF_NODES,
        });
    }
    bytes
        .chunks_exact(HASH_LEN)
        .map(|chunk| Hash::from_slice(chunk).map_err(|e| MerkleError::MalformedProof(e.to_string())))
        .collect()
}

/// Largest power of two strictly less than `n` (`n >= 2`)
fn split_point(n: usize) -> usize {
    1 << (usize::BITS - 1 - (n - 1).leading_zeros())
}

/// `MTH(D[n])`
fn subtree_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => Hash::digest(&[]),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            hash_children(&subtree_root(&leaves[..k]), &subtree_root(&leaves[k..]))
        }
    }
}

/// `PATH(m, D[n])`
fn audit_path(m: usize, leaves: &[Hash], out: &mut Vec<Hash>) {
    let n = leaves.len();
    if n <= 1 {
        return;
    }
    let k = split_point(n);
    if m < k {
        audit_path(m, &leaves[..k], out);
        out.push(subtree_root(&leaves[k..]));
    } else {
        audit_path(m - k, &leaves[k..], out);
        out.push(subtree_root(&leaves[..k]));
    }
}

/// `SUBPROOF(m, D[n], b)`
fn subproof(m: usize, leaves: &[Hash], complete: bool, out: &mut Vec<Hash>) {
    let n = leaves.len();
    if m == n {
        if !complete {
            out.push(subtree_root(leaves));
        }
        return;
    }
    let k = split_point(n);
    if m <= k {
        subproof(m, &leaves[..k], complete, out);
        out.push(subtree_root(&leaves[k..]));
    } else {
        subproof(m - k, &leaves[k..], false, out);
        out.push(subtree_root(&leaves[..k]));
    }
}

/// Append-only Merkle tree over leaf hashes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleTree {
    leaves: Vec<Hash>,
}

impl MerkleTree {
    /// Empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw leaf data (hashed with [`hash_leaf`])
    pub fn from_leaves<T: AsRef<[u8]>>(data: &[T]) -> Self {
        Self {
            leaves: data.iter().map(|d| hash_leaf(d.as_ref())).collect(),
        }
    }

    /// Build from precomputed leaf hashes
    pub fn from_leaf_hashes(leaves: Vec<Hash>) -> Self {
        Self { leaves }
    }

    /// Append raw leaf data, returning its index
    pub fn push(&mut self, data: &[u8]) -> u64 {
        self.leaves.push(hash_leaf(data));
        (self.leaves.len() - 1) as u64
    }

    pub fn len(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Leaf hash at `index`
    pub fn leaf(&self, index: u64) -> Option<Hash> {
        self.leaves.get(usize::try_from(index).ok()?).copied()
    }

    /// Root of the full tree
    pub fn root(&self) -> Hash {
        subtree_root(&self.leaves)
    }

    /// Root of the tree made of the first `size` leaves
    pub fn root_at(&self, size: u64) -> Result<Hash, MerkleError> {
        let size = self.check_size(size)?;
        Ok(subtree_root(&self.leaves[..size]))
    }

    /// Audit path for `index` in the tree of the first `size` leaves
    pub fn inclusion_proof(&self, index: u64, size: u64) -> Result<Vec<Hash>, MerkleError> {
        let n = self.check_size(size)?;
        if n == 0 {
            return Err(MerkleError::InvalidTreeSize("tree size must be positive".into()));
        }
        if index >= size {
            return Err(MerkleError::LeafIndexOutOfRange {
                index,
                tree_size: size,
            });
        }
        let mut path = Vec::new();
        audit_path(index as usize, &self.leaves[..n], &mut path);
        Ok(path)
    }

    /// Consistency proof between the trees of `size1` and `size2` leaves
    pub fn consistency_proof(&self, size1: u64, size2: u64) -> Result<Vec<Hash>, MerkleError> {
        let n = self.check_size(size2)?;
        if size1 == 0 || size1 > size2 {
            return Err(MerkleError::InvalidTreeSize(format!(
                "cannot prove consistency from {} to {}",
                size1, size2
            )));
        }
        let mut proof = Vec::new();
        if size1 < size2 {
            subproof(size1 as usize, &self.leaves[..n], true, &mut proof);
        }
        Ok(proof)
    }

    fn check_size(&self, size: u64) -> Result<usize, MerkleError> {
        match usize::try_from(size) {
            Ok(n) if n <= self.leaves.len() => Ok(n),
            _ => Err(MerkleError::InvalidTreeSize(format!(
                "tree has {} leaves, asked for {}",
                self.leaves.len(),
                size
            ))),
        }
    }
}
