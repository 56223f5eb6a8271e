//! An append-only Merkle log of Signed Map Heads, in the style of RFC 6962's
//! certificate transparency log: a binary Merkle tree built left-to-right
//! over leaves appended one epoch at a time, supporting inclusion proofs
//! ("this SMH is entry number N") and consistency proofs ("the log at size
//! N is a prefix of the log at size M") without ever needing to rebuild or
//! rebalance the tree.

use crypto::Digest;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("leaf index {index} out of range for tree size {size}")]
    IndexOutOfRange { index: u64, size: u64 },
    #[error("inclusion proof does not verify")]
    BadInclusionProof,
    #[error("consistency proof does not verify")]
    BadConsistencyProof,
    #[error("consistency proof requested between sizes {first} and {second}, first must not exceed second")]
    BadSizeOrder { first: u64, second: u64 },
}

fn leaf_hash(data: &[u8]) -> Digest {
    Digest::hash_parts(&[&[0x00u8], data])
}

fn node_hash(left: &Digest, right: &Digest) -> Digest {
    Digest::hash_parts(&[&[0x01u8], left.as_ref(), right.as_ref()])
}

/// Largest power of two strictly smaller than `n` (RFC 6962's `k`), for `n > 1`.
fn split_point(n: usize) -> usize {
    let mut k = 1usize;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// The Merkle Tree Hash of a (possibly empty) leaf range, RFC 6962 §2.1.
fn mth(leaves: &[Digest]) -> Digest {
    match leaves.len() {
        0 => Digest::hash(&[]),
        1 => leaves[0].clone(),
        n => {
            let k = split_point(n);
            node_hash(&mth(&leaves[..k]), &mth(&leaves[k..]))
        }
    }
}

/// An append-only Merkle log. Leaves are kept in memory here; a persistent
/// deployment appends the same hashed leaves into the storage crate's log
/// table and reconstructs this structure on restart from that table.
#[derive(Default)]
pub struct MerkleLog {
    leaves: Vec<Digest>,
}

impl MerkleLog {
    pub fn new() -> Self {
        Self { leaves: Vec::new() }
    }

    pub fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    /// Append a new leaf (an epoch's SMH digest) and return the new root.
    pub fn append(&mut self, data: &[u8]) -> Digest {
        self.leaves.push(leaf_hash(data));
        self.root()
    }

    /// The root hash of the log at its current size.
    pub fn root(&self) -> Digest {
        mth(&self.leaves)
    }

    /// The root hash of the log at an earlier size `size <= self.size()`.
    pub fn root_at(&self, size: u64) -> Result<Digest, LogError> {
        if size > self.size() {
            return Err(LogError::IndexOutOfRange {
                index: size,
                size: self.size(),
            });
        }
        Ok(mth(&self.leaves[..size as usize]))
    }

    /// An audit path (RFC 6962 §2.1.1) proving that leaf `index` is present
    /// in the tree of the given `size`.
    pub fn inclusion_proof(&self, index: u64, size: u64) -> Result<Vec<Digest>, LogError> {
        if index >= size || size > self.size() {
            return Err(LogError::IndexOutOfRange {
                index,
                size: self.size(),
            });
        }
        Ok(path(index as usize, &self.leaves[..size as usize]))
    }

    /// A consistency proof (RFC 6962 §2.1.2) between two earlier tree sizes.
    pub fn consistency_proof(&self, first: u64, second: u64) -> Result<Vec<Digest>, LogError> {
        if first > second {
            return Err(LogError::BadSizeOrder { first, second });
        }
        if second > self.size() {
            return Err(LogError::IndexOutOfRange {
                index: second,
                size: self.size(),
            });
        }
        if first == 0 || first == second {
            return Ok(Vec::new());
        }
        Ok(subproof(
            first as usize,
            &self.leaves[..second as usize],
            true,
        ))
    }
}

/// RFC 6962 `PATH(m, D[n])`.
fn path(m: usize, leaves: &[Digest]) -> Vec<Digest> {
    let n = leaves.len();
    if n == 1 {
        return Vec::new();
    }
    let k = split_point(n);
    if m < k {
        let mut proof = path(m, &leaves[..k]);
        proof.push(mth(&leaves[k..]));
        proof
    } else {
        let mut proof = path(m - k, &leaves[k..]);
        proof.push(mth(&leaves[..k]));
        proof
    }
}

/// RFC 6962 `SUBPROOF(m, D[n], b)`.
fn subproof(m: usize, leaves: &[Digest], b: bool) -> Vec<Digest> {
    let n = leaves.len();
    if m == n {
        return if b { Vec::new() } else { vec![mth(leaves)] };
    }
    let k = split_point(n);
    if m <= k {
        let mut proof = subproof(m, &leaves[..k], b);
        proof.push(mth(&leaves[k..]));
        proof
    } else {
        let mut proof = subproof(m - k, &leaves[k..], false);
        proof.push(mth(&leaves[..k]));
        proof
    }
}

/// Verify an inclusion proof for `leaf_data` at `index` in a tree of size `size` against `root`.
pub fn verify_inclusion(
    leaf_data: &[u8],
    index: u64,
    size: u64,
    proof: &[Digest],
    root: &Digest,
) -> Result<(), LogError> {
    if index >= size {
        return Err(LogError::IndexOutOfRange { index, size });
    }
    let computed = fold_inclusion(leaf_hash(leaf_data), index, size, proof)
        .ok_or(LogError::BadInclusionProof)?;
    if computed == *root {
        Ok(())
    } else {
        Err(LogError::BadInclusionProof)
    }
}

fn fold_inclusion(leaf: Digest, index: u64, size: u64, proof: &[Digest]) -> Option<Digest> {
    fold_inclusion_range(leaf, index as usize, size as usize, proof)
}

fn fold_inclusion_range(leaf: Digest, m: usize, n: usize, proof: &[Digest]) -> Option<Digest> {
    if n == 1 {
        return Some(leaf);
    }
    let k = split_point(n);
    let (sibling, rest) = proof.split_last()?;
    if m < k {
        let left = fold_inclusion_range(leaf, m, k, rest)?;
        Some(node_hash(&left, sibling))
    } else {
        let right = fold_inclusion_range(leaf, m - k, n - k, rest)?;
        Some(node_hash(sibling, &right))
    }
}

/// Verify a consistency proof that the log at `first` is a prefix of the log at `second`.
pub fn verify_consistency(
    first: u64,
    second: u64,
    proof: &[Digest],
    first_root: &Digest,
    second_root: &Digest,
) -> Result<(), LogError> {
    if first > second {
        return Err(LogError::BadSizeOrder { first, second });
    }
    if first == second {
        return if first_root == second_root {
            Ok(())
        } else {
            Err(LogError::BadConsistencyProof)
        };
    }
    if first == 0 {
        return Ok(());
    }

    let (old, new) =
        fold_consistency(first as usize, second as usize, proof, first_root).ok_or(LogError::BadConsistencyProof)?;
    if old == *first_root && new == *second_root {
        Ok(())
    } else {
        Err(LogError::BadConsistencyProof)
    }
}

/// Reconstructs `(old_root, new_root)` from a consistency proof. Walks the binary
/// representation of `old_size - 1` and `new_size - 1` from the leaf boundary up,
/// consuming one proof node per level where the two trees' shapes diverge.
fn fold_consistency(old_size: usize, new_size: usize, proof: &[Digest], old_root: &Digest) -> Option<(Digest, Digest)> {
    let mut node = old_size - 1;
    let mut last_node = new_size - 1;
    let mut it = proof.iter();

    while node % 2 == 1 {
        node /= 2;
        last_node /= 2;
    }

    let (mut old_node, mut new_node) = if node > 0 {
        let first = it.next()?.clone();
        (first.clone(), first)
    } else {
        (old_root.clone(), old_root.clone())
    };

    while node > 0 {
        if node % 2 == 1 {
            let sibling = it.next()?;
            old_node = node_hash(sibling, &old_node);
            new_node = node_hash(sibling, &new_node);
        } else if node < last_node {
            let sibling = it.next()?;
            new_node = node_hash(&new_node, sibling);
        }
        node /= 2;
        last_node /= 2;
    }

    while last_node > 0 {
        let sibling = it.next()?;
        new_node = node_hash(&new_node, sibling);
        last_node /= 2;
    }

    if it.next().is_some() {
        return None;
    }

    Some((old_node, new_node))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_of_empty_log_is_stable() {
        let log = MerkleLog::new();
        assert_eq!(log.root(), Digest::hash(&[]));
    }

    #[test]
    fn single_leaf_inclusion_proof_is_empty_and_verifies() {
        let mut log = MerkleLog::new();
        log.append(b"epoch-0-smh");
        let root = log.root();
        let proof = log.inclusion_proof(0, 1).unwrap();
        assert!(proof.is_empty());
        assert!(verify_inclusion(b"epoch-0-smh", 0, 1, &proof, &root).is_ok());
    }

    #[test]
    fn inclusion_proof_verifies_across_growing_log() {
        let mut log = MerkleLog::new();
        for i in 0..7 {
            log.append(format!("epoch-{i}-smh").as_bytes());
        }
        let size = log.size();
        let root = log.root();
        for i in 0..size {
            let proof = log.inclusion_proof(i, size).unwrap();
            let data = format!("epoch-{i}-smh");
            assert!(verify_inclusion(data.as_bytes(), i, size, &proof, &root).is_ok());
        }
    }

    #[test]
    fn tampered_leaf_fails_inclusion_proof() {
        let mut log = MerkleLog::new();
        for i in 0..5 {
            log.append(format!("epoch-{i}-smh").as_bytes());
        }
        let size = log.size();
        let root = log.root();
        let proof = log.inclusion_proof(2, size).unwrap();
        assert!(verify_inclusion(b"forged-epoch-2-smh", 2, size, &proof, &root).is_err());
    }

    #[test]
    fn consistency_proof_links_two_sizes() {
        let mut log = MerkleLog::new();
        for i in 0..3 {
            log.append(format!("epoch-{i}-smh").as_bytes());
        }
        let root_at_3 = log.root();
        for i in 3..8 {
            log.append(format!("epoch-{i}-smh").as_bytes());
        }
        let root_at_8 = log.root();

        let proof = log.consistency_proof(3, 8).unwrap();
        assert!(verify_consistency(3, 8, &proof, &root_at_3, &root_at_8).is_ok());
    }

    #[test]
    fn consistency_proof_rejects_mismatched_roots() {
        let mut log = MerkleLog::new();
        for i in 0..8 {
            log.append(format!("epoch-{i}-smh").as_bytes());
        }
        let root_at_8 = log.root();
        let bogus_root_at_3 = Digest::hash(b"not-the-real-root-at-3");

        let proof = log.consistency_proof(3, 8).unwrap();
        assert!(verify_consistency(3, 8, &proof, &bogus_root_at_3, &root_at_8).is_err());
    }

    #[test]
    fn consistency_proof_with_equal_sizes_is_trivial() {
        let mut log = MerkleLog::new();
        for i in 0..4 {
            log.append(format!("epoch-{i}-smh").as_bytes());
        }
        let root = log.root();
        let proof = log.consistency_proof(4, 4).unwrap();
        assert!(proof.is_empty());
        assert!(verify_consistency(4, 4, &proof, &root, &root).is_ok());
    }
}
