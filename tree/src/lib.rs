//! A depth-256 sparse Merkle tree keyed by the 32-byte VRF output of an
//! identifier, committing to the directory's entire identifier space in a
//! single root. Unmaterialized subtrees are represented implicitly by a
//! precomputed table of per-level empty-subtree hashes, so a tree with a
//! handful of entries costs only the nodes on their root-to-leaf paths.

use crypto::Digest;
use thiserror::Error;

/// Bit depth of the tree: one bit of the index per level, root at the top.
pub const DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("proof has {got} siblings, expected {want}")]
    WrongProofLength { got: usize, want: usize },
    #[error("node store error: {0}")]
    Store(String),
    #[error("DUPLICATE_INDEX: index {0:?} updated twice within one batch")]
    DuplicateIndex(Digest),
}

/// Backing storage for materialized tree nodes, addressed by `(level, key)`
/// where `level` is the distance from the leaves (0) to the root (`DEPTH`)
/// and `key` is the index with all bits below that level's prefix zeroed.
/// A `None` result means the node is an unmaterialized empty subtree.
pub trait NodeStore {
    fn get_node(&self, level: usize, key: &Digest) -> Result<Option<Digest>, TreeError>;
    fn put_nodes(&mut self, updates: &[(usize, Digest, Digest)]) -> Result<(), TreeError>;
}

/// An in-memory node store, useful for tests and for the client/monitor's
/// scratch verification of a proof without standing up real storage.
#[derive(Default)]
pub struct MemoryStore {
    nodes: std::collections::HashMap<(usize, Digest), Digest>,
}

impl NodeStore for MemoryStore {
    fn get_node(&self, level: usize, key: &Digest) -> Result<Option<Digest>, TreeError> {
        Ok(self.nodes.get(&(level, key.clone())).cloned())
    }

    fn put_nodes(&mut self, updates: &[(usize, Digest, Digest)]) -> Result<(), TreeError> {
        for (level, key, value) in updates {
            self.nodes.insert((*level, key.clone()), value.clone());
        }
        Ok(())
    }
}

/// An inclusion or absence proof: one sibling hash per level, leaf to root.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct MerkleProof {
    pub siblings: Vec<Digest>,
}

/// The precomputed table of empty-subtree hashes, `empty[level]` for a
/// subtree of height `level` with no materialized leaves. Independent of
/// position: every unmaterialized subtree of a given height hashes the same
/// way, which is what makes a 256-bit-indexed tree tractable to hold in memory.
fn compute_empty() -> Vec<Digest> {
    let mut out = Vec::with_capacity(DEPTH + 1);
    out.push(Digest::hash_parts(&[&[0x02u8]]));
    for i in 0..DEPTH {
        let prev = &out[i];
        out.push(Digest::hash_parts(&[&[0x01u8], prev.as_ref(), prev.as_ref()]));
    }
    out
}

/// `H(0x00 || index || depth || value)`, `depth` fixed at the tree's full bit width.
fn hash_leaf(index: &Digest, value: &Digest) -> Digest {
    let depth = (DEPTH as u64).to_be_bytes();
    Digest::hash_parts(&[&[0x00u8], index.as_ref(), &depth, value.as_ref()])
}

fn hash_internal(left: &Digest, right: &Digest) -> Digest {
    Digest::hash_parts(&[&[0x01u8], left.as_ref(), right.as_ref()])
}

/// MSB-first bit access over a 256-bit index, `i` in `0..256`.
fn bit_at(index: &Digest, i: usize) -> bool {
    let byte = index.0[i / 8];
    let shift = 7 - (i % 8);
    (byte >> shift) & 1 == 1
}

fn set_bit(index: &mut [u8; 32], i: usize, value: bool) {
    let mask = 1u8 << (7 - (i % 8));
    if value {
        index[i / 8] |= mask;
    } else {
        index[i / 8] &= !mask;
    }
}

/// Zero out every bit from position `bits` onward (keep only the top `bits` MSB-first bits).
fn mask_prefix(index: &Digest, bits: usize) -> Digest {
    let mut out = index.0;
    for i in bits..DEPTH {
        set_bit(&mut out, i, false);
    }
    Digest(out)
}

/// A sparse Merkle tree over an arbitrary `NodeStore`.
pub struct SparseMerkleTree<S: NodeStore> {
    store: S,
    empty: Vec<Digest>,
}

impl<S: NodeStore> SparseMerkleTree<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            empty: compute_empty(),
        }
    }

    /// The root of the tree, or the canonical empty root if nothing has ever been inserted.
    pub fn root(&self) -> Result<Digest, TreeError> {
        let zero = Digest::nil();
        Ok(self
            .store
            .get_node(DEPTH, &zero)?
            .unwrap_or_else(|| self.empty[DEPTH].clone()))
    }

    /// Insert or update the leaf at `index`, returning the new root.
    pub fn insert(&mut self, index: &Digest, value: &Digest) -> Result<Digest, TreeError> {
        let leaf = hash_leaf(index, value);
        let mut updates = Vec::with_capacity(DEPTH + 1);
        updates.push((0usize, mask_prefix(index, DEPTH), leaf.clone()));

        let mut current = leaf;
        for level in 0..DEPTH {
            let prefix_bits = DEPTH - level;
            let distinguishing_bit = prefix_bits - 1;

            let mut sibling_key_bytes = mask_prefix(index, prefix_bits).0;
            set_bit(&mut sibling_key_bytes, distinguishing_bit, !bit_at(index, distinguishing_bit));
            let sibling_key = Digest(sibling_key_bytes);

            let sibling = self
                .store
                .get_node(level, &sibling_key)?
                .unwrap_or_else(|| self.empty[level].clone());

            let parent = if bit_at(index, distinguishing_bit) {
                hash_internal(&sibling, &current)
            } else {
                hash_internal(&current, &sibling)
            };

            let parent_key = mask_prefix(index, prefix_bits - 1);
            updates.push((level + 1, parent_key, parent.clone()));
            current = parent;
        }

        self.store.put_nodes(&updates)?;
        Ok(current)
    }

    /// Insert a batch of `(index, value)` pairs, one new root for the whole
    /// batch. Two entries for the same index in the same call are a
    /// programming error (the sequencer must resolve intra-epoch collisions
    /// to a single winning value per index before calling this).
    pub fn insert_batch(&mut self, updates: &[(Digest, Digest)]) -> Result<Digest, TreeError> {
        let mut seen = std::collections::HashSet::with_capacity(updates.len());
        for (index, _) in updates {
            if !seen.insert(index.clone()) {
                return Err(TreeError::DuplicateIndex(index.clone()));
            }
        }
        let mut root = self.root()?;
        for (index, value) in updates {
            root = self.insert(index, value)?;
        }
        Ok(root)
    }

    /// Build an inclusion (or absence) proof for `index`: one sibling per level.
    pub fn proof(&self, index: &Digest) -> Result<MerkleProof, TreeError> {
        let mut siblings = Vec::with_capacity(DEPTH);
        for level in 0..DEPTH {
            let prefix_bits = DEPTH - level;
            let distinguishing_bit = prefix_bits - 1;

            let mut sibling_key_bytes = mask_prefix(index, prefix_bits).0;
            set_bit(&mut sibling_key_bytes, distinguishing_bit, !bit_at(index, distinguishing_bit));
            let sibling_key = Digest(sibling_key_bytes);

            let sibling = self
                .store
                .get_node(level, &sibling_key)?
                .unwrap_or_else(|| self.empty[level].clone());
            siblings.push(sibling);
        }
        Ok(MerkleProof { siblings })
    }
}

/// Recompute the root implied by a membership proof: `index` maps to `value`.
pub fn verify_membership(index: &Digest, value: &Digest, proof: &MerkleProof, root: &Digest) -> Result<bool, TreeError> {
    if proof.siblings.len() != DEPTH {
        return Err(TreeError::WrongProofLength {
            got: proof.siblings.len(),
            want: DEPTH,
        });
    }
    let leaf = hash_leaf(index, value);
    Ok(fold_proof(index, leaf, proof) == *root)
}

/// Recompute the root implied by an absence proof: `index` maps to the empty leaf.
pub fn verify_non_membership(index: &Digest, proof: &MerkleProof, root: &Digest) -> Result<bool, TreeError> {
    if proof.siblings.len() != DEPTH {
        return Err(TreeError::WrongProofLength {
            got: proof.siblings.len(),
            want: DEPTH,
        });
    }
    let empty_leaf = compute_empty()[0].clone();
    Ok(fold_proof(index, empty_leaf, proof) == *root)
}

fn fold_proof(index: &Digest, leaf: Digest, proof: &MerkleProof) -> Digest {
    let mut current = leaf;
    for (level, sibling) in proof.siblings.iter().enumerate() {
        let prefix_bits = DEPTH - level;
        let distinguishing_bit = prefix_bits - 1;
        current = if bit_at(index, distinguishing_bit) {
            hash_internal(sibling, &current)
        } else {
            hash_internal(&current, sibling)
        };
    }
    current
}
