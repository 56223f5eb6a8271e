//! `tree::NodeStore` backed by `Kv`, namespaced under `node/` (spec §9
//! "stored as `(depth, index_prefix) -> hash` maps").

use crate::kv::Kv;
use crypto::Digest;
use std::sync::Arc;
use tree::{NodeStore, TreeError};

pub struct KvNodeStore<K: Kv> {
    kv: Arc<K>,
    directory_id: String,
}

impl<K: Kv> KvNodeStore<K> {
    pub fn new(kv: Arc<K>, directory_id: impl Into<String>) -> Self {
        Self {
            kv,
            directory_id: directory_id.into(),
        }
    }

    fn key(&self, level: usize, index: &Digest) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.directory_id.len() + 1 + 8 + 32);
        key.extend_from_slice(b"node/");
        key.extend_from_slice(self.directory_id.as_bytes());
        key.push(b'/');
        key.extend_from_slice(&(level as u64).to_be_bytes());
        key.extend_from_slice(index.as_ref());
        key
    }
}

impl<K: Kv> NodeStore for KvNodeStore<K> {
    fn get_node(&self, level: usize, key: &Digest) -> Result<Option<Digest>, TreeError> {
        let raw = self
            .kv
            .get(&self.key(level, key))
            .map_err(|e| TreeError::Store(e.to_string()))?;
        raw.map(|bytes| Digest::try_from(bytes.as_slice()))
            .transpose()
            .map_err(|e| TreeError::Store(e.to_string()))
    }

    fn put_nodes(&mut self, updates: &[(usize, Digest, Digest)]) -> Result<(), TreeError> {
        let items: Vec<(Vec<u8>, Vec<u8>)> = updates
            .iter()
            .map(|(level, index, hash)| (self.key(*level, index), hash.to_vec()))
            .collect();
        self.kv
            .put_batch(&items)
            .map_err(|e| TreeError::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use tree::SparseMerkleTree;

    #[test]
    fn kv_node_store_persists_across_tree_instances() {
        let kv = Arc::new(MemoryKv::default());
        let index = Digest::hash(b"alice");
        let leaf = Digest::hash(b"leaf-value");
        let root = {
            let store = KvNodeStore::new(kv.clone(), "dir-1");
            let mut tree = SparseMerkleTree::new(store);
            tree.insert(&index, &leaf).unwrap()
        };
        let store = KvNodeStore::new(kv, "dir-1");
        let tree = SparseMerkleTree::new(store);
        assert_eq!(tree.root().unwrap(), root);
        let proof = tree.proof(&index).unwrap();
        assert!(tree::verify_membership(&index, &leaf, &proof, &root).unwrap());
    }
}
