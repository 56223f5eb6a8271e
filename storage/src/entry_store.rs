//! The current `Entry` per index (spec §6 "Persisted state": "current
//! entry per identifier"). The sparse tree only ever stores one-way leaf
//! hashes, so the epoch procedure and the monitor's replay both need this
//! side table to recover the actual `Entry` a given index currently holds
//! — e.g. to check a new update's `previous_hash` against it, or to read
//! back its `authorized_keys` for the signature-quorum check.

use crate::error::StorageResult;
use crate::kv::Kv;
use crypto::Digest;
use messages::Entry;
use std::sync::Arc;

const PREFIX: &[u8] = b"entry/";

pub struct EntryStore<K: Kv> {
    kv: Arc<K>,
    directory_id: String,
}

impl<K: Kv> EntryStore<K> {
    pub fn new(kv: Arc<K>, directory_id: impl Into<String>) -> Self {
        Self {
            kv,
            directory_id: directory_id.into(),
        }
    }

    fn key(&self, index: &Digest) -> Vec<u8> {
        let mut key = Vec::with_capacity(PREFIX.len() + self.directory_id.len() + 1 + 32);
        key.extend_from_slice(PREFIX);
        key.extend_from_slice(self.directory_id.as_bytes());
        key.push(b'/');
        key.extend_from_slice(index.as_ref());
        key
    }

    pub fn get(&self, index: &Digest) -> StorageResult<Option<Entry>> {
        self.kv
            .get(&self.key(index))?
            .map(|bytes| Ok(bincode::deserialize(&bytes)?))
            .transpose()
    }

    pub fn put(&self, index: &Digest, entry: &Entry) -> StorageResult<()> {
        self.kv.put(&self.key(index), &bincode::serialize(entry)?)
    }

    /// Persist many entries in one batch, as the epoch procedure does at
    /// the end of folding a batch of accepted mutations.
    pub fn put_batch(&self, entries: &[(Digest, Entry)]) -> StorageResult<()> {
        let items = entries
            .iter()
            .map(|(index, entry)| Ok((self.key(index), bincode::serialize(entry)?)))
            .collect::<StorageResult<Vec<_>>>()?;
        self.kv.put_batch(&items)
    }
}
