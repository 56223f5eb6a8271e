//! The cleartext preimage behind each identifier's current commitment
//! (supplements spec §6 "current entry per identifier"): `Entry` only ever
//! carries the hiding commitment, so the read path needs this side table,
//! populated from the winning `EntryUpdate` at epoch-commit time, to reveal
//! `(nonce, app_id, data)` alongside a `GetEntry` response. Only the most
//! recent revision's preimage is retained; history entries further back
//! carry no revealed preimage (spec §9 Open Questions left retention depth
//! unspecified, and an unbounded preimage archive is out of scope here).

use crate::error::StorageResult;
use crate::kv::Kv;
use crypto::{commitment::NONCE_LEN, Digest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const PREFIX: &[u8] = b"reveal/";

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Reveal {
    pub nonce: [u8; NONCE_LEN],
    pub app_id: Vec<u8>,
    pub data: Vec<u8>,
}

pub struct RevealStore<K: Kv> {
    kv: Arc<K>,
    directory_id: String,
}

impl<K: Kv> RevealStore<K> {
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

    pub fn get(&self, index: &Digest) -> StorageResult<Option<Reveal>> {
        self.kv
            .get(&self.key(index))?
            .map(|bytes| Ok(bincode::deserialize(&bytes)?))
            .transpose()
    }

    pub fn put_batch(&self, entries: &[(Digest, Reveal)]) -> StorageResult<()> {
        let items = entries
            .iter()
            .map(|(index, reveal)| Ok((self.key(index), bincode::serialize(reveal)?)))
            .collect::<StorageResult<Vec<_>>>()?;
        self.kv.put_batch(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn sample_reveal() -> Reveal {
        Reveal {
            nonce: [7u8; NONCE_LEN],
            app_id: b"app".to_vec(),
            data: b"payload".to_vec(),
        }
    }

    #[test]
    fn round_trips_a_single_reveal() {
        let store = RevealStore::new(Arc::new(MemoryKv::default()), "dir-1");
        let index = Digest::hash(b"alice");
        store.put_batch(&[(index.clone(), sample_reveal())]).unwrap();
        assert_eq!(store.get(&index).unwrap(), Some(sample_reveal()));
    }

    #[test]
    fn unknown_index_is_none() {
        let store: RevealStore<MemoryKv> = RevealStore::new(Arc::new(MemoryKv::default()), "dir-1");
        assert!(store.get(&Digest::hash(b"nobody")).unwrap().is_none());
    }
}
