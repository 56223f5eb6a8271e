//! The durable, multi-writer mutation intake queue (spec §5 "Mutator
//! intake"): accepted updates are appended with a monotonically increasing
//! id, and that storage-assigned id is the only ordering concurrent
//! submitters can rely on.

use crate::error::StorageResult;
use crate::kv::Kv;
use crypto::Digest;
use messages::EntryUpdate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NEXT_ID_KEY: &[u8] = b"queue/next_id";
const ENTRY_PREFIX: &[u8] = b"queue/entry/";

/// An intake-accepted update, already located at its VRF-derived `index`
/// (computed once at intake time, since only the directory's VRF secret
/// key can do that — the epoch procedure never needs to touch it again).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct QueuedMutation {
    pub id: u64,
    pub accepted_at_millis: u64,
    pub index: Digest,
    pub update: EntryUpdate,
}

pub struct MutationQueue<K: Kv> {
    kv: Arc<K>,
}

impl<K: Kv> MutationQueue<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    fn entry_key(id: u64) -> Vec<u8> {
        let mut key = ENTRY_PREFIX.to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    /// Append `update` at its already-derived `index`, returning the id the
    /// storage layer assigned it. Retries internally against concurrent
    /// appenders via CAS on the counter; callers never see a transient conflict.
    pub fn append(&self, index: Digest, update: EntryUpdate, accepted_at_millis: u64) -> StorageResult<u64> {
        loop {
            let current = self.kv.get(NEXT_ID_KEY)?;
            let current_id = match &current {
                Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().unwrap_or([0; 8])),
                None => 0,
            };
            let next_id = current_id + 1;
            let swapped = self.kv.compare_and_swap(
                NEXT_ID_KEY,
                current.as_deref(),
                &next_id.to_be_bytes(),
            )?;
            if !swapped {
                continue;
            }
            let record = QueuedMutation {
                id: current_id,
                accepted_at_millis,
                index: index.clone(),
                update,
            };
            let bytes = bincode::serialize(&record)?;
            self.kv.put(&Self::entry_key(current_id), &bytes)?;
            return Ok(current_id);
        }
    }

    /// All mutations with id in `[from, to)`, in ascending id order — the
    /// "ordered by acceptance time, ties broken by mutation id ascending"
    /// order the epoch procedure consumes (spec §4.7 step 1).
    pub fn range(&self, from: u64, to_exclusive: u64) -> StorageResult<Vec<QueuedMutation>> {
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(ENTRY_PREFIX)? {
            let id = u64::from_be_bytes(key[ENTRY_PREFIX.len()..].try_into().unwrap());
            if id >= from && id < to_exclusive {
                out.push(bincode::deserialize(&value)?);
            }
        }
        out.sort_by_key(|record: &QueuedMutation| record.id);
        Ok(out)
    }

    pub fn next_id(&self) -> StorageResult<u64> {
        Ok(match self.kv.get(NEXT_ID_KEY)? {
            Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().unwrap_or([0; 8])),
            None => 0,
        })
    }
}
