//! Per-epoch persisted state (spec §6 "Persisted state": per-epoch
//! mutation snapshot, tree delta per epoch, SMH log) plus the crash-recovery
//! watermark the epoch procedure's idempotence depends on (spec §4.7).
//!
//! The epoch procedure writes a `PendingEpoch` marker *before* it starts
//! mutating the tree, then overwrites it with the finished `EpochRecord` and
//! clears the marker in the same batch. If the process dies in between, the
//! next boot finds a marker with no matching record and resumes from there
//! instead of starting a fresh epoch (spec §4.7 "Idempotence").

use crate::error::{StorageError, StorageResult};
use crate::kv::Kv;
use messages::{MutationRecord, SignedLogRoot, SignedMapHead};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use txlog::MerkleLog;

const LATEST_KEY: &[u8] = b"epoch/latest";
const PENDING_KEY: &[u8] = b"epoch/pending";
const RECORD_PREFIX: &[u8] = b"epoch/record/";
const MUTATIONS_PREFIX: &[u8] = b"epoch/mutations/";

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct EpochRecord {
    pub epoch: u64,
    pub smh: SignedMapHead,
    pub signed_log_root: SignedLogRoot,
    /// The half-open `[from, to)` range of mutation-queue ids folded into this epoch.
    pub mutation_range: (u64, u64),
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PendingEpoch {
    pub epoch: u64,
    pub mutation_range: (u64, u64),
}

pub struct EpochStore<K: Kv> {
    kv: Arc<K>,
}

impl<K: Kv> EpochStore<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    fn record_key(epoch: u64) -> Vec<u8> {
        let mut key = RECORD_PREFIX.to_vec();
        key.extend_from_slice(&epoch.to_be_bytes());
        key
    }

    fn mutations_key(epoch: u64) -> Vec<u8> {
        let mut key = MUTATIONS_PREFIX.to_vec();
        key.extend_from_slice(&epoch.to_be_bytes());
        key
    }

    pub fn latest_epoch(&self) -> StorageResult<Option<u64>> {
        Ok(self
            .kv
            .get(LATEST_KEY)?
            .map(|bytes| u64::from_be_bytes(bytes.as_slice().try_into().unwrap())))
    }

    pub fn get(&self, epoch: u64) -> StorageResult<Option<EpochRecord>> {
        self.kv
            .get(&Self::record_key(epoch))?
            .map(|bytes| Ok(bincode::deserialize(&bytes)?))
            .transpose()
    }

    pub fn mutations(&self, epoch: u64) -> StorageResult<Vec<MutationRecord>> {
        match self.kv.get(&Self::mutations_key(epoch))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Mark an epoch as in flight, before the tree is touched.
    pub fn begin_pending(&self, epoch: u64, mutation_range: (u64, u64)) -> StorageResult<()> {
        let pending = PendingEpoch { epoch, mutation_range };
        self.kv.put(PENDING_KEY, &bincode::serialize(&pending)?)?;
        Ok(())
    }

    pub fn pending(&self) -> StorageResult<Option<PendingEpoch>> {
        match self.kv.get(PENDING_KEY)? {
            Some(bytes) if !bytes.is_empty() => Ok(Some(bincode::deserialize(&bytes)?)),
            _ => Ok(None),
        }
    }

    /// Persist the finished epoch's mutation records and record, advance
    /// the latest-epoch pointer in one batch, then clear the pending
    /// marker. The marker clear is a separate, real `delete` rather than
    /// folded into the batch as an empty value, since an empty value
    /// would no longer round-trip through `pending()`'s deserialization.
    /// Re-running `commit` for the same epoch after a crash between the
    /// two steps is harmless: it rewrites the same record and clears the
    /// same marker.
    pub fn commit(
        &self,
        record: EpochRecord,
        mutation_records: &[MutationRecord],
    ) -> StorageResult<()> {
        let epoch = record.epoch;
        let items = vec![
            (Self::record_key(epoch), bincode::serialize(&record)?),
            (Self::mutations_key(epoch), bincode::serialize(mutation_records)?),
            (LATEST_KEY.to_vec(), epoch.to_be_bytes().to_vec()),
        ];
        self.kv.put_batch(&items)?;
        self.kv.delete(PENDING_KEY)?;
        if self.kv.get(PENDING_KEY)?.is_some() {
            return Err(StorageError::Conflict("pending marker was not cleared".into()));
        }
        Ok(())
    }
}

/// Replay every committed `EpochRecord` into a fresh in-memory log of SMHs,
/// in epoch order. Shared by the sequencer (to resume its live log where
/// storage left off on restart) and by a monitor (which never trusts the
/// sequencer's own in-memory log and always rebuilds its view of it from
/// the persisted record instead).
pub fn rebuild_log<K: Kv>(epoch_store: &EpochStore<K>) -> StorageResult<MerkleLog> {
    let mut log = MerkleLog::new();
    if let Some(latest) = epoch_store.latest_epoch()? {
        for epoch in 0..=latest {
            if let Some(record) = epoch_store.get(epoch)? {
                log.append(&record.smh.log_leaf_bytes());
            }
        }
    }
    Ok(log)
}
