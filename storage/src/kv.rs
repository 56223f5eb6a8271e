//! The key-value substrate every other storage module is built on (spec §6
//! "Persisted state"). `Kv` is deliberately narrow — get/put/compare-and-swap
//! and a prefix scan — so that a RocksDB-backed implementation and an
//! in-memory one used by tests satisfy it identically.

use crate::error::{StorageError, StorageResult};
use std::sync::Arc;

pub trait Kv: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;
    fn put_batch(&self, items: &[(Vec<u8>, Vec<u8>)]) -> StorageResult<()>;
    /// Remove `key` entirely. A subsequent `get` returns `None`, never
    /// `Some(vec![])` — callers that mark a key "cleared" must use this
    /// rather than overwriting it with an empty value, since an empty
    /// value still round-trips through `get`/`bincode::deserialize` as
    /// `Some` and fails to parse as whatever type the key used to hold.
    fn delete(&self, key: &[u8]) -> StorageResult<()>;
    /// Atomically set `key` to `new` iff its current value equals `expected`
    /// (`None` meaning absent). Used for the monotonic mutation-id counter
    /// and the sequencer's exclusive directory lease.
    fn compare_and_swap(&self, key: &[u8], expected: Option<&[u8]>, new: &[u8]) -> StorageResult<bool>;
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

pub struct RocksKv {
    db: Arc<rocksdb::DB>,
}

impl RocksKv {
    pub fn open(path: &str) -> StorageResult<Self> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = rocksdb::DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl Clone for RocksKv {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

impl Kv for RocksKv {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        Ok(self.db.put(key, value)?)
    }

    fn put_batch(&self, items: &[(Vec<u8>, Vec<u8>)]) -> StorageResult<()> {
        let mut batch = rocksdb::WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        Ok(self.db.write(batch)?)
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        Ok(self.db.delete(key)?)
    }

    fn compare_and_swap(&self, key: &[u8], expected: Option<&[u8]>, new: &[u8]) -> StorageResult<bool> {
        // rocksdb's single-node transactions aren't enabled on this DB kind,
        // so CAS is implemented as an optimistic read-then-write guarded by
        // a process-wide lock; cross-process mutual exclusion is left to
        // the lease record itself (whoever wins the CAS holds the lease).
        static GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());
        let _lock = GUARD.lock().unwrap_or_else(|p| p.into_inner());
        let current = self.db.get(key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        self.db.put(key, new)?;
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        let iter = self.db.prefix_iterator(prefix);
        for item in iter {
            let (key, value) = item.map_err(StorageError::from)?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}

/// An in-memory `Kv`, used by tests and by the monitor/client's scratch
/// replay when no real database is configured.
#[derive(Default)]
pub struct MemoryKv {
    map: std::sync::Mutex<std::collections::BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Kv for MemoryKv {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.map.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn put_batch(&self, items: &[(Vec<u8>, Vec<u8>)]) -> StorageResult<()> {
        let mut guard = self.map.lock().unwrap();
        for (key, value) in items {
            guard.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }

    fn compare_and_swap(&self, key: &[u8], expected: Option<&[u8]>, new: &[u8]) -> StorageResult<bool> {
        let mut guard = self.map.lock().unwrap();
        if guard.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        guard.insert(key.to_vec(), new.to_vec());
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .map
            .lock()
            .unwrap()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
