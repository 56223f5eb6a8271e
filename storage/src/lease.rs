//! The storage-level exclusive lease a sequencer holds on a directory_id
//! (spec §5 "Single-writer enforcement": "a storage-level exclusive lease,
//! keyed on directory_id, that a would-be sequencer must acquire and renew
//! before running the epoch procedure"). There is no separate lock
//! service: the lease is just a versioned record in the same `Kv`,
//! acquired and renewed via `compare_and_swap` so two sequencer processes
//! racing for the same directory can never both believe they hold it.

use crate::error::StorageResult;
use crate::kv::Kv;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn lease_key(directory_id: &str) -> Vec<u8> {
    let mut key = b"lease/".to_vec();
    key.extend_from_slice(directory_id.as_bytes());
    key
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
struct LeaseRecord {
    holder: String,
    expires_at_millis: u64,
}

/// A held (or contended-for) lease on one directory's sequencer role.
pub struct DirectoryLease<K: Kv> {
    kv: Arc<K>,
    directory_id: String,
    holder: String,
    current: Option<LeaseRecord>,
}

impl<K: Kv> DirectoryLease<K> {
    pub fn new(kv: Arc<K>, directory_id: impl Into<String>, holder: impl Into<String>) -> Self {
        Self {
            kv,
            directory_id: directory_id.into(),
            holder: holder.into(),
            current: None,
        }
    }

    /// Attempt to acquire (or renew, if we already hold it) the lease,
    /// good until `now_millis + ttl_millis`. Fails if someone else holds
    /// an unexpired lease.
    pub fn acquire(&mut self, now_millis: u64, ttl_millis: u64) -> StorageResult<bool> {
        let key = lease_key(&self.directory_id);
        let raw = self.kv.get(&key)?;
        if let Some(bytes) = &raw {
            let existing: LeaseRecord = bincode::deserialize(bytes)?;
            if existing.holder != self.holder && existing.expires_at_millis > now_millis {
                return Ok(false);
            }
        }
        let new_record = LeaseRecord {
            holder: self.holder.clone(),
            expires_at_millis: now_millis + ttl_millis,
        };
        let new_bytes = bincode::serialize(&new_record)?;
        let swapped = self
            .kv
            .compare_and_swap(&key, raw.as_deref(), &new_bytes)?;
        if swapped {
            self.current = Some(new_record);
        }
        Ok(swapped)
    }

    /// Release a held lease by deleting its record outright, rather than
    /// overwriting it with an empty value — a later `acquire` by anyone
    /// else must see an absent key, not a value it fails to deserialize.
    /// Only deletes if the stored record still matches what we last wrote:
    /// if the lease already expired and someone else renewed it, that
    /// holder's record is left alone.
    pub fn release(&mut self) -> StorageResult<()> {
        if let Some(current) = self.current.take() {
            let key = lease_key(&self.directory_id);
            let current_bytes = bincode::serialize(&current)?;
            if self.kv.get(&key)?.as_deref() == Some(current_bytes.as_slice()) {
                self.kv.delete(&key)?;
            }
        }
        Ok(())
    }

    pub fn holds(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[test]
    fn a_fresh_lease_is_acquired() {
        let kv = Arc::new(MemoryKv::default());
        let mut lease = DirectoryLease::new(kv, "dir-1", "seq-a");
        assert!(lease.acquire(1_000, 5_000).unwrap());
        assert!(lease.holds());
    }

    #[test]
    fn a_second_holder_is_rejected_while_unexpired() {
        let kv = Arc::new(MemoryKv::default());
        let mut a = DirectoryLease::new(kv.clone(), "dir-1", "seq-a");
        assert!(a.acquire(1_000, 5_000).unwrap());

        let mut b = DirectoryLease::new(kv, "dir-1", "seq-b");
        assert!(!b.acquire(2_000, 5_000).unwrap());
    }

    #[test]
    fn a_second_holder_succeeds_once_the_lease_expires() {
        let kv = Arc::new(MemoryKv::default());
        let mut a = DirectoryLease::new(kv.clone(), "dir-1", "seq-a");
        assert!(a.acquire(1_000, 1_000).unwrap());

        let mut b = DirectoryLease::new(kv, "dir-1", "seq-b");
        assert!(b.acquire(10_000, 5_000).unwrap());
    }

    #[test]
    fn the_same_holder_can_renew() {
        let kv = Arc::new(MemoryKv::default());
        let mut a = DirectoryLease::new(kv, "dir-1", "seq-a");
        assert!(a.acquire(1_000, 5_000).unwrap());
        assert!(a.acquire(2_000, 5_000).unwrap());
    }

    #[test]
    fn releasing_lets_another_holder_acquire_immediately() {
        let kv = Arc::new(MemoryKv::default());
        let mut a = DirectoryLease::new(kv.clone(), "dir-1", "seq-a");
        assert!(a.acquire(1_000, 5_000).unwrap());
        a.release().unwrap();
        assert!(!a.holds());

        let mut b = DirectoryLease::new(kv, "dir-1", "seq-b");
        assert!(b.acquire(1_001, 5_000).unwrap());
    }
}
