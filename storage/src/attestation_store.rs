//! Persisted monitor attestations (spec §6 "Persisted state": "monitor
//! attestations"), keyed by epoch. A monitor writes exactly one record per
//! epoch it has replayed — an `Attested` record on agreement, a `Diverged`
//! record the one time it disagrees, after which it never writes again.

use crate::error::StorageResult;
use crate::kv::Kv;
use messages::{Attestation, Inconsistency};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const PREFIX: &[u8] = b"attestation/";

#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum AttestationRecord {
    Attested(Attestation),
    Diverged(Inconsistency),
}

impl AttestationRecord {
    pub fn is_diverged(&self) -> bool {
        matches!(self, AttestationRecord::Diverged(_))
    }
}

pub struct AttestationStore<K: Kv> {
    kv: Arc<K>,
    directory_id: String,
}

impl<K: Kv> AttestationStore<K> {
    pub fn new(kv: Arc<K>, directory_id: impl Into<String>) -> Self {
        Self {
            kv,
            directory_id: directory_id.into(),
        }
    }

    fn key(&self, epoch: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(PREFIX.len() + self.directory_id.len() + 1 + 8);
        key.extend_from_slice(PREFIX);
        key.extend_from_slice(self.directory_id.as_bytes());
        key.push(b'/');
        key.extend_from_slice(&epoch.to_be_bytes());
        key
    }

    pub fn get(&self, epoch: u64) -> StorageResult<Option<AttestationRecord>> {
        self.kv
            .get(&self.key(epoch))?
            .map(|bytes| Ok(bincode::deserialize(&bytes)?))
            .transpose()
    }

    pub fn put(&self, epoch: u64, record: &AttestationRecord) -> StorageResult<()> {
        self.kv.put(&self.key(epoch), &bincode::serialize(record)?)
    }

    /// The highest epoch this monitor has ever recorded an attestation for,
    /// scanning the whole namespace (there is no separate watermark key —
    /// a monitor's own attestations are its own record of progress).
    pub fn last_recorded_epoch(&self) -> StorageResult<Option<u64>> {
        let mut prefix = PREFIX.to_vec();
        prefix.extend_from_slice(self.directory_id.as_bytes());
        prefix.push(b'/');
        let rows = self.kv.scan_prefix(&prefix)?;
        let mut max_epoch = None;
        for (key, _) in &rows {
            let epoch_bytes = &key[prefix.len()..];
            let epoch = u64::from_be_bytes(epoch_bytes.try_into().map_err(|_| {
                crate::error::StorageError::Corrupt("attestation".into(), "malformed epoch key suffix".into())
            })?);
            max_epoch = Some(max_epoch.map_or(epoch, |m: u64| m.max(epoch)));
        }
        Ok(max_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crypto::{Digest, KeyPair};
    use rand_core::OsRng;

    #[test]
    fn round_trips_an_attestation() {
        let store = AttestationStore::new(Arc::new(MemoryKv::default()), "dir-1");
        let (_, sk) = KeyPair::generate_keypair(&mut OsRng);
        let att = Attestation::new("dir-1".into(), 3, Digest::hash(b"root"), &sk);
        store.put(3, &AttestationRecord::Attested(att)).unwrap();
        assert_eq!(store.last_recorded_epoch().unwrap(), Some(3));
        assert!(!store.get(3).unwrap().unwrap().is_diverged());
    }

    #[test]
    fn separate_directories_do_not_collide() {
        let kv = Arc::new(MemoryKv::default());
        let a = AttestationStore::new(kv.clone(), "dir-a");
        let b = AttestationStore::new(kv, "dir-b");
        let (_, sk) = KeyPair::generate_keypair(&mut OsRng);
        let att = Attestation::new("dir-a".into(), 1, Digest::hash(b"root"), &sk);
        a.put(1, &AttestationRecord::Attested(att)).unwrap();
        assert!(b.get(1).unwrap().is_none());
    }
}
