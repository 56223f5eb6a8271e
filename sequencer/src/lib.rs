//! Wires the sequencer's three actors — `Batcher`, `Epocher`, `Gossiper` —
//! into one directory-serving process, and implements `DirectoryService`
//! (spec §6) against their shared storage so the same process answers both
//! the write path (`update_entry`) and every read path.

pub mod batcher;
pub mod epocher;
pub mod gossiper;

use async_trait::async_trait;
use batcher::{Batcher, TickPolicy};
use config::{Directory, DirectoryId};
use crypto::{vrf, KeyPair};
use epocher::Epocher;
use gossiper::Gossiper;
use messages::{
    bundle::{GetEntryHistoryResponse, GetEntryResponse, HistoryEntry, RevealedEntry},
    mutation::MutationRecord,
    vrf_message, EntryUpdate, MessageError,
};
use network::{DirectoryService, EpochView, MutationPage, ServiceError, ServiceResult};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storage::{
    rebuild_log, EntryStore, EpochRecord, EpochStore, Kv, KvNodeStore, MutationQueue, RevealStore,
    StorageResult,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tree::SparseMerkleTree;
use txlog::MerkleLog;

/// How many mutations `list_mutations` returns per page.
const MUTATIONS_PAGE_SIZE: usize = 500;
/// How often the `Batcher` polls the queue and epoch watermark.
const BATCHER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The single writer and read server for one directory. Cloning is cheap:
/// every field is an `Arc` (or copy) over state shared with the spawned
/// `Batcher`/`Epocher` tasks.
#[derive(Clone)]
pub struct Sequencer<K: Kv> {
    directory: Directory,
    vrf_secret: Arc<KeyPair>,
    kv: Arc<K>,
    queue: Arc<MutationQueue<K>>,
    epoch_store: Arc<EpochStore<K>>,
    entry_store: Arc<EntryStore<K>>,
    reveal_store: Arc<RevealStore<K>>,
    log: Arc<Mutex<MerkleLog>>,
    gossiper: Gossiper,
}

impl<K: Kv> Sequencer<K> {
    /// Build the sequencer's storage handles, resume any crash-interrupted
    /// epoch, and spawn the `Batcher`/`Epocher` tasks that drive future
    /// ones. Returns the sequencer (for serving reads/writes) alongside
    /// both tasks' handles.
    pub fn spawn(
        kv: Arc<K>,
        directory: Directory,
        vrf_secret: KeyPair,
        map_secret: KeyPair,
        log_secret: KeyPair,
    ) -> StorageResult<(Self, JoinHandle<()>, JoinHandle<()>)> {
        let queue = Arc::new(MutationQueue::new(kv.clone()));
        let epoch_store = Arc::new(EpochStore::new(kv.clone()));
        let entry_store = Arc::new(EntryStore::new(kv.clone(), directory.directory_id.clone()));
        let reveal_store = Arc::new(RevealStore::new(kv.clone(), directory.directory_id.clone()));
        let log = Arc::new(Mutex::new(rebuild_log(&epoch_store)?));
        let gossiper = Gossiper::default();

        let (tx_tick, rx_tick) = mpsc::channel(1);
        let policy = TickPolicy {
            min_interval: Duration::from_millis(directory.min_interval_ms),
            max_interval: Duration::from_millis(directory.max_interval_ms),
        };
        let batcher_handle = Batcher::spawn(
            policy,
            queue.clone(),
            epoch_store.clone(),
            tx_tick,
            BATCHER_POLL_INTERVAL,
        );
        let epocher_handle = Epocher::spawn(
            kv.clone(),
            directory.directory_id.clone(),
            map_secret,
            log_secret,
            queue.clone(),
            epoch_store.clone(),
            entry_store.clone(),
            reveal_store.clone(),
            log.clone(),
            gossiper.clone(),
            rx_tick,
        )?;

        let sequencer = Self {
            directory,
            vrf_secret: Arc::new(vrf_secret),
            kv,
            queue,
            epoch_store,
            entry_store,
            reveal_store,
            log,
            gossiper,
        };
        Ok((sequencer, batcher_handle, epocher_handle))
    }

    fn check_directory(&self, directory_id: &DirectoryId) -> ServiceResult<()> {
        if *directory_id != self.directory.directory_id {
            return Err(ServiceError::NotFound(format!("unknown directory {directory_id}")));
        }
        Ok(())
    }

    fn tree(&self) -> SparseMerkleTree<KvNodeStore<K>> {
        SparseMerkleTree::new(KvNodeStore::new(self.kv.clone(), self.directory.directory_id.clone()))
    }

    fn latest_record(&self) -> ServiceResult<EpochRecord> {
        let epoch = self
            .epoch_store
            .latest_epoch()?
            .ok_or_else(|| ServiceError::NotFound("directory has not published any epochs yet".into()))?;
        self.epoch_store
            .get(epoch)?
            .ok_or_else(|| ServiceError::NotFound(format!("epoch {epoch} vanished")))
    }

    fn record_at(&self, epoch: u64) -> ServiceResult<EpochRecord> {
        self.epoch_store
            .get(epoch)?
            .ok_or_else(|| ServiceError::NotFound(format!("no such epoch {epoch}")))
    }

    fn revealed_entry(&self, index: &crypto::Digest) -> ServiceResult<Option<RevealedEntry>> {
        let Some(entry) = self.entry_store.get(index)? else {
            return Ok(None);
        };
        let reveal = self.reveal_store.get(index)?;
        Ok(reveal.map(|reveal| RevealedEntry {
            commitment: entry.commitment.clone(),
            nonce: reveal.nonce,
            app_id: reveal.app_id,
            data: reveal.data,
            authorized_keys: entry.authorized_keys,
            previous_hash: entry.previous_hash,
        }))
    }
}

#[async_trait]
impl<K: Kv> DirectoryService for Sequencer<K> {
    async fn get_directory(&self, directory_id: &DirectoryId) -> ServiceResult<Directory> {
        self.check_directory(directory_id)?;
        Ok(self.directory.clone())
    }

    async fn get_entry(
        &self,
        directory_id: &DirectoryId,
        app_id: &[u8],
        user_id: &[u8],
        since_log_size: Option<u64>,
    ) -> ServiceResult<GetEntryResponse> {
        self.check_directory(directory_id)?;
        let (index, vrf_proof) = vrf::evaluate(&self.vrf_secret, &vrf_message(app_id, user_id));
        let record = self.latest_record()?;
        let tree_proof = self.tree().proof(&index).map_err(MessageError::from)?;
        let revealed = self.revealed_entry(&index)?;

        let (log_size, log_inclusion_proof, log_consistency_proof) = {
            let log = self.log.lock().unwrap_or_else(|p| p.into_inner());
            let log_size = log.size();
            let inclusion = log
                .inclusion_proof(record.epoch, log_size)
                .map_err(MessageError::from)?;
            let consistency = since_log_size
                .map(|from| log.consistency_proof(from, log_size))
                .transpose()
                .map_err(MessageError::from)?;
            (log_size, inclusion, consistency)
        };

        Ok(GetEntryResponse {
            vrf_proof,
            tree_proof,
            smh: record.smh,
            log_size,
            log_inclusion_proof,
            signed_log_root: record.signed_log_root,
            log_consistency_proof,
            revealed,
        })
    }

    async fn list_entry_history(
        &self,
        directory_id: &DirectoryId,
        app_id: &[u8],
        user_id: &[u8],
    ) -> ServiceResult<GetEntryHistoryResponse> {
        self.check_directory(directory_id)?;
        let (index, _) = vrf::evaluate(&self.vrf_secret, &vrf_message(app_id, user_id));
        let latest = self.epoch_store.latest_epoch()?;
        let mut history = Vec::new();
        if let Some(latest) = latest {
            for epoch in 0..=latest {
                for record in self.epoch_store.mutations(epoch)? {
                    if record.index != index {
                        continue;
                    }
                    if let Some(entry_hash) = record.accepted_entry_hash() {
                        history.push(HistoryEntry {
                            epoch,
                            entry_hash: entry_hash.clone(),
                            revealed: None,
                        });
                    }
                }
            }
        }
        if let Some(last) = history.last_mut() {
            last.revealed = self.revealed_entry(&index)?;
        }
        Ok(GetEntryHistoryResponse { history })
    }

    async fn update_entry(
        &self,
        directory_id: &DirectoryId,
        user_id: &[u8],
        update: EntryUpdate,
    ) -> ServiceResult<u64> {
        self.check_directory(directory_id)?;
        let (index, _) = vrf::evaluate(&self.vrf_secret, &vrf_message(&update.app_id, user_id));
        let accepted_at_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Ok(self.queue.append(index, update, accepted_at_millis)?)
    }

    async fn get_epoch(&self, directory_id: &DirectoryId, epoch: u64) -> ServiceResult<EpochView> {
        self.check_directory(directory_id)?;
        let record = self.record_at(epoch)?;
        Ok(EpochView {
            smh: record.smh,
            log_size: record.signed_log_root.size,
            signed_log_root: record.signed_log_root,
        })
    }

    async fn get_latest_epoch(&self, directory_id: &DirectoryId) -> ServiceResult<EpochView> {
        self.check_directory(directory_id)?;
        let record = self.latest_record()?;
        Ok(EpochView {
            smh: record.smh,
            log_size: record.signed_log_root.size,
            signed_log_root: record.signed_log_root,
        })
    }

    async fn list_mutations(
        &self,
        directory_id: &DirectoryId,
        epoch: u64,
        page_token: Option<String>,
    ) -> ServiceResult<MutationPage> {
        self.check_directory(directory_id)?;
        let all = self.epoch_store.mutations(epoch)?;
        let offset: usize = match &page_token {
            Some(token) => token
                .parse()
                .map_err(|_| ServiceError::InvalidArgument("malformed page token".into()))?,
            None => 0,
        };
        let end = (offset + MUTATIONS_PAGE_SIZE).min(all.len());
        let records: Vec<MutationRecord> = all.get(offset..end).unwrap_or_default().to_vec();
        let next_page_token = if end < all.len() { Some(end.to_string()) } else { None };
        Ok(MutationPage { records, next_page_token })
    }

    async fn subscribe_epochs(
        &self,
        directory_id: &DirectoryId,
    ) -> ServiceResult<tokio::sync::broadcast::Receiver<u64>> {
        self.check_directory(directory_id)?;
        Ok(self.gossiper.subscribe())
    }

    async fn subscribe_mutations(
        &self,
        directory_id: &DirectoryId,
    ) -> ServiceResult<tokio::sync::broadcast::Receiver<MutationRecord>> {
        self.check_directory(directory_id)?;
        Ok(self.gossiper.subscribe_mutations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::HashAlgorithm;
    use crypto::KeyPair;
    use messages::Entry;
    use rand_core::OsRng;
    use storage::MemoryKv;

    fn test_directory(vrf_pk: crypto::PublicKey, map_pk: crypto::PublicKey, log_pk: crypto::PublicKey) -> Directory {
        Directory {
            directory_id: "example.com".to_string(),
            vrf_public_key: vrf_pk,
            map_public_key: map_pk,
            log_public_key: log_pk,
            sequencer_address: "127.0.0.1:9000".parse().unwrap(),
            min_interval_ms: 1,
            max_interval_ms: 20,
            hash_algorithm: HashAlgorithm::Sha256,
        }
    }

    fn claim(app_id: &[u8], data: &[u8], signer: &KeyPair, pk: crypto::PublicKey) -> EntryUpdate {
        let nonce = crypto::commitment::generate_nonce(&mut OsRng);
        let commit = crypto::commitment::commit(&nonce, app_id, data);
        let new_entry = Entry {
            commitment: commit,
            authorized_keys: vec![pk],
            previous_hash: crypto::Digest::nil(),
        };
        let digest = new_entry.hash();
        EntryUpdate {
            new_entry,
            signatures: vec![(signer.public(), crypto::Signature::new(&digest, signer))],
            nonce,
            app_id: app_id.to_vec(),
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn a_fresh_claim_is_eventually_served_with_a_proof() {
        let kv = Arc::new(MemoryKv::default());
        let (vrf_pk, vrf_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (map_pk, map_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (log_pk, log_sk) = KeyPair::generate_keypair(&mut OsRng);
        let directory = test_directory(vrf_pk, map_pk, log_pk);
        let directory_id = directory.directory_id.clone();
        let (sequencer, _batcher, _epocher) =
            Sequencer::spawn(kv, directory, vrf_sk, map_sk, log_sk).unwrap();

        let (pk, sk) = KeyPair::generate_keypair(&mut OsRng);
        let update = claim(b"app", b"v1", &sk, pk);
        sequencer
            .update_entry(&directory_id, b"alice", update)
            .await
            .unwrap();

        // Wait for the batcher/epocher pair to cut an epoch.
        let mut response = sequencer.get_entry(&directory_id, b"app", b"alice", None).await.unwrap();
        for _ in 0..200 {
            if response.revealed.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            response = sequencer.get_entry(&directory_id, b"app", b"alice", None).await.unwrap();
        }
        let revealed = response.revealed.expect("entry should have been folded into an epoch by now");
        assert_eq!(revealed.data, b"v1");

        let (index, vrf_proof) = vrf::evaluate(&vrf_sk, &vrf_message(b"app", b"alice"));
        assert!(vrf::verify(&vrf_pk, &vrf_message(b"app", b"alice"), &vrf_proof).is_ok());
        assert!(tree::verify_membership(&index, &revealed_commitment(&revealed), &response.tree_proof, &response.smh.root).unwrap());
    }

    fn revealed_commitment(revealed: &RevealedEntry) -> crypto::Digest {
        crypto::commitment::commit(&revealed.nonce, &revealed.app_id, &revealed.data)
    }

    #[tokio::test]
    async fn unknown_directory_id_is_not_found() {
        let kv = Arc::new(MemoryKv::default());
        let (vrf_pk, vrf_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (map_pk, map_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (log_pk, log_sk) = KeyPair::generate_keypair(&mut OsRng);
        let directory = test_directory(vrf_pk, map_pk, log_pk);
        let (sequencer, _batcher, _epocher) =
            Sequencer::spawn(kv, directory, vrf_sk, map_sk, log_sk).unwrap();

        let result = sequencer.get_directory(&"other.com".to_string()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
