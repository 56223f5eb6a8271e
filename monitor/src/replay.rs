//! Independent replay (spec §4.9, component C9): the one party in this
//! workspace that never trusts the sequencer's own bookkeeping. A
//! `ReplayHandler` keeps its own tree, its own current-entry table and its
//! own log of observed SMHs — each namespaced under the monitor's own `Kv`
//! instance, never the sequencer's — and rebuilds every epoch's root from
//! the raw mutation stream using exactly the algorithm the sequencer's own
//! epoch procedure uses (`sequencer::epocher`), because determinism of that
//! algorithm (spec §8 P5) is the entire premise a monitor relies on.
//!
//! Four steps per epoch, straight out of spec §4.9:
//! 1. fetch the SMH and signed log root, verify both signatures and that
//!    the SMH extends the monitor's own running log;
//! 2. fetch every mutation recorded for the epoch;
//! 3. replay them against the monitor's own map, folding only the last
//!    accepted mutation per touched index, exactly as the sequencer does;
//! 4. compare the recomputed root to the published one. A match produces a
//!    signed `Attestation`; a mismatch produces a signed `Inconsistency`
//!    and halts this monitor on this epoch for good.

use crypto::{Digest, KeyPair};
use messages::{mutation::MutationRecord, Attestation, Entry, Inconsistency, MAX_ENTRY_BYTES};
use network::DirectoryService;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use storage::{rebuild_log, AttestationRecord, AttestationStore, EntryStore, EpochRecord, EpochStore, Kv, KvNodeStore};
use tree::SparseMerkleTree;
use txlog::MerkleLog;

use crate::error::{MonitorError, MonitorResult};

/// What one epoch's replay produced.
#[derive(Clone, Debug)]
pub enum ReplayOutcome {
    Attested(Attestation),
    Diverged(Inconsistency),
}

/// An independent replaying monitor for one directory. Everything this type
/// touches — `entry_store`, `tree`, `observed`, `attestation_store` — is
/// keyed by `directory.directory_id` under its own `kv`, which in a real
/// deployment is a separate storage instance from the sequencer's; nothing
/// here ever reads the sequencer's tree or entry table directly.
pub struct ReplayHandler<K: Kv> {
    directory: config::Directory,
    monitor_key: KeyPair,
    service: Arc<dyn DirectoryService>,
    entry_store: EntryStore<K>,
    tree: SparseMerkleTree<KvNodeStore<K>>,
    observed: EpochStore<K>,
    attestation_store: AttestationStore<K>,
    log: MerkleLog,
    halted_at: Option<u64>,
}

impl<K: Kv> ReplayHandler<K> {
    /// Build a handler over its own namespaced storage, resuming from
    /// whatever this monitor last observed (spec §5 "cancelling and
    /// restarting a monitor... resumes from the last trusted SMH").
    pub fn new(
        kv: Arc<K>,
        directory: config::Directory,
        monitor_key: KeyPair,
        service: Arc<dyn DirectoryService>,
    ) -> MonitorResult<Self> {
        let directory_id = directory.directory_id.clone();
        let entry_store = EntryStore::new(kv.clone(), directory_id.clone());
        let tree = SparseMerkleTree::new(KvNodeStore::new(kv.clone(), directory_id.clone()));
        let observed = EpochStore::new(kv.clone());
        let attestation_store = AttestationStore::new(kv.clone(), directory_id);
        let log = rebuild_log(&observed)?;

        let halted_at = attestation_store
            .last_recorded_epoch()?
            .map(|epoch| attestation_store.get(epoch).map(|record| (epoch, record)))
            .transpose()?
            .and_then(|(epoch, record)| match record {
                Some(record) if record.is_diverged() => Some(epoch),
                _ => None,
            });

        Ok(Self {
            directory,
            monitor_key,
            service,
            entry_store,
            tree,
            observed,
            attestation_store,
            log,
            halted_at,
        })
    }

    /// `true` once a past replay has diverged; this monitor will not
    /// advance past `halted_at` without an operator clearing its storage.
    pub fn is_halted(&self) -> bool {
        self.halted_at.is_some()
    }

    /// The next epoch this monitor has not yet replayed.
    pub fn next_epoch(&self) -> MonitorResult<u64> {
        Ok(self.observed.latest_epoch()?.map_or(0, |epoch| epoch + 1))
    }

    async fn fetch_all_mutations(&self, epoch: u64) -> MonitorResult<Vec<MutationRecord>> {
        let mut records = Vec::new();
        let mut page_token = None;
        loop {
            let page = self
                .service
                .list_mutations(&self.directory.directory_id, epoch, page_token)
                .await?;
            records.extend(page.records);
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        records.sort_by_key(|record| record.sequence_in_epoch);
        Ok(records)
    }

    /// Replay exactly one epoch. Must be called with `epoch == self.next_epoch()`;
    /// replaying out of order would desynchronize the monitor's own log.
    pub async fn replay_epoch(&mut self, epoch: u64) -> MonitorResult<ReplayOutcome> {
        if let Some(halted) = self.halted_at {
            return Err(MonitorError::Halted(halted));
        }

        let view = self.service.get_epoch(&self.directory.directory_id, epoch).await?;
        view.smh.verify(&self.directory.map_public_key)?;
        view.signed_log_root.verify(&self.directory.log_public_key)?;
        if view.smh.epoch != epoch {
            return Err(MonitorError::UnexpectedEpoch {
                expected: epoch,
                got: view.smh.epoch,
            });
        }

        let log_root = self.log.append(&view.smh.log_leaf_bytes());
        if log_root != view.signed_log_root.root || self.log.size() != view.signed_log_root.size {
            return Err(MonitorError::BadChaining(epoch));
        }

        let mutations = self.fetch_all_mutations(epoch).await?;

        // Mirrors sequencer::epocher's folding: only the last mutation
        // accepted per touched index within the epoch survives.
        let mut working: HashMap<Digest, Option<Entry>> = HashMap::new();
        let mut touched: HashSet<Digest> = HashSet::new();
        for record in &mutations {
            let index = record.index.clone();
            if !working.contains_key(&index) {
                let current = self.entry_store.get(&index)?;
                working.insert(index.clone(), current);
            }
            let prev = working.get(&index).unwrap().as_ref();
            if let Ok(new_entry) = mutator::apply(prev, &record.update, MAX_ENTRY_BYTES) {
                working.insert(index.clone(), Some(new_entry));
                touched.insert(index);
            }
        }

        let mut tree_updates = Vec::with_capacity(touched.len());
        let mut final_entries = Vec::with_capacity(touched.len());
        for index in &touched {
            let entry = working
                .get(index)
                .and_then(Option::as_ref)
                .expect("a touched index always has a surviving entry")
                .clone();
            tree_updates.push((index.clone(), entry.commitment.clone()));
            final_entries.push((index.clone(), entry));
        }

        let replayed_root = self.tree.insert_batch(&tree_updates)?;

        if replayed_root != view.smh.root {
            let inconsistency = Inconsistency::new(
                self.directory.directory_id.clone(),
                epoch,
                view.smh.root.clone(),
                replayed_root,
                &self.monitor_key,
            );
            self.attestation_store
                .put(epoch, &AttestationRecord::Diverged(inconsistency.clone()))?;
            self.halted_at = Some(epoch);
            log::warn!(
                "monitor for {} diverged at epoch {epoch}: published {:?}, replayed {:?}",
                self.directory.directory_id,
                inconsistency.published_root,
                inconsistency.replayed_root,
            );
            return Ok(ReplayOutcome::Diverged(inconsistency));
        }

        // Only commit local state once the root agrees — an epoch this
        // monitor diverged on must not poison its own entry/tree tables.
        self.entry_store.put_batch(&final_entries)?;
        self.observed.begin_pending(epoch, (0, 0))?;
        self.observed.commit(
            EpochRecord {
                epoch,
                smh: view.smh.clone(),
                signed_log_root: view.signed_log_root.clone(),
                mutation_range: (0, 0),
            },
            &mutations,
        )?;

        let attestation = Attestation::new(self.directory.directory_id.clone(), epoch, replayed_root, &self.monitor_key);
        self.attestation_store
            .put(epoch, &AttestationRecord::Attested(attestation.clone()))?;
        log::info!("monitor for {} attested epoch {epoch}", self.directory.directory_id);
        Ok(ReplayOutcome::Attested(attestation))
    }

    /// Catch up every unreplayed epoch through `target`, stopping early (and
    /// returning the `Diverged` outcome) the moment one disagrees.
    pub async fn catch_up_through(&mut self, target: u64) -> MonitorResult<Vec<ReplayOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            let next = self.next_epoch()?;
            if next > target {
                break;
            }
            let outcome = self.replay_epoch(next).await?;
            let diverged = matches!(outcome, ReplayOutcome::Diverged(_));
            outcomes.push(outcome);
            if diverged {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Run forever, replaying each newly-published epoch as the directory
    /// notifies of it. Returns once this monitor halts on a divergence, or
    /// the subscription itself ends.
    pub async fn run(&mut self) -> MonitorResult<()> {
        let mut epochs = self
            .service
            .subscribe_epochs(&self.directory.directory_id)
            .await?;
        loop {
            let notified = match epochs.recv().await {
                Ok(epoch) => epoch,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            };
            let outcomes = self.catch_up_through(notified).await?;
            if outcomes.iter().any(|o| matches!(o, ReplayOutcome::Diverged(_))) {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::HashAlgorithm;
    use crypto::{commitment, vrf, KeyPair, Signature};
    use messages::{vrf_message, EntryUpdate};
    use rand_core::OsRng;
    use sequencer::Sequencer;
    use std::time::Duration;
    use storage::MemoryKv;

    fn test_directory(vrf_pk: crypto::PublicKey, map_pk: crypto::PublicKey, log_pk: crypto::PublicKey) -> config::Directory {
        config::Directory {
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
        let nonce = commitment::generate_nonce(&mut OsRng);
        let commit = commitment::commit(&nonce, app_id, data);
        let new_entry = Entry {
            commitment: commit,
            authorized_keys: vec![pk],
            previous_hash: Digest::nil(),
        };
        let digest = new_entry.hash();
        EntryUpdate {
            new_entry,
            signatures: vec![(signer.public(), Signature::new(&digest, signer))],
            nonce,
            app_id: app_id.to_vec(),
            data: data.to_vec(),
        }
    }

    async fn wait_for_epoch(sequencer: &Sequencer<MemoryKv>, directory_id: &str) -> u64 {
        for _ in 0..400 {
            if let Ok(view) = sequencer.get_latest_epoch(&directory_id.to_string()).await {
                return view.smh.epoch;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sequencer never cut an epoch");
    }

    #[tokio::test]
    async fn replay_agrees_with_a_well_behaved_sequencer() {
        let kv = Arc::new(MemoryKv::default());
        let (vrf_pk, vrf_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (map_pk, map_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (log_pk, log_sk) = KeyPair::generate_keypair(&mut OsRng);
        let directory = test_directory(vrf_pk.clone(), map_pk, log_pk);
        let directory_id = directory.directory_id.clone();
        let (sequencer, _batcher, _epocher) =
            Sequencer::spawn(kv, directory.clone(), vrf_sk.clone(), map_sk, log_sk).unwrap();

        let (pk, sk) = KeyPair::generate_keypair(&mut OsRng);
        let update = claim(b"app", b"v1", &sk, pk);
        sequencer.update_entry(&directory_id, b"alice", update).await.unwrap();
        let epoch = wait_for_epoch(&sequencer, &directory_id).await;

        let (_, monitor_sk) = KeyPair::generate_keypair(&mut OsRng);
        let monitor_kv = Arc::new(MemoryKv::default());
        let mut handler = ReplayHandler::new(monitor_kv, directory, monitor_sk, Arc::new(sequencer)).unwrap();

        let outcome = handler.replay_epoch(epoch).await.unwrap();
        assert!(matches!(outcome, ReplayOutcome::Attested(_)));
        assert!(!handler.is_halted());

        let (index, vrf_proof) = vrf::evaluate(&vrf_sk, &vrf_message(b"app", b"alice"));
        assert!(vrf::verify(&vrf_pk, &vrf_message(b"app", b"alice"), &vrf_proof).is_ok());
        let root = handler.tree.root().unwrap();
        let proof = handler.tree.proof(&index).unwrap();
        let stored = handler.entry_store.get(&index).unwrap().unwrap();
        assert!(tree::verify_membership(&index, &stored.commitment, &proof, &root).unwrap());
    }

    #[tokio::test]
    async fn a_forged_smh_is_caught_as_an_inconsistency() {
        let kv = Arc::new(MemoryKv::default());
        let (vrf_pk, vrf_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (map_pk, map_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (log_pk, log_sk) = KeyPair::generate_keypair(&mut OsRng);
        let directory = test_directory(vrf_pk, map_pk, log_pk.clone());
        let directory_id = directory.directory_id.clone();
        let (sequencer, _batcher, _epocher) =
            Sequencer::spawn(kv, directory.clone(), vrf_sk, map_sk.clone(), log_sk).unwrap();

        let (pk, sk) = KeyPair::generate_keypair(&mut OsRng);
        let update = claim(b"app", b"v1", &sk, pk);
        sequencer.update_entry(&directory_id, b"alice", update).await.unwrap();
        let epoch = wait_for_epoch(&sequencer, &directory_id).await;

        // Splice in a forged SMH for the same epoch whose root does not
        // match what a faithful replay of the real mutation stream
        // produces, but whose signature still verifies — modelling a
        // sequencer that published a root it cannot actually back up.
        struct Forged {
            inner: Sequencer<MemoryKv>,
            forged_smh: messages::SignedMapHead,
        }

        #[async_trait::async_trait]
        impl DirectoryService for Forged {
            async fn get_directory(&self, id: &config::DirectoryId) -> network::ServiceResult<config::Directory> {
                self.inner.get_directory(id).await
            }
            async fn get_entry(
                &self,
                id: &config::DirectoryId,
                app_id: &[u8],
                user_id: &[u8],
                since: Option<u64>,
            ) -> network::ServiceResult<messages::bundle::GetEntryResponse> {
                self.inner.get_entry(id, app_id, user_id, since).await
            }
            async fn list_entry_history(
                &self,
                id: &config::DirectoryId,
                app_id: &[u8],
                user_id: &[u8],
            ) -> network::ServiceResult<messages::bundle::GetEntryHistoryResponse> {
                self.inner.list_entry_history(id, app_id, user_id).await
            }
            async fn update_entry(
                &self,
                id: &config::DirectoryId,
                user_id: &[u8],
                update: EntryUpdate,
            ) -> network::ServiceResult<u64> {
                self.inner.update_entry(id, user_id, update).await
            }
            async fn get_epoch(&self, id: &config::DirectoryId, epoch: u64) -> network::ServiceResult<network::EpochView> {
                let mut view = self.inner.get_epoch(id, epoch).await?;
                view.smh = self.forged_smh.clone();
                Ok(view)
            }
            async fn get_latest_epoch(&self, id: &config::DirectoryId) -> network::ServiceResult<network::EpochView> {
                let mut view = self.inner.get_latest_epoch(id).await?;
                view.smh = self.forged_smh.clone();
                Ok(view)
            }
            async fn list_mutations(
                &self,
                id: &config::DirectoryId,
                epoch: u64,
                page_token: Option<String>,
            ) -> network::ServiceResult<network::MutationPage> {
                self.inner.list_mutations(id, epoch, page_token).await
            }
            async fn subscribe_epochs(
                &self,
                id: &config::DirectoryId,
            ) -> network::ServiceResult<tokio::sync::broadcast::Receiver<u64>> {
                self.inner.subscribe_epochs(id).await
            }
            async fn subscribe_mutations(
                &self,
                id: &config::DirectoryId,
            ) -> network::ServiceResult<tokio::sync::broadcast::Receiver<messages::mutation::MutationRecord>> {
                self.inner.subscribe_mutations(id).await
            }
        }

        let forged_root = Digest::hash(b"a root the replay will never produce");
        let forged_smh = messages::SignedMapHead::new(directory_id.clone(), epoch, forged_root, 0, Digest::nil(), &map_sk);
        let forged = Forged {
            inner: sequencer,
            forged_smh,
        };

        let (_, monitor_sk) = KeyPair::generate_keypair(&mut OsRng);
        let monitor_kv = Arc::new(MemoryKv::default());
        let mut handler = ReplayHandler::new(monitor_kv, directory, monitor_sk, Arc::new(forged)).unwrap();

        let outcome = handler.replay_epoch(epoch).await.unwrap();
        assert!(matches!(outcome, ReplayOutcome::Diverged(_)));
        assert!(handler.is_halted());

        let halted_again = handler.replay_epoch(epoch + 1).await;
        assert!(matches!(halted_again, Err(MonitorError::Halted(_))));
    }
}
