//! Runs the epoch procedure (spec §4.7): drains the intake queue, replays
//! each queued mutation through the validator pipeline, folds the accepted
//! ones into the sparse tree, and appends the resulting Signed Map Head to
//! the log of SMHs. Named after the teacher's `Prover`, which assembled a
//! batch's merkle proof bundle and forwarded it to the witness committee for
//! a vote; there is no committee here — `Epocher` owns the tree and the log
//! outright and commits a publishable epoch on its own.

use crate::gossiper::Gossiper;
use crypto::{Digest, KeyPair};
use messages::{Entry, MutationOutcome, MutationRecord, SignedLogRoot, SignedMapHead, MAX_ENTRY_BYTES};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use storage::{
    rebuild_log, DirectoryLease, EntryStore, EpochRecord, EpochStore, Kv, KvNodeStore,
    MutationQueue, Reveal, RevealStore, StorageError, StorageResult,
};
use tokio::{sync::mpsc::Receiver, task::JoinHandle};
use tree::SparseMerkleTree;
use txlog::MerkleLog;

/// How long a held lease stays valid without renewal. Renewed every
/// `run_epoch`, which happens far more often than this under any sane
/// `max_interval_ms`; generous enough that a brief storage hiccup doesn't
/// hand the directory to a second sequencer mid-epoch.
const LEASE_TTL_MILLIS: u64 = 30_000;

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// The single writer of a directory's tree and log of SMHs. Built once at
/// startup (replaying any already-committed epochs into its in-memory log,
/// and finishing off a crash-interrupted one if storage left a pending
/// marker behind), then driven by ticks from the `Batcher`.
pub struct Epocher<K: Kv> {
    directory_id: String,
    map_secret: KeyPair,
    log_secret: KeyPair,
    queue: Arc<MutationQueue<K>>,
    epoch_store: Arc<EpochStore<K>>,
    entry_store: Arc<EntryStore<K>>,
    reveal_store: Arc<RevealStore<K>>,
    tree: SparseMerkleTree<KvNodeStore<K>>,
    log: Arc<Mutex<MerkleLog>>,
    gossiper: Gossiper,
    rx_tick: Receiver<()>,
    /// Single-writer enforcement (spec §5): acquired before the first epoch
    /// and renewed on every subsequent one. A sequencer that cannot hold
    /// this lease refuses to run the epoch procedure at all.
    lease: DirectoryLease<K>,
}

impl<K: Kv> Epocher<K> {
    /// `log` is already rebuilt (via `rebuild_log`) and shared with the
    /// sequencer's read path; finish a pending epoch left behind by a
    /// crashed predecessor, if any, before accepting new ticks.
    #[allow(clippy::too_many_arguments)]
    fn new(
        kv: Arc<K>,
        directory_id: String,
        map_secret: KeyPair,
        log_secret: KeyPair,
        queue: Arc<MutationQueue<K>>,
        epoch_store: Arc<EpochStore<K>>,
        entry_store: Arc<EntryStore<K>>,
        reveal_store: Arc<RevealStore<K>>,
        log: Arc<Mutex<MerkleLog>>,
        gossiper: Gossiper,
        rx_tick: Receiver<()>,
    ) -> StorageResult<Self> {
        let holder = format!("pid-{}", std::process::id());
        let lease = DirectoryLease::new(kv.clone(), directory_id.clone(), holder);
        let tree = SparseMerkleTree::new(KvNodeStore::new(kv, directory_id.clone()));
        let mut epocher = Self {
            directory_id,
            map_secret,
            log_secret,
            queue,
            epoch_store,
            entry_store,
            reveal_store,
            tree,
            log,
            gossiper,
            rx_tick,
            lease,
        };
        if let Some(pending) = epocher.epoch_store.pending()? {
            epocher.run_epoch(pending.epoch, pending.mutation_range)?;
        }
        Ok(epocher)
    }

    /// Construct the epocher and spawn its tick-driven loop.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        kv: Arc<K>,
        directory_id: String,
        map_secret: KeyPair,
        log_secret: KeyPair,
        queue: Arc<MutationQueue<K>>,
        epoch_store: Arc<EpochStore<K>>,
        entry_store: Arc<EntryStore<K>>,
        reveal_store: Arc<RevealStore<K>>,
        log: Arc<Mutex<MerkleLog>>,
        gossiper: Gossiper,
        rx_tick: Receiver<()>,
    ) -> StorageResult<JoinHandle<()>> {
        let epocher = Self::new(
            kv,
            directory_id,
            map_secret,
            log_secret,
            queue,
            epoch_store,
            entry_store,
            reveal_store,
            log,
            gossiper,
            rx_tick,
        )?;
        Ok(tokio::spawn(epocher.run()))
    }

    async fn run(mut self) {
        while self.rx_tick.recv().await.is_some() {
            let (epoch, range) = match self.next_window() {
                Ok(window) => window,
                Err(e) => {
                    log::warn!("failed to compute next epoch window: {e}");
                    continue;
                }
            };
            if let Err(e) = self.run_epoch(epoch, range) {
                log::error!("epoch {epoch} failed: {e}");
            }
        }
    }

    /// The next epoch number and the half-open `[from, to)` mutation-id
    /// window it should fold in: everything queued since the last committed
    /// epoch's watermark, up through whatever has been accepted by now.
    fn next_window(&self) -> StorageResult<(u64, (u64, u64))> {
        let (next_epoch, from) = match self.epoch_store.latest_epoch()? {
            Some(epoch) => {
                let from = self
                    .epoch_store
                    .get(epoch)?
                    .map(|record| record.mutation_range.1)
                    .unwrap_or(0);
                (epoch + 1, from)
            }
            None => (0, 0),
        };
        let to = self.queue.next_id()?;
        Ok((next_epoch, (from, to)))
    }

    /// Run the epoch procedure for exactly `epoch` over exactly `range`,
    /// committing idempotently (spec §4.7 "Idempotence"): re-running the
    /// same `(epoch, range)` after a crash reproduces the same SMH and log
    /// root, since `EpochStore::commit` only takes effect once.
    fn run_epoch(&mut self, epoch: u64, range: (u64, u64)) -> StorageResult<()> {
        if !self.lease.acquire(now_millis(), LEASE_TTL_MILLIS)? {
            return Err(StorageError::Conflict(format!(
                "another sequencer holds the lease for {}; refusing to run epoch {epoch}",
                self.directory_id
            )));
        }
        self.epoch_store.begin_pending(epoch, range)?;
        let (from, to) = range;
        let mutations = self.queue.range(from, to)?;

        let mut working: HashMap<Digest, Option<Entry>> = HashMap::new();
        let mut reveals: HashMap<Digest, Reveal> = HashMap::new();
        let mut touched: HashSet<Digest> = HashSet::new();
        let mut records = Vec::with_capacity(mutations.len());

        for (sequence_in_epoch, mutation) in mutations.iter().enumerate() {
            let index = mutation.index.clone();
            if !working.contains_key(&index) {
                let current = self.entry_store.get(&index)?;
                working.insert(index.clone(), current);
            }
            let prev = working.get(&index).unwrap().as_ref();
            let old_entry_hash = prev.map(Entry::hash).unwrap_or_else(Digest::nil);

            let outcome = match mutator::apply(prev, &mutation.update, MAX_ENTRY_BYTES) {
                Ok(new_entry) => {
                    let new_entry_hash = new_entry.hash();
                    working.insert(index.clone(), Some(new_entry));
                    reveals.insert(
                        index.clone(),
                        Reveal {
                            nonce: mutation.update.nonce,
                            app_id: mutation.update.app_id.clone(),
                            data: mutation.update.data.clone(),
                        },
                    );
                    touched.insert(index.clone());
                    MutationOutcome::Accepted { new_entry_hash }
                }
                Err(reason) => MutationOutcome::Rejected { reason },
            };

            records.push(MutationRecord {
                epoch,
                sequence_in_epoch: sequence_in_epoch as u64,
                index,
                old_entry_hash,
                outcome,
                update: mutation.update.clone(),
            });
        }

        // Only the last accepted mutation per index reaches the tree, the
        // entry store and the reveal store; earlier ones in the same epoch
        // were already folded into `working` and only shaped later validation.
        let touched: Vec<Digest> = touched.into_iter().collect();
        let final_entries: Vec<(Digest, Entry)> = touched
            .iter()
            .map(|index| {
                let entry = working
                    .remove(index)
                    .flatten()
                    .expect("touched index has a surviving entry");
                (index.clone(), entry)
            })
            .collect();
        let final_reveals: Vec<(Digest, Reveal)> = touched
            .iter()
            .map(|index| {
                let reveal = reveals.remove(index).expect("touched index has a reveal");
                (index.clone(), reveal)
            })
            .collect();
        let tree_updates: Vec<(Digest, Digest)> = final_entries
            .iter()
            .map(|(index, entry)| (index.clone(), entry.commitment.clone()))
            .collect();

        let root = self
            .tree
            .insert_batch(&tree_updates)
            .map_err(|e| StorageError::Corrupt("tree".into(), e.to_string()))?;
        self.entry_store.put_batch(&final_entries)?;
        self.reveal_store.put_batch(&final_reveals)?;

        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let metadata_hash = Digest::hash_parts(&[&from.to_be_bytes(), &to.to_be_bytes()]);
        let smh = SignedMapHead::new(
            self.directory_id.clone(),
            epoch,
            root,
            timestamp_ns,
            metadata_hash,
            &self.map_secret,
        );

        let (log_root, log_size) = {
            let mut log = self.log.lock().unwrap_or_else(|p| p.into_inner());
            let log_root = log.append(&smh.log_leaf_bytes());
            (log_root, log.size())
        };
        let signed_log_root = SignedLogRoot::new(log_size, log_root, &self.log_secret);

        self.epoch_store.commit(
            EpochRecord {
                epoch,
                smh,
                signed_log_root,
                mutation_range: range,
            },
            &records,
        )?;

        for record in &records {
            self.gossiper.announce_mutation(record.clone());
        }
        self.gossiper.announce(epoch);
        Ok(())
    }
}
