//! The sequencer's tick policy (spec §4.7 "Tick policy"): decides *when*
//! to run the epoch procedure, never *how*. Named after the teacher's
//! `Batcher`, which raced a timer against a size threshold to seal a
//! batch of requests; here the race is the same shape, just over whether
//! to cut a new epoch at all: "enough has queued" vs "too much time has
//! passed since the last one."

use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{EpochStore, Kv, MutationQueue, StorageResult};
use tokio::{sync::mpsc::Sender, task::JoinHandle, time};

/// Fire a new epoch either when at least one mutation is queued and
/// `min_interval` has elapsed since the last epoch, or unconditionally
/// once `max_interval` has elapsed (an empty epoch still advances the
/// log, giving monitors liveness evidence).
#[derive(Clone, Copy, Debug)]
pub struct TickPolicy {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl TickPolicy {
    pub fn should_tick(&self, pending: bool, elapsed_since_last: Duration) -> bool {
        (pending && elapsed_since_last >= self.min_interval) || elapsed_since_last >= self.max_interval
    }
}

/// Polls the mutation queue and the epoch record against the tick policy,
/// and sends a trigger whenever the epoch procedure should run. Does not
/// itself run the epoch procedure — that's `Epocher`'s job.
pub struct Batcher<K: Kv> {
    policy: TickPolicy,
    queue: Arc<MutationQueue<K>>,
    epoch_store: Arc<EpochStore<K>>,
    tx_tick: Sender<()>,
}

impl<K: Kv> Batcher<K> {
    pub fn spawn(
        policy: TickPolicy,
        queue: Arc<MutationQueue<K>>,
        epoch_store: Arc<EpochStore<K>>,
        tx_tick: Sender<()>,
        poll_interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            Self {
                policy,
                queue,
                epoch_store,
                tx_tick,
            }
            .run(poll_interval)
            .await
        })
    }

    /// The exclusive upper bound of mutations already folded into a committed epoch.
    fn committed_watermark(&self) -> StorageResult<u64> {
        match self.epoch_store.latest_epoch()? {
            Some(epoch) => Ok(self
                .epoch_store
                .get(epoch)?
                .map(|record| record.mutation_range.1)
                .unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn run(&mut self, poll_interval: Duration) {
        let mut ticker = time::interval(poll_interval);
        let mut last_tick = Instant::now();
        loop {
            ticker.tick().await;
            let pending = match (self.queue.next_id(), self.committed_watermark()) {
                (Ok(next_id), Ok(watermark)) => next_id > watermark,
                _ => {
                    log::warn!("failed to read queue/epoch watermark, skipping this poll");
                    continue;
                }
            };
            if self.policy.should_tick(pending, last_tick.elapsed()) {
                if self.tx_tick.send(()).await.is_err() {
                    return;
                }
                last_tick = Instant::now();
            }
        }
    }
}
