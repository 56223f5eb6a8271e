//! Makes a freshly committed epoch, and the mutations folded into it,
//! available to monitors and clients (spec §4.7, the publication half of
//! the epoch procedure). Named after the teacher's `Publisher`, which
//! broadcast publish notifications to a witness committee and collected
//! their votes; there is no committee or vote to collect here — a monitor
//! reads the epoch straight out of storage on its own schedule (C9), so
//! all this does is fan out lightweight "epoch N is ready" and "here is
//! the next mutation record" notices to whoever is subscribed.

use messages::mutation::MutationRecord;
use tokio::sync::broadcast;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A single-producer broadcast of epoch numbers and mutation records as
/// they're committed. Backs `DirectoryService::subscribe_epochs`
/// (`GetEpochStream`) and `subscribe_mutations` (`ListMutationsStream`).
#[derive(Clone)]
pub struct Gossiper {
    tx_epochs: broadcast::Sender<u64>,
    tx_mutations: broadcast::Sender<MutationRecord>,
}

impl Default for Gossiper {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Gossiper {
    pub fn new(capacity: usize) -> Self {
        let (tx_epochs, _) = broadcast::channel(capacity);
        let (tx_mutations, _) = broadcast::channel(capacity);
        Self { tx_epochs, tx_mutations }
    }

    /// Announce that `epoch` has been durably committed. Lagging or absent
    /// subscribers are not this notice's problem: `GetEpoch`/`ListMutations`
    /// always serve the full history from storage regardless of who missed
    /// a broadcast.
    pub fn announce(&self, epoch: u64) {
        let _ = self.tx_epochs.send(epoch);
    }

    /// Announce one mutation record folded into the epoch just committed.
    /// Same best-effort delivery as `announce`: `ListMutations` remains the
    /// source of truth for any subscriber that lagged or missed one.
    pub fn announce_mutation(&self, record: MutationRecord) {
        let _ = self.tx_mutations.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.tx_epochs.subscribe()
    }

    pub fn subscribe_mutations(&self) -> broadcast::Receiver<MutationRecord> {
        self.tx_mutations.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::Digest;
    use messages::{Entry, EntryUpdate, MutationOutcome};

    fn sample_record() -> MutationRecord {
        MutationRecord {
            epoch: 0,
            sequence_in_epoch: 0,
            index: Digest::hash(b"alice"),
            old_entry_hash: Digest::nil(),
            outcome: MutationOutcome::Accepted { new_entry_hash: Digest::hash(b"entry") },
            update: EntryUpdate {
                new_entry: Entry {
                    commitment: Digest::nil(),
                    authorized_keys: vec![],
                    previous_hash: Digest::nil(),
                },
                signatures: vec![],
                nonce: [0u8; crypto::commitment::NONCE_LEN],
                app_id: b"app".to_vec(),
                data: b"v1".to_vec(),
            },
        }
    }

    #[tokio::test]
    async fn a_subscriber_receives_announced_epochs() {
        let gossiper = Gossiper::new(16);
        let mut rx = gossiper.subscribe();
        gossiper.announce(1);
        gossiper.announce(2);
        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[test]
    fn announcing_with_no_subscribers_does_not_panic() {
        let gossiper = Gossiper::default();
        gossiper.announce(1);
        gossiper.announce_mutation(sample_record());
    }

    #[tokio::test]
    async fn a_mutation_subscriber_receives_announced_records() {
        let gossiper = Gossiper::new(16);
        let mut rx = gossiper.subscribe_mutations();
        gossiper.announce_mutation(sample_record());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.index, Digest::hash(b"alice"));
    }
}
