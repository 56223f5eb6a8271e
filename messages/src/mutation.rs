//! Persisted mutation records (spec §3 "Mutation record", §6): the durable
//! tuple written for every intake decision, accepted or rejected, so that a
//! monitor can replay an epoch byte-for-byte and an operator can audit why
//! a submission was turned away.

use crypto::Digest;
use serde::{Deserialize, Serialize};

use crate::entry::EntryUpdate;
use crate::error::MessageError;

/// The outcome of running the mutator pipeline (spec §4.6) against one update.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum MutationOutcome {
    /// The update was admitted; `new_entry_hash` is now the identifier's entry.
    Accepted { new_entry_hash: Digest },
    /// The update was rejected; the map is unchanged.
    Rejected { reason: MessageError },
}

impl MutationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MutationOutcome::Accepted { .. })
    }
}

/// One row of the append-only mutation log: `(epoch, sequence_in_epoch,
/// index, old_entry_hash, new_entry_hash, update_blob)` per spec §3, with
/// the validation outcome attached. The safe default (spec §9 Open
/// Questions) is to persist rejected mutations too, so this type carries
/// both.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct MutationRecord {
    pub epoch: u64,
    pub sequence_in_epoch: u64,
    pub index: Digest,
    pub old_entry_hash: Digest,
    pub outcome: MutationOutcome,
    pub update: EntryUpdate,
}

impl MutationRecord {
    /// The value contributed to the tree leaf at `index`, if this mutation
    /// was the one that ultimately won the epoch for that index.
    pub fn accepted_entry_hash(&self) -> Option<&Digest> {
        match &self.outcome {
            MutationOutcome::Accepted { new_entry_hash } => Some(new_entry_hash),
            MutationOutcome::Rejected { .. } => None,
        }
    }
}
