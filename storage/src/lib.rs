//! Persistence for one directory (spec §6 "Persisted state"): a narrow
//! `Kv` substrate, and on top of it the mutation intake queue, the tree's
//! node table, the current-entry side table, the per-epoch record/log, the
//! sequencer's exclusive lease, and the retry policy that governs every
//! transient storage error among them.

pub mod attestation_store;
pub mod backoff;
pub mod entry_store;
pub mod epoch;
pub mod error;
pub mod kv;
pub mod lease;
pub mod node_store;
pub mod queue;
pub mod reveal_store;

pub use attestation_store::{AttestationRecord, AttestationStore};
pub use backoff::{retry_async, BackoffPolicy};
pub use entry_store::EntryStore;
pub use epoch::{rebuild_log, EpochRecord, EpochStore, PendingEpoch};
pub use error::{StorageError, StorageResult};
pub use kv::{Kv, MemoryKv, RocksKv};
pub use lease::DirectoryLease;
pub use node_store::KvNodeStore;
pub use queue::{MutationQueue, QueuedMutation};
pub use reveal_store::{Reveal, RevealStore};
