//! Independent replay and attestation (spec §4.9, component C9).
//!
//! A monitor never trusts the sequencer's own bookkeeping: it maintains its
//! own storage, fetches the raw mutation stream and published SMHs through
//! the `DirectoryService` interface like any other client, and recomputes
//! each epoch's root itself. Agreement produces a signed `Attestation`;
//! disagreement produces a signed `Inconsistency` and halts that monitor on
//! the offending epoch for good. See [`replay`] for the procedure.

pub mod error;
pub mod replay;

pub use error::{MonitorError, MonitorResult};
pub use replay::{ReplayHandler, ReplayOutcome};
