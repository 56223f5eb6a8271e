//! Errors a replay can raise (spec §4.9, §7). None of these are the
//! directory's own error taxonomy being re-raised as a *failure* of the
//! monitor — a disagreement between replay and publication is not an error
//! here at all, it is the successful production of an `Inconsistency`
//! (spec §7 "Monitor mismatches are not errors — they are signed
//! attestations that other parties consume"). What lives in this enum is
//! everything that keeps the monitor from *being able to* reach a verdict.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Message(#[from] messages::MessageError),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Service(#[from] network::ServiceError),

    #[error(transparent)]
    Tree(#[from] tree::TreeError),

    #[error("requested epoch {expected} but the directory's response names epoch {got}")]
    UnexpectedEpoch { expected: u64, got: u64 },

    #[error("epoch {0}'s signed log root does not extend this monitor's own observed log")]
    BadChaining(u64),

    #[error("monitor halted at epoch {0} after a prior inconsistency; it will not advance further")]
    Halted(u64),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
