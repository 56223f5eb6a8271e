use crypto::{CryptoError, Digest, PublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[macro_export]
macro_rules! bail {
    ($e:expr) => {
        return Err($e);
    };
}

#[macro_export(local_inner_macros)]
macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            bail!($e);
        }
    };
}

pub type MessageResult<T> = Result<T, MessageError>;

/// Every error tag named in the error taxonomy that a message type can
/// itself detect. Transport/storage and policy tags live closer to the
/// network and storage layers that actually raise them.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageError {
    #[error("BAD_VRF: {0}")]
    BadVrf(String),

    #[error("BAD_COMMITMENT: commitment does not match revealed (nonce, app_id, data)")]
    BadCommitment,

    #[error("BAD_PROOF: {0}")]
    BadProof(String),

    #[error("BAD_SMH: signed map head does not verify under the directory's map key")]
    BadSmh,

    #[error("BAD_INCLUSION: {0}")]
    BadInclusion(String),

    #[error("BAD_CONSISTENCY: {0}")]
    BadConsistency(String),

    #[error("BAD_LOG_SIG: signed log root does not verify under the directory's log key")]
    BadLogSig,

    #[error("MALFORMED: entry does not decode canonically")]
    Malformed,

    #[error("WRONG_PREVIOUS: update's previous_hash does not match the prior entry")]
    WrongPrevious,

    #[error("UNAUTHORIZED: no signature verifies against an authorized key")]
    Unauthorized,

    #[error("REPLAY: new entry is byte-identical to the previous entry")]
    Replay,

    #[error("TOO_LARGE: serialized entry exceeds {max} bytes (got {got})")]
    TooLarge { max: usize, got: usize },

    #[error("DUPLICATE_INDEX: index {0:?} updated twice within one batch")]
    DuplicateIndex(Digest),

    #[error("signature by {0} does not verify")]
    InvalidSignature(PublicKey),

    #[error("failed to serialize or deserialize message: {0}")]
    Serialization(String),
}

impl From<CryptoError> for MessageError {
    fn from(_: CryptoError) -> Self {
        MessageError::BadSmh
    }
}

impl From<Box<bincode::ErrorKind>> for MessageError {
    fn from(error: Box<bincode::ErrorKind>) -> Self {
        MessageError::Serialization(error.to_string())
    }
}

impl From<tree::TreeError> for MessageError {
    fn from(error: tree::TreeError) -> Self {
        MessageError::BadProof(error.to_string())
    }
}

impl From<txlog::LogError> for MessageError {
    fn from(error: txlog::LogError) -> Self {
        match error {
            txlog::LogError::BadInclusionProof => MessageError::BadInclusion(error.to_string()),
            txlog::LogError::BadConsistencyProof => MessageError::BadConsistency(error.to_string()),
            other => MessageError::BadInclusion(other.to_string()),
        }
    }
}
