//! The directory service's wire contract (spec §6 "External interfaces").
//!
//! The gRPC/HTTP transport itself — framing, the `/v1/directories/...`
//! gateway, auth interceptors — is explicitly out of scope (spec §1): it
//! consumes and produces the byte-level artifacts this workspace defines,
//! but imposes no cryptographic constraint of its own. What lives here is
//! the interface those transports bind to: one async method per endpoint
//! in the spec's table, in terms of the `messages`/`config` types every
//! other crate already shares, so a sequencer can be driven directly in
//! tests without standing up a real listener, and a transport crate slots
//! in later by implementing `DirectoryService` rather than rewriting it.

use async_trait::async_trait;
use config::{Directory, DirectoryId};
use messages::{
    bundle::{GetEntryHistoryResponse, GetEntryResponse},
    mutation::MutationRecord,
    smh::{SignedLogRoot, SignedMapHead},
    EntryUpdate, MessageError,
};
use thiserror::Error;

/// Errors a transport binding must be able to surface regardless of which
/// endpoint raised them — the "Policy" tier of the error taxonomy (spec
/// §7), plus a pass-through for whatever the endpoint itself rejected with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    #[error("PERMISSION_DENIED: {0}")]
    PermissionDenied(String),

    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// One resolved epoch's published state, the payload behind `GetEpoch` /
/// `GetLatestEpoch` / `GetEpochStream`.
#[derive(Clone, Debug)]
pub struct EpochView {
    pub smh: SignedMapHead,
    pub signed_log_root: SignedLogRoot,
    pub log_size: u64,
}

/// A page of `ListMutations`: the records plus an opaque cursor to resume from.
#[derive(Clone, Debug)]
pub struct MutationPage {
    pub records: Vec<MutationRecord>,
    pub next_page_token: Option<String>,
}

/// The directory's external surface (spec §6's endpoint table), one method
/// per row. A sequencer implements the write path (`update_entry`) and the
/// read paths that need its live state; a read replica or monitor can
/// implement only the read methods it actually serves.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// `GET /v1/directories/{id}` — directory metadata & public keys.
    async fn get_directory(&self, directory_id: &DirectoryId) -> ServiceResult<Directory>;

    /// `GET /v1/directories/{id}/apps/{app}/users/{u}` — entry + proof bundle.
    /// `since_log_size` is the client's last trusted log size, if any; when
    /// present the response's `log_consistency_proof` extends that trusted
    /// root to the one returned here (spec §4.8 step 6).
    async fn get_entry(
        &self,
        directory_id: &DirectoryId,
        app_id: &[u8],
        user_id: &[u8],
        since_log_size: Option<u64>,
    ) -> ServiceResult<GetEntryResponse>;

    /// `GET /v1/directories/{id}/apps/{app}/users/{u}/history` — epoch-ranged history.
    async fn list_entry_history(
        &self,
        directory_id: &DirectoryId,
        app_id: &[u8],
        user_id: &[u8],
    ) -> ServiceResult<GetEntryHistoryResponse>;

    /// `PUT /v1/directories/{id}/apps/{app}/users/{u}` — submit an `EntryUpdate`.
    /// `user_id` is never stored in the entry itself; it only ever feeds the
    /// VRF that derives the tree index, here and at `get_entry` time. Returns
    /// the storage-assigned mutation id once durably queued; the update is
    /// not yet reflected in any epoch.
    async fn update_entry(
        &self,
        directory_id: &DirectoryId,
        user_id: &[u8],
        update: EntryUpdate,
    ) -> ServiceResult<u64>;

    /// `GET /v1/directories/{id}/epochs/{epoch}` — SMH + log proofs for one epoch.
    async fn get_epoch(&self, directory_id: &DirectoryId, epoch: u64) -> ServiceResult<EpochView>;

    /// `GET /v1/directories/{id}/epochs:latest` — the latest SMH.
    async fn get_latest_epoch(&self, directory_id: &DirectoryId) -> ServiceResult<EpochView>;

    /// `GET /v1/directories/{id}/epochs/{epoch}/mutations` — paginated mutations.
    async fn list_mutations(
        &self,
        directory_id: &DirectoryId,
        epoch: u64,
        page_token: Option<String>,
    ) -> ServiceResult<MutationPage>;

    /// `GET /v1/directories/{id}/epochs:stream` — server-streamed SMH feed,
    /// one notification per epoch as it is published. Subscribers are
    /// expected to call `get_epoch`/`list_mutations` for the detail behind
    /// each notified epoch number.
    async fn subscribe_epochs(
        &self,
        directory_id: &DirectoryId,
    ) -> ServiceResult<tokio::sync::broadcast::Receiver<u64>>;

    /// `GET /v1/directories/{id}/epochs:mutations:stream` — server-streamed
    /// mutation feed, one notification per mutation as its containing
    /// epoch is published. Best-effort like `subscribe_epochs`: a
    /// subscriber that lags or misses a notice falls back to
    /// `list_mutations` for the epoch it's interested in.
    async fn subscribe_mutations(
        &self,
        directory_id: &DirectoryId,
    ) -> ServiceResult<tokio::sync::broadcast::Receiver<MutationRecord>>;
}
