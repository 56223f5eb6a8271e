//! Wire and storage types shared by every directory component: entries and
//! their signed transitions (§3), signed map heads and signed log roots
//! (§4.4, §4.5), the mutation ledger (§3, §6), and the read-path response
//! bundles (§6). Hashing and signing always go through each type's
//! `canonical_bytes`/explicit domain-separated encoding rather than raw
//! serde output, so two encodings of the same logical value are always
//! byte-identical (spec §6 "Canonical encoding").

pub mod attestation;
pub mod bundle;
pub mod entry;
pub mod error;
pub mod mutation;
pub mod smh;

pub use attestation::{Attestation, Inconsistency};
pub use bundle::{GetEntryHistoryResponse, GetEntryResponse, HistoryEntry, RevealedEntry};
pub use entry::{Entry, EntryUpdate};
pub use error::{MessageError, MessageResult};
pub use mutation::{MutationOutcome, MutationRecord};
pub use smh::{SignedLogRoot, SignedMapHead};

/// Default cap on a serialized entry's canonical encoding (spec §4.6 `TOO_LARGE`).
pub const MAX_ENTRY_BYTES: usize = 16 * 1024;

/// The canonical VRF input for an identifier triple (spec §3 "VRF output"):
/// `directory_id` is implicit in which VRF key is used, so only `app_id`
/// and `user_id` need to be folded in here. Sequencer intake and the
/// client verifier must derive identical bytes for a given `(app_id,
/// user_id)`, or a proof minted by one would never verify for the other.
pub fn vrf_message(app_id: &[u8], user_id: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + app_id.len() + user_id.len());
    buf.extend_from_slice(&(app_id.len() as u32).to_be_bytes());
    buf.extend_from_slice(app_id);
    buf.extend_from_slice(&(user_id.len() as u32).to_be_bytes());
    buf.extend_from_slice(user_id);
    buf
}
