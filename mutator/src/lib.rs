//! The mutation engine (spec §4.6, component C6): a pure function deciding
//! whether a proposed `EntryUpdate` may replace an identifier's current
//! entry. The five checks run in the fixed order the spec mandates;
//! extending or reordering them would change what a monitor's replay
//! accepts, so this pipeline is not meant to be pluggable (spec §9
//! "Polymorphism").

use crypto::Digest;
use messages::{Entry, EntryUpdate, MessageError, MessageResult, MAX_ENTRY_BYTES};

/// Validate `update` against `prev` (the identifier's current entry, or
/// `None` if this is its first revision), returning the new entry on
/// acceptance or the first failing check's error otherwise.
///
/// Order, per spec §4.6: previous-hash linkage, signature quorum, replay,
/// size bound. Canonical-decoding (`MALFORMED`) is enforced one layer up,
/// at the point an `EntryUpdate` is deserialized off the wire or out of
/// storage — by the time `apply` runs, the type system already guarantees
/// the update decoded.
pub fn apply(prev: Option<&Entry>, update: &EntryUpdate, max_entry_bytes: usize) -> MessageResult<Entry> {
    let expected_previous_hash = prev.map(Entry::hash).unwrap_or_else(Digest::nil);
    if update.new_entry.previous_hash != expected_previous_hash {
        return Err(MessageError::WrongPrevious);
    }

    let new_digest = update.signing_digest();
    let authorizing_keys: &[crypto::PublicKey] = match prev {
        Some(entry) => &entry.authorized_keys,
        None => &update.new_entry.authorized_keys,
    };
    let authorized = update
        .signatures
        .iter()
        .any(|(author, signature)| {
            authorizing_keys.contains(author) && signature.verify(&new_digest, author).is_ok()
        });
    if !authorized {
        return Err(MessageError::Unauthorized);
    }

    if let Some(previous) = prev {
        if previous.hash() == new_digest {
            return Err(MessageError::Replay);
        }
    }

    let serialized_len = update.new_entry.serialized_len();
    if serialized_len > max_entry_bytes {
        return Err(MessageError::TooLarge {
            max: max_entry_bytes,
            got: serialized_len,
        });
    }

    Ok(update.new_entry.clone())
}

/// `apply` with the default `MAX_ENTRY_BYTES` size bound.
pub fn apply_default(prev: Option<&Entry>, update: &EntryUpdate) -> MessageResult<Entry> {
    apply(prev, update, MAX_ENTRY_BYTES)
}
