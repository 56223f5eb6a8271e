//! `Entry` and `EntryUpdate`: the per-identifier committed state and the
//! signed transition between two such states (spec §3). Both types carry a
//! canonical byte encoding (fixed field order, length-prefixed variable
//! fields, big-endian lengths) so that hashing and signing never depend on
//! how a particular serde backend happens to lay bytes out on the wire.

use crypto::{Digest, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// The per-identifier committed state at some epoch (spec §3 "Entry").
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub struct Entry {
    /// Hiding commitment to `(app_id, data)`, computed by `crypto::commitment`.
    pub commitment: Digest,
    /// Keys permitted to sign the *next* mutation of this entry, in order.
    pub authorized_keys: Vec<PublicKey>,
    /// Hash of the canonical encoding of the immediately prior entry for
    /// this identifier, or `Digest::nil()` for the entry's first revision.
    pub previous_hash: Digest,
}

impl Entry {
    /// A tombstone: a live entry with no authority and no secret to hide.
    pub fn tombstone(previous_hash: Digest) -> Self {
        Self {
            commitment: Digest::nil(),
            authorized_keys: Vec::new(),
            previous_hash,
        }
    }

    /// The canonical byte encoding hashed and signed throughout the system:
    /// `commitment || u32(len(keys)) || (u32(len) || key)* || previous_hash`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.authorized_keys.len() * 37);
        buf.extend_from_slice(self.commitment.as_ref());
        buf.extend_from_slice(&(self.authorized_keys.len() as u32).to_be_bytes());
        for key in &self.authorized_keys {
            let bytes = key.to_bytes();
            buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            buf.extend_from_slice(&bytes);
        }
        buf.extend_from_slice(self.previous_hash.as_ref());
        buf
    }

    /// The number of bytes of the canonical encoding (for the `TOO_LARGE` check).
    pub fn serialized_len(&self) -> usize {
        self.canonical_bytes().len()
    }

    /// `H(canonical encoding)`, used as both the leaf's source commitment
    /// and the next revision's `previous_hash`.
    pub fn hash(&self) -> Digest {
        Digest::hash(&self.canonical_bytes())
    }
}

/// A signed transition from the identifier's current entry to a new one
/// (spec §3 "EntryUpdate"). The `nonce`/`app_id`/`data` triple is delivered
/// out-of-band alongside the update so the recipient can both validate the
/// transition and recompute the commitment; only `new_entry.commitment`
/// (not the preimage) ever reaches the tree.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct EntryUpdate {
    /// The proposed new entry.
    pub new_entry: Entry,
    /// Signatures over `new_entry.hash()`, one per signer.
    pub signatures: Vec<(PublicKey, Signature)>,
    /// The nonce used to compute `new_entry.commitment`.
    pub nonce: [u8; crypto::commitment::NONCE_LEN],
    /// The application namespace the commitment binds to.
    pub app_id: Vec<u8>,
    /// The payload the commitment binds to (e.g. a public key).
    pub data: Vec<u8>,
}

impl EntryUpdate {
    /// The digest that signers authenticate: the new entry's own hash.
    pub fn signing_digest(&self) -> Digest {
        self.new_entry.hash()
    }

    /// Recompute the commitment from the revealed preimage and compare it
    /// to the one carried by `new_entry`.
    pub fn commitment_matches(&self) -> bool {
        crypto::commitment::verify(&self.new_entry.commitment, &self.nonce, &self.app_id, &self.data)
    }
}
