//! Wire bundles returned by the directory's read endpoints (spec §6): the
//! byte-level artifacts a client or monitor needs to run the end-to-end
//! verification in `client` (C8) without any further round trip.

use crypto::{commitment::NONCE_LEN, vrf::VrfProof, Digest, PublicKey};
use serde::{Deserialize, Serialize};
use tree::MerkleProof;

use crate::smh::{SignedLogRoot, SignedMapHead};

/// The cleartext preimage of an entry's commitment, revealed only when the
/// identifier is present. Absent identifiers never get one of these: the
/// tree proof alone carries the absence proof.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RevealedEntry {
    /// The committed value the directory actually stored at this index.
    /// Checked against the recomputed commitment below *before* the tree
    /// proof is checked against it (spec §4.8 steps 2 and 3 stay two
    /// distinguishable failures: a bad preimage is `BAD_COMMITMENT`, a bad
    /// proof over an otherwise-genuine commitment is `BAD_PROOF`).
    pub commitment: Digest,
    pub nonce: [u8; NONCE_LEN],
    pub app_id: Vec<u8>,
    pub data: Vec<u8>,
    pub authorized_keys: Vec<PublicKey>,
    pub previous_hash: Digest,
}

/// The full bundle answering `GetEntry(directory_id, app_id, user_id)`
/// (spec §4.8, §6). `log_consistency_proof` is only populated when the
/// client supplied a previously trusted log size to extend from.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct GetEntryResponse {
    pub vrf_proof: VrfProof,
    pub tree_proof: MerkleProof,
    pub smh: SignedMapHead,
    pub log_size: u64,
    pub log_inclusion_proof: Vec<Digest>,
    pub signed_log_root: SignedLogRoot,
    pub log_consistency_proof: Option<Vec<Digest>>,
    pub revealed: Option<RevealedEntry>,
}

/// One epoch's worth of history for an identifier (spec §2 supplemented
/// feature: `ListEntryHistory`).
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct HistoryEntry {
    pub epoch: u64,
    pub entry_hash: Digest,
    pub revealed: Option<RevealedEntry>,
}

/// Response to `ListEntryHistory`: every revision of an identifier's entry
/// across the requested epoch range, oldest first.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct GetEntryHistoryResponse {
    pub history: Vec<HistoryEntry>,
}
