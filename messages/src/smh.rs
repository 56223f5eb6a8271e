//! Signed Map Heads (spec §4.4) and signed log roots (spec §4.5): the two
//! domain-separated signed statements a directory ever produces. The prefix
//! (`"SMH"` / `"SLR"`) is mixed into the signed digest so a signature over
//! one can never be replayed as a signature over the other.

use crypto::{Digest, KeyPair, PublicKey, Signature};
use serde::{Deserialize, Serialize};

use crate::error::{MessageError, MessageResult};

/// A Signed Map Head: binds an epoch number to the sparse tree's root.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SignedMapHead {
    pub directory_id: String,
    pub epoch: u64,
    pub root: Digest,
    pub timestamp_ns: u64,
    pub metadata_hash: Digest,
    pub signature: Signature,
}

fn smh_signing_bytes(
    directory_id: &str,
    epoch: u64,
    root: &Digest,
    timestamp_ns: u64,
    metadata_hash: &Digest,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + directory_id.len() + 64);
    buf.extend_from_slice(b"SMH");
    buf.extend_from_slice(&epoch.to_be_bytes());
    buf.extend_from_slice(&(directory_id.len() as u32).to_be_bytes());
    buf.extend_from_slice(directory_id.as_bytes());
    buf.extend_from_slice(root.as_ref());
    buf.extend_from_slice(&timestamp_ns.to_be_bytes());
    buf.extend_from_slice(metadata_hash.as_ref());
    buf
}

impl SignedMapHead {
    /// Compose and sign a new SMH for `directory_id` at `epoch`.
    pub fn new(
        directory_id: String,
        epoch: u64,
        root: Digest,
        timestamp_ns: u64,
        metadata_hash: Digest,
        map_signing_key: &KeyPair,
    ) -> Self {
        let digest = Digest::hash(&smh_signing_bytes(
            &directory_id,
            epoch,
            &root,
            timestamp_ns,
            &metadata_hash,
        ));
        let signature = Signature::new(&digest, map_signing_key);
        Self {
            directory_id,
            epoch,
            root,
            timestamp_ns,
            metadata_hash,
            signature,
        }
    }

    /// Verify the SMH's signature under the directory's map public key.
    pub fn verify(&self, map_public_key: &PublicKey) -> MessageResult<()> {
        let digest = Digest::hash(&smh_signing_bytes(
            &self.directory_id,
            self.epoch,
            &self.root,
            self.timestamp_ns,
            &self.metadata_hash,
        ));
        self.signature
            .verify(&digest, map_public_key)
            .map_err(|_| MessageError::BadSmh)
    }

    /// The bytes logged as this epoch's leaf in the append-only log of SMHs
    /// (spec §4.5): the signed statement plus its signature, so a log
    /// inclusion proof attests to the literal bytes a client downloads.
    pub fn log_leaf_bytes(&self) -> Vec<u8> {
        let mut buf = smh_signing_bytes(
            &self.directory_id,
            self.epoch,
            &self.root,
            self.timestamp_ns,
            &self.metadata_hash,
        );
        buf.extend_from_slice(&self.signature.to_bytes());
        buf
    }
}

/// A signature over `(log_size, log_root)`, authenticating one checkpoint
/// of the append-only log of SMHs (spec §4.5).
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SignedLogRoot {
    pub size: u64,
    pub root: Digest,
    pub signature: Signature,
}

fn slr_signing_bytes(size: u64, root: &Digest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + 32);
    buf.extend_from_slice(b"SLR");
    buf.extend_from_slice(&size.to_be_bytes());
    buf.extend_from_slice(root.as_ref());
    buf
}

impl SignedLogRoot {
    pub fn new(size: u64, root: Digest, log_signing_key: &KeyPair) -> Self {
        let digest = Digest::hash(&slr_signing_bytes(size, &root));
        let signature = Signature::new(&digest, log_signing_key);
        Self {
            size,
            root,
            signature,
        }
    }

    pub fn verify(&self, log_public_key: &PublicKey) -> MessageResult<()> {
        let digest = Digest::hash(&slr_signing_bytes(self.size, &self.root));
        self.signature
            .verify(&digest, log_public_key)
            .map_err(|_| MessageError::BadLogSig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn smh_round_trips() {
        let (pk, sk) = KeyPair::generate_keypair(&mut OsRng);
        let smh = SignedMapHead::new(
            "example.com".to_string(),
            1,
            Digest::hash(b"root"),
            1_700_000_000,
            Digest::nil(),
            &sk,
        );
        assert!(smh.verify(&pk).is_ok());
    }

    #[test]
    fn smh_signature_does_not_verify_under_wrong_key() {
        let (_, sk) = KeyPair::generate_keypair(&mut OsRng);
        let (other_pk, _) = KeyPair::generate_keypair(&mut OsRng);
        let smh = SignedMapHead::new(
            "example.com".to_string(),
            1,
            Digest::hash(b"root"),
            1,
            Digest::nil(),
            &sk,
        );
        assert!(smh.verify(&other_pk).is_err());
    }

    #[test]
    fn smh_signature_never_verifies_as_slr() {
        let (pk, sk) = KeyPair::generate_keypair(&mut OsRng);
        let smh = SignedMapHead::new("d".to_string(), 1, Digest::hash(b"root"), 1, Digest::nil(), &sk);
        let forged_slr = SignedLogRoot {
            size: 1,
            root: Digest::hash(b"root"),
            signature: smh.signature.clone(),
        };
        assert!(forged_slr.verify(&pk).is_err());
    }

    #[test]
    fn slr_round_trips() {
        let (pk, sk) = KeyPair::generate_keypair(&mut OsRng);
        let slr = SignedLogRoot::new(5, Digest::hash(b"logroot"), &sk);
        assert!(slr.verify(&pk).is_ok());
    }
}
