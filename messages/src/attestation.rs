//! Signed statements produced by an independent monitor replaying a
//! directory's mutation log (spec §4.9, component C9). A monitor never
//! votes and never blocks the sequencer; it only ever speaks for itself,
//! after the fact, about an epoch the sequencer has already published.
//!
//! `Attestation` and `Inconsistency` get their own domain-separation
//! prefixes (`"ATT"` / `"INC"`) for the same reason `SignedMapHead` and
//! `SignedLogRoot` do: so a signature minted for one can never be replayed
//! as a signature over the other, or over an SMH/SLR.

use crypto::{Digest, KeyPair, PublicKey, Signature};
use serde::{Deserialize, Serialize};

use crate::error::{MessageError, MessageResult};

/// A monitor's signed claim that it independently replayed `epoch` and
/// recomputed the same tree root the sequencer published.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Attestation {
    pub directory_id: String,
    pub epoch: u64,
    pub root: Digest,
    pub monitor_key: PublicKey,
    pub signature: Signature,
}

fn attestation_signing_bytes(directory_id: &str, epoch: u64, root: &Digest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + directory_id.len() + 32);
    buf.extend_from_slice(b"ATT");
    buf.extend_from_slice(&epoch.to_be_bytes());
    buf.extend_from_slice(&(directory_id.len() as u32).to_be_bytes());
    buf.extend_from_slice(directory_id.as_bytes());
    buf.extend_from_slice(root.as_ref());
    buf
}

impl Attestation {
    pub fn new(directory_id: String, epoch: u64, root: Digest, monitor_key: &KeyPair) -> Self {
        let digest = Digest::hash(&attestation_signing_bytes(&directory_id, epoch, &root));
        let signature = Signature::new(&digest, monitor_key);
        Self {
            directory_id,
            epoch,
            root,
            monitor_key: monitor_key.public(),
            signature,
        }
    }

    pub fn verify(&self) -> MessageResult<()> {
        let digest = Digest::hash(&attestation_signing_bytes(
            &self.directory_id,
            self.epoch,
            &self.root,
        ));
        self.signature
            .verify(&digest, &self.monitor_key)
            .map_err(|_| MessageError::BadSmh)
    }
}

/// A monitor's signed claim that its own replay of `epoch` disagrees with
/// what the sequencer published: the epoch's root, as the monitor
/// recomputed it, differs from `published_root`. A monitor that emits this
/// does not advance past the epoch (spec §4.9 step 3) — disagreement is
/// terminal for that monitor until an operator intervenes.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Inconsistency {
    pub directory_id: String,
    pub epoch: u64,
    pub published_root: Digest,
    pub replayed_root: Digest,
    pub monitor_key: PublicKey,
    pub signature: Signature,
}

fn inconsistency_signing_bytes(
    directory_id: &str,
    epoch: u64,
    published_root: &Digest,
    replayed_root: &Digest,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + directory_id.len() + 64);
    buf.extend_from_slice(b"INC");
    buf.extend_from_slice(&epoch.to_be_bytes());
    buf.extend_from_slice(&(directory_id.len() as u32).to_be_bytes());
    buf.extend_from_slice(directory_id.as_bytes());
    buf.extend_from_slice(published_root.as_ref());
    buf.extend_from_slice(replayed_root.as_ref());
    buf
}

impl Inconsistency {
    pub fn new(
        directory_id: String,
        epoch: u64,
        published_root: Digest,
        replayed_root: Digest,
        monitor_key: &KeyPair,
    ) -> Self {
        let digest = Digest::hash(&inconsistency_signing_bytes(
            &directory_id,
            epoch,
            &published_root,
            &replayed_root,
        ));
        let signature = Signature::new(&digest, monitor_key);
        Self {
            directory_id,
            epoch,
            published_root,
            replayed_root,
            monitor_key: monitor_key.public(),
            signature,
        }
    }

    pub fn verify(&self) -> MessageResult<()> {
        let digest = Digest::hash(&inconsistency_signing_bytes(
            &self.directory_id,
            self.epoch,
            &self.published_root,
            &self.replayed_root,
        ));
        self.signature
            .verify(&digest, &self.monitor_key)
            .map_err(|_| MessageError::BadSmh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn attestation_round_trips() {
        let (_, sk) = KeyPair::generate_keypair(&mut OsRng);
        let att = Attestation::new("d".into(), 1, Digest::hash(b"root"), &sk);
        assert!(att.verify().is_ok());
    }

    #[test]
    fn tampered_attestation_root_fails() {
        let (_, sk) = KeyPair::generate_keypair(&mut OsRng);
        let mut att = Attestation::new("d".into(), 1, Digest::hash(b"root"), &sk);
        att.root = Digest::hash(b"other-root");
        assert!(att.verify().is_err());
    }

    #[test]
    fn inconsistency_round_trips() {
        let (_, sk) = KeyPair::generate_keypair(&mut OsRng);
        let inc = Inconsistency::new(
            "d".into(),
            1,
            Digest::hash(b"published"),
            Digest::hash(b"replayed"),
            &sk,
        );
        assert!(inc.verify().is_ok());
    }

    #[test]
    fn attestation_signature_never_verifies_as_inconsistency() {
        let (_, sk) = KeyPair::generate_keypair(&mut OsRng);
        let att = Attestation::new("d".into(), 1, Digest::hash(b"root"), &sk);
        let forged = Inconsistency {
            directory_id: att.directory_id.clone(),
            epoch: att.epoch,
            published_root: att.root.clone(),
            replayed_root: att.root.clone(),
            monitor_key: att.monitor_key.clone(),
            signature: att.signature.clone(),
        };
        assert!(forged.verify().is_err());
    }
}
