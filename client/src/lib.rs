//! The end-to-end `GetEntry` verifier (spec §4.8, C8): the one piece of
//! this workspace a party outside the directory's own infrastructure runs.
//! `verify_get_entry` composes every check a response bundle must pass —
//! VRF, tree proof, commitment, SMH signature, log inclusion, log
//! consistency — into a single call; a successful return is the *only*
//! signal callers are meant to act on (spec §4.8 "Any failure aborts with
//! a specific error; a successful verification is the only signal the
//! client uses").

use crypto::{commitment, vrf, Digest};
use messages::{bundle::GetEntryResponse, vrf_message, Entry, MessageError};
use thiserror::Error;

pub type VerificationResult<T> = Result<T, VerificationError>;

/// Every way `verify_get_entry` can refuse a response. Wraps the shared
/// `MessageError` taxonomy (spec §7 "Cryptographic" tier) rather than
/// duplicating it, plus the one failure mode that is this crate's alone:
/// a server that claims consistency with a trusted state it cannot prove.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("BAD_VRF: {0}")]
    BadVrf(String),

    #[error("MISSING_CONSISTENCY_PROOF: response omitted a consistency proof from the trusted log size")]
    MissingConsistencyProof,
}

/// What a verified `GetEntryResponse` said about an identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    /// The identifier has a live entry; its revealed preimage is attached.
    Present(Entry),
    /// The tree proof is an absence proof against the verified root.
    Absent,
}

/// The log state a client has previously verified and should extend from
/// on its next lookup (spec §4.8 step 6, §9 "cancelling and restarting
/// resumes from the last trusted SMH").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustedState {
    pub log_size: u64,
    pub log_root: Digest,
}

/// Verify `response` answers `GetEntry(app_id, user_id)` against
/// `directory`'s public keys, optionally extending `trusted` (the
/// client's last verified log checkpoint) via the response's consistency
/// proof. On success, returns the identifier's status and the new trusted
/// state to remember for the next call.
pub fn verify_get_entry(
    directory: &config::Directory,
    app_id: &[u8],
    user_id: &[u8],
    response: &GetEntryResponse,
    trusted: Option<&TrustedState>,
) -> VerificationResult<(EntryStatus, TrustedState)> {
    // 1. VRF: recover the index the server claims this identifier maps to.
    let index = vrf::verify(&directory.vrf_public_key, &vrf_message(app_id, user_id), &response.vrf_proof)
        .map_err(|e| VerificationError::BadVrf(e.to_string()))?;

    // 2. Commitment: the revealed (nonce, app_id, data) must hash back to
    // the commitment the directory claims it stored. Checked before the
    // tree proof so a bad preimage is reported as `BAD_COMMITMENT`, distinct
    // from a bad proof over a genuine commitment.
    //
    // 3. Tree proof: fold that (now-verified) commitment into a candidate
    // leaf and check it against `smh.root`. A lie about the leaf's
    // presence, independent of the preimage, fails this step instead.
    let status = match &response.revealed {
        Some(revealed) => {
            if !commitment::verify(&revealed.commitment, &revealed.nonce, &revealed.app_id, &revealed.data) {
                return Err(MessageError::BadCommitment.into());
            }
            let entry = Entry {
                commitment: revealed.commitment.clone(),
                authorized_keys: revealed.authorized_keys.clone(),
                previous_hash: revealed.previous_hash.clone(),
            };
            let ok = tree::verify_membership(&index, &entry.commitment, &response.tree_proof, &response.smh.root)
                .map_err(MessageError::from)?;
            if !ok {
                return Err(MessageError::BadProof("tree proof does not place entry at index".into()).into());
            }
            EntryStatus::Present(entry)
        }
        None => {
            let ok = tree::verify_non_membership(&index, &response.tree_proof, &response.smh.root)
                .map_err(MessageError::from)?;
            if !ok {
                return Err(MessageError::BadProof("tree proof does not prove absence".into()).into());
            }
            EntryStatus::Absent
        }
    };

    // 4. SMH signature.
    response.smh.verify(&directory.map_public_key)?;

    // 5. Log inclusion of this SMH, and the signed checkpoint over it.
    txlog::verify_inclusion(
        &response.smh.log_leaf_bytes(),
        response.smh.epoch,
        response.log_size,
        &response.log_inclusion_proof,
        &response.signed_log_root.root,
    )
    .map_err(MessageError::from)?;
    response.signed_log_root.verify(&directory.log_public_key)?;

    // 6. Consistency with whatever the client already trusted.
    if let Some(trusted) = trusted {
        if trusted.log_size > 0 {
            let proof = response
                .log_consistency_proof
                .as_ref()
                .ok_or(VerificationError::MissingConsistencyProof)?;
            txlog::verify_consistency(
                trusted.log_size,
                response.log_size,
                proof,
                &trusted.log_root,
                &response.signed_log_root.root,
            )
            .map_err(MessageError::from)?;
        }
    }

    let new_trusted = TrustedState {
        log_size: response.log_size,
        log_root: response.signed_log_root.root.clone(),
    };
    Ok((status, new_trusted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Directory, HashAlgorithm};
    use crypto::{KeyPair, PublicKey, Signature};
    use messages::bundle::RevealedEntry;
    use messages::smh::{SignedLogRoot, SignedMapHead};
    use rand_core::OsRng;
    use tree::{MemoryStore, SparseMerkleTree};
    use txlog::MerkleLog;

    struct Fixture {
        directory: Directory,
        vrf_sk: KeyPair,
        map_sk: KeyPair,
        log_sk: KeyPair,
    }

    fn fixture() -> Fixture {
        let (vrf_pk, vrf_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (map_pk, map_sk) = KeyPair::generate_keypair(&mut OsRng);
        let (log_pk, log_sk) = KeyPair::generate_keypair(&mut OsRng);
        let directory = Directory {
            directory_id: "example.com".to_string(),
            vrf_public_key: vrf_pk,
            map_public_key: map_pk,
            log_public_key: log_pk,
            sequencer_address: "127.0.0.1:9000".parse().unwrap(),
            min_interval_ms: 1_000,
            max_interval_ms: 60_000,
            hash_algorithm: HashAlgorithm::Sha256,
        };
        Fixture { directory, vrf_sk, map_sk, log_sk }
    }

    /// Build a one-epoch directory (empty, or with a single claimed
    /// identifier) and a `GetEntryResponse` for `user_id`/`app_id`.
    fn single_epoch_response(
        fx: &Fixture,
        app_id: &[u8],
        claim: Option<(&[u8], &[u8], &PublicKey)>,
        lookup_user_id: &[u8],
    ) -> GetEntryResponse {
        let mut tree = SparseMerkleTree::new(MemoryStore::default());
        let mut revealed = None;
        if let Some((claim_user_id, data, pk)) = claim {
            let (claim_index, _) = vrf::evaluate(&fx.vrf_sk, &vrf_message(app_id, claim_user_id));
            let nonce = commitment::generate_nonce(&mut OsRng);
            let commitment = commitment::commit(&nonce, app_id, data);
            tree.insert(&claim_index, &commitment).unwrap();
            if claim_user_id == lookup_user_id {
                revealed = Some(RevealedEntry {
                    commitment,
                    nonce,
                    app_id: app_id.to_vec(),
                    data: data.to_vec(),
                    authorized_keys: vec![pk.clone()],
                    previous_hash: Digest::nil(),
                });
            }
        }
        let root = tree.root().unwrap();
        let (index, vrf_proof) = vrf::evaluate(&fx.vrf_sk, &vrf_message(app_id, lookup_user_id));
        let tree_proof = tree.proof(&index).unwrap();

        let smh = SignedMapHead::new(fx.directory.directory_id.clone(), 0, root, 1, Digest::nil(), &fx.map_sk);
        let mut log = MerkleLog::new();
        log.append(&smh.log_leaf_bytes());
        let log_inclusion_proof = log.inclusion_proof(0, 1).unwrap();
        let signed_log_root = SignedLogRoot::new(1, log.root(), &fx.log_sk);

        GetEntryResponse {
            vrf_proof,
            tree_proof,
            smh,
            log_size: 1,
            log_inclusion_proof,
            signed_log_root,
            log_consistency_proof: None,
            revealed,
        }
    }

    #[test]
    fn first_claim_verifies_present() {
        let fx = fixture();
        let (pk, _sk) = KeyPair::generate_keypair(&mut OsRng);
        let response = single_epoch_response(&fx, b"app", Some((b"a@x", b"v1", &pk)), b"a@x");
        let (status, trusted) = verify_get_entry(&fx.directory, b"app", b"a@x", &response, None).unwrap();
        match status {
            EntryStatus::Present(entry) => assert_eq!(entry.authorized_keys, vec![pk]),
            EntryStatus::Absent => panic!("expected Present"),
        }
        assert_eq!(trusted.log_size, 1);
    }

    #[test]
    fn absent_identifier_verifies_absent() {
        let fx = fixture();
        let response = single_epoch_response(&fx, b"app", None, b"never@x");
        let (status, _) = verify_get_entry(&fx.directory, b"app", b"never@x", &response, None).unwrap();
        assert_eq!(status, EntryStatus::Absent);
    }

    #[test]
    fn wrong_vrf_key_is_rejected() {
        let fx = fixture();
        let response = single_epoch_response(&fx, b"app", None, b"never@x");
        let (_, other_vrf_sk) = KeyPair::generate_keypair(&mut OsRng);
        let mut bad_directory = fx.directory.clone();
        bad_directory.vrf_public_key = other_vrf_sk.public();
        let result = verify_get_entry(&bad_directory, b"app", b"never@x", &response, None);
        assert!(matches!(result, Err(VerificationError::BadVrf(_))));
    }

    #[test]
    fn revealed_preimage_not_matching_the_stored_commitment_is_bad_commitment() {
        let fx = fixture();
        let (pk, _sk) = KeyPair::generate_keypair(&mut OsRng);
        let mut response = single_epoch_response(&fx, b"app", Some((b"a@x", b"v1", &pk)), b"a@x");
        response.revealed.as_mut().unwrap().data = b"not-v1".to_vec();
        let result = verify_get_entry(&fx.directory, b"app", b"a@x", &response, None);
        assert!(matches!(result, Err(VerificationError::Message(MessageError::BadCommitment))));
    }

    #[test]
    fn tampered_root_fails_smh_or_proof_verification() {
        let fx = fixture();
        let (pk, _sk) = KeyPair::generate_keypair(&mut OsRng);
        let mut response = single_epoch_response(&fx, b"app", Some((b"a@x", b"v1", &pk)), b"a@x");
        response.smh.root = Digest::hash(b"tampered");
        let result = verify_get_entry(&fx.directory, b"app", b"a@x", &response, None);
        assert!(result.is_err());
    }

    #[test]
    fn tampered_signature_fails() {
        let fx = fixture();
        let mut response = single_epoch_response(&fx, b"app", None, b"never@x");
        response.smh.signature = Signature::default();
        let result = verify_get_entry(&fx.directory, b"app", b"never@x", &response, None);
        assert!(matches!(result, Err(VerificationError::Message(MessageError::BadSmh))));
    }

    #[test]
    fn consistency_extends_across_epochs() {
        let fx = fixture();
        // Epoch 0: empty directory, establishes the first trusted checkpoint.
        let response0 = single_epoch_response(&fx, b"app", None, b"never@x");
        let (_, trusted0) = verify_get_entry(&fx.directory, b"app", b"never@x", &response0, None).unwrap();

        // Epoch 1: one claim lands, log grows to size 2, with a consistency proof from size 1.
        let mut tree = SparseMerkleTree::new(MemoryStore::default());
        let (pk, _sk) = KeyPair::generate_keypair(&mut OsRng);
        let (claim_index, _) = vrf::evaluate(&fx.vrf_sk, &vrf_message(b"app", b"a@x"));
        let nonce = commitment::generate_nonce(&mut OsRng);
        let commitment = commitment::commit(&nonce, b"app", b"v1");
        tree.insert(&claim_index, &commitment).unwrap();
        let root = tree.root().unwrap();
        let (index, vrf_proof) = vrf::evaluate(&fx.vrf_sk, &vrf_message(b"app", b"a@x"));
        let tree_proof = tree.proof(&index).unwrap();
        let smh = SignedMapHead::new(fx.directory.directory_id.clone(), 1, root, 2, Digest::nil(), &fx.map_sk);

        let mut log = MerkleLog::new();
        log.append(&response0.smh.log_leaf_bytes());
        log.append(&smh.log_leaf_bytes());
        let log_inclusion_proof = log.inclusion_proof(1, 2).unwrap();
        let log_consistency_proof = log.consistency_proof(1, 2).unwrap();
        let signed_log_root = SignedLogRoot::new(2, log.root(), &fx.log_sk);

        let response1 = GetEntryResponse {
            vrf_proof,
            tree_proof,
            smh,
            log_size: 2,
            log_inclusion_proof,
            signed_log_root,
            log_consistency_proof: Some(log_consistency_proof),
            revealed: Some(RevealedEntry {
                commitment,
                nonce,
                app_id: b"app".to_vec(),
                data: b"v1".to_vec(),
                authorized_keys: vec![pk],
                previous_hash: Digest::nil(),
            }),
        };

        let (_, trusted1) = verify_get_entry(&fx.directory, b"app", b"a@x", &response1, Some(&trusted0)).unwrap();
        assert_eq!(trusted1.log_size, 2);
    }

    #[test]
    fn missing_consistency_proof_is_rejected_when_one_was_expected() {
        let fx = fixture();
        let response0 = single_epoch_response(&fx, b"app", None, b"never@x");
        let (_, trusted0) = verify_get_entry(&fx.directory, b"app", b"never@x", &response0, None).unwrap();
        let mut response1 = single_epoch_response(&fx, b"app", None, b"never@x");
        response1.log_consistency_proof = None;
        let result = verify_get_entry(&fx.directory, b"app", b"never@x", &response1, Some(&trusted0));
        assert!(matches!(result, Err(VerificationError::MissingConsistencyProof)));
    }
}
