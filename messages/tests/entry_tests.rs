use crypto::{commitment, Digest, KeyPair, Signature};
use messages::{Entry, EntryUpdate, MutationOutcome, MutationRecord};
use rand_core::OsRng;

fn first_revision(data: &[u8]) -> (EntryUpdate, KeyPair) {
    let (owner_pk, owner_sk) = KeyPair::generate_keypair(&mut OsRng);
    let nonce = commitment::generate_nonce(&mut OsRng);
    let commit = commitment::commit(&nonce, b"app-1", data);
    let new_entry = Entry {
        commitment: commit,
        authorized_keys: vec![owner_pk.clone()],
        previous_hash: Digest::nil(),
    };
    let digest = new_entry.hash();
    let signature = Signature::new(&digest, &owner_sk);
    let update = EntryUpdate {
        new_entry,
        signatures: vec![(owner_pk, signature)],
        nonce,
        app_id: b"app-1".to_vec(),
        data: data.to_vec(),
    };
    (update, owner_sk)
}

#[test]
fn first_claim_self_authorizes() {
    let (update, _) = first_revision(b"v1");
    assert!(update.commitment_matches());
    assert_eq!(update.new_entry.previous_hash, Digest::nil());
}

#[test]
fn mutation_record_tracks_rejection_reason() {
    let (update, _) = first_revision(b"v1");
    let record = MutationRecord {
        epoch: 3,
        sequence_in_epoch: 0,
        index: Digest::hash(b"alice@example.com"),
        old_entry_hash: Digest::nil(),
        outcome: MutationOutcome::Rejected {
            reason: messages::MessageError::Replay,
        },
        update,
    };
    assert!(!record.outcome.is_accepted());
    assert!(record.accepted_entry_hash().is_none());
}
