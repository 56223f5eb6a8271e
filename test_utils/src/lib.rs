//! Fixtures shared across this workspace's test suites: sample key
//! material, a sample `Directory`, `EntryUpdate` builders, and a small
//! harness for standing up a `Sequencer` over in-memory storage without
//! repeating its plumbing in every crate that needs one to test against.

use config::{Directory, HashAlgorithm};
use crypto::{commitment, Digest, KeyPair, PublicKey, Signature};
use messages::{Entry, EntryUpdate};
use network::DirectoryService;
use rand_core::OsRng;
use sequencer::Sequencer;
use std::sync::Arc;
use std::time::Duration;
use storage::MemoryKv;
use tokio::task::JoinHandle;

/// A fresh keypair, generated from the OS RNG like everywhere else in this
/// workspace (no seeded determinism to keep straight between test runs).
pub fn keypair() -> (PublicKey, KeyPair) {
    KeyPair::generate_keypair(&mut OsRng)
}

/// A `Directory` naming freshly generated VRF/map/log keys, plus the secret
/// halves a sequencer needs to run it. `min_interval_ms`/`max_interval_ms`
/// are set low so tests see an epoch cut in well under a second.
pub struct SampleDirectory {
    pub directory: Directory,
    pub vrf_secret: KeyPair,
    pub map_secret: KeyPair,
    pub log_secret: KeyPair,
}

pub fn sample_directory(directory_id: &str) -> SampleDirectory {
    let (vrf_pk, vrf_secret) = keypair();
    let (map_pk, map_secret) = keypair();
    let (log_pk, log_secret) = keypair();
    let directory = Directory {
        directory_id: directory_id.to_string(),
        vrf_public_key: vrf_pk,
        map_public_key: map_pk,
        log_public_key: log_pk,
        sequencer_address: "127.0.0.1:9000".parse().unwrap(),
        min_interval_ms: 1,
        max_interval_ms: 20,
        hash_algorithm: HashAlgorithm::Sha256,
    };
    SampleDirectory {
        directory,
        vrf_secret,
        map_secret,
        log_secret,
    }
}

/// A signed `EntryUpdate` claiming `user_id` within `app_id`, authorized by
/// a single fresh key pair — the self-authorizing first-claim case every
/// crate's tests exercise at some point (spec §4.6's `ClaimSelf` rule).
pub fn first_claim(app_id: &[u8], data: &[u8]) -> (PublicKey, KeyPair, EntryUpdate) {
    let (pk, sk) = keypair();
    let update = claim_with(app_id, data, &sk, pk.clone(), Digest::nil());
    (pk, sk, update)
}

/// An `EntryUpdate` signed by `signer` and authorizing `pk`, chained from
/// `previous_hash` (pass `Digest::nil()` for a first claim).
pub fn claim_with(app_id: &[u8], data: &[u8], signer: &KeyPair, pk: PublicKey, previous_hash: Digest) -> EntryUpdate {
    let nonce = commitment::generate_nonce(&mut OsRng);
    let commit = commitment::commit(&nonce, app_id, data);
    let new_entry = Entry {
        commitment: commit,
        authorized_keys: vec![pk],
        previous_hash,
    };
    let digest = new_entry.hash();
    EntryUpdate {
        new_entry,
        signatures: vec![(signer.public(), Signature::new(&digest, signer))],
        nonce,
        app_id: app_id.to_vec(),
        data: data.to_vec(),
    }
}

/// Spawn a `Sequencer` for `sample.directory` over fresh in-memory storage,
/// returning it alongside its `Batcher`/`Epocher` task handles (which the
/// caller should keep alive for as long as the sequencer needs to tick).
pub fn spawn_test_sequencer(sample: &SampleDirectory) -> (Sequencer<MemoryKv>, JoinHandle<()>, JoinHandle<()>) {
    let kv = Arc::new(MemoryKv::default());
    Sequencer::spawn(
        kv,
        sample.directory.clone(),
        sample.vrf_secret.clone(),
        sample.map_secret.clone(),
        sample.log_secret.clone(),
    )
    .expect("failed to spawn a sequencer over fresh in-memory storage")
}

/// Poll `sequencer` until it has published an epoch numbered at least
/// `target`, or panic after a generous timeout. Tests that submit a
/// mutation and need to observe it folded into the tree use this instead
/// of hand-rolling a retry loop.
pub async fn wait_for_epoch_at_least(sequencer: &Sequencer<MemoryKv>, directory_id: &str, target: u64) -> u64 {
    for _ in 0..600 {
        if let Ok(view) = sequencer.get_latest_epoch(&directory_id.to_string()).await {
            if view.smh.epoch >= target {
                return view.smh.epoch;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sequencer never reached epoch {target}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_first_claim_is_eventually_served() {
        let sample = sample_directory("example.com");
        let directory_id = sample.directory.directory_id.clone();
        let (sequencer, _batcher, _epocher) = spawn_test_sequencer(&sample);

        let (_, _, update) = first_claim(b"app", b"v1");
        sequencer.update_entry(&directory_id, b"alice", update).await.unwrap();

        let epoch = wait_for_epoch_at_least(&sequencer, &directory_id, 0).await;
        let response = sequencer.get_entry(&directory_id, b"app", b"alice", None).await.unwrap();
        assert_eq!(response.smh.epoch, epoch);
        assert!(response.revealed.is_some());
    }
}
