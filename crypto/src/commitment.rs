//! A hiding, binding commitment to an entry's application payload.
//!
//! `commit(nonce, app_id, data) = HMAC-SHA256(nonce, "commit" || len(app_id) || app_id || data)`.
//! `nonce` must carry >=128 bits of entropy and is generated fresh per revision; binding
//! follows from HMAC collision resistance, hiding from the nonce's entropy.

use hmac::{Hmac, Mac};
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;

use crate::Digest;

type HmacSha256 = Hmac<Sha256>;

/// Size in bytes of a commitment nonce (>= 128 bits of entropy).
pub const NONCE_LEN: usize = 16;

/// A fresh random nonce, one per entry revision.
pub fn generate_nonce<R: CryptoRng + RngCore>(rng: &mut R) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// Compute the 32-byte commitment to `(app_id, data)` under `nonce`.
pub fn commit(nonce: &[u8; NONCE_LEN], app_id: &[u8], data: &[u8]) -> Digest {
    let mut mac = HmacSha256::new_from_slice(nonce).expect("HMAC accepts any key length");
    mac.update(b"commit");
    mac.update(&(app_id.len() as u64).to_be_bytes());
    mac.update(app_id);
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    Digest(tag.into())
}

/// Verify that `commitment` was produced from `(nonce, app_id, data)`.
pub fn verify(commitment: &Digest, nonce: &[u8; NONCE_LEN], app_id: &[u8], data: &[u8]) -> bool {
    commit(nonce, app_id, data) == *commitment
}
