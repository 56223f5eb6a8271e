//! A verifiable random function over P-256, mapping an arbitrary identifier
//! to an opaque 256-bit tree index plus a proof that the index was derived
//! correctly from the identifier and a committed public key.
//!
//! Construction follows the generic ECVRF of RFC 9381 §5: hash the input to
//! a curve point `H`, compute `Gamma = sk * H`, and produce a Schnorr-style
//! proof-of-correct-computation `(c, s)` binding `Gamma` to the prover's
//! public key. Hash-to-curve uses the RFC 9380 `hash_to_curve` construction
//! (`ExpandMsgXmd<Sha256>`) rather than RFC 9381's try-and-increment, since
//! that is what the `p256` crate exposes directly.

use elliptic_curve::{
    hash2curve::{ExpandMsgXmd, GroupDigest},
    ops::Reduce,
    sec1::{FromEncodedPoint, ToEncodedPoint},
    PrimeField,
};
use p256::{AffinePoint, EncodedPoint, NistP256, ProjectivePoint, Scalar, U256};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::{Digest, KeyPair, PublicKey};

const DST: &[u8] = b"ECVRF-P256-SHA256-key-transparency-index";
const CHALLENGE_LEN: usize = 16;

/// Errors raised while verifying a VRF proof.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VrfError {
    #[error("VRF proof does not verify against the given public key and input")]
    BadProof,
    #[error("malformed VRF proof encoding")]
    Malformed,
}

/// A VRF proof: `(Gamma, c, s)` in the notation of RFC 9381 §5.1.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct VrfProof {
    gamma: [u8; 33],
    c: [u8; CHALLENGE_LEN],
    s: [u8; 32],
}

fn hash_to_curve(alpha: &[u8]) -> ProjectivePoint {
    NistP256::hash_from_bytes::<ExpandMsgXmd<Sha256>>(&[alpha], &[DST])
        .expect("hash-to-curve expansion never fails for a well-formed DST")
}

/// Fold the four curve points involved in the Schnorr-style proof into the
/// truncated challenge `c` (RFC 9381 §5.4.3, "Fixed-length encoding").
fn challenge(points: &[&ProjectivePoint]) -> [u8; CHALLENGE_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(b"ECVRF-P256-challenge");
    for point in points {
        hasher.update(point.to_affine().to_encoded_point(true).as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = [0u8; CHALLENGE_LEN];
    out.copy_from_slice(&digest[..CHALLENGE_LEN]);
    out
}

fn challenge_scalar(c: &[u8; CHALLENGE_LEN]) -> Scalar {
    let mut padded = [0u8; 32];
    padded[32 - CHALLENGE_LEN..].copy_from_slice(c);
    Scalar::reduce(U256::from_be_slice(&padded))
}

/// Deterministic nonce derivation: `k = H("ECVRF-P256-nonce" || sk || H)`, reduced mod the
/// group order. Simpler than RFC 6979 but still deterministic: identical `(sk, msg)` pairs
/// always evaluate to the same proof, so re-evaluation never produces divergent indices.
fn nonce(sk: &Scalar, h_point: &ProjectivePoint) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(b"ECVRF-P256-nonce");
    hasher.update(sk.to_repr());
    hasher.update(h_point.to_affine().to_encoded_point(true).as_bytes());
    let digest = hasher.finalize();
    Scalar::reduce(U256::from_be_slice(&digest))
}

fn proof_to_hash(gamma: &ProjectivePoint) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(b"ECVRF-P256-proof-to-hash");
    hasher.update(gamma.to_affine().to_encoded_point(true).as_bytes());
    Digest(hasher.finalize().into())
}

fn decode_point(bytes: &[u8; 33]) -> Result<ProjectivePoint, VrfError> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| VrfError::Malformed)?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or(VrfError::Malformed)?;
    Ok(ProjectivePoint::from(affine))
}

fn encode_point(point: &ProjectivePoint) -> [u8; 33] {
    let encoded = point.to_affine().to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(encoded.as_bytes());
    out
}

/// Evaluate the VRF: deterministic in `(sk, msg)`.
pub fn evaluate(sk: &KeyPair, msg: &[u8]) -> (Digest, VrfProof) {
    let h_point = hash_to_curve(msg);
    let secret_scalar = sk.vrf_scalar();

    let gamma = h_point * secret_scalar;

    let k = nonce(&secret_scalar, &h_point);
    let k_g = ProjectivePoint::GENERATOR * k;
    let k_h = h_point * k;

    let c = challenge(&[&h_point, &gamma, &k_g, &k_h]);
    let c_scalar = challenge_scalar(&c);
    let s = k + c_scalar * secret_scalar;

    let index = proof_to_hash(&gamma);
    let proof = VrfProof {
        gamma: encode_point(&gamma),
        c,
        s: s.to_repr().into(),
    };
    (index, proof)
}

/// Verify a VRF proof against `pk` and `msg`, returning the 32-byte index on success.
pub fn verify(pk: &PublicKey, msg: &[u8], proof: &VrfProof) -> Result<Digest, VrfError> {
    let gamma = decode_point(&proof.gamma)?;
    let s = Option::<Scalar>::from(Scalar::from_repr(proof.s.into())).ok_or(VrfError::Malformed)?;
    let c_scalar = challenge_scalar(&proof.c);

    let h_point = hash_to_curve(msg);
    let public_point = ProjectivePoint::from(pk.vrf_point());

    // U = s*G - c*PK, V = s*H - c*Gamma
    let u = ProjectivePoint::GENERATOR * s - public_point * c_scalar;
    let v = h_point * s - gamma * c_scalar;

    let recomputed = challenge(&[&h_point, &gamma, &u, &v]);
    if recomputed != proof.c {
        return Err(VrfError::BadProof);
    }

    Ok(proof_to_hash(&gamma))
}

impl KeyPair {
    fn vrf_scalar(&self) -> Scalar {
        *self.inner().as_nonzero_scalar().as_ref()
    }
}

impl PublicKey {
    fn vrf_point(&self) -> AffinePoint {
        *self.inner().as_affine()
    }
}
