//! Cryptographic primitives shared by every component of the directory:
//! digests, ECDSA-P256 signing keys, the verifiable random function and the
//! entry commitment scheme. Hashing is SHA-256 throughout, matching the
//! directory's configured hash algorithm.

pub mod commitment;
pub mod vrf;

#[cfg(test)]
#[path = "tests/crypto_tests.rs"]
pub mod crypto_tests;

use ecdsa::signature::{Signer, Verifier};
use elliptic_curve::{sec1::ToEncodedPoint, Field};
use p256::ecdsa::{Signature as P256Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::{
    array::TryFromSliceError,
    convert::{TryFrom, TryInto},
};
use thiserror::Error;

/// Errors raised by signature creation/verification.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed public key")]
    MalformedPublicKey,
}

impl From<ecdsa::Error> for CryptoError {
    fn from(_: ecdsa::Error) -> Self {
        CryptoError::InvalidSignature
    }
}

/// A SHA-256 digest (32 bytes). Used for entry hashes, leaf values,
/// commitments and every domain-separated message that gets signed.
#[derive(Hash, PartialEq, Default, Eq, Clone, Deserialize, Serialize, Ord, PartialOrd)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Hash arbitrary bytes with SHA-256.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest(hasher.finalize().into())
    }

    /// Hash several byte slices as one contiguous message (domain separation helper).
    pub fn hash_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Digest(hasher.finalize().into())
    }

    /// Convert a digest into a vector of bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Return the number of bytes of a digest.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// The distinguished "nil" hash used as `previous_hash` for a brand new entry.
    pub fn nil() -> Self {
        Digest([0u8; 32])
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "{}", base64::encode(&self.0))
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "{}", base64::encode(&self.0).get(0..16).unwrap())
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = TryFromSliceError;
    fn try_from(item: &[u8]) -> Result<Self, Self::Error> {
        Ok(Digest(item.try_into()?))
    }
}

/// An ECDSA-P256 public key. Serves interchangeably as the identity of a
/// directory's VRF, map signer, or log signer, depending on which role the
/// surrounding config assigns it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Encode the public key as a compressed SEC1 point, base64-ed.
    pub fn encode_base64(&self) -> String {
        base64::encode(self.0.to_encoded_point(true).as_bytes())
    }

    /// Decode a base64-encoded compressed SEC1 point.
    pub fn decode_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = base64::decode(s).map_err(|_| CryptoError::MalformedPublicKey)?;
        let key =
            VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::MalformedPublicKey)?;
        Ok(PublicKey(key))
    }

    /// The raw compressed SEC1 encoding (33 bytes), for canonical hashing.
    pub fn to_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out.copy_from_slice(self.0.to_encoded_point(true).as_bytes());
        out
    }

    pub(crate) fn inner(&self) -> &VerifyingKey {
        &self.0
    }

    pub(crate) fn from_verifying_key(key: VerifyingKey) -> Self {
        PublicKey(key)
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.encode_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::decode_base64(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.encode_base64())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.encode_base64().get(0..16).unwrap_or(""))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.encode_base64().cmp(&other.encode_base64())
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An ECDSA-P256 keypair.
/// TODO: make the secret scalar non-copyable and pinned so it is harder to scatter through memory.
#[derive(Clone)]
pub struct KeyPair(SigningKey);

impl Serialize for KeyPair {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&base64::encode(self.0.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for KeyPair {
    fn deserialize<D>(deserializer: D) -> Result<KeyPair, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = base64::decode(&s).map_err(|e| serde::de::Error::custom(e.to_string()))?;
        let key = SigningKey::from_bytes(bytes.as_slice().into())
            .map_err(|e| serde::de::Error::custom(e.to_string()))?;
        Ok(KeyPair(key))
    }
}

impl KeyPair {
    /// Return the public half of this keypair.
    pub fn public(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    /// Generate a fresh keypair from the OS RNG.
    pub fn generate_production_keypair() -> (PublicKey, KeyPair) {
        Self::generate_keypair(&mut rand_core::OsRng)
    }

    /// Generate a keypair from the given RNG (useful for reproducible tests).
    pub fn generate_keypair<R>(csprng: &mut R) -> (PublicKey, KeyPair)
    where
        R: rand_core::CryptoRng + rand_core::RngCore,
    {
        let signing_key = SigningKey::random(csprng);
        let public = PublicKey(*signing_key.verifying_key());
        (public, KeyPair(signing_key))
    }

    pub(crate) fn inner(&self) -> &SigningKey {
        &self.0
    }
}

/// An ECDSA-P256 signature over a digest.
#[derive(Serialize, Deserialize, Clone)]
pub struct Signature(P256Signature);

impl Default for Signature {
    fn default() -> Self {
        // A syntactically valid but never-verifying placeholder signature.
        Self(P256Signature::from_scalars(p256::Scalar::ONE, p256::Scalar::ONE).unwrap())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", base64::encode(self.0.to_bytes()))
    }
}

impl Signature {
    /// Sign a digest with the given keypair.
    pub fn new(value: &Digest, secret: &KeyPair) -> Self {
        Signature(secret.inner().sign(value.as_ref()))
    }

    /// The fixed-width `(r, s)` encoding, used wherever a signature itself
    /// needs to be hashed or logged (e.g. as part of a Merkle log leaf).
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes().into()
    }

    /// Verify a signature over a digest.
    pub fn verify(&self, value: &Digest, author: &PublicKey) -> Result<(), CryptoError> {
        author
            .inner()
            .verify(value.as_ref(), &self.0)
            .map_err(CryptoError::from)
    }

    /// Verify many signatures over the same digest, one per (author, signature) pair.
    /// P-256 ECDSA has no cheap batch-verification trick like ed25519's, so this simply
    /// verifies each signature independently and short-circuits on the first failure.
    pub fn verify_batch<'a, I>(value: &'a Digest, votes: I) -> Result<(), CryptoError>
    where
        I: IntoIterator<Item = &'a (PublicKey, Signature)>,
    {
        for (author, signature) in votes.into_iter() {
            signature.verify(value, author)?;
        }
        Ok(())
    }
}
