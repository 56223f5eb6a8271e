//! Static configuration for a directory: its identity, its three public
//! keys (VRF, map, log), its network address and its epoch scheduling
//! parameters. Also carries the `Import`/`Export` traits used to read/write
//! JSON config files and PEM-wrapped private keys, as every binary in this
//! workspace expects.

use crypto::{KeyPair, PublicKey};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write as _},
    net::SocketAddr,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{file}': {message}")]
    ImportError { file: String, message: String },

    #[error("Failed to write config file '{file}': {message}")]
    ExportError { file: String, message: String },
}

/// Read from file a configuration.
pub trait Import: DeserializeOwned {
    fn import(path: &str) -> Result<Self, ConfigError> {
        let reader = || -> Result<Self, std::io::Error> {
            let data = fs::read(path)?;
            Ok(serde_json::from_slice(data.as_slice())?)
        };
        reader().map_err(|e| ConfigError::ImportError {
            file: path.to_string(),
            message: e.to_string(),
        })
    }
}

/// Write to file a configuration (in JSON format).
pub trait Export: Serialize {
    fn export(&self, path: &str) -> Result<(), ConfigError> {
        let writer = || -> Result<(), std::io::Error> {
            let file = OpenOptions::new().create(true).write(true).open(path)?;
            let mut writer = BufWriter::new(file);
            let data = serde_json::to_string_pretty(self).unwrap();
            writer.write_all(data.as_ref())?;
            writer.write_all(b"\n")?;
            Ok(())
        };
        writer().map_err(|e| ConfigError::ExportError {
            file: path.to_string(),
            message: e.to_string(),
        })
    }
}

/// Hash algorithm in use throughout the directory. Fixed to SHA-256 today,
/// but named explicitly so a client or monitor never has to guess.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum HashAlgorithm {
    Sha256,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

/// The identifier of a directory namespace.
pub type DirectoryId = String;

/// The public, long-lived configuration of one directory: its keys, its
/// sequencer's network address, and the interval policy that bounds how
/// often epochs are cut.
#[derive(Clone, Deserialize, Serialize)]
pub struct Directory {
    /// The directory's namespace identifier.
    pub directory_id: DirectoryId,
    /// The public key used to verify VRF proofs.
    pub vrf_public_key: PublicKey,
    /// The public key used to verify Signed Map Heads.
    pub map_public_key: PublicKey,
    /// The public key used to verify signed log roots.
    pub log_public_key: PublicKey,
    /// The network address clients and monitors use to reach the sequencer.
    pub sequencer_address: SocketAddr,
    /// Minimum time between epochs that contain at least one mutation, in milliseconds.
    pub min_interval_ms: u64,
    /// Maximum time between epochs, even if empty, in milliseconds.
    pub max_interval_ms: u64,
    /// Hash algorithm used throughout the directory.
    pub hash_algorithm: HashAlgorithm,
}

impl Import for Directory {}
impl Export for Directory {}

impl Directory {
    /// Reject an interval policy that can never be satisfied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval_ms > self.max_interval_ms {
            return Err(ConfigError::ImportError {
                file: self.directory_id.clone(),
                message: "min_interval_ms must not exceed max_interval_ms".to_string(),
            });
        }
        Ok(())
    }
}

/// The private key material of one role: the sequencer's map/log signer, or a monitor.
#[derive(Serialize, Deserialize)]
pub struct PrivateConfig {
    /// The public key of this entity.
    pub name: PublicKey,
    /// The private key of this entity.
    pub secret: KeyPair,
}

impl Default for PrivateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivateConfig {
    /// Creates a new private configuration.
    pub fn new() -> Self {
        let (name, secret) = KeyPair::generate_production_keypair();
        Self { name, secret }
    }
}

impl Import for PrivateConfig {}
impl Export for PrivateConfig {}
