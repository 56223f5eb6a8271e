use anyhow::{Context, Result};
use clap::{arg, crate_name, crate_version, Arg, ArgMatches, Command};
use config::{Directory, Export, Import, PrivateConfig};
use sequencer::Sequencer;
use std::sync::Arc;
use storage::RocksKv;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about("A Key Transparency directory sequencer.")
        .arg(Arg::new("verbose").multiple_occurrences(true).short('v'))
        .subcommand(
            Command::new("generate-keypair")
                .about("Print a fresh key pair to file")
                .arg(arg!(--filename <FILE> "The path to write the key pair to")),
        )
        .subcommand(
            Command::new("init-directory")
                .about("Assemble a directory config from existing key pairs")
                .args(&[
                    arg!(--directory_id <ID> "The directory's namespace identifier"),
                    arg!(--vrf_keypair <FILE> "The path to the VRF key pair"),
                    arg!(--map_keypair <FILE> "The path to the map-signing key pair"),
                    arg!(--log_keypair <FILE> "The path to the log-signing key pair"),
                    arg!(--address <ADDR> "The sequencer's network address"),
                    arg!(--min_interval_ms [INT] "Minimum time between non-empty epochs"),
                    arg!(--max_interval_ms [INT] "Maximum time between any two epochs"),
                    arg!(--output <FILE> "Where to write the assembled directory config"),
                ]),
        )
        .subcommand(Command::new("run").about("Run a sequencer").args(&[
            arg!(--directory <FILE> "The path to the directory config"),
            arg!(--vrf_keypair <FILE> "The path to the VRF key pair"),
            arg!(--map_keypair <FILE> "The path to the map-signing key pair"),
            arg!(--log_keypair <FILE> "The path to the log-signing key pair"),
            arg!(--storage <PATH> "The directory to hold the RocksDB storage"),
        ]))
        .arg_required_else_help(true)
        .get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_module("sequencer", log_level)
        .filter_module("network", log_level)
        .init();

    match matches.subcommand() {
        Some(("generate-keypair", sub_matches)) => PrivateConfig::new()
            .export(sub_matches.value_of("filename").unwrap())
            .context("Failed to generate key pair")?,
        Some(("init-directory", sub_matches)) => {
            init_directory(sub_matches).context("Failed to assemble directory config")?
        }
        Some(("run", sub_matches)) => run(sub_matches).await.context("Failed to run sequencer")?,
        _ => unreachable!(),
    }
    Ok(())
}

fn init_directory(matches: &ArgMatches) -> Result<()> {
    let vrf = PrivateConfig::import(matches.value_of("vrf_keypair").unwrap())?;
    let map = PrivateConfig::import(matches.value_of("map_keypair").unwrap())?;
    let log = PrivateConfig::import(matches.value_of("log_keypair").unwrap())?;

    let directory = Directory {
        directory_id: matches.value_of("directory_id").unwrap().to_string(),
        vrf_public_key: vrf.name,
        map_public_key: map.name,
        log_public_key: log.name,
        sequencer_address: matches
            .value_of("address")
            .unwrap()
            .parse()
            .context("Invalid sequencer address")?,
        min_interval_ms: matches
            .value_of("min_interval_ms")
            .unwrap_or("1000")
            .parse()
            .context("min_interval_ms must be a non-negative integer")?,
        max_interval_ms: matches
            .value_of("max_interval_ms")
            .unwrap_or("60000")
            .parse()
            .context("max_interval_ms must be a non-negative integer")?,
        hash_algorithm: config::HashAlgorithm::Sha256,
    };
    directory.validate().context("Invalid interval policy")?;
    directory
        .export(matches.value_of("output").unwrap())
        .context("Failed to write directory config")
}

async fn run(matches: &ArgMatches) -> Result<()> {
    let directory_file = matches.value_of("directory").unwrap();
    let directory = Directory::import(directory_file).context("Failed to load directory config")?;
    directory.validate().context("Invalid directory config")?;

    let vrf_secret = PrivateConfig::import(matches.value_of("vrf_keypair").unwrap())
        .context("Failed to load VRF key pair")?
        .secret;
    let map_secret = PrivateConfig::import(matches.value_of("map_keypair").unwrap())
        .context("Failed to load map key pair")?
        .secret;
    let log_secret = PrivateConfig::import(matches.value_of("log_keypair").unwrap())
        .context("Failed to load log key pair")?
        .secret;

    let storage_path = matches.value_of("storage").unwrap();
    let kv = Arc::new(RocksKv::open(storage_path).context("Failed to open storage")?);

    let directory_id = directory.directory_id.clone();
    let (_sequencer, batcher_handle, epocher_handle) =
        Sequencer::spawn(kv, directory, vrf_secret, map_secret, log_secret)
            .context("Failed to spawn sequencer")?;

    log::info!("sequencer for {directory_id} successfully booted");
    let _ = tokio::join!(batcher_handle, epocher_handle);
    Ok(())
}
