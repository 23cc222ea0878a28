//! Ring Signer CLI
//!
//! Manage an encrypted keyring blob and sign with it through the custody worker.
//! The keyring password is read from `RING_SIGNER_PASSWORD`.

use alloy::signers::local::PrivateKeySigner;
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use rand::RngCore;
use ring_signer::{Config, CustodyClient, Error, Result, PASSWORD_ENV};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "ring-signer")]
#[command(about = "Encrypted keyring and message signer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a key to the keyring blob, creating it if needed
    AddKey {
        /// File holding the encrypted keyring
        #[arg(short, long)]
        blob_file: PathBuf,

        /// Hex private key (with or without 0x)
        #[arg(long, conflicts_with = "generate", required_unless_present = "generate")]
        key: Option<String>,

        /// Generate a fresh random key instead
        #[arg(long)]
        generate: bool,
    },

    /// Remove the key at an index; deletes the file when no keys remain
    RemoveKey {
        #[arg(short, long)]
        blob_file: PathBuf,

        #[arg(short, long)]
        index: usize,
    },

    /// Sign an EIP-191 personal message (0x-prefixed hex is signed as bytes)
    SignMessage {
        #[arg(short, long)]
        blob_file: PathBuf,

        #[arg(short, long)]
        index: usize,

        #[arg(short, long)]
        message: String,
    },

    /// Check that the key at an index controls an address
    VerifyAddress {
        #[arg(short, long)]
        blob_file: PathBuf,

        #[arg(short, long)]
        index: usize,

        #[arg(short, long)]
        address: String,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let config = Config::load(cli.config.as_deref())?;

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let client = CustodyClient::spawn(&config.custody)?;
    let outcome = run(&client, cli.command).await;
    client.shutdown().await?;
    outcome
}

async fn run(client: &CustodyClient, command: Commands) -> Result<()> {
    match command {
        Commands::AddKey {
            blob_file,
            key,
            generate,
        } => {
            let key = match key {
                Some(key) => Zeroizing::new(key),
                None if generate => generate_key(),
                None => {
                    return Err(Error::InvalidParams(
                        "either --key or --generate is required".to_string(),
                    ))
                }
            };
            let address = key
                .trim()
                .parse::<PrivateKeySigner>()
                .map_err(|e| Error::InvalidKey(e.to_string()))?
                .address();

            let existing = read_blob(&blob_file, false)?;
            let blob = client
                .add_key(existing.as_deref(), &key, password()?)
                .await?;
            std::fs::write(&blob_file, blob)?;

            tracing::info!(%address, path = %blob_file.display(), "Key added");
            println!("{}", address);
        }
        Commands::RemoveKey { blob_file, index } => {
            let existing = read_blob(&blob_file, true)?;
            match client
                .remove_key(existing.as_deref(), index, password()?)
                .await?
            {
                Some(blob) => {
                    std::fs::write(&blob_file, blob)?;
                    tracing::info!(index, path = %blob_file.display(), "Key removed");
                }
                None => {
                    std::fs::remove_file(&blob_file)?;
                    tracing::info!(path = %blob_file.display(), "Last key removed, blob deleted");
                }
            }
        }
        Commands::SignMessage {
            blob_file,
            index,
            message,
        } => {
            unlock(client, &blob_file).await?;
            let signature = client.sign_message(index, &message).await?;
            client.lock().await?;
            println!("{}", signature);
        }
        Commands::VerifyAddress {
            blob_file,
            index,
            address,
        } => {
            unlock(client, &blob_file).await?;
            let matches = client.verify_address(index, &address).await?;
            client.lock().await?;
            println!("{}", matches);
        }
        Commands::Config => {}
    }

    Ok(())
}

async fn unlock(client: &CustodyClient, blob_file: &Path) -> Result<()> {
    let blob = read_blob(blob_file, true)?.unwrap_or_default();
    client.unlock(&blob, password()?).await
}

/// Read a blob file. A missing file is `None` unless `required`.
fn read_blob(path: &Path, required: bool) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Ok(None),
        Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
    }
}

/// Random key; retried in the negligible case the bytes are not a valid scalar.
fn generate_key() -> Zeroizing<String> {
    loop {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        if let Ok(key) = ring_signer::keyring::parse_key(&hex::encode(bytes.as_slice())) {
            return Zeroizing::new(format!("0x{}", hex::encode(key.as_slice())));
        }
    }
}

fn password() -> Result<SecretString> {
    std::env::var(PASSWORD_ENV)
        .map(SecretString::from)
        .map_err(|_| Error::Config(format!("{} is not set", PASSWORD_ENV)))
}
