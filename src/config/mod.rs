//! Configuration for the ring signer
//!
//! Values come from an optional JSON file, then environment overrides:
//!
//! ```bash
//! export RING_SIGNER_POLL_INTERVAL_MS=250
//! export RING_SIGNER_CHANNEL_CAPACITY=128
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable holding the keyring password
pub const PASSWORD_ENV: &str = "RING_SIGNER_PASSWORD";

/// Environment variable names
mod env_vars {
    pub const POLL_INTERVAL_MS: &str = "RING_SIGNER_POLL_INTERVAL_MS";
    pub const CHANNEL_CAPACITY: &str = "RING_SIGNER_CHANNEL_CAPACITY";
}

/// Argon2id cost parameters used when encrypting a keyring blob.
///
/// Decryption always uses the parameters recorded in the blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Iteration count
    pub iterations: u32,
    /// Parallelism (lanes)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MB
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters so unit tests do not spend seconds in Argon2.
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Key custody worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// Key derivation cost for newly written blobs
    #[serde(default)]
    pub kdf: KdfParams,
    /// Bound on in-flight messages to and from the worker thread
    pub channel_capacity: usize,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            channel_capacity: 64,
        }
    }
}

/// Hardware command queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Delay between polls of the command queue (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub custody: CustodyConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Load from a JSON file (or defaults when `path` is `None`), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
            }
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(env_vars::POLL_INTERVAL_MS) {
            tracing::debug!("Using {} for queue poll interval", env_vars::POLL_INTERVAL_MS);
            self.queue.poll_interval_ms = parse_env(env_vars::POLL_INTERVAL_MS, &value)?;
        }
        if let Ok(value) = std::env::var(env_vars::CHANNEL_CAPACITY) {
            tracing::debug!("Using {} for custody channel", env_vars::CHANNEL_CAPACITY);
            self.custody.channel_capacity = parse_env(env_vars::CHANNEL_CAPACITY, &value)?;
        }
        if self.custody.channel_capacity == 0 {
            return Err(Error::Config(
                "custody.channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_deserialize_defaults() {
        let parsed: Config = serde_json::from_value(serde_json::json!({})).expect("parse config");
        assert_eq!(parsed.queue.poll_interval_ms, 200);
        assert_eq!(parsed.custody.channel_capacity, 64);
        assert_eq!(parsed.custody.kdf, KdfParams::default());
    }

    #[test]
    fn config_deserialize_explicit() {
        let value = serde_json::json!({
            "custody": {
                "kdf": { "memory_kib": 8192, "iterations": 2, "parallelism": 1 },
                "channel_capacity": 8
            },
            "queue": { "poll_interval_ms": 50 }
        });
        let parsed: Config = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.custody.kdf.memory_kib, 8192);
        assert_eq!(parsed.custody.channel_capacity, 8);
        assert_eq!(parsed.queue.poll_interval_ms, 50);
    }

    #[test]
    fn load_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "queue": {{ "poll_interval_ms": 75 }} }}"#).unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.queue.poll_interval_ms, 75);
        assert_eq!(config.custody.channel_capacity, 64);
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/ring-signer.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
