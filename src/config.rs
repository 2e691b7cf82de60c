use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;

use crate::crypto::{DEFAULT_KEY_BITS, SealFormat};

pub const API_URL_VAR: &str = "WOOSH_API_URL";
pub const DATA_DIR_VAR: &str = "WOOSH_DATA_DIR";
pub const KEY_BITS_VAR: &str = "WOOSH_KEY_BITS";
pub const POLL_INTERVAL_VAR: &str = "WOOSH_POLL_INTERVAL_MS";
pub const CLEAR_HISTORY_VAR: &str = "WOOSH_CLEAR_HISTORY";
pub const SEAL_FORMAT_VAR: &str = "WOOSH_SEAL_FORMAT";

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    /// Directory of the persisted store tables.
    pub data_dir: PathBuf,
    /// RSA modulus size for newly registered accounts.
    pub key_bits: usize,
    pub poll_interval: Duration,
    /// Whether polling deletes downloaded messages from the server.
    pub clear_history: bool,
    /// Format of newly sealed private keys; existing values of either
    /// format stay readable.
    pub seal_format: SealFormat,
}

impl Config {
    /// Reads settings from the environment, after loading a `.env` file if
    /// one is present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`; unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup(DATA_DIR_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let key_bits = parse_var(&lookup, KEY_BITS_VAR, DEFAULT_KEY_BITS)?;
        if !(1024..=16384).contains(&key_bits) {
            return Err(anyhow!("{KEY_BITS_VAR} must be between 1024 and 16384, got {key_bits}"));
        }

        let poll_ms = parse_var(&lookup, POLL_INTERVAL_VAR, DEFAULT_POLL_INTERVAL.as_millis() as u64)?;

        Ok(Self {
            api_url: lookup(API_URL_VAR).unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            data_dir,
            key_bits,
            poll_interval: Duration::from_millis(poll_ms),
            clear_history: parse_var(&lookup, CLEAR_HISTORY_VAR, true)?,
            seal_format: parse_var(&lookup, SEAL_FORMAT_VAR, SealFormat::Legacy)?,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        None => Ok(default),
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("", "", "woosh").context("could not determine platform directories")?;
    Ok(project_dirs.data_dir().to_path_buf())
}
