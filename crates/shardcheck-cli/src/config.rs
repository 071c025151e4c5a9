//! Configuration management for the shardcheck CLI.

use anyhow::{Context, Result};
use serde::Deserialize;
use shardcheck::{CheckOptions, Credentials, HttpVersion, DEFAULT_BATCH_SIZE, DEFAULT_UNIQUE_KEY};
use std::path::{Path, PathBuf};

/// Name of the config file searched for from the working directory up.
pub const CONFIG_FILE_NAME: &str = "shardcheck.toml";

/// Shardcheck configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shards: ShardsConfig,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShardsConfig {
    /// Core URLs, one per shard.
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    #[serde(default = "default_unique_key")]
    pub unique_key: String,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub http2: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub report: Option<PathBuf>,
}

fn default_unique_key() -> String { DEFAULT_UNIQUE_KEY.to_string() }
fn default_batch_size() -> usize { DEFAULT_BATCH_SIZE }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            unique_key: default_unique_key(),
            filters: Vec::new(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            report: None,
        }
    }
}

impl Config {
    /// Load config from shardcheck.toml in the current or parent directories.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read working directory")?;
        match find_config_file(&cwd) {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    /// Load config from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Options shared by every shard scan.
    pub fn check_options(&self) -> CheckOptions {
        CheckOptions {
            unique_key: self.check.unique_key.clone(),
            filters: self.check.filters.clone(),
            batch_size: self.check.batch_size,
        }
    }

    pub fn http_version(&self) -> HttpVersion {
        if self.connection.http2 {
            HttpVersion::Http2
        } else {
            HttpVersion::Http1
        }
    }

    /// Basic-auth credentials, present only when a user is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        self.connection
            .user
            .as_ref()
            .map(|user| Credentials::new(user.clone(), self.connection.password.clone()))
    }
}

/// Find shardcheck.toml in `start` or one of its parents.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}
