// cloudrestore/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::restore::media::MediaCategory;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

pub const DATABASE_FILE_NAME: &str = "chat.db";
pub const BACKUP_DATABASE_NAME: &str = "chat.backup.db";
const CHAT_DIR_NAME: &str = "Chat";
const FLAGS_FILE_NAME: &str = "restore_flags.json";
const LOG_DIR_NAME: &str = "Log";
const TELEMETRY_FILE_NAME: &str = "restore-errors.jsonl";

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub account_id: Option<String>,
    pub identity_token: Option<String>,
    pub cloud_container: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub telemetry_log: Option<bool>,
}

/// Where everything owned by one account lives on the local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalLayout {
    root: PathBuf,
}

impl LocalLayout {
    pub fn new(data_dir: &Path, account_id: &str) -> Self {
        LocalLayout {
            root: data_dir.join(account_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_NAME)
    }

    pub fn chat_dir(&self) -> PathBuf {
        self.root.join(CHAT_DIR_NAME)
    }

    pub fn media_dir(&self, category: MediaCategory) -> PathBuf {
        self.chat_dir().join(category.dir_name())
    }

    pub fn staging_path(&self, category: MediaCategory) -> PathBuf {
        self.chat_dir().join(format!("{}.tar.gz", category.dir_name()))
    }

    /// Records which archive the category's media directory was last
    /// extracted from.
    pub fn restore_marker_path(&self, category: MediaCategory) -> PathBuf {
        self.chat_dir()
            .join(format!(".{}.restored.json", category.dir_name()))
    }

    pub fn flags_path(&self) -> PathBuf {
        self.root.join(FLAGS_FILE_NAME)
    }

    pub fn telemetry_log_path(&self) -> PathBuf {
        self.root.join(LOG_DIR_NAME).join(TELEMETRY_FILE_NAME)
    }
}

// Application's internal configuration
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub account_id: String,
    pub identity_token: Option<String>,
    pub container_root: PathBuf,
    pub cache_root: PathBuf,
    pub layout: LocalLayout,
    pub poll_interval: Duration,
    pub telemetry_log: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub restore: RestoreConfig,
    pub raw_json_config: RawJsonConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        let restore = load_restore_config_from_json(&raw_json_config)
            .context("Failed to load restore configuration from JSON")?;

        Ok(AppConfig {
            restore,
            raw_json_config,
        })
    }
}

pub fn load_restore_config_from_json(raw_config: &RawJsonConfig) -> Result<RestoreConfig> {
    let account_id = raw_config
        .account_id
        .as_ref()
        .context("account_id must be set in config.json")?
        .trim()
        .to_string();
    if account_id.is_empty() {
        return Err(anyhow::anyhow!("account_id cannot be empty in config.json."));
    }
    if account_id.contains('/') || account_id.contains('\\') || account_id == ".." {
        return Err(anyhow::anyhow!(
            "account_id '{}' must be a single path component.",
            account_id
        ));
    }

    let container = raw_config
        .cloud_container
        .as_ref()
        .context("cloud_container must be set in config.json")?;
    let container_root = parse_container_location(container)?;

    let cache_root = raw_config
        .cache_dir
        .as_ref()
        .context("cache_dir must be set in config.json")?
        .clone();
    let data_dir = raw_config
        .data_dir
        .as_ref()
        .context("data_dir must be set in config.json")?
        .clone();

    if cache_root.as_os_str().is_empty() || data_dir.as_os_str().is_empty() {
        return Err(anyhow::anyhow!(
            "cache_dir and data_dir cannot be empty in config.json."
        ));
    }

    let poll_interval_ms = raw_config
        .poll_interval_ms
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    if poll_interval_ms == 0 {
        return Err(anyhow::anyhow!("poll_interval_ms must be greater than zero."));
    }

    // An empty token is the same as no token: the cloud account is signed out.
    let identity_token = raw_config
        .identity_token
        .clone()
        .filter(|token| !token.trim().is_empty());

    Ok(RestoreConfig {
        layout: LocalLayout::new(&data_dir, &account_id),
        account_id,
        identity_token,
        container_root,
        cache_root,
        poll_interval: Duration::from_millis(poll_interval_ms),
        telemetry_log: raw_config.telemetry_log.unwrap_or(true),
    })
}

/// Accepts either a plain path or a `file://` URL for the cloud container.
fn parse_container_location(value: &str) -> Result<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        return Err(anyhow::anyhow!("cloud_container cannot be empty in config.json."));
    }
    if !value.contains("://") {
        return Ok(PathBuf::from(value));
    }

    let url = Url::parse(value)
        .with_context(|| format!("Invalid cloud_container URL: {}", value))?;
    if url.scheme() != "file" {
        return Err(anyhow::anyhow!(
            "cloud_container scheme '{}' is not supported; expected a mounted folder or file:// URL",
            url.scheme()
        ));
    }
    url.to_file_path()
        .map_err(|_| anyhow::anyhow!("cloud_container URL is not a local path: {}", value))
}
