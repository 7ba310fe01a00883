//! Application configuration for articlepipe.
//!
//! User config lives at `~/.articlepipe/articlepipe.toml`.
//! CLI flags override environment values, which override config file values,
//! which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ArticlePipeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "articlepipe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".articlepipe";

/// Browser-like User-Agent sent with every fetch.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

// ---------------------------------------------------------------------------
// Config structs (matching articlepipe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fetch defaults.
    #[serde(default)]
    pub fetch: FetchSettings,

    /// Record truncation limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Article store settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Maximum number of fetches in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Politeness delay before every fetch, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Per-fetch timeout in seconds (connect + full body read).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Response bodies larger than this are truncated before extraction.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            delay_ms: default_delay_ms(),
            timeout_secs: default_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_concurrency() -> usize {
    3
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_body_bytes() -> usize {
    1_000_000
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

/// `[limits]` section: caps applied when an outcome becomes a stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_title_chars")]
    pub title_chars: usize,

    #[serde(default = "default_content_chars")]
    pub content_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            title_chars: default_title_chars(),
            content_chars: default_content_chars(),
        }
    }
}

fn default_title_chars() -> usize {
    200
}
fn default_content_chars() -> usize {
    2000
}

/// How the store resolves two writes for the same URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The latest write overwrites title, content, and fetched_at.
    #[default]
    LastWriteWins,
    /// An overwrite is skipped when its fetched_at is older than the stored one.
    NewerFetchWins,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path; a leading `~/` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Conflict policy for upserts on the same URL.
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            on_conflict: ConflictPolicy::default(),
        }
    }
}

fn default_db_path() -> String {
    "~/.articlepipe/articles.db".into()
}

impl StorageConfig {
    /// Resolve the configured path, expanding a leading `~/`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ArticlePipeError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration: merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Gate capacity: maximum concurrent fetches.
    pub concurrency: usize,
    /// Politeness delay applied before every fetch, including the first.
    pub polite_delay: Duration,
    /// Per-fetch timeout.
    pub timeout: Duration,
    /// Body read cap in bytes.
    pub max_body_bytes: usize,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&FetchSettings::default())
    }
}

impl From<&FetchSettings> for FetchConfig {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            concurrency: settings.concurrency,
            polite_delay: Duration::from_millis(settings.delay_ms),
            timeout: Duration::from_secs(settings.timeout_secs),
            max_body_bytes: settings.max_body_bytes,
            user_agent: settings.user_agent.clone(),
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self::from(&config.fetch)
    }
}

impl FetchConfig {
    /// Reject values that would make a batch meaningless. Called before any
    /// fetching starts.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ArticlePipeError::config("concurrency must be at least 1"));
        }
        if self.max_body_bytes == 0 {
            return Err(ArticlePipeError::config("max_body_bytes must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(ArticlePipeError::config("timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.articlepipe/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ArticlePipeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.articlepipe/articlepipe.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ArticlePipeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ArticlePipeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ArticlePipeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ArticlePipeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ArticlePipeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
