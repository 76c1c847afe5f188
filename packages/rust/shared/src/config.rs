//! Application configuration for p2index.
//!
//! User config lives at `~/.p2index/p2index.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{P2IndexError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "p2index.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".p2index";

// ---------------------------------------------------------------------------
// Config structs (matching p2index.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Download and retry settings.
    #[serde(default)]
    pub fetch: FetchSection,

    /// Registered repositories.
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root under which each repository gets its own working directory.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Shared download cache directory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_work_dir() -> String {
    "~/.p2index/repos".into()
}
fn default_cache_dir() -> String {
    "~/.p2index/cache".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Additional attempts after the first failed download.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single retry delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Cached downloads younger than this are used without revalidation.
    #[serde(default = "default_max_stale_days")]
    pub max_stale_days: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum concurrent HTTP requests.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_stale_days: default_max_stale_days(),
            timeout_secs: default_timeout_secs(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_retries() -> u32 {
    2
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    10 * 60 * 1000
}
fn default_max_stale_days() -> u64 {
    100
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_connections() -> u32 {
    8
}

/// `[[repositories]]` entry: a named repository location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    /// Human-readable name, also used as the working directory name.
    pub name: String,
    /// Repository URL or path to a `.target` file.
    pub url: String,
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Additional attempts after the first.
    pub retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied to every retry delay.
    pub max_delay: Duration,
    /// Freshness horizon of the download cache.
    pub max_stale: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum concurrent HTTP requests.
    pub max_connections: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let fetch = &config.fetch;
        Self {
            retries: fetch.retries,
            initial_delay: Duration::from_millis(fetch.initial_delay_ms),
            max_delay: Duration::from_millis(fetch.max_delay_ms),
            max_stale: Duration::from_secs(fetch.max_stale_days * 24 * 60 * 60),
            timeout: Duration::from_secs(fetch.timeout_secs),
            max_connections: fetch.max_connections.max(1) as usize,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.p2index/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| P2IndexError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.p2index/p2index.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| P2IndexError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| P2IndexError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| P2IndexError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| P2IndexError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| P2IndexError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| P2IndexError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None if path == "~" => {
            dirs::home_dir().ok_or_else(|| P2IndexError::config("could not determine home directory"))
        }
        None => Ok(PathBuf::from(path)),
    }
}
