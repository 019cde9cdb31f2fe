//! Optional config file loading and saving. Search order: ./mmdownloader.toml, then
//! $XDG_CONFIG_HOME/mmdownloader/config.toml (or ~/.config/mmdownloader/config.toml).

use crate::download::MAX_LEVEL;
use crate::retry::{DEFAULT_BACKOFF_MS, DEFAULT_RETRY_COUNT};
use crate::scraper::{SiteSelectors, DEFAULT_DELAY_MS, DEFAULT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "mmdownloader.toml";
const DEFAULT_PATH: &str = "./downloads";
const DEFAULT_MULTI: u8 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Config file contents. All fields optional; only present keys override defaults.
/// The upper-case aliases accept files written with the legacy key names.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Download root. Paths are relative to CWD.
    #[serde(alias = "PATH", skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Stack each episode's images into merged.png.
    #[serde(alias = "MERGE", skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,
    /// Verbose per-image logging with byte sizes and memory use.
    #[serde(alias = "DEBUG", skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    /// Concurrency level 0-4.
    #[serde(alias = "MULTI", skip_serializing_if = "Option::is_none")]
    pub multi: Option<u8>,
    /// Zip each episode folder.
    #[serde(alias = "ZIP", skip_serializing_if = "Option::is_none")]
    pub zip: Option<bool>,
    /// Keep the loose episode folder after zipping (default: true).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_files: Option<bool>,
    /// HTTP User-Agent header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Delay in milliseconds between page requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Delay in milliseconds before each retry. Length should be retry_count - 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<Vec<u64>>,
    /// Site layout. Missing keys inside the table take their defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selectors: Option<SiteSelectors>,
}

impl Config {
    /// Values from `self`, falling back to `base` key by key.
    pub fn or(self, base: Config) -> Config {
        Config {
            path: self.path.or(base.path),
            merge: self.merge.or(base.merge),
            debug: self.debug.or(base.debug),
            multi: self.multi.or(base.multi),
            zip: self.zip.or(base.zip),
            keep_files: self.keep_files.or(base.keep_files),
            user_agent: self.user_agent.or(base.user_agent),
            request_delay_ms: self.request_delay_ms.or(base.request_delay_ms),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
            retry_count: self.retry_count.or(base.retry_count),
            retry_backoff_ms: self.retry_backoff_ms.or(base.retry_backoff_ms),
            selectors: self.selectors.or(base.selectors),
        }
    }
}

/// Effective settings for a run: defaults applied and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub path: PathBuf,
    pub merge: bool,
    pub debug: bool,
    pub multi: u8,
    pub zip: bool,
    pub keep_files: bool,
    pub user_agent: Option<String>,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub retry_backoff_ms: Vec<u64>,
    pub selectors: SiteSelectors,
}

impl Settings {
    /// Layer `overrides` (CLI flags) over `file`, apply defaults, and validate.
    pub fn resolve(file: Config, overrides: Config) -> Result<Settings, ConfigError> {
        let c = overrides.or(file);
        let settings = Settings {
            path: c.path.unwrap_or_else(|| PathBuf::from(DEFAULT_PATH)),
            merge: c.merge.unwrap_or(false),
            debug: c.debug.unwrap_or(false),
            multi: c.multi.unwrap_or(DEFAULT_MULTI),
            zip: c.zip.unwrap_or(false),
            keep_files: c.keep_files.unwrap_or(true),
            user_agent: c.user_agent,
            request_delay_ms: c.request_delay_ms.unwrap_or(DEFAULT_DELAY_MS),
            timeout_secs: c.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            retry_count: c.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
            retry_backoff_ms: c
                .retry_backoff_ms
                .unwrap_or_else(|| DEFAULT_BACKOFF_MS.to_vec()),
            selectors: c.selectors.unwrap_or_default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.multi > MAX_LEVEL {
            return Err(ConfigError::Invalid(format!(
                "multi must be between 0 and {}, got {}",
                MAX_LEVEL, self.multi
            )));
        }
        if self.retry_count == 0 {
            return Err(ConfigError::Invalid(
                "retry_count must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("path must not be empty".to_string()));
        }
        self.selectors.compile().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Every setting spelled out, for writing back to disk.
    pub fn to_config(&self) -> Config {
        Config {
            path: Some(self.path.clone()),
            merge: Some(self.merge),
            debug: Some(self.debug),
            multi: Some(self.multi),
            zip: Some(self.zip),
            keep_files: Some(self.keep_files),
            user_agent: self.user_agent.clone(),
            request_delay_ms: Some(self.request_delay_ms),
            timeout_secs: Some(self.timeout_secs),
            retry_count: Some(self.retry_count),
            retry_backoff_ms: Some(self.retry_backoff_ms.clone()),
            selectors: Some(self.selectors.clone()),
        }
    }
}

/// (1) ./mmdownloader.toml, (2) $XDG_CONFIG_HOME/mmdownloader/config.toml.
pub fn config_search_paths() -> Result<Vec<PathBuf>, ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    let mut paths = vec![cwd.join(CONFIG_FILE_NAME)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("mmdownloader").join("config.toml"));
    }
    Ok(paths)
}

/// First existing file among `paths`, parsed. Missing files return Ok(None).
/// Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config_from(paths: &[PathBuf]) -> Result<Option<(PathBuf, Config)>, ConfigError> {
    for path in paths {
        if path.exists() {
            let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let config: Config = toml::from_str(&s).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "loaded config");
            return Ok(Some((path.clone(), config)));
        }
    }
    Ok(None)
}

/// Search the default locations. Returns the file's path along with its contents.
pub fn load_config() -> Result<Option<(PathBuf, Config)>, ConfigError> {
    load_config_from(&config_search_paths()?)
}

/// Write `config` as TOML to `path`, creating parent directories.
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let body = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    std::fs::write(path, body).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
