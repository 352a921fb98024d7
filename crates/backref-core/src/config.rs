//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/backref/config.toml)
//! 3. Environment variables (BACKREF_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::RefPolicy;

/// Environment variable prefix
const ENV_PREFIX: &str = "BACKREF";

/// Name of the index file placed in the corpus root by default
pub const DEFAULT_DB_NAME: &str = ".backref.db";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the note corpus
    #[serde(default = "default_corpus_root")]
    pub corpus_root: PathBuf,

    /// Index file location (defaults to `<corpus_root>/.backref.db`)
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// File extensions that make a file a corpus member
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Regex over root-relative paths; matching files are not indexed
    #[serde(default)]
    pub exclude: Option<String>,

    /// What to do when two documents declare the same ref
    #[serde(default)]
    pub ref_policy: RefPolicy,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus_root: default_corpus_root(),
            db_path: None,
            extensions: default_extensions(),
            exclude: None,
            ref_policy: RefPolicy::default(),
            log_file: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (BACKREF_CORPUS_ROOT, BACKREF_DB_PATH, BACKREF_LOG)
    /// 2. Config file (~/.config/backref/config.toml or BACKREF_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit `--config` path
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load only what the file at `path` says, without environment overrides
    ///
    /// Used before saving, so overrides never get written back.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // BACKREF_CORPUS_ROOT
        if let Ok(val) = std::env::var(format!("{}_CORPUS_ROOT", ENV_PREFIX)) {
            self.corpus_root = PathBuf::from(val);
        }

        // BACKREF_DB_PATH
        if let Ok(val) = std::env::var(format!("{}_DB_PATH", ENV_PREFIX)) {
            self.db_path = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        // BACKREF_LOG
        if let Ok(val) = std::env::var(format!("{}_LOG", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }
    }

    /// Save configuration to a file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with BACKREF_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("backref")
            .join("config.toml")
    }

    /// Get the path to the index database
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.corpus_root.join(DEFAULT_DB_NAME))
    }
}

/// Get the default corpus root
fn default_corpus_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("notes")
}

fn default_extensions() -> Vec<String> {
    vec!["org".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}
