//! Configuration module for markwatch.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `MW_` and use double underscores
//! to separate nested levels:
//! - `MW_WATCH__DEBOUNCE_MS=250` sets `watch.debounce_ms`
//! - `MW_GENERATION__TIMEOUT_SECS=120` sets `generation.timeout_secs`
//! - `MW_LOGGING__DEFAULT=info` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::marker::MarkerSet;

/// Directory holding the settings file, searched upward from the cwd.
pub const CONFIG_DIR: &str = ".markwatch";
/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";

/// Longest accepted debounce interval (one day).
pub const MAX_DEBOUNCE_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory to watch (defaults to the current directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Watch pipeline settings
    #[serde(default)]
    pub watch: WatchSettings,

    /// Generation backend settings
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Log filter settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Raw, unvalidated watch settings as they appear in TOML/env/CLI.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchSettings {
    /// Directory names pruned from the walk and dropped from events
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,

    /// Glob matched against the file name (e.g. `*.rs`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,

    /// Quiet period in milliseconds; signed so negative input can be rejected
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: i64,

    /// One of `quiet`, `normal`, `verbose`
    #[serde(default = "default_verbosity")]
    pub verbosity: String,

    /// Use the lighter generation backend
    #[serde(default = "default_false")]
    pub use_weak_model: bool,

    /// Marker token that follows a comment prefix
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Line comment tokens a marker may follow
    #[serde(default = "default_comment_prefixes")]
    pub comment_prefixes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationSettings {
    /// Agent command; the instruction is written to its stdin
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Command used with `--use-weak-model` (falls back to `command`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weak_command: Option<Vec<String>>,

    /// Parse stdout as a JSON result envelope with usage data
    #[serde(default = "default_false")]
    pub json_output: bool,

    /// Upper bound for a single generation call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default filter level (`error`, `warn`, `info`, `debug`, `trace`)
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `markwatch::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_false() -> bool {
    false
}
fn default_ignore_dirs() -> Vec<String> {
    vec![".git".to_string(), "node_modules".to_string()]
}
fn default_debounce_ms() -> i64 {
    500
}
fn default_verbosity() -> String {
    "normal".to_string()
}
fn default_marker() -> String {
    "@markwatch".to_string()
}
fn default_comment_prefixes() -> Vec<String> {
    vec!["#".to_string(), "//".to_string()]
}
fn default_command() -> Vec<String> {
    vec!["claude".to_string(), "-p".to_string()]
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            watch: WatchSettings::default(),
            generation: GenerationSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            ignore_dirs: default_ignore_dirs(),
            include: None,
            debounce_ms: default_debounce_ms(),
            verbosity: default_verbosity(),
            use_weak_model: false,
            marker: default_marker(),
            comment_prefixes: default_comment_prefixes(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            weak_command: None,
            json_output: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

/// Errors found while validating settings. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid verbosity '{value}': expected one of quiet, normal, verbose")]
    InvalidVerbosity { value: String },

    #[error("invalid debounce time {value}ms: must be a non-negative number of milliseconds")]
    NegativeDebounce { value: i64 },

    #[error("invalid debounce time {value}ms: must not exceed {max}ms", max = MAX_DEBOUNCE_MS)]
    DebounceTooLarge { value: i64 },

    #[error("marker token must not be empty")]
    EmptyMarker,

    #[error("at least one comment prefix is required for the marker")]
    NoCommentPrefixes,

    #[error("generation command must not be empty")]
    EmptyCommand,

    #[error("failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// How much the watcher reports to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl FromStr for Verbosity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quiet" => Ok(Verbosity::Quiet),
            "normal" => Ok(Verbosity::Normal),
            "verbose" => Ok(Verbosity::Verbose),
            _ => Err(ConfigError::InvalidVerbosity {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
        };
        f.write_str(name)
    }
}

/// Validated, immutable configuration for one watch session.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub ignore_dirs: BTreeSet<String>,
    pub include_pattern: Option<String>,
    pub debounce: Duration,
    pub verbosity: Verbosity,
    pub use_weak_model: bool,
    pub markers: MarkerSet,
}

impl WatchSettings {
    /// Check the raw settings and freeze them into a [`WatchConfig`].
    pub fn validate(&self) -> Result<WatchConfig, ConfigError> {
        let verbosity = self.verbosity.parse::<Verbosity>()?;

        if self.debounce_ms < 0 {
            return Err(ConfigError::NegativeDebounce {
                value: self.debounce_ms,
            });
        }
        if self.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::DebounceTooLarge {
                value: self.debounce_ms,
            });
        }

        let marker = self.marker.trim();
        if marker.is_empty() {
            return Err(ConfigError::EmptyMarker);
        }

        let prefixes: Vec<&str> = self
            .comment_prefixes
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        if prefixes.is_empty() {
            return Err(ConfigError::NoCommentPrefixes);
        }

        let ignore_dirs = self
            .ignore_dirs
            .iter()
            .map(|d| d.trim().trim_end_matches(['/', '\\']).to_string())
            .filter(|d| !d.is_empty())
            .collect();

        let include_pattern = self
            .include
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(WatchConfig {
            ignore_dirs,
            include_pattern,
            debounce: Duration::from_millis(self.debounce_ms as u64),
            verbosity,
            use_weak_model: self.use_weak_model,
            markers: MarkerSet::new(marker, &prefixes),
        })
    }
}

impl GenerationSettings {
    /// Command line for the requested backend weight.
    pub fn command_for(&self, use_weak_model: bool) -> Result<&[String], ConfigError> {
        let command = match (&self.weak_command, use_weak_model) {
            (Some(weak), true) if !weak.is_empty() => weak.as_slice(),
            _ => self.command.as_slice(),
        };
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        Ok(command)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// An explicit `config_path` replaces the upward search for
    /// `.markwatch/settings.toml`.
    pub fn load(config_path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::find_workspace_config()
                .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE)),
        };

        Self::load_from(path).map(|mut settings| {
            if settings.workspace_root.is_none() {
                settings.workspace_root = Self::workspace_root();
            }
            settings
        })
    }

    /// Load configuration from a specific file, then the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels; single underscores stay.
            .merge(Env::prefixed("MW_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.markwatch/settings.toml` from the current directory upward.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// The directory containing `.markwatch`, if any.
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
