//! Configuration for the project coordinator.
//!
//! Layered settings: defaults, then a TOML file, then environment
//! variable overrides.
//!
//! # Environment Variables
//!
//! Variables are prefixed with `WORKROOT_` and use double underscores for
//! nesting:
//! - `WORKROOT_CLOSE_DELETED_FILE_TABS=true` sets `close_deleted_file_tabs`
//! - `WORKROOT_WATCHER__DEBOUNCE_MS=200` sets `watcher.debounce_ms`
//! - `WORKROOT_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::buffer::ConfigRead;
use crate::watcher::WatchOptions;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Close a buffer when its backing file is deleted on disk
    #[serde(default = "default_false")]
    pub close_deleted_file_tabs: bool,

    /// Root watcher tuning
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Milliseconds a modified file must stay quiet before delivery
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Watch each root recursively
    #[serde(default = "default_true")]
    pub recursive: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level filter
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
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
fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            close_deleted_file_tabs: false,
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            recursive: true,
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

impl Settings {
    /// Load settings from `workroot.toml` in the working directory, with
    /// env overrides applied on top.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Path::new("workroot.toml"))
    }

    /// Load settings from a specific TOML file.
    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("WORKROOT_").split("__"))
            .extract()
    }

    /// Write the settings as TOML, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, rendered)
    }

    /// Watch options derived from the watcher section.
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            recursive: self.watcher.recursive,
            debounce_ms: self.watcher.debounce_ms,
        }
    }
}

impl ConfigRead for Settings {
    fn close_deleted_file_tabs(&self) -> bool {
        self.close_deleted_file_tabs
    }
}
