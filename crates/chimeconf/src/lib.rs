//! Minimal configuration loading for Chimes.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): logging, scheduler tolerances, and
//!   which media/audio backends to drive. Fixed once the daemon starts.
//!
//! - **Chime settings** (`ChimeSettings`): note timings, volume, fades and
//!   instrument. These seed a live handle that the user may edit at any time.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/chimes/config.toml` (system)
//! 2. `~/.config/chimes/config.toml` (user)
//! 3. `./chimes.toml` (local override, or the path given with `--config`)
//! 4. Environment variables (`CHIMES_*`)
//!
//! # Example Config
//!
//! ```toml
//! [telemetry]
//! log_level = "info"
//!
//! [scheduler]
//! enabled = true
//! drift_threshold = 20.0
//!
//! [media]
//! backend = "playerctl"
//! player = "spotify"
//!
//! [engine]
//! backend = "midi"
//! midi_port = "FLUID"
//!
//! [chime]
//! note_interval = 0.75
//! volume = 0.8
//! instrument_name = "Tubular Bells"
//! ```

pub mod infra;
pub mod loader;
pub mod settings;

pub use infra::{
    EngineBackend, EngineConfig, InfraConfig, MediaBackend, MediaConfig, SchedulerConfig,
    TelemetryConfig,
};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use settings::{ChimeSettings, KNOBS, MAX_SECONDS};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Complete Chimes configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChimesConfig {
    /// Infrastructure - fixed at startup.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Chime settings - seeds the live settings handle.
    #[serde(default)]
    pub chime: ChimeSettings,
}

impl ChimesConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/chimes/config.toml`
    /// 3. `~/.config/chimes/config.toml`
    /// 4. `./chimes.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./chimes.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = Self::load_files(&files)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        Ok((config, sources))
    }

    /// Load and merge exactly these files, without environment overrides.
    pub fn load_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_from_file(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let config = loader::from_table(merged, &origin)?;
        config.chime.validate()?;
        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();
        output.push_str("# Chimes Configuration\n\n");
        push_section(&mut output, "telemetry", &self.infra.telemetry);
        push_section(&mut output, "scheduler", &self.infra.scheduler);
        push_section(&mut output, "media", &self.infra.media);
        push_section(&mut output, "engine", &self.infra.engine);
        push_section(&mut output, "chime", &self.chime);
        output
    }
}

fn push_section<T: Serialize>(output: &mut String, name: &str, section: &T) {
    output.push_str(&format!("[{}]\n", name));
    match toml::to_string(section) {
        Ok(body) => output.push_str(&body),
        Err(e) => output.push_str(&format!("# failed to render: {}\n", e)),
    }
    output.push('\n');
}
