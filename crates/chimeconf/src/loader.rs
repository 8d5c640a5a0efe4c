//! Config file discovery, loading, and environment variable overlay.

use crate::{ChimesConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/chimes/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("chimes/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("chimes.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

pub(crate) fn parse_toml(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Turn a merged table into a typed config. Missing keys take defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<ChimesConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base` key by key; nested tables merge recursively,
/// everything else is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(overlay_table) = value {
            if let Some(toml::Value::Table(base_table)) = base.get_mut(&key) {
                merge_tables(base_table, overlay_table);
                continue;
            }
            base.insert(key, toml::Value::Table(overlay_table));
        } else {
            base.insert(key, value);
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ChimesConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply overrides from an explicit list of variables.
///
/// Values that fail to parse are ignored and the file value stands.
pub fn apply_overrides_from<I>(config: &mut ChimesConfig, sources: &mut ConfigSources, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut vars: Vec<(String, String)> = vars.into_iter().collect();
    // RUST_LOG loses to CHIMES_LOG_LEVEL regardless of iteration order
    vars.sort_by_key(|(key, _)| key != "RUST_LOG");

    for (key, value) in vars {
        let applied = match key.as_str() {
            "RUST_LOG" | "CHIMES_LOG_LEVEL" => {
                config.infra.telemetry.log_level = value;
                true
            }
            "CHIMES_ENABLED" => match crate::settings::parse_bool(&key, &value) {
                Ok(enabled) => {
                    config.infra.scheduler.enabled = enabled;
                    true
                }
                Err(_) => false,
            },
            "CHIMES_MEDIA_BACKEND" => match value.parse() {
                Ok(backend) => {
                    config.infra.media.backend = backend;
                    true
                }
                Err(_) => false,
            },
            "CHIMES_MEDIA_PLAYER" => {
                config.infra.media.player = Some(value);
                true
            }
            "CHIMES_ENGINE_BACKEND" => match value.parse() {
                Ok(backend) => {
                    config.infra.engine.backend = backend;
                    true
                }
                Err(_) => false,
            },
            "CHIMES_MIDI_PORT" => {
                config.infra.engine.midi_port = value;
                true
            }
            "CHIMES_VOLUME" => config.chime.set("volume", &value).is_ok(),
            "CHIMES_INSTRUMENT" => config.chime.set("instrument_name", &value).is_ok(),
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }
}
