//! Infrastructure configuration - fixed for the life of the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::settings::seconds;

/// Telemetry and logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Tracing filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Tick scheduler behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether chimes start enabled.
    /// Default: true
    #[serde(default = "SchedulerConfig::default_enabled")]
    pub enabled: bool,

    /// Seconds a tick may fire away from its target before it is skipped.
    /// Default: 20
    #[serde(default = "SchedulerConfig::default_drift_threshold")]
    pub drift_threshold: f64,

    /// Seconds to let the last note ring before the engine is silenced.
    /// Default: 2
    #[serde(default = "SchedulerConfig::default_decay")]
    pub decay: f64,

    /// Timers firing within this many milliseconds of their deadline are
    /// treated as on time.
    /// Default: 25
    #[serde(default = "SchedulerConfig::default_timer_leeway_ms")]
    pub timer_leeway_ms: u64,
}

impl SchedulerConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_drift_threshold() -> f64 {
        20.0
    }

    fn default_decay() -> f64 {
        2.0
    }

    fn default_timer_leeway_ms() -> u64 {
        25
    }

    pub fn drift_threshold(&self) -> Duration {
        seconds(self.drift_threshold)
    }

    pub fn decay(&self) -> Duration {
        seconds(self.decay)
    }

    pub fn timer_leeway(&self) -> Duration {
        Duration::from_millis(self.timer_leeway_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            drift_threshold: Self::default_drift_threshold(),
            decay: Self::default_decay(),
            timer_leeway_ms: Self::default_timer_leeway_ms(),
        }
    }
}

/// Which background media controller to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaBackend {
    /// Never fade anything.
    None,
    /// Any MPRIS player, through the `playerctl` command.
    Playerctl,
}

impl FromStr for MediaBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(MediaBackend::None),
            "playerctl" => Ok(MediaBackend::Playerctl),
            other => Err(format!("unknown media backend: {}", other)),
        }
    }
}

impl fmt::Display for MediaBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaBackend::None => write!(f, "none"),
            MediaBackend::Playerctl => write!(f, "playerctl"),
        }
    }
}

/// Background media controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Default: playerctl
    #[serde(default = "MediaConfig::default_backend")]
    pub backend: MediaBackend,

    /// MPRIS player name (passed as `playerctl --player`). Unset means
    /// whichever player playerctl picks.
    #[serde(default)]
    pub player: Option<String>,

    /// Number of volume steps in a fade.
    /// Default: 20
    #[serde(default = "MediaConfig::default_fade_steps")]
    pub fade_steps: u32,
}

impl MediaConfig {
    fn default_backend() -> MediaBackend {
        MediaBackend::Playerctl
    }

    fn default_fade_steps() -> u32 {
        20
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            backend: Self::default_backend(),
            player: None,
            fade_steps: Self::default_fade_steps(),
        }
    }
}

/// Which audio engine renders the notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// Dry run: notes are logged at their scheduled times.
    Log,
    /// MIDI output port (requires the `midi-out` feature).
    Midi,
}

impl FromStr for EngineBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(EngineBackend::Log),
            "midi" => Ok(EngineBackend::Midi),
            other => Err(format!("unknown engine backend: {}", other)),
        }
    }
}

impl fmt::Display for EngineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineBackend::Log => write!(f, "log"),
            EngineBackend::Midi => write!(f, "midi"),
        }
    }
}

/// Audio engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default: log
    #[serde(default = "EngineConfig::default_backend")]
    pub backend: EngineBackend,

    /// Substring of the MIDI output port name to connect to.
    /// Default: FLUID (FluidSynth's ALSA sequencer port)
    #[serde(default = "EngineConfig::default_midi_port")]
    pub midi_port: String,

    /// MIDI channel, 0-15.
    /// Default: 0
    #[serde(default)]
    pub channel: u8,
}

impl EngineConfig {
    fn default_backend() -> EngineBackend {
        EngineBackend::Log
    }

    fn default_midi_port() -> String {
        "FLUID".to_string()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Self::default_backend(),
            midi_port: Self::default_midi_port(),
            channel: 0,
        }
    }
}

/// Infrastructure sections of the config file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_parse_case_insensitively() {
        assert_eq!("Playerctl".parse::<MediaBackend>(), Ok(MediaBackend::Playerctl));
        assert_eq!("NONE".parse::<MediaBackend>(), Ok(MediaBackend::None));
        assert_eq!("midi".parse::<EngineBackend>(), Ok(EngineBackend::Midi));
        assert!("alsa".parse::<EngineBackend>().is_err());
    }

    #[test]
    fn scheduler_durations() {
        let config = SchedulerConfig::default();
        assert_eq!(config.drift_threshold(), Duration::from_secs(20));
        assert_eq!(config.decay(), Duration::from_secs(2));
        assert_eq!(config.timer_leeway(), Duration::from_millis(25));
    }
}
