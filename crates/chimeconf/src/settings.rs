//! Chime settings - the knobs a user may change while the daemon runs.
//!
//! These values seed the live settings handle at startup. After that the
//! runtime owns them: the control surface edits them one key at a time via
//! [`ChimeSettings::set`], and readers take a fresh snapshot whenever they
//! compute lead time or expand a chime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Names accepted by [`ChimeSettings::set`], in display order.
pub const KNOBS: &[&str] = &[
    "note_length",
    "note_interval",
    "phrase_interval",
    "pre_strike_delay",
    "strike_length",
    "strike_interval",
    "volume",
    "timing_adjustment",
    "fade_media",
    "media_fade_duration",
    "media_fade_slack",
    "instrument_program",
    "instrument_name",
];

/// Upper bound for every seconds knob. Longer gaps and fades are never
/// musical, and the bound keeps chime arithmetic far from `Duration` limits.
pub const MAX_SECONDS: f64 = 60.0;

/// Timing, volume and instrument knobs.
///
/// Durations are stored as seconds so they round-trip through TOML the way
/// users write them (`note_interval = 0.75`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeSettings {
    /// How long each phrase note sounds.
    pub note_length: f64,
    /// Gap between the starts of consecutive notes within a phrase.
    pub note_interval: f64,
    /// Gap between the last note of a phrase and the first of the next.
    pub phrase_interval: f64,
    /// Gap between the last phrase note and the first hour strike.
    pub pre_strike_delay: f64,
    /// How long each hour strike sounds.
    pub strike_length: f64,
    /// Gap between the starts of consecutive hour strikes.
    pub strike_interval: f64,
    /// Output level, 0.0 to 1.0.
    pub volume: f64,
    /// Extra lead time to absorb engine start latency.
    pub timing_adjustment: f64,
    /// Fade background media out and back in around a chime.
    pub fade_media: bool,
    pub media_fade_duration: f64,
    /// Subtracted from the per-step fade sleeps to absorb command overhead.
    pub media_fade_slack: f64,
    /// General MIDI program number (0-based).
    pub instrument_program: u8,
    pub instrument_name: String,
}

impl Default for ChimeSettings {
    fn default() -> Self {
        Self {
            note_length: 1.0,
            note_interval: 0.75,
            phrase_interval: 1.6,
            pre_strike_delay: 2.1,
            strike_length: 1.0,
            strike_interval: 2.5,
            volume: 1.0,
            timing_adjustment: 0.0,
            fade_media: true,
            media_fade_duration: 1.0,
            media_fade_slack: 0.1,
            instrument_program: 14,
            instrument_name: "Tubular Bells".to_string(),
        }
    }
}

impl ChimeSettings {
    pub fn note_length(&self) -> Duration {
        seconds(self.note_length)
    }

    pub fn note_interval(&self) -> Duration {
        seconds(self.note_interval)
    }

    pub fn phrase_interval(&self) -> Duration {
        seconds(self.phrase_interval)
    }

    pub fn pre_strike_delay(&self) -> Duration {
        seconds(self.pre_strike_delay)
    }

    pub fn strike_length(&self) -> Duration {
        seconds(self.strike_length)
    }

    pub fn strike_interval(&self) -> Duration {
        seconds(self.strike_interval)
    }

    pub fn timing_adjustment(&self) -> Duration {
        seconds(self.timing_adjustment)
    }

    pub fn media_fade_duration(&self) -> Duration {
        seconds(self.media_fade_duration)
    }

    pub fn media_fade_slack(&self) -> Duration {
        seconds(self.media_fade_slack)
    }

    /// Volume scaled to MIDI velocity (0-127).
    pub fn velocity(&self) -> u8 {
        (self.volume.clamp(0.0, 1.0) * 127.0).round() as u8
    }

    fn seconds_knobs(&self) -> [(&'static str, f64); 9] {
        [
            ("note_length", self.note_length),
            ("note_interval", self.note_interval),
            ("phrase_interval", self.phrase_interval),
            ("pre_strike_delay", self.pre_strike_delay),
            ("strike_length", self.strike_length),
            ("strike_interval", self.strike_interval),
            ("timing_adjustment", self.timing_adjustment),
            ("media_fade_duration", self.media_fade_duration),
            ("media_fade_slack", self.media_fade_slack),
        ]
    }

    /// Check values that arrived without going through [`set`](Self::set),
    /// i.e. from config files. Negative seconds are tolerated and clamp to
    /// zero; non-finite or over-long ones are rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in self.seconds_knobs() {
            if !value.is_finite() || value > MAX_SECONDS {
                return Err(invalid(key, &value.to_string()));
            }
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(invalid("volume", &self.volume.to_string()));
        }
        Ok(())
    }

    /// Update one knob from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "note_length" => self.note_length = parse_seconds(key, value)?,
            "note_interval" => self.note_interval = parse_seconds(key, value)?,
            "phrase_interval" => self.phrase_interval = parse_seconds(key, value)?,
            "pre_strike_delay" => self.pre_strike_delay = parse_seconds(key, value)?,
            "strike_length" => self.strike_length = parse_seconds(key, value)?,
            "strike_interval" => self.strike_interval = parse_seconds(key, value)?,
            "timing_adjustment" => self.timing_adjustment = parse_seconds(key, value)?,
            "media_fade_duration" => self.media_fade_duration = parse_seconds(key, value)?,
            "media_fade_slack" => self.media_fade_slack = parse_seconds(key, value)?,
            "volume" => {
                let volume: f64 = value.parse().map_err(|_| invalid(key, value))?;
                if !(0.0..=1.0).contains(&volume) {
                    return Err(invalid(key, value));
                }
                self.volume = volume;
            }
            "fade_media" => self.fade_media = parse_bool(key, value)?,
            "instrument_program" => {
                let program: u8 = value.parse().map_err(|_| invalid(key, value))?;
                if program > 127 {
                    return Err(invalid(key, value));
                }
                self.instrument_program = program;
            }
            "instrument_name" => {
                if value.is_empty() {
                    return Err(invalid(key, value));
                }
                self.instrument_name = value.to_string();
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

/// Convert a seconds knob to a `Duration`, clamping negatives and NaN to zero
/// and anything longer to [`MAX_SECONDS`].
pub fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0).min(MAX_SECONDS)).unwrap_or_default()
}

fn parse_seconds(key: &str, value: &str) -> Result<f64, ConfigError> {
    let parsed: f64 = value.parse().map_err(|_| invalid(key, value))?;
    if !parsed.is_finite() || !(0.0..=MAX_SECONDS).contains(&parsed) {
        return Err(invalid(key, value));
    }
    Ok(parsed)
}

pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
