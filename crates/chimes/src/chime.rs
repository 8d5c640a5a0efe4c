//! Westminster quarters: chime kinds, note phrases, and note expansion
//!
//! A chime is one or more of five fixed four-note phrases, followed for the
//! full hour by one low strike per hour. Expansion turns a chime into timed
//! note events relative to the first note; lead time says how far ahead of a
//! quarter-hour boundary playback must begin so the chime lands on it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chimeconf::ChimeSettings;
use thiserror::Error;

/// MIDI note number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pitch(pub u8);

impl Pitch {
    pub const E3: Pitch = Pitch(52);
    pub const B3: Pitch = Pitch(59);
    pub const E4: Pitch = Pitch(64);
    pub const F_SHARP4: Pitch = Pitch(66);
    pub const G_SHARP4: Pitch = Pitch(68);
}

pub type Phrase = [Pitch; 4];

// E-major Westminster changes
pub const P1: Phrase = [Pitch::G_SHARP4, Pitch::F_SHARP4, Pitch::E4, Pitch::B3];
pub const P2: Phrase = [Pitch::E4, Pitch::G_SHARP4, Pitch::F_SHARP4, Pitch::B3];
pub const P3: Phrase = [Pitch::E4, Pitch::F_SHARP4, Pitch::G_SHARP4, Pitch::E4];
pub const P4: Phrase = [Pitch::G_SHARP4, Pitch::E4, Pitch::F_SHARP4, Pitch::B3];
pub const P5: Phrase = [Pitch::B3, Pitch::F_SHARP4, Pitch::G_SHARP4, Pitch::E4];

/// The hour bell
pub const STRIKE: Pitch = Pitch::E3;

/// Longest prelude any chime plays: four phrases of four notes.
const MAX_PRELUDE_NOTE_GAPS: u32 = 12;
const MAX_PRELUDE_PHRASE_GAPS: u32 = 3;

/// Hour on a 12-hour dial, always 1..=12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hour(u8);

impl Hour {
    pub fn new(hour: u8) -> Option<Self> {
        (1..=12).contains(&hour).then_some(Hour(hour))
    }

    /// Map a 24-hour clock hour onto the dial (0 and 12 strike twelve).
    pub fn from_24h(hour: u32) -> Self {
        match hour % 12 {
            0 => Hour(12),
            h => Hour(h as u8),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chime {
    FirstQuarter,
    HalfHour,
    ThirdQuarter,
    FullHour(Hour),
}

impl Chime {
    pub fn family(&self) -> ChimeFamily {
        match self {
            Chime::FirstQuarter => ChimeFamily::FirstQuarter,
            Chime::HalfHour => ChimeFamily::HalfHour,
            Chime::ThirdQuarter => ChimeFamily::ThirdQuarter,
            Chime::FullHour(_) => ChimeFamily::FullHour,
        }
    }

    pub fn phrases(&self) -> &'static [Phrase] {
        match self {
            Chime::FirstQuarter => &[P1],
            Chime::HalfHour => &[P2, P3],
            Chime::ThirdQuarter => &[P4, P5, P1],
            Chime::FullHour(_) => &[P2, P3, P4, P5],
        }
    }

    /// Number of hour strikes after the prelude.
    pub fn strikes(&self) -> u8 {
        match self {
            Chime::FullHour(hour) => hour.get(),
            _ => 0,
        }
    }
}

impl fmt::Display for Chime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chime::FullHour(hour) => write!(f, "full hour ({})", hour.get()),
            other => write!(f, "{}", other.family().as_str().to_lowercase()),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ChimeError {
    #[error("hour must be between 1 and 12, got {0}")]
    InvalidHour(String),

    #[error("unknown chime: {0:?} (expected first-quarter, half-hour, third-quarter or hour <1-12>)")]
    UnknownChime(String),
}

impl FromStr for Chime {
    type Err = ChimeError;

    /// Accepts `first-quarter`, `half-hour`, `third-quarter`, and `hour 3`,
    /// `hour:3` or `hour-3` for a full hour.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let hour_arg = normalized
            .strip_prefix("hour")
            .map(|rest| rest.trim_start_matches([' ', ':', '-']).trim());

        if let Some(arg) = hour_arg {
            let hour = arg
                .parse::<u8>()
                .ok()
                .and_then(Hour::new)
                .ok_or_else(|| ChimeError::InvalidHour(arg.to_string()))?;
            return Ok(Chime::FullHour(hour));
        }

        match normalized.parse::<ChimeFamily>() {
            Ok(ChimeFamily::FirstQuarter) => Ok(Chime::FirstQuarter),
            Ok(ChimeFamily::HalfHour) => Ok(Chime::HalfHour),
            Ok(ChimeFamily::ThirdQuarter) => Ok(Chime::ThirdQuarter),
            _ => Err(ChimeError::UnknownChime(s.trim().to_string())),
        }
    }
}

/// Chime kind without the hour, used by the focus gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChimeFamily {
    FirstQuarter,
    HalfHour,
    ThirdQuarter,
    FullHour,
}

impl ChimeFamily {
    pub const ALL: [ChimeFamily; 4] = [
        ChimeFamily::FirstQuarter,
        ChimeFamily::HalfHour,
        ChimeFamily::ThirdQuarter,
        ChimeFamily::FullHour,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChimeFamily::FirstQuarter => "First Quarter",
            ChimeFamily::HalfHour => "Half Hour",
            ChimeFamily::ThirdQuarter => "Third Quarter",
            ChimeFamily::FullHour => "Full Hour",
        }
    }
}

impl fmt::Display for ChimeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChimeFamily {
    type Err = ChimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '_'], "-").as_str() {
            "first-quarter" | "first" | "q1" => Ok(ChimeFamily::FirstQuarter),
            "half-hour" | "half" | "q2" => Ok(ChimeFamily::HalfHour),
            "third-quarter" | "third" | "q3" => Ok(ChimeFamily::ThirdQuarter),
            "full-hour" | "hour" => Ok(ChimeFamily::FullHour),
            _ => Err(ChimeError::UnknownChime(s.trim().to_string())),
        }
    }
}

/// One note handed to the audio engine, timed from the start of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub pitch: Pitch,
    pub start: Duration,
    pub duration: Duration,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn end(&self) -> Duration {
        self.start.saturating_add(self.duration)
    }
}

/// Expand a chime into note events using the current settings.
///
/// Notes within a phrase are `note_interval` apart, phrases are
/// `phrase_interval` apart, and the first strike comes `pre_strike_delay`
/// after the last prelude note.
pub fn expand(chime: Chime, settings: &ChimeSettings) -> Vec<NoteEvent> {
    let velocity = settings.velocity();
    let phrases = chime.phrases();
    let mut events = Vec::with_capacity(phrases.len() * 4 + chime.strikes() as usize);
    let mut t = Duration::ZERO;

    for (i, phrase) in phrases.iter().enumerate() {
        if i > 0 {
            t = t.saturating_add(settings.phrase_interval());
        }
        for (j, &pitch) in phrase.iter().enumerate() {
            if j > 0 {
                t = t.saturating_add(settings.note_interval());
            }
            events.push(NoteEvent {
                pitch,
                start: t,
                duration: settings.note_length(),
                velocity,
            });
        }
    }

    if chime.strikes() > 0 {
        t = t.saturating_add(settings.pre_strike_delay());
        for k in 0..chime.strikes() {
            if k > 0 {
                t = t.saturating_add(settings.strike_interval());
            }
            events.push(NoteEvent {
                pitch: STRIKE,
                start: t,
                duration: settings.strike_length(),
                velocity,
            });
        }
    }

    events
}

/// How long before its quarter-hour boundary a chime must start.
///
/// Covers the media fade and engine latency. For the full hour it also
/// covers the whole prelude so the first strike lands on the boundary. The
/// prelude term is the four-phrase worst case for every hour, so the hour
/// being struck never changes when the timer is armed.
pub fn lead_time(chime: Chime, settings: &ChimeSettings) -> Duration {
    let base = settings
        .timing_adjustment()
        .saturating_add(settings.media_fade_duration());
    match chime {
        Chime::FirstQuarter | Chime::HalfHour | Chime::ThirdQuarter => base,
        Chime::FullHour(_) => base
            .saturating_add(settings.note_interval().saturating_mul(MAX_PRELUDE_NOTE_GAPS))
            .saturating_add(settings.phrase_interval().saturating_mul(MAX_PRELUDE_PHRASE_GAPS))
            .saturating_add(settings.pre_strike_delay()),
    }
}
