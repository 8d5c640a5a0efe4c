//! Chimes - Westminster quarter chimes on the wall clock.
//!
//! The [`scheduler`] arms one timer per quarter hour and hands each tick to
//! the [`player`], which expands the chime into notes, fades background
//! media out and back in, and guarantees only the newest session is ever
//! audible. Audio and media are reached through the [`engine`] and [`media`]
//! traits so either side can be swapped or mocked.

pub mod chime;
pub mod clock;
pub mod control;
pub mod engine;
pub mod focus;
pub mod media;
#[cfg(feature = "midi-out")]
pub mod midi_out;
pub mod player;
pub mod playerctl;
pub mod scheduler;
pub mod settings;
pub mod telemetry;

pub use chime::{expand, lead_time, Chime, ChimeError, ChimeFamily, Hour, NoteEvent, Pitch};
pub use clock::{OffsetClock, SystemClock, WallClock};
pub use engine::{AudioEngine, EngineError, Instrument, LoggingSink, NoteSink, SequencedEngine};
pub use focus::{FocusFilter, FocusGate};
pub use media::{MediaController, MediaError, NoMedia};
pub use player::{PlayOutcome, PlaybackError, Player, SessionEnd, SessionHandle, Trigger};
pub use playerctl::PlayerctlMedia;
pub use scheduler::{
    chime_for, evaluate_fire, next_quarter, plan_tick, FireDecision, Scheduler, SchedulerHandle,
    SchedulerStatus, TickPlan, TickState,
};
pub use settings::SettingsHandle;
