//! Audio engine contract and the sequencer behind the concrete engines
//!
//! The playback orchestrator owns exactly one engine and drives it through
//! [`AudioEngine`]: load an instrument, stage note events, start, stop,
//! reset. [`SequencedEngine`] implements the contract for anything that can
//! turn notes on and off (a [`NoteSink`]), dispatching the staged events on a
//! tokio task at their offsets from start.

use std::sync::Arc;
use std::time::Duration;

use chimeconf::ChimeSettings;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chime::{NoteEvent, Pitch};

/// Instrument selection, compared against what the engine has loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub name: String,
    /// General MIDI program (0-based)
    pub program: u8,
}

impl Instrument {
    pub fn from_settings(settings: &ChimeSettings) -> Self {
        Self {
            name: settings.instrument_name.clone(),
            program: settings.instrument_program,
        }
    }
}

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to load instrument {name}: {reason}")]
    InstrumentLoad { name: String, reason: String },

    #[error("Failed to start engine: {0}")]
    StartFailed(String),

    #[error("No events staged")]
    NothingStaged,

    #[error("Output failed: {0}")]
    Output(String),
}

/// What the playback orchestrator needs from an audio engine.
pub trait AudioEngine: Send {
    fn load_instrument(&mut self, instrument: &Instrument) -> Result<(), EngineError>;

    /// Stage events for the next `start`. Replaces anything staged before.
    fn submit(&mut self, events: &[NoteEvent]);

    fn start(&mut self) -> Result<(), EngineError>;

    /// Silence output. Staged events are kept.
    fn stop(&mut self);

    /// Stop and clear staged events. Safe to call when idle.
    fn reset(&mut self);

    /// Time from start until the last staged note ends.
    fn total_duration(&self) -> Duration;
}

/// Time from the first note's start until the last note ends.
pub fn sequence_duration(events: &[NoteEvent]) -> Duration {
    events
        .iter()
        .map(NoteEvent::end)
        .max()
        .unwrap_or_default()
}

/// Destination for note on/off messages.
pub trait NoteSink: Send + Sync + 'static {
    fn program_change(&self, program: u8) -> Result<(), EngineError>;
    fn note_on(&self, pitch: Pitch, velocity: u8) -> Result<(), EngineError>;
    fn note_off(&self, pitch: Pitch) -> Result<(), EngineError>;
    /// Release everything that might be sounding.
    fn all_notes_off(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Off(Pitch),
    On(Pitch, u8),
}

/// Flatten events into a time-ordered list of on/off actions.
///
/// At equal instants note-offs go first, so a repeated pitch is released
/// before it is struck again.
fn timeline(events: &[NoteEvent]) -> Vec<(Duration, Action)> {
    let mut actions: Vec<(Duration, Action)> = events
        .iter()
        .flat_map(|e| {
            [
                (e.start, Action::On(e.pitch, e.velocity)),
                (e.end(), Action::Off(e.pitch)),
            ]
        })
        .collect();
    actions.sort_by_key(|(at, action)| (*at, matches!(action, Action::On(..))));
    actions
}

/// Engine that plays staged events through a [`NoteSink`].
pub struct SequencedEngine<S: NoteSink> {
    sink: Arc<S>,
    staged: Vec<NoteEvent>,
    running: Option<JoinHandle<()>>,
}

impl<S: NoteSink> SequencedEngine<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
            staged: Vec::new(),
            running: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn staged(&self) -> &[NoteEvent] {
        &self.staged
    }

    /// Whether a dispatch task is still walking the timeline.
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl<S: NoteSink> AudioEngine for SequencedEngine<S> {
    fn load_instrument(&mut self, instrument: &Instrument) -> Result<(), EngineError> {
        self.sink
            .program_change(instrument.program)
            .map_err(|e| EngineError::InstrumentLoad {
                name: instrument.name.clone(),
                reason: e.to_string(),
            })?;
        info!(
            instrument = %instrument.name,
            program = instrument.program,
            "instrument loaded"
        );
        Ok(())
    }

    fn submit(&mut self, events: &[NoteEvent]) {
        self.staged = events.to_vec();
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.staged.is_empty() {
            return Err(EngineError::NothingStaged);
        }
        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::StartFailed(e.to_string()))?;
        let sink = Arc::clone(&self.sink);
        let actions = timeline(&self.staged);

        self.running = Some(runtime.spawn(async move {
            let origin = Instant::now();
            for (at, action) in actions {
                tokio::time::sleep_until(origin + at).await;
                let sent = match action {
                    Action::On(pitch, velocity) => sink.note_on(pitch, velocity),
                    Action::Off(pitch) => sink.note_off(pitch),
                };
                if let Err(e) = sent {
                    warn!(error = %e, "note dispatch failed");
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.running.take() {
            task.abort();
        }
        self.sink.all_notes_off();
    }

    fn reset(&mut self) {
        self.stop();
        self.staged.clear();
    }

    fn total_duration(&self) -> Duration {
        sequence_duration(&self.staged)
    }
}

impl<S: NoteSink> Drop for SequencedEngine<S> {
    fn drop(&mut self) {
        if let Some(task) = self.running.take() {
            task.abort();
        }
    }
}

/// Dry-run sink: notes are logged instead of sounded
pub struct LoggingSink;

impl NoteSink for LoggingSink {
    fn program_change(&self, program: u8) -> Result<(), EngineError> {
        debug!(program, "program change");
        Ok(())
    }

    fn note_on(&self, pitch: Pitch, velocity: u8) -> Result<(), EngineError> {
        info!(pitch = pitch.0, velocity, "note on");
        Ok(())
    }

    fn note_off(&self, pitch: Pitch) -> Result<(), EngineError> {
        debug!(pitch = pitch.0, "note off");
        Ok(())
    }

    fn all_notes_off(&self) {
        debug!("all notes off");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chime::{expand, Chime};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Program(u8),
        On(u8, Duration),
        Off(u8, Duration),
        Panic,
    }

    struct RecordingSink {
        origin: Instant,
        sent: Mutex<Vec<Sent>>,
        fail_program: bool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                origin: Instant::now(),
                sent: Mutex::new(Vec::new()),
                fail_program: false,
            }
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl NoteSink for RecordingSink {
        fn program_change(&self, program: u8) -> Result<(), EngineError> {
            if self.fail_program {
                return Err(EngineError::Output("port closed".to_string()));
            }
            self.sent.lock().unwrap().push(Sent::Program(program));
            Ok(())
        }

        fn note_on(&self, pitch: Pitch, _velocity: u8) -> Result<(), EngineError> {
            let at = self.origin.elapsed();
            self.sent.lock().unwrap().push(Sent::On(pitch.0, at));
            Ok(())
        }

        fn note_off(&self, pitch: Pitch) -> Result<(), EngineError> {
            let at = self.origin.elapsed();
            self.sent.lock().unwrap().push(Sent::Off(pitch.0, at));
            Ok(())
        }

        fn all_notes_off(&self) {
            self.sent.lock().unwrap().push(Sent::Panic);
        }
    }

    fn event(pitch: u8, start_ms: u64, len_ms: u64) -> NoteEvent {
        NoteEvent {
            pitch: Pitch(pitch),
            start: Duration::from_millis(start_ms),
            duration: Duration::from_millis(len_ms),
            velocity: 100,
        }
    }

    #[test]
    fn duration_covers_the_longest_note() {
        let events = [event(60, 0, 1000), event(62, 500, 2000), event(64, 1000, 100)];
        assert_eq!(sequence_duration(&events), Duration::from_millis(2500));
        assert_eq!(sequence_duration(&[]), Duration::ZERO);
    }

    #[test]
    fn repeated_pitch_is_released_before_restrike() {
        let actions = timeline(&[event(64, 0, 500), event(64, 500, 500)]);
        let at_500: Vec<Action> = actions
            .iter()
            .filter(|(at, _)| *at == Duration::from_millis(500))
            .map(|(_, a)| *a)
            .collect();
        assert_eq!(at_500, vec![Action::Off(Pitch(64)), Action::On(Pitch(64), 100)]);
    }

    #[test]
    fn start_without_events_fails() {
        let mut engine = SequencedEngine::new(RecordingSink::new());
        assert!(matches!(engine.start(), Err(EngineError::NothingStaged)));
    }

    #[test]
    fn failed_program_change_names_the_instrument() {
        let mut sink = RecordingSink::new();
        sink.fail_program = true;
        let mut engine = SequencedEngine::new(sink);

        let err = engine
            .load_instrument(&Instrument {
                name: "Celesta".to_string(),
                program: 8,
            })
            .unwrap_err();
        assert!(err.to_string().contains("Celesta"));
    }

    #[tokio::test(start_paused = true)]
    async fn plays_events_at_their_offsets() {
        let mut engine = SequencedEngine::new(RecordingSink::new());
        engine.submit(&[event(60, 0, 400), event(62, 250, 400)]);
        engine.start().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent = engine.sink().sent();
        // stop() before the run sends a panic first
        assert_eq!(
            sent,
            vec![
                Sent::Panic,
                Sent::On(60, Duration::ZERO),
                Sent::On(62, Duration::from_millis(250)),
                Sent::Off(60, Duration::from_millis(400)),
                Sent::Off(62, Duration::from_millis(650)),
            ]
        );
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_aborts_dispatch_and_clears_events() {
        let settings = ChimeSettings::default();
        let mut engine = SequencedEngine::new(RecordingSink::new());
        engine.submit(&expand(Chime::ThirdQuarter, &settings));
        engine.start().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.reset();
        let sent_at_reset = engine.sink().sent().len();

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(engine.sink().sent().len(), sent_at_reset);
        assert!(engine.staged().is_empty());
        assert_eq!(engine.total_duration(), Duration::ZERO);
        assert_eq!(engine.sink().sent().last(), Some(&Sent::Panic));
    }
}
