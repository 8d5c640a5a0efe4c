//! Playback orchestrator
//!
//! Owns the audio engine and decides which play request is authoritative.
//! Every `play` takes a new generation number before anything can suspend;
//! a session task that wakes up to find a newer generation stops touching
//! shared state and ends as [`SessionEnd::Superseded`].
//!
//! Background media faded out by one session is held until the current
//! session finishes (or `stop` is called), so a superseded session never
//! leaves music paused. Fades run one at a time: a restore queued behind a
//! fade-out still in flight waits for it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chime::{expand, lead_time, Chime};
use crate::engine::{AudioEngine, EngineError, Instrument};
use crate::media::MediaController;
use crate::settings::SettingsHandle;

/// Who asked for a chime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A user request. Always plays, superseding anything in flight.
    Manual,
    /// A quarter-hour tick. Yields to a session that is already audible.
    Scheduled,
}

impl Trigger {
    pub fn is_scheduled(self) -> bool {
        matches!(self, Trigger::Scheduled)
    }
}

/// Error type for a playback session
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Session task ended abnormally: {0}")]
    Task(String),
}

/// How a session that was not cut short by an error ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    /// A newer play or a stop took over before this session finished.
    Superseded,
}

/// Result of a `play` request.
#[derive(Debug)]
pub enum PlayOutcome {
    Started(SessionHandle),
    /// Scheduled play dropped because a chime is already audible.
    Skipped,
}

/// A running session. Dropping the handle detaches it; the session still
/// runs to completion.
#[derive(Debug)]
pub struct SessionHandle {
    pub generation: u64,
    pub chime: Chime,
    task: JoinHandle<Result<SessionEnd, PlaybackError>>,
}

impl SessionHandle {
    /// Wait for the session, including its decay window, to end.
    pub async fn finished(self) -> Result<SessionEnd, PlaybackError> {
        self.task
            .await
            .map_err(|e| PlaybackError::Task(e.to_string()))?
    }
}

struct EngineSlot {
    engine: Box<dyn AudioEngine>,
    /// What the engine last loaded successfully
    instrument: Option<Instrument>,
}

pub struct Player {
    generation: AtomicU64,
    slot: Mutex<EngineSlot>,
    media: Arc<dyn MediaController>,
    /// Background media is faded out and owed a fade-in
    media_held: AtomicBool,
    /// Held across every fade
    media_lock: AsyncMutex<()>,
    playing: watch::Sender<bool>,
    settings: SettingsHandle,
    decay: Duration,
}

impl Player {
    /// `decay` is how long the last note may ring before the engine is reset.
    pub fn new(
        settings: SettingsHandle,
        engine: Box<dyn AudioEngine>,
        media: Arc<dyn MediaController>,
        decay: Duration,
    ) -> Arc<Self> {
        let (playing, _) = watch::channel(false);
        Arc::new(Self {
            generation: AtomicU64::new(0),
            slot: Mutex::new(EngineSlot {
                engine,
                instrument: None,
            }),
            media,
            media_held: AtomicBool::new(false),
            media_lock: AsyncMutex::new(()),
            playing,
            settings,
            decay,
        })
    }

    /// Start playing `chime`.
    ///
    /// The engine is prepared before this returns; fades, the sequence
    /// itself and the decay window run on a spawned task. Must be called
    /// from within a tokio runtime.
    pub fn play(
        self: &Arc<Self>,
        chime: Chime,
        trigger: Trigger,
    ) -> Result<PlayOutcome, PlaybackError> {
        if trigger.is_scheduled() && self.is_playing() {
            debug!(chime = %chime, "scheduled chime skipped, already playing");
            return Ok(PlayOutcome::Skipped);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let settings = self.settings.snapshot();
        let events = expand(chime, &settings);

        let prepared = self.with_slot(|slot| {
            slot.engine.reset();

            let wanted = Instrument::from_settings(&settings);
            if slot.instrument.as_ref() != Some(&wanted) {
                if let Err(e) = slot.engine.load_instrument(&wanted) {
                    slot.instrument = None;
                    slot.engine.reset();
                    return Err(e);
                }
                slot.instrument = Some(wanted);
            }

            slot.engine.submit(&events);
            Ok(())
        });

        if let Err(e) = prepared {
            error!(generation, chime = %chime, error = %e, "chime not played");
            self.set_playing(false);
            self.release_media();
            return Err(e.into());
        }

        self.set_playing(true);
        info!(generation, chime = %chime, ?trigger, notes = events.len(), "session started");

        let task = tokio::spawn(Arc::clone(self).run_session(generation, chime, trigger));
        Ok(PlayOutcome::Started(SessionHandle {
            generation,
            chime,
            task,
        }))
    }

    /// Silence everything now. Any session in flight is superseded and held
    /// media is faded back in.
    pub fn stop(self: &Arc<Self>) {
        self.halt();
    }

    /// [`stop`](Self::stop), then wait until background media is back:
    /// both the restore this call starts and one a finishing session has
    /// already begun.
    pub async fn stop_and_restore(self: &Arc<Self>) {
        if let Some(restore) = self.halt() {
            if let Err(e) = restore.await {
                warn!(error = %e, "media restore task failed");
            }
        }
        let _media = self.media_lock.lock().await;
    }

    fn halt(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.with_slot(|slot| slot.engine.reset());
        self.set_playing(false);
        info!(generation, "playback stopped");
        self.release_media()
    }

    /// How far ahead of its boundary `chime` must start, under the current
    /// settings.
    pub fn start_ahead(&self, chime: Chime) -> Duration {
        lead_time(chime, &self.settings.snapshot())
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    pub fn subscribe_playing(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    fn set_playing(&self, playing: bool) {
        self.playing.send_replace(playing);
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut EngineSlot) -> R) -> R {
        let mut slot = self.slot.lock().expect("engine mutex poisoned");
        f(&mut slot)
    }

    /// Fade held media back in on a background task.
    fn release_media(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.media_held.load(Ordering::SeqCst) {
            return None;
        }
        let player = Arc::clone(self);
        Some(tokio::spawn(async move { player.restore_media().await }))
    }

    /// Fade media in if it is still held once any fade in flight is done.
    async fn restore_media(&self) {
        let _media = self.media_lock.lock().await;
        if !self.media_held.swap(false, Ordering::SeqCst) {
            return;
        }
        let duration = self.settings.snapshot().media_fade_duration();
        if let Err(e) = self.media.fade_in(duration).await {
            warn!(error = %e, "media fade-in failed");
        }
    }

    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        chime: Chime,
        trigger: Trigger,
    ) -> Result<SessionEnd, PlaybackError> {
        let settings = self.settings.snapshot();
        let fade = settings.media_fade_duration();

        let faded = {
            let _media = self.media_lock.lock().await;
            let inherited = self.media_held.load(Ordering::SeqCst);
            let fresh = !inherited && settings.fade_media && self.media.is_playing().await;
            if !self.is_current(generation) {
                return Ok(self.superseded(generation));
            }
            if fresh {
                self.media_held.store(true, Ordering::SeqCst);
                if let Err(e) = self.media.fade_out(fade).await {
                    warn!(generation, error = %e, "media fade-out failed, playing anyway");
                }
            }
            fresh
        };

        if !faded && trigger.is_scheduled() {
            // Keep scheduled timing identical with and without music
            tokio::time::sleep(fade).await;
        }
        if !self.is_current(generation) {
            return Ok(self.superseded(generation));
        }

        let started = self.with_slot(|slot| {
            slot.engine.start()?;
            Ok::<_, EngineError>(slot.engine.total_duration())
        });
        let duration = match started {
            Ok(duration) => duration,
            Err(e) => {
                error!(generation, chime = %chime, error = %e, "engine failed to start");
                self.with_slot(|slot| slot.engine.reset());
                self.set_playing(false);
                self.restore_media().await;
                return Err(e.into());
            }
        };

        tokio::time::sleep(duration).await;
        if !self.is_current(generation) {
            return Ok(self.superseded(generation));
        }

        self.set_playing(false);
        self.restore_media().await;

        tokio::time::sleep(self.decay).await;
        if !self.is_current(generation) {
            return Ok(self.superseded(generation));
        }

        self.with_slot(|slot| slot.engine.reset());
        info!(generation, chime = %chime, "session completed");
        Ok(SessionEnd::Completed)
    }

    fn superseded(&self, generation: u64) -> SessionEnd {
        debug!(
            generation,
            current = self.current_generation(),
            "session superseded"
        );
        SessionEnd::Superseded
    }
}
