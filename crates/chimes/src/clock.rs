//! Wall-clock sources for the scheduler

use std::sync::Mutex;

use chrono::{DateTime, Local, TimeDelta};
use tokio::time::Instant;

/// Where the scheduler reads local wall time from.
pub trait WallClock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Local>;
}

/// The host's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Wall time that starts at a fixed instant and advances with tokio's
/// clock, so paused-time runtimes drive it too. `jump` shifts it without
/// moving tokio's clock, like an NTP step or a suspend nobody announced.
#[derive(Debug)]
pub struct OffsetClock {
    start: DateTime<Local>,
    origin: Instant,
    skew: Mutex<TimeDelta>,
}

impl OffsetClock {
    pub fn starting_at(start: DateTime<Local>) -> Self {
        Self {
            start,
            origin: Instant::now(),
            skew: Mutex::new(TimeDelta::zero()),
        }
    }

    pub fn jump(&self, by: TimeDelta) {
        let mut skew = self.skew.lock().expect("clock mutex poisoned");
        *skew = *skew + by;
    }
}

impl WallClock for OffsetClock {
    fn now(&self) -> DateTime<Local> {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::zero());
        let skew = *self.skew.lock().expect("clock mutex poisoned");
        self.start + elapsed + skew
    }
}

impl<C: WallClock> WallClock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Local> {
        (**self).now()
    }
}
