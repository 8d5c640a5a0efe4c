//! Tick scheduler
//!
//! Finds the next quarter-hour slot, asks the player how far ahead that chime
//! must start, and arms one timer for `slot - lead`. When it fires the tick is
//! validated (stale chime, wall-clock drift) before the player is asked to
//! play, and the following slot is armed straight away.
//!
//! The slot arithmetic is pure and generic over the time zone; the runtime
//! half is a single task fed by a [`SchedulerHandle`].

use std::sync::Arc;
use std::time::Duration;

use chimeconf::SchedulerConfig;
use chrono::{DateTime, Local, LocalResult, TimeDelta, TimeZone, Timelike};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chime::{Chime, Hour};
use crate::clock::WallClock;
use crate::focus::FocusGate;
use crate::player::{PlayOutcome, Player, Trigger};

const QUARTER: i64 = 15;

fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::zero())
}

/// The first quarter-hour slot strictly after `now`.
///
/// Slots are local wall times. A slot that does not exist (spring-forward
/// gap) is passed over; a repeated one (fall-back) resolves to whichever
/// occurrence is still in the future, earliest first.
pub fn next_quarter<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let local = now.naive_local();
    let floor = local.minute() - local.minute() % QUARTER as u32;
    let mut slot = local
        .date()
        .and_hms_opt(local.hour(), floor, 0)
        .unwrap_or(local);
    let tz = now.timezone();

    loop {
        slot = slot + TimeDelta::minutes(QUARTER);
        match tz.from_local_datetime(&slot) {
            LocalResult::Single(at) if at > *now => return at,
            LocalResult::Ambiguous(first, second) => {
                if first > *now {
                    return first;
                }
                if second > *now {
                    return second;
                }
            }
            _ => {}
        }
    }
}

/// The chime for a wall time, by its minute. Only :00, :15, :30 and :45
/// chime.
pub fn chime_for<Tz: TimeZone>(at: &DateTime<Tz>) -> Option<Chime> {
    match at.minute() {
        0 => Some(Chime::FullHour(Hour::from_24h(at.hour()))),
        15 => Some(Chime::FirstQuarter),
        30 => Some(Chime::HalfHour),
        45 => Some(Chime::ThirdQuarter),
        _ => None,
    }
}

fn round_to_minute<Tz: TimeZone>(at: &DateTime<Tz>) -> DateTime<Tz> {
    let shifted = at.clone() + TimeDelta::seconds(30);
    shifted
        .with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .unwrap_or(shifted)
}

/// One armed tick: the slot, what chimes there, and how early to start.
#[derive(Debug, Clone)]
pub struct TickPlan<Tz: TimeZone> {
    pub target: DateTime<Tz>,
    pub chime: Chime,
    pub lead: Duration,
}

impl<Tz: TimeZone> TickPlan<Tz> {
    pub fn fire_at(&self) -> DateTime<Tz> {
        self.target.clone() - delta(self.lead)
    }
}

impl<Tz: TimeZone> PartialEq for TickPlan<Tz> {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.chime == other.chime && self.lead == other.lead
    }
}

/// Plan the first slot after `after`, with `lead_for` giving each chime's
/// lead time.
pub fn plan_tick<Tz: TimeZone>(
    after: &DateTime<Tz>,
    lead_for: impl Fn(Chime) -> Duration,
) -> TickPlan<Tz> {
    let mut target = next_quarter(after);
    loop {
        if let Some(chime) = chime_for(&target) {
            return TickPlan {
                lead: lead_for(chime),
                target,
                chime,
            };
        }
        target = next_quarter(&target);
    }
}

/// What to do with a tick whose timer just fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireDecision {
    Play,
    /// The intended time no longer names the planned chime.
    SkipStale { found: Option<Chime> },
    /// The intended time is too far from the slot.
    SkipDrift { drift: TimeDelta },
}

/// Validate a fired tick at wall time `now`.
///
/// The intended time is `now + lead`, so ordinary timer jitter still lands
/// on the planned slot. Drift is `intended - target` rather than
/// `now - target`: a full-hour tick fires a whole prelude ahead of its slot,
/// which alone is close to the default threshold.
pub fn evaluate_fire<Tz: TimeZone>(
    plan: &TickPlan<Tz>,
    now: &DateTime<Tz>,
    drift_threshold: Duration,
) -> FireDecision {
    let intended = now.clone() + delta(plan.lead);

    let found = chime_for(&round_to_minute(&intended));
    if found != Some(plan.chime) {
        return FireDecision::SkipStale { found };
    }

    let drift = intended - plan.target.clone();
    if drift.abs() > delta(drift_threshold) {
        return FireDecision::SkipDrift { drift };
    }

    FireDecision::Play
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerEvent {
    SetEnabled(bool),
    ScreensWoke,
    WillSleep,
    Shutdown,
}

/// Where the tick state machine is.
#[derive(Debug, Clone, PartialEq)]
pub enum TickState {
    Disabled,
    Armed(TickPlan<Local>),
    Firing(TickPlan<Local>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStatus {
    pub enabled: bool,
    /// False between a sleep notification and the next wake
    pub awake: bool,
    pub state: TickState,
}

impl SchedulerStatus {
    pub fn armed(&self) -> Option<&TickPlan<Local>> {
        match &self.state {
            TickState::Armed(plan) => Some(plan),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Scheduler is not running")]
pub struct SchedulerGone;

/// Control side of a running scheduler. Clones drive the same task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    events: mpsc::Sender<SchedulerEvent>,
    status: watch::Receiver<SchedulerStatus>,
}

impl SchedulerHandle {
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), SchedulerGone> {
        self.send(SchedulerEvent::SetEnabled(enabled)).await
    }

    pub async fn screens_woke(&self) -> Result<(), SchedulerGone> {
        self.send(SchedulerEvent::ScreensWoke).await
    }

    pub async fn will_sleep(&self) -> Result<(), SchedulerGone> {
        self.send(SchedulerEvent::WillSleep).await
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerGone> {
        self.send(SchedulerEvent::Shutdown).await
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    async fn send(&self, event: SchedulerEvent) -> Result<(), SchedulerGone> {
        self.events.send(event).await.map_err(|_| SchedulerGone)
    }
}

struct Armed {
    plan: TickPlan<Local>,
    deadline: Instant,
}

pub struct Scheduler<C: WallClock> {
    player: Arc<Player>,
    focus: FocusGate,
    clock: C,
    drift_threshold: Duration,
    leeway: Duration,
    enabled: bool,
    awake: bool,
    armed: Option<Armed>,
    status: watch::Sender<SchedulerStatus>,
}

impl<C: WallClock> Scheduler<C> {
    pub fn new(player: Arc<Player>, focus: FocusGate, clock: C, config: &SchedulerConfig) -> Self {
        let (status, _) = watch::channel(SchedulerStatus {
            enabled: config.enabled,
            awake: true,
            state: TickState::Disabled,
        });
        Self {
            player,
            focus,
            clock,
            drift_threshold: config.drift_threshold(),
            leeway: config.timer_leeway(),
            enabled: config.enabled,
            awake: true,
            armed: None,
            status,
        }
    }

    /// Run the state machine on its own task.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (events, rx) = mpsc::channel(32);
        let handle = SchedulerHandle {
            events,
            status: self.status.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut events: mpsc::Receiver<SchedulerEvent>) {
        if self.enabled && self.awake {
            self.arm_from_now();
        }
        self.publish();

        loop {
            let deadline = self.armed.as_ref().map(|armed| armed.deadline);
            tokio::select! {
                event = events.recv() => match event {
                    Some(SchedulerEvent::Shutdown) | None => break,
                    Some(event) => self.handle(event),
                },
                _ = sleep_until(deadline) => self.on_timer(),
            }
            self.publish();
        }

        self.armed = None;
        self.publish();
        info!("scheduler stopped");
    }

    fn handle(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::SetEnabled(true) => {
                if !self.enabled {
                    self.enabled = true;
                    info!("chimes enabled");
                    if self.awake {
                        self.arm_from_now();
                    }
                }
            }
            SchedulerEvent::SetEnabled(false) => {
                self.enabled = false;
                self.armed = None;
                self.player.stop();
                info!("chimes disabled");
            }
            SchedulerEvent::ScreensWoke => {
                self.awake = true;
                if self.enabled {
                    self.arm_from_now();
                }
            }
            SchedulerEvent::WillSleep => {
                self.awake = false;
                if self.armed.take().is_some() {
                    info!("timer cancelled for sleep");
                }
            }
            SchedulerEvent::Shutdown => {}
        }
    }

    fn on_timer(&mut self) {
        let Some(armed) = self.armed.take() else {
            return;
        };
        let now = self.clock.now();

        // Wall time can lag the monotonic timer after a clock step
        let early = armed.plan.fire_at() - now.clone();
        if early > delta(self.leeway) {
            debug!(early_ms = early.num_milliseconds(), "timer fired early, waiting");
            self.armed = Some(Armed {
                deadline: Instant::now() + early.to_std().unwrap_or_default(),
                plan: armed.plan,
            });
            return;
        }

        self.status.send_replace(SchedulerStatus {
            enabled: self.enabled,
            awake: self.awake,
            state: TickState::Firing(armed.plan.clone()),
        });
        self.fire(&armed.plan, &now);
        self.rearm_after(&armed.plan.target, &now);
    }

    fn fire(&self, plan: &TickPlan<Local>, now: &DateTime<Local>) {
        match evaluate_fire(plan, now, self.drift_threshold) {
            FireDecision::Play => {}
            FireDecision::SkipStale { found } => {
                warn!(
                    slot = %plan.target,
                    planned = %plan.chime,
                    found = ?found.map(|c| c.to_string()),
                    "stale tick skipped"
                );
                return;
            }
            FireDecision::SkipDrift { drift } => {
                warn!(
                    slot = %plan.target,
                    drift_ms = drift.num_milliseconds(),
                    "tick drifted past threshold, skipped"
                );
                return;
            }
        }

        if !self.focus.should_play(plan.chime, Trigger::Scheduled) {
            info!(chime = %plan.chime, "chime silenced by focus");
            return;
        }

        match self.player.play(plan.chime, Trigger::Scheduled) {
            Ok(PlayOutcome::Started(session)) => {
                debug!(generation = session.generation, chime = %plan.chime, "tick played");
            }
            Ok(PlayOutcome::Skipped) => {}
            Err(e) => warn!(chime = %plan.chime, error = %e, "scheduled chime failed"),
        }
    }

    fn plan(&self, after: &DateTime<Local>) -> TickPlan<Local> {
        plan_tick(after, |chime| self.player.start_ahead(chime))
    }

    fn arm_from_now(&mut self) {
        let now = self.clock.now();
        let plan = self.plan(&now);
        self.set_timer(plan, &now);
    }

    /// Arm the slot after `target`, or after `now` if that slot's fire time
    /// has already gone by.
    fn rearm_after(&mut self, target: &DateTime<Local>, now: &DateTime<Local>) {
        let mut plan = self.plan(target);
        if plan.fire_at() <= *now {
            debug!(slot = %plan.target, "next slot already passed, planning from now");
            plan = self.plan(now);
        }
        self.set_timer(plan, now);
    }

    fn set_timer(&mut self, plan: TickPlan<Local>, now: &DateTime<Local>) {
        let wait = (plan.fire_at() - now.clone()).to_std().unwrap_or_default();
        info!(
            slot = %plan.target,
            chime = %plan.chime,
            lead_ms = plan.lead.as_millis() as u64,
            fire_at = %plan.fire_at(),
            "tick armed"
        );
        self.armed = Some(Armed {
            deadline: Instant::now() + wait,
            plan,
        });
    }

    fn publish(&self) {
        let state = match &self.armed {
            Some(armed) => TickState::Armed(armed.plan.clone()),
            None => TickState::Disabled,
        };
        self.status.send_replace(SchedulerStatus {
            enabled: self.enabled,
            awake: self.awake,
            state,
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::OffsetClock;
    use crate::engine::{LoggingSink, SequencedEngine};
    use crate::media::NoMedia;
    use crate::settings::SettingsHandle;
    use crate::chime::ChimeFamily;
    use chimeconf::ChimeSettings;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, s).unwrap()
    }

    fn local(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 1, 15, h, m, s)
            .earliest()
            .unwrap()
    }

    #[test]
    fn next_quarter_is_strictly_future() {
        assert_eq!(next_quarter(&utc(10, 14, 58)), utc(10, 15, 0));
        assert_eq!(next_quarter(&utc(10, 15, 0)), utc(10, 30, 0));
        assert_eq!(next_quarter(&utc(10, 0, 0)), utc(10, 15, 0));
        assert_eq!(next_quarter(&utc(10, 44, 59)), utc(10, 45, 0));
        assert_eq!(next_quarter(&utc(10, 59, 1)), utc(11, 0, 0));
    }

    #[test]
    fn next_quarter_wraps_the_day() {
        let next = next_quarter(&utc(23, 50, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap());
        assert_eq!(
            chime_for(&next),
            Some(Chime::FullHour(Hour::new(12).unwrap()))
        );
    }

    #[test]
    fn chime_for_maps_quarter_minutes_only() {
        assert_eq!(chime_for(&utc(10, 15, 0)), Some(Chime::FirstQuarter));
        assert_eq!(chime_for(&utc(10, 30, 0)), Some(Chime::HalfHour));
        assert_eq!(chime_for(&utc(10, 45, 0)), Some(Chime::ThirdQuarter));
        assert_eq!(
            chime_for(&utc(15, 0, 0)),
            Some(Chime::FullHour(Hour::new(3).unwrap()))
        );
        for minute in (0..60).filter(|m| m % 15 != 0) {
            assert_eq!(chime_for(&utc(10, minute, 0)), None, "minute {minute}");
        }
    }

    #[test]
    fn plan_just_before_first_quarter() {
        let mut settings = ChimeSettings::default();
        settings.timing_adjustment = 0.3;
        settings.media_fade_duration = 0.0;

        let plan = plan_tick(&utc(10, 14, 58), |c| crate::chime::lead_time(c, &settings));

        assert_eq!(plan.target, utc(10, 15, 0));
        assert_eq!(plan.chime, Chime::FirstQuarter);
        assert_eq!(plan.lead, Duration::from_millis(300));
        assert_eq!(plan.fire_at(), utc(10, 14, 59) + TimeDelta::milliseconds(700));
    }

    #[test]
    fn on_time_fire_plays() {
        let plan = TickPlan {
            target: utc(11, 0, 0),
            chime: Chime::FullHour(Hour::new(11).unwrap()),
            lead: Duration::from_secs(17),
        };
        let now = plan.fire_at() + TimeDelta::milliseconds(40);
        assert_eq!(
            evaluate_fire(&plan, &now, Duration::from_secs(20)),
            FireDecision::Play
        );
    }

    #[test]
    fn late_fire_past_threshold_is_skipped() {
        let plan = TickPlan {
            target: utc(10, 15, 0),
            chime: Chime::FirstQuarter,
            lead: Duration::from_millis(300),
        };
        let now = utc(10, 15, 25);

        assert_eq!(
            evaluate_fire(&plan, &now, Duration::from_secs(20)),
            FireDecision::SkipDrift {
                drift: TimeDelta::milliseconds(25_300)
            }
        );
    }

    #[test]
    fn fire_landing_on_another_minute_is_stale() {
        let plan = TickPlan {
            target: utc(10, 15, 0),
            chime: Chime::FirstQuarter,
            lead: Duration::from_millis(300),
        };
        assert_eq!(
            evaluate_fire(&plan, &utc(10, 16, 10), Duration::from_secs(600)),
            FireDecision::SkipStale { found: None }
        );
        assert_eq!(
            evaluate_fire(&plan, &utc(10, 29, 59), Duration::from_secs(600)),
            FireDecision::SkipStale {
                found: Some(Chime::HalfHour)
            }
        );
    }

    fn quiet_settings() -> ChimeSettings {
        let mut settings = ChimeSettings::default();
        settings.timing_adjustment = 0.3;
        settings.media_fade_duration = 0.0;
        settings
    }

    fn dry_player() -> Arc<Player> {
        Player::new(
            SettingsHandle::new(quiet_settings()),
            Box::new(SequencedEngine::new(LoggingSink)),
            Arc::new(NoMedia),
            Duration::from_secs(2),
        )
    }

    fn start(
        player: &Arc<Player>,
        focus: FocusGate,
        clock: &Arc<OffsetClock>,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let config = SchedulerConfig {
            enabled: false,
            ..SchedulerConfig::default()
        };
        Scheduler::new(Arc::clone(player), focus, Arc::clone(clock), &config).spawn()
    }

    async fn armed_for(handle: &SchedulerHandle, target: DateTime<Local>) -> TickPlan<Local> {
        let mut status = handle.subscribe();
        let seen = status
            .wait_for(|s| s.armed().is_some_and(|plan| plan.target == target))
            .await
            .unwrap();
        seen.armed().cloned().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_at_ten_fourteen_fifty_eight_arms_first_quarter() {
        let clock = Arc::new(OffsetClock::starting_at(local(10, 14, 58)));
        let player = dry_player();
        let (handle, _task) = start(&player, FocusGate::new(), &clock);

        handle.set_enabled(true).await.unwrap();
        let plan = armed_for(&handle, local(10, 15, 0)).await;

        assert_eq!(plan.chime, Chime::FirstQuarter);
        assert_eq!(plan.lead, Duration::from_millis(300));
        assert_eq!(plan.fire_at(), local(10, 14, 59) + TimeDelta::milliseconds(700));

        let started = Instant::now();
        armed_for(&handle, local(10, 30, 0)).await;
        assert_eq!(started.elapsed(), Duration::from_millis(1700));
        assert_eq!(player.current_generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drifted_tick_is_skipped_and_rearmed_from_target() {
        let clock = Arc::new(OffsetClock::starting_at(local(10, 14, 58)));
        let player = dry_player();
        let (handle, _task) = start(&player, FocusGate::new(), &clock);

        handle.set_enabled(true).await.unwrap();
        armed_for(&handle, local(10, 15, 0)).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        clock.jump(TimeDelta::seconds(25));

        let next = armed_for(&handle, local(10, 30, 0)).await;
        assert_eq!(next.chime, Chime::HalfHour);
        assert_eq!(player.current_generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn long_unannounced_gap_plans_from_now() {
        let clock = Arc::new(OffsetClock::starting_at(local(10, 14, 58)));
        let player = dry_player();
        let (handle, _task) = start(&player, FocusGate::new(), &clock);

        handle.set_enabled(true).await.unwrap();
        armed_for(&handle, local(10, 15, 0)).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        clock.jump(TimeDelta::minutes(20));

        // 10:30 would have fired at 10:29:59.7, already behind us
        armed_for(&handle, local(10, 45, 0)).await;
        assert_eq!(player.current_generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn early_wakeup_waits_for_wall_time() {
        let clock = Arc::new(OffsetClock::starting_at(local(10, 14, 58)));
        let player = dry_player();
        let (handle, _task) = start(&player, FocusGate::new(), &clock);
        let started = Instant::now();

        handle.set_enabled(true).await.unwrap();
        armed_for(&handle, local(10, 15, 0)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        clock.jump(TimeDelta::seconds(-10));

        armed_for(&handle, local(10, 30, 0)).await;
        assert_eq!(started.elapsed(), Duration::from_millis(11_700));
        assert_eq!(player.current_generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_gate_silences_scheduled_ticks() {
        let clock = Arc::new(OffsetClock::starting_at(local(10, 14, 58)));
        let player = dry_player();
        let focus = FocusGate::new();
        focus.set(ChimeFamily::FirstQuarter, false);
        let (handle, _task) = start(&player, focus, &clock);

        handle.set_enabled(true).await.unwrap();
        armed_for(&handle, local(10, 30, 0)).await;

        assert_eq!(player.current_generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_cancels_and_wake_rearms() {
        let clock = Arc::new(OffsetClock::starting_at(local(10, 14, 50)));
        let player = dry_player();
        let (handle, _task) = start(&player, FocusGate::new(), &clock);
        let mut status = handle.subscribe();

        handle.set_enabled(true).await.unwrap();
        armed_for(&handle, local(10, 15, 0)).await;

        handle.will_sleep().await.unwrap();
        status
            .wait_for(|s| !s.awake && s.state == TickState::Disabled)
            .await
            .unwrap();
        assert!(handle.status().enabled);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(player.current_generation(), 0);

        handle.screens_woke().await.unwrap();
        armed_for(&handle, local(10, 30, 0)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disable_stops_playback() {
        let clock = Arc::new(OffsetClock::starting_at(local(10, 14, 58)));
        let player = dry_player();
        let (handle, _task) = start(&player, FocusGate::new(), &clock);
        let mut status = handle.subscribe();

        handle.set_enabled(true).await.unwrap();
        armed_for(&handle, local(10, 15, 0)).await;
        player.play(Chime::HalfHour, Trigger::Manual).unwrap();
        assert!(player.is_playing());

        handle.set_enabled(false).await.unwrap();
        status
            .wait_for(|s| !s.enabled && s.state == TickState::Disabled)
            .await
            .unwrap();

        assert!(!player.is_playing());
        assert_eq!(player.current_generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_task() {
        let clock = Arc::new(OffsetClock::starting_at(local(10, 14, 58)));
        let player = dry_player();
        let (handle, task) = start(&player, FocusGate::new(), &clock);

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(handle.set_enabled(true).await.is_err());
        assert_eq!(handle.status().state, TickState::Disabled);
    }
}
