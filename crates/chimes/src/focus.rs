//! Focus gate - per-kind switches for scheduled chimes
//!
//! An external policy (a focus mode, a control command) flips these; the
//! scheduler consults them when a tick fires. Manual plays are never gated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chime::{Chime, ChimeFamily};
use crate::player::Trigger;

#[derive(Debug)]
struct FocusFlags {
    first_quarter: AtomicBool,
    half_hour: AtomicBool,
    third_quarter: AtomicBool,
    full_hour: AtomicBool,
}

/// Shared handle to the four focus switches. Clones see the same state.
#[derive(Debug, Clone)]
pub struct FocusGate {
    flags: Arc<FocusFlags>,
}

/// A complete set of switches, applied at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusFilter {
    pub first_quarter: bool,
    pub half_hour: bool,
    pub third_quarter: bool,
    pub full_hour: bool,
}

impl Default for FocusFilter {
    fn default() -> Self {
        Self {
            first_quarter: true,
            half_hour: true,
            third_quarter: true,
            full_hour: true,
        }
    }
}

impl FocusGate {
    /// All chimes allowed.
    pub fn new() -> Self {
        Self::with_filter(FocusFilter::default())
    }

    pub fn with_filter(filter: FocusFilter) -> Self {
        Self {
            flags: Arc::new(FocusFlags {
                first_quarter: AtomicBool::new(filter.first_quarter),
                half_hour: AtomicBool::new(filter.half_hour),
                third_quarter: AtomicBool::new(filter.third_quarter),
                full_hour: AtomicBool::new(filter.full_hour),
            }),
        }
    }

    fn flag(&self, family: ChimeFamily) -> &AtomicBool {
        match family {
            ChimeFamily::FirstQuarter => &self.flags.first_quarter,
            ChimeFamily::HalfHour => &self.flags.half_hour,
            ChimeFamily::ThirdQuarter => &self.flags.third_quarter,
            ChimeFamily::FullHour => &self.flags.full_hour,
        }
    }

    pub fn is_allowed(&self, family: ChimeFamily) -> bool {
        self.flag(family).load(Ordering::Relaxed)
    }

    pub fn set(&self, family: ChimeFamily, allowed: bool) {
        self.flag(family).store(allowed, Ordering::Relaxed);
    }

    pub fn apply(&self, filter: FocusFilter) {
        self.set(ChimeFamily::FirstQuarter, filter.first_quarter);
        self.set(ChimeFamily::HalfHour, filter.half_hour);
        self.set(ChimeFamily::ThirdQuarter, filter.third_quarter);
        self.set(ChimeFamily::FullHour, filter.full_hour);
    }

    pub fn filter(&self) -> FocusFilter {
        FocusFilter {
            first_quarter: self.is_allowed(ChimeFamily::FirstQuarter),
            half_hour: self.is_allowed(ChimeFamily::HalfHour),
            third_quarter: self.is_allowed(ChimeFamily::ThirdQuarter),
            full_hour: self.is_allowed(ChimeFamily::FullHour),
        }
    }

    /// Scheduled chimes follow their switch; manual plays always pass.
    pub fn should_play(&self, chime: Chime, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Manual => true,
            Trigger::Scheduled => self.is_allowed(chime.family()),
        }
    }

    /// Human summary of the allowed kinds, e.g. "First Quarter, Full Hour".
    pub fn summary(&self) -> String {
        let allowed: Vec<&str> = ChimeFamily::ALL
            .iter()
            .filter(|family| self.is_allowed(**family))
            .map(|family| family.as_str())
            .collect();

        if allowed.is_empty() {
            "No Chimes".to_string()
        } else {
            allowed.join(", ")
        }
    }
}

impl Default for FocusGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chime::Hour;

    #[test]
    fn everything_allowed_by_default() {
        let gate = FocusGate::new();
        assert_eq!(gate.filter(), FocusFilter::default());
        assert_eq!(
            gate.summary(),
            "First Quarter, Half Hour, Third Quarter, Full Hour"
        );
    }

    #[test]
    fn clones_share_state() {
        let gate = FocusGate::new();
        let writer = gate.clone();
        writer.set(ChimeFamily::HalfHour, false);
        assert!(!gate.is_allowed(ChimeFamily::HalfHour));
    }

    #[test]
    fn scheduled_plays_follow_the_switch() {
        let gate = FocusGate::new();
        let noon = Chime::FullHour(Hour::new(12).unwrap());
        gate.set(ChimeFamily::FullHour, false);

        assert!(!gate.should_play(noon, Trigger::Scheduled));
        assert!(gate.should_play(Chime::FirstQuarter, Trigger::Scheduled));
    }

    #[test]
    fn manual_plays_bypass_the_gate() {
        let gate = FocusGate::with_filter(FocusFilter {
            first_quarter: false,
            half_hour: false,
            third_quarter: false,
            full_hour: false,
        });
        assert!(gate.should_play(Chime::HalfHour, Trigger::Manual));
        assert_eq!(gate.summary(), "No Chimes");
    }

    #[test]
    fn apply_replaces_all_switches() {
        let gate = FocusGate::new();
        let filter = FocusFilter {
            first_quarter: false,
            half_hour: true,
            third_quarter: false,
            full_hour: true,
        };
        gate.apply(filter);
        assert_eq!(gate.filter(), filter);
        assert_eq!(gate.summary(), "Half Hour, Full Hour");
    }
}
