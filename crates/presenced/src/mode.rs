//! Global daily-mode state machine.
//!
//! The mode is a pure function of the wall clock and the timetable, plus
//! one escape hatch: a teacher arrival forces `SlotActive` immediately
//! instead of waiting for the next tick. Side effects of a transition
//! (presence reset on entering Closed, dashboard broadcast) belong to the
//! coordinator actor; this machine only decides and records.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use presence_core::{GateAction, ModeTransition, SlotKind, SystemMode};

use crate::config::DaemonConfig;
use crate::schedule::ScheduleResolver;

/// The global mode plus its append-only transition history.
pub struct ModeCoordinator {
    current: SystemMode,
    history: Vec<ModeTransition>,
    config: Arc<DaemonConfig>,
    resolver: Arc<dyn ScheduleResolver>,
}

impl ModeCoordinator {
    /// Creates a coordinator starting in `Closed`.
    pub fn new(config: Arc<DaemonConfig>, resolver: Arc<dyn ScheduleResolver>) -> Self {
        Self {
            current: SystemMode::Closed,
            history: Vec::new(),
            config,
            resolver,
        }
    }

    /// The current mode.
    pub fn current(&self) -> SystemMode {
        self.current
    }

    /// The transition history, oldest first.
    pub fn history(&self) -> &[ModeTransition] {
        &self.history
    }

    /// True if the given action is permitted right now.
    pub fn can_perform(&self, action: GateAction) -> bool {
        self.current.allows(action)
    }

    /// Computes what the mode should be at `now`.
    pub fn compute(&self, now: DateTime<Utc>) -> (SystemMode, &'static str) {
        let t = now.time();
        if t < self.config.day_open || t >= self.config.day_close {
            return (SystemMode::Closed, "outside operating hours");
        }

        if let Some(period) = self.resolver.active_period(now) {
            return match period.kind {
                SlotKind::Class => (SystemMode::SlotActive, "class period running"),
                SlotKind::Break => (SystemMode::Break, "break period running"),
            };
        }

        if let Some(first) = self.resolver.first_slot_of_day() {
            if t < first.start {
                let opens = first.start - self.config.early_access();
                if t >= opens {
                    return (
                        SystemMode::EarlyAccessFirstSlot,
                        "early access before first slot",
                    );
                }
                return (SystemMode::Idle, "before early access window");
            }
        }

        if let Some(last) = self.resolver.last_slot_of_day() {
            if t >= last.end {
                let closes = last.end + self.config.post_class();
                if t < closes {
                    return (
                        SystemMode::PostClassFreeAccess,
                        "free access after last slot",
                    );
                }
                return (SystemMode::Closed, "post-class window ended");
            }
        }

        (SystemMode::Idle, "no scheduled period")
    }

    /// Recomputes the mode and transitions if it changed.
    ///
    /// Idempotent: returns `None` when the computed mode equals the
    /// current one.
    pub fn check_transitions(&mut self, now: DateTime<Utc>) -> Option<ModeTransition> {
        let (next, reason) = self.compute(now);
        self.transition(next, reason, "tick", now)
    }

    /// Jumps to a mode immediately (teacher arrival), without waiting for
    /// the next tick. No-op if the mode is already current.
    pub fn force(
        &mut self,
        mode: SystemMode,
        reason: &str,
        triggered_by: &str,
        now: DateTime<Utc>,
    ) -> Option<ModeTransition> {
        self.transition(mode, reason, triggered_by, now)
    }

    fn transition(
        &mut self,
        to: SystemMode,
        reason: &str,
        triggered_by: &str,
        now: DateTime<Utc>,
    ) -> Option<ModeTransition> {
        if to == self.current {
            return None;
        }
        let transition = ModeTransition {
            from: self.current,
            to,
            at: now,
            reason: reason.to_string(),
            triggered_by: triggered_by.to_string(),
        };
        info!(
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            triggered_by = %transition.triggered_by,
            "Mode transition"
        );
        self.current = to;
        self.history.push(transition.clone());
        Some(transition)
    }
}
