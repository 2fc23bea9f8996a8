//! Global daily operating mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide operating mode, recomputed from the wall clock and the
/// timetable on every mode tick.
///
/// The mode gates which scan actions are allowed at all before any
/// per-room slot state is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMode {
    /// Outside operating hours. Only emergency exits are honored.
    #[default]
    Closed,

    /// Early-access window before the first slot of the day.
    EarlyAccessFirstSlot,

    /// A class period is currently scheduled somewhere.
    SlotActive,

    /// A break period is currently scheduled.
    Break,

    /// Free-access window after the last slot of the day.
    PostClassFreeAccess,

    /// Operating hours, but no period is scheduled right now.
    Idle,
}

/// Actions gated by the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// A student entering through an outside reader.
    StudentEntry,
    /// A teacher checking in at an outside reader.
    TeacherCheckin,
    /// Creating an attendance record (snapshot, late entry, re-verification).
    CreateAttendance,
    /// IN/OUT movement toggling without attendance semantics.
    MovementTracking,
}

impl SystemMode {
    /// Returns true if the given action is permitted in this mode.
    #[must_use]
    pub fn allows(&self, action: GateAction) -> bool {
        match action {
            GateAction::StudentEntry => matches!(
                self,
                Self::EarlyAccessFirstSlot
                    | Self::SlotActive
                    | Self::Break
                    | Self::PostClassFreeAccess
            ),
            GateAction::TeacherCheckin => !matches!(self, Self::Closed),
            GateAction::CreateAttendance => matches!(self, Self::SlotActive | Self::Break),
            GateAction::MovementTracking => !matches!(self, Self::Closed),
        }
    }

    /// Returns true if this mode grants free passage with no attendance
    /// semantics (pure movement toggling).
    #[must_use]
    pub fn is_free_access(&self) -> bool {
        matches!(self, Self::EarlyAccessFirstSlot | Self::PostClassFreeAccess)
    }

    /// Returns the display label for this mode.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::EarlyAccessFirstSlot => "early_access_first_slot",
            Self::SlotActive => "slot_active",
            Self::Break => "break",
            Self::PostClassFreeAccess => "post_class_free_access",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One entry in the append-only mode transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTransition {
    /// Mode before the transition
    pub from: SystemMode,

    /// Mode after the transition
    pub to: SystemMode,

    /// When the transition happened
    pub at: DateTime<Utc>,

    /// Human-readable cause (e.g. "operating hours ended")
    pub reason: String,

    /// What drove the transition ("tick", "teacher_checkin", ...)
    pub triggered_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_blocks_everything() {
        let mode = SystemMode::Closed;
        assert!(!mode.allows(GateAction::StudentEntry));
        assert!(!mode.allows(GateAction::TeacherCheckin));
        assert!(!mode.allows(GateAction::CreateAttendance));
        assert!(!mode.allows(GateAction::MovementTracking));
    }

    #[test]
    fn test_slot_active_allows_all() {
        let mode = SystemMode::SlotActive;
        assert!(mode.allows(GateAction::StudentEntry));
        assert!(mode.allows(GateAction::TeacherCheckin));
        assert!(mode.allows(GateAction::CreateAttendance));
        assert!(mode.allows(GateAction::MovementTracking));
    }

    #[test]
    fn test_idle_blocks_student_entry_but_not_teachers() {
        let mode = SystemMode::Idle;
        assert!(!mode.allows(GateAction::StudentEntry));
        assert!(mode.allows(GateAction::TeacherCheckin));
        assert!(!mode.allows(GateAction::CreateAttendance));
        assert!(mode.allows(GateAction::MovementTracking));
    }

    #[test]
    fn test_free_access_windows() {
        assert!(SystemMode::EarlyAccessFirstSlot.is_free_access());
        assert!(SystemMode::PostClassFreeAccess.is_free_access());
        assert!(!SystemMode::SlotActive.is_free_access());
        assert!(!SystemMode::Break.is_free_access());
    }
}
