//! Timetable types consumed by the schedule resolver.

use crate::ids::{ClassId, RoomId, SlotRef, UserId};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a scheduled period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// A taught class period.
    Class,
    /// A supervised break period.
    Break,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class => write!(f, "class"),
            Self::Break => write!(f, "break"),
        }
    }
}

/// One row of the daily timetable: a scheduled period in a room.
///
/// Times are time-of-day; the daemon resolves them against the current
/// date when an occurrence becomes live. Break rows carry the supervising
/// teacher of the adjoining class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimetableSlot {
    /// Stable reference for this timetable row
    pub slot_ref: SlotRef,

    /// Class period or break
    pub kind: SlotKind,

    /// Canonical room the period takes place in
    pub room: RoomId,

    /// Enrollment group attending
    pub class_id: ClassId,

    /// Scheduled teacher (supervising teacher for breaks)
    pub teacher_id: UserId,

    /// Subject display name ("Mathematics", "Morning Break")
    pub subject_name: String,

    /// Optional short subject code ("MATH-2")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_code: Option<String>,

    /// Daily start time
    pub start: NaiveTime,

    /// Daily end time
    pub end: NaiveTime,
}

impl TimetableSlot {
    /// Returns true if the given time-of-day falls inside this slot.
    ///
    /// Start is inclusive, end is exclusive.
    #[must_use]
    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t < self.end
    }

    /// Resolves the daily start time against a concrete instant's date.
    pub fn start_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.date_naive().and_time(self.start).and_utc()
    }

    /// Resolves the daily end time against a concrete instant's date.
    pub fn end_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.date_naive().and_time(self.end).and_utc()
    }
}

/// The window during which entry for a slot is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryWindow {
    /// Entry opens (early access before the slot starts)
    pub opens_at: NaiveTime,

    /// Entry closes (slot end)
    pub closes_at: NaiveTime,
}

impl EntryWindow {
    /// Returns true if the given time-of-day falls inside the window.
    #[must_use]
    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.opens_at && t < self.closes_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    fn slot(start: NaiveTime, end: NaiveTime) -> TimetableSlot {
        TimetableSlot {
            slot_ref: SlotRef::new("slot-1"),
            kind: SlotKind::Class,
            room: RoomId::canonical("r101"),
            class_id: ClassId::new("10a"),
            teacher_id: UserId::new("t-1"),
            subject_name: "Mathematics".to_string(),
            subject_code: Some("MATH-2".to_string()),
            start,
            end,
        }
    }

    #[test]
    fn test_contains_is_start_inclusive_end_exclusive() {
        let s = slot(t(9, 0), t(9, 45));
        assert!(s.contains(t(9, 0)));
        assert!(s.contains(t(9, 44)));
        assert!(!s.contains(t(9, 45)));
        assert!(!s.contains(t(8, 59)));
    }

    #[test]
    fn test_entry_window_contains() {
        let w = EntryWindow {
            opens_at: t(8, 30),
            closes_at: t(9, 45),
        };
        assert!(w.contains(t(8, 30)));
        assert!(w.contains(t(9, 0)));
        assert!(!w.contains(t(9, 45)));
    }
}
