//! Per-room active slot state.

use crate::ids::{ClassId, RoomId, SessionId, SlotRef, UserId};
use crate::schedule::{SlotKind, TimetableSlot};
use crate::session::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a room's active slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Slot has started (or is about to) but the teacher has not arrived.
    WaitingForTeacher,

    /// Teacher checked in; the class is live.
    SlotActive,

    /// A break period is running in this room.
    Break,

    /// Post-break grace window; inside scans re-credit the next slot.
    ReVerification,

    /// Slot reached its end time.
    SlotClosed,

    /// Teacher never arrived within the grace period.
    SlotCancelled,
}

impl SlotStatus {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SlotClosed | Self::SlotCancelled)
    }

    /// Maps the in-memory slot status onto the persisted session status.
    ///
    /// `ReVerification` is an in-memory refinement of an active session,
    /// so it mirrors as `Active`.
    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        match self {
            Self::WaitingForTeacher => SessionStatus::WaitingForTeacher,
            Self::SlotActive | Self::ReVerification => SessionStatus::Active,
            Self::Break => SessionStatus::Break,
            Self::SlotClosed => SessionStatus::Closed,
            Self::SlotCancelled => SessionStatus::Cancelled,
        }
    }

    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::WaitingForTeacher => "waiting_for_teacher",
            Self::SlotActive => "slot_active",
            Self::Break => "break",
            Self::ReVerification => "re_verification",
            Self::SlotClosed => "slot_closed",
            Self::SlotCancelled => "slot_cancelled",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The one slot currently occupying a room.
///
/// Lives only in process memory, owned by the coordinator actor; the
/// matching [`crate::SessionRecord`] is the durable counterpart once a
/// session has been created. At most one `ActiveSlot` exists per room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSlot {
    /// Timetable row this occurrence was created from
    pub slot_ref: SlotRef,

    /// Canonical room
    pub room: RoomId,

    /// Concrete start of this occurrence
    pub start_time: DateTime<Utc>,

    /// Concrete end of this occurrence
    pub end_time: DateTime<Utc>,

    /// Scheduled teacher
    pub teacher_id: UserId,

    /// Teacher who actually checked in, when different from scheduled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_teacher_id: Option<UserId>,

    /// Subject display name
    pub subject_name: String,

    /// Optional short subject code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_code: Option<String>,

    /// Enrollment group, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<ClassId>,

    /// Persisted session backing this occurrence, once created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// Current lifecycle status
    pub status: SlotStatus,

    /// True when the arriving teacher differs from the scheduled one
    pub is_overridden: bool,

    /// When the teacher checked in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_arrived_at: Option<DateTime<Utc>>,

    /// End of the post-break re-verification grace window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub re_verification_until: Option<DateTime<Utc>>,

    /// Latch for the one-shot break warning
    pub warning_triggered: bool,
}

impl ActiveSlot {
    /// Creates an active slot from a timetable row, resolved against `now`.
    ///
    /// Class rows start waiting for their teacher; break rows start in
    /// `Break` immediately (there is no arrival event for a break).
    pub fn from_timetable(row: &TimetableSlot, now: DateTime<Utc>) -> Self {
        let status = match row.kind {
            SlotKind::Class => SlotStatus::WaitingForTeacher,
            SlotKind::Break => SlotStatus::Break,
        };
        Self {
            slot_ref: row.slot_ref.clone(),
            room: row.room.clone(),
            start_time: row.start_at(now),
            end_time: row.end_at(now),
            teacher_id: row.teacher_id.clone(),
            actual_teacher_id: None,
            subject_name: row.subject_name.clone(),
            subject_code: row.subject_code.clone(),
            class_id: Some(row.class_id.clone()),
            session_id: None,
            status,
            is_overridden: false,
            teacher_arrived_at: None,
            re_verification_until: None,
            warning_triggered: false,
        }
    }

    /// Records a teacher check-in, returning whether it was an override.
    ///
    /// Caller must have verified the slot is in `WaitingForTeacher`.
    pub fn record_checkin(&mut self, teacher_id: &UserId, now: DateTime<Utc>) -> bool {
        let is_override = *teacher_id != self.teacher_id;
        if is_override {
            self.actual_teacher_id = Some(teacher_id.clone());
            self.is_overridden = true;
        }
        self.teacher_arrived_at = Some(now);
        self.status = SlotStatus::SlotActive;
        is_override
    }

    /// The teacher this occurrence is attributed to: the arriving teacher
    /// if overridden, the scheduled one otherwise.
    #[must_use]
    pub fn effective_teacher(&self) -> &UserId {
        self.actual_teacher_id.as_ref().unwrap_or(&self.teacher_id)
    }

    /// Reference time for late-entry classification: teacher arrival when
    /// known, slot start otherwise.
    #[must_use]
    pub fn late_reference(&self) -> DateTime<Utc> {
        self.teacher_arrived_at.unwrap_or(self.start_time)
    }
}
