//! Persisted session records - the durable side of a room/slot occurrence.

use crate::ids::{ClassId, DeviceId, OrgId, RoomId, SessionId, SlotRef, UserId};
use crate::slot::ActiveSlot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a persisted session.
///
/// Monotonic apart from the break cycle: `Active` ↔ `Break` while the
/// in-memory slot oscillates through break/re-verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session exists but the teacher has not arrived yet.
    WaitingForTeacher,

    /// Teacher checked in; class is live.
    Active,

    /// Session reached its end time.
    Closed,

    /// Teacher never arrived, or the session was abandoned.
    Cancelled,

    /// The room is in a scheduled break.
    Break,
}

impl SessionStatus {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::WaitingForTeacher => "waiting_for_teacher",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
            Self::Break => "break",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Room occupancy counts captured the moment the teacher arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalSnapshot {
    /// When the snapshot was taken
    pub at: DateTime<Utc>,

    /// Students inside the room at that instant
    pub inside_count: u32,

    /// Enrolled students not inside at that instant
    pub outside_count: u32,
}

/// The persisted record of one concrete slot occurrence in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique session id
    pub session_id: SessionId,

    /// Timetable row this occurrence was created from, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_ref: Option<SlotRef>,

    /// Enrollment group attending
    pub class_id: ClassId,

    /// Canonical room
    pub room: RoomId,

    /// Device whose scan created the session
    pub device_id: DeviceId,

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

    /// Concrete start of the occurrence
    pub start_time: DateTime<Utc>,

    /// Concrete end of the occurrence
    pub end_time: DateTime<Utc>,

    /// When the teacher checked in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_arrived_at: Option<DateTime<Utc>>,

    /// Current lifecycle status
    pub status: SessionStatus,

    /// True when a substitute checked in
    pub is_overridden: bool,

    /// Latch: the arrival snapshot poll ran for this session
    pub attendance_poller_triggered: bool,

    /// Occupancy counts at teacher arrival
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_arrival_snapshot: Option<ArrivalSnapshot>,

    /// Students re-verified during this session's break
    pub re_verified_students: Vec<UserId>,

    /// Owning organization
    pub organization_id: OrgId,

    /// Record creation time
    pub created_at: DateTime<Utc>,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Creates a new session record from an active slot.
    ///
    /// The record starts in the session-status mirror of the slot's
    /// current status, so a slot initialized by a student scan persists as
    /// `WaitingForTeacher` while a teacher-initiated one goes straight to
    /// `Active` after check-in.
    pub fn from_slot(
        slot: &ActiveSlot,
        device_id: DeviceId,
        organization_id: OrgId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: SessionId::generate(),
            slot_ref: Some(slot.slot_ref.clone()),
            class_id: slot.class_id.clone().unwrap_or_default(),
            room: slot.room.clone(),
            device_id,
            teacher_id: slot.teacher_id.clone(),
            actual_teacher_id: slot.actual_teacher_id.clone(),
            subject_name: slot.subject_name.clone(),
            subject_code: slot.subject_code.clone(),
            start_time: slot.start_time,
            end_time: slot.end_time,
            teacher_arrived_at: slot.teacher_arrived_at,
            status: slot.status.session_status(),
            is_overridden: slot.is_overridden,
            attendance_poller_triggered: false,
            teacher_arrival_snapshot: None,
            re_verified_students: Vec::new(),
            organization_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// The teacher this session is attributed to.
    #[must_use]
    pub fn effective_teacher(&self) -> &UserId {
        self.actual_teacher_id.as_ref().unwrap_or(&self.teacher_id)
    }

    /// Returns true if the session's end time has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{SlotKind, TimetableSlot};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).single().expect("valid")
    }

    fn slot() -> ActiveSlot {
        let row = TimetableSlot {
            slot_ref: SlotRef::new("slot-1"),
            kind: SlotKind::Class,
            room: RoomId::canonical("r101"),
            class_id: ClassId::new("10a"),
            teacher_id: UserId::new("t-1"),
            subject_name: "Mathematics".to_string(),
            subject_code: None,
            start: chrono::NaiveTime::from_hms_opt(9, 0, 0).expect("valid"),
            end: chrono::NaiveTime::from_hms_opt(9, 45, 0).expect("valid"),
        };
        ActiveSlot::from_timetable(&row, now())
    }

    #[test]
    fn test_from_slot_mirrors_status() {
        let record = SessionRecord::from_slot(
            &slot(),
            DeviceId::new("d-out-101"),
            OrgId::new("org-1"),
            now(),
        );
        assert_eq!(record.status, SessionStatus::WaitingForTeacher);
        assert!(!record.attendance_poller_triggered);
        assert!(record.re_verified_students.is_empty());
    }

    #[test]
    fn test_from_slot_after_checkin_is_active() {
        let mut s = slot();
        s.record_checkin(&UserId::new("t-2"), now());
        let record =
            SessionRecord::from_slot(&s, DeviceId::new("d-out-101"), OrgId::new("org-1"), now());
        assert_eq!(record.status, SessionStatus::Active);
        assert!(record.is_overridden);
        assert_eq!(record.effective_teacher(), &UserId::new("t-2"));
    }

    #[test]
    fn test_expiry() {
        let record = SessionRecord::from_slot(
            &slot(),
            DeviceId::new("d-out-101"),
            OrgId::new("org-1"),
            now(),
        );
        assert!(!record.is_expired(now()));
        assert!(record.is_expired(now() + chrono::Duration::minutes(45)));
    }
}
