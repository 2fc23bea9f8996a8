//! Attendance records and in-room presence tracking.

use crate::ids::{ClassId, DeviceId, OrgId, RfidTag, RoomId, SlotRef, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attendance classification for a student in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Entered before or shortly after the teacher.
    Present,

    /// Entered past the late threshold.
    Late,

    /// Never materialized by the daemon; reserved for manual/admin writes.
    Absent,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Late => write!(f, "late"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// Which path created an attendance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceSource {
    /// Bulk snapshot at teacher arrival.
    TeacherArrival,

    /// Outside scan after the class went live.
    LateEntry,

    /// Break-end re-verification crediting the next slot.
    AutoReVerification,

    /// Administrative correction.
    Manual,
}

impl fmt::Display for AttendanceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TeacherArrival => write!(f, "teacher_arrival"),
            Self::LateEntry => write!(f, "late_entry"),
            Self::AutoReVerification => write!(f, "auto_re_verification"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Whether a student is currently inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InRoomState {
    /// Inside the room.
    In,

    /// Outside the room.
    Out,

    /// No movement observed yet (or reset overnight).
    #[default]
    Unknown,
}

impl InRoomState {
    /// Flips IN to OUT and anything else to IN.
    #[must_use]
    pub fn toggled(&self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out | Self::Unknown => Self::In,
        }
    }

    /// Returns true if the student is inside.
    #[must_use]
    pub fn is_in(&self) -> bool {
        matches!(self, Self::In)
    }
}

impl fmt::Display for InRoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "IN"),
            Self::Out => write!(f, "OUT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One attendance record.
///
/// Unique per (student, slot, date); the store enforces this with an
/// insert-if-absent conditional write and points are credited exactly once,
/// at insert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Unique record id
    pub id: String,

    /// Student this record belongs to
    pub student_id: UserId,

    /// Timetable row the attendance counts toward
    pub slot_ref: SlotRef,

    /// Day of the occurrence (third component of the unique key)
    pub date: NaiveDate,

    /// Tag that produced the record (empty for snapshot inserts)
    pub rfid_tag: RfidTag,

    /// When the record was created
    pub timestamp: DateTime<Utc>,

    /// present / late (absent is never written by the daemon)
    pub status: AttendanceStatus,

    /// Device that observed the student, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,

    /// Points credited at insert time
    pub points_earned: u32,

    /// Optional short subject code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_code: Option<String>,

    /// Subject display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,

    /// Teacher the slot is attributed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<UserId>,

    /// Owning organization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrgId>,

    /// Which path created the record
    pub source: AttendanceSource,

    /// Two-phase confirmation: set by the inside reader
    pub is_verified: bool,

    /// When the record was verified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,

    /// Room-presence state linked to this record
    pub in_room_status: InRoomState,

    /// Last IN/OUT flip observed
    pub last_movement_at: DateTime<Utc>,
}

impl AttendanceRecord {
    /// Creates a record, generating a fresh id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        student_id: UserId,
        slot_ref: SlotRef,
        timestamp: DateTime<Utc>,
        status: AttendanceStatus,
        points_earned: u32,
        source: AttendanceSource,
        in_room_status: InRoomState,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            student_id,
            slot_ref,
            date: timestamp.date_naive(),
            rfid_tag: RfidTag::default(),
            timestamp,
            status,
            device_id: None,
            points_earned,
            subject_code: None,
            subject_name: None,
            teacher_id: None,
            organization_id: None,
            source,
            is_verified: false,
            verified_at: None,
            in_room_status,
            last_movement_at: timestamp,
        }
    }

    /// Marks the record verified.
    pub fn verify(&mut self, at: DateTime<Utc>) {
        self.is_verified = true;
        self.verified_at = Some(at);
    }
}

/// Presence state of one student in one room, independent of attendance.
///
/// Upserted per (student, room); the sole input to the attendance poller's
/// snapshot partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPresence {
    /// Student being tracked
    pub student_id: UserId,

    /// Canonical room
    pub room: RoomId,

    /// Current state
    pub status: InRoomState,

    /// Slot during which the last flip happened, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_ref: Option<SlotRef>,

    /// When the state last changed
    pub last_updated: DateTime<Utc>,
}

impl RoomPresence {
    /// Creates a presence row in the given state.
    pub fn new(
        student_id: UserId,
        room: RoomId,
        status: InRoomState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id,
            room,
            status,
            slot_ref: None,
            last_updated: now,
        }
    }
}

/// Context threaded through attendance creation: everything the ledger
/// needs to stamp a record without re-reading the slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotContext {
    /// Timetable row the attendance counts toward
    pub slot_ref: SlotRef,

    /// Canonical room
    pub room: RoomId,

    /// Enrollment group
    pub class_id: ClassId,

    /// Teacher the slot is attributed to
    pub teacher_id: UserId,

    /// Subject display name
    pub subject_name: String,

    /// Optional short subject code
    pub subject_code: Option<String>,

    /// Owning organization
    pub organization_id: Option<OrgId>,

    /// Reference time for late classification (teacher arrival or start)
    pub reference_time: DateTime<Utc>,
}
