//! Dashboard broadcast frames.
//!
//! Fire-and-forget events pushed to subscribed dashboard clients. No ack,
//! no replay; a slow or dead subscriber is dropped.

use chrono::{DateTime, Utc};
use presence_core::{DeviceId, RoomId, SlotRef, SystemMode, UserId};
use serde::{Deserialize, Serialize};

/// Events broadcast to dashboard subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// Every scan, accepted or rejected.
    DeviceActivity {
        /// Device that reported the scan
        device_id: DeviceId,
        /// Canonical room
        room: RoomId,
        /// Resolved user name, when the tag was known
        #[serde(skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        /// Whether the scan was accepted
        accepted: bool,
        /// Routing outcome in one line
        detail: String,
        /// When the scan arrived
        at: DateTime<Utc>,
    },

    /// A new attendance record was created.
    NewActivity {
        /// Student the record belongs to
        student_id: UserId,
        /// Student display name
        name: String,
        /// Canonical room
        room: RoomId,
        /// Timetable row the attendance counts toward
        slot_ref: SlotRef,
        /// present / late
        status: String,
        /// Points credited
        points: u32,
        /// When the record was created
        at: DateTime<Utc>,
    },

    /// A teacher checked in and the room went live.
    TeacherArrived {
        /// Canonical room
        room: RoomId,
        /// Teacher the session is attributed to
        teacher_id: UserId,
        /// Teacher display name
        teacher_name: String,
        /// Subject display name
        subject_name: String,
        /// True when a substitute checked in
        is_override: bool,
        /// When the check-in happened
        at: DateTime<Utc>,
    },

    /// The global mode changed.
    ModeChanged {
        /// Mode before the transition
        from: SystemMode,
        /// Mode after the transition
        to: SystemMode,
        /// Human-readable cause
        reason: String,
        /// When the transition happened
        at: DateTime<Utc>,
    },

    /// A break is about to end.
    BreakWarning {
        /// Canonical room
        room: RoomId,
        /// Break timetable row
        slot_ref: SlotRef,
        /// When the break ends
        break_ends_at: DateTime<Utc>,
        /// Whole minutes remaining
        minutes_left: i64,
    },
}

impl DashboardEvent {
    /// Room the event concerns, when it is room-scoped.
    ///
    /// Used by the gateway to route buzzer alerts to the right devices.
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            Self::DeviceActivity { room, .. }
            | Self::NewActivity { room, .. }
            | Self::TeacherArrived { room, .. }
            | Self::BreakWarning { room, .. } => Some(room),
            Self::ModeChanged { .. } => None,
        }
    }
}
