//! Coordinator actor commands, errors, and scan outcomes.
//!
//! This module defines the message types for communicating with the
//! `CoordinatorActor`:
//! - `CoordinatorCommand`: commands sent to the actor
//! - `CoordinatorError`: errors surfaced to callers
//! - `ScanOutcome`: the terminal result of routing one scan
//!
//! All types are designed for async message passing and follow the
//! panic-free policy.

use thiserror::Error;
use tokio::sync::oneshot;

use presence_core::{
    ActiveSlot, AttendanceStatus, DeviceId, DeviceRecord, InRoomState, ModeTransition, RfidTag,
    Role, RoomId, SystemMode, User,
};
use presence_protocol::{BeepPattern, Movement, ScanUser, ServerMessage};

use crate::store::StoreError;

/// Commands sent to the coordinator actor.
///
/// Request-response commands carry a oneshot responder; tick commands are
/// fire-and-forget.
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Device handshake: mark the device online and return its record.
    AuthenticateDevice {
        /// Device identifier from the handshake frame
        device_id: DeviceId,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<DeviceRecord, CoordinatorError>>,
    },

    /// A device connection dropped; mark it offline.
    DeviceDisconnected {
        /// Device identifier bound to the dropped connection
        device_id: DeviceId,
    },

    /// Route one RFID scan.
    ///
    /// Always resolves to a terminal `ScanOutcome`; internal failures are
    /// reported as a rejected outcome, never as a dropped responder.
    Scan {
        /// Device that reported the scan
        device_id: DeviceId,
        /// Raw tag value
        rfid_tag: RfidTag,
        /// Channel to send the outcome
        respond_to: oneshot::Sender<ScanOutcome>,
    },

    /// Periodic mode recomputation.
    ModeTick,

    /// Periodic slot time-check and schedule sync.
    SlotTick,

    /// Periodic expired/abandoned session sweep.
    Sweep,

    /// Get the current global mode.
    GetMode {
        /// Channel to send the result
        respond_to: oneshot::Sender<SystemMode>,
    },

    /// Get the mode transition history.
    GetModeHistory {
        /// Channel to send the result
        respond_to: oneshot::Sender<Vec<ModeTransition>>,
    },

    /// Get the active slot for a room.
    GetSlot {
        /// Canonical room
        room: RoomId,
        /// Channel to send the result
        respond_to: oneshot::Sender<Option<ActiveSlot>>,
    },
}

/// Errors that can occur during coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The device id is not provisioned.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// The actor has shut down.
    #[error("coordinator unavailable")]
    ChannelClosed,

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Terminal result of routing one scan.
///
/// Carries everything the gateway needs to build a `scan_result` frame.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Whether the scan was accepted
    pub accepted: bool,

    /// Human-readable outcome for the reader display
    pub message: String,

    /// Outcome classification ("present", "late", "verified", ...)
    pub status: Option<String>,

    /// Scanned user, when the tag resolved
    pub user: Option<ScanUser>,

    /// Role of the scanned user
    pub role: Option<Role>,

    /// Resulting movement, for movement toggles
    pub movement: Option<Movement>,

    /// Points credited by this scan
    pub points: Option<u32>,

    /// Feedback tone
    pub beep: BeepPattern,

    /// True when a substitute teacher check-in was recorded
    pub is_override: bool,
}

impl ScanOutcome {
    /// An accepted outcome with a single beep.
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
            status: None,
            user: None,
            role: None,
            movement: None,
            points: None,
            beep: BeepPattern::Single,
            is_override: false,
        }
    }

    /// A rejected outcome with the given beep pattern.
    pub fn rejected(message: impl Into<String>, beep: BeepPattern) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            status: None,
            user: None,
            role: None,
            movement: None,
            points: None,
            beep,
            is_override: false,
        }
    }

    /// Sets the status classification.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Fills user display fields and role from the resolved user.
    pub fn with_user(mut self, user: &User) -> Self {
        self.user = Some(ScanUser {
            name: user.name.clone(),
            reg: user.reg_no.clone(),
        });
        self.role = Some(user.role);
        self
    }

    /// Sets the resulting movement.
    pub fn with_movement(mut self, state: InRoomState) -> Self {
        self.movement = Movement::from_state(state);
        self
    }

    /// Sets the points credited.
    pub fn with_points(mut self, points: u32) -> Self {
        self.points = Some(points);
        self
    }

    /// Marks the outcome as an override check-in.
    pub fn with_override(mut self, is_override: bool) -> Self {
        self.is_override = is_override;
        self
    }

    /// Sets the status from an attendance classification.
    pub fn with_attendance_status(self, status: AttendanceStatus) -> Self {
        self.with_status(status.to_string())
    }

    /// Converts into the wire frame for the device.
    pub fn into_message(self) -> ServerMessage {
        ServerMessage::ScanResult {
            success: self.accepted,
            message: self.message,
            status: self.status,
            user: self.user,
            role: self.role,
            movement: self.movement,
            points: self.points,
            beep_pattern: Some(self.beep),
            is_override: if self.is_override { Some(true) } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_outcome_defaults() {
        let outcome = ScanOutcome::rejected("Unknown card", BeepPattern::Long);
        assert!(!outcome.accepted);
        assert!(outcome.status.is_none());
        assert!(outcome.points.is_none());
        assert!(!outcome.is_override);
    }

    #[test]
    fn test_into_message_omits_false_override() {
        let msg = ScanOutcome::accepted("ok").into_message();
        match msg {
            ServerMessage::ScanResult { is_override, beep_pattern, .. } => {
                assert!(is_override.is_none());
                assert_eq!(beep_pattern, Some(BeepPattern::Single));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_with_movement_drops_unknown() {
        let outcome = ScanOutcome::accepted("ok").with_movement(InRoomState::Unknown);
        assert!(outcome.movement.is_none());

        let outcome = ScanOutcome::accepted("ok").with_movement(InRoomState::In);
        assert_eq!(outcome.movement, Some(Movement::In));
    }
}
