//! Presence Core - Shared types for RFID classroom presence tracking
//!
//! This crate provides the core domain types shared between
//! the daemon (presenced) and the wire protocol (presence-protocol).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod attendance;
pub mod device;
pub mod error;
pub mod ids;
pub mod mode;
pub mod schedule;
pub mod session;
pub mod slot;
pub mod user;

// Re-exports for convenience
pub use attendance::{
    AttendanceRecord, AttendanceSource, AttendanceStatus, InRoomState, RoomPresence, SlotContext,
};
pub use device::{DeviceRecord, Placement, ScanLogEntry};
pub use error::{DomainError, DomainResult};
pub use ids::{ClassId, DeviceId, OrgId, RfidTag, RoomId, SessionId, SlotRef, UserId};
pub use mode::{GateAction, ModeTransition, SystemMode};
pub use schedule::{EntryWindow, SlotKind, TimetableSlot};
pub use session::{ArrivalSnapshot, SessionRecord, SessionStatus};
pub use slot::{ActiveSlot, SlotStatus};
pub use user::{Role, User};
