//! Reader devices and the raw scan audit log.

use crate::ids::{DeviceId, RfidTag, RoomId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a reader is mounted relative to the room's doorway.
///
/// Placement decides the entry semantics of a scan: outside readers
/// handle entry/check-in, inside readers handle verification and
/// re-verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Outside,
    Inside,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outside => write!(f, "outside"),
            Self::Inside => write!(f, "inside"),
        }
    }
}

/// A provisioned reader device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Unique device id (configured in firmware)
    pub device_id: DeviceId,

    /// Canonical room the reader serves
    pub room: RoomId,

    /// Mount placement
    pub placement: Placement,

    /// Whether the device currently holds a connection
    pub online: bool,

    /// Last handshake or scan from this device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    /// Creates a device record in the offline state.
    pub fn new(device_id: DeviceId, room: RoomId, placement: Placement) -> Self {
        Self {
            device_id,
            room,
            placement,
            online: false,
            last_seen: None,
        }
    }
}

/// One raw scan, logged before any routing decision.
///
/// Append-only and best-effort: a failed log write never blocks the scan
/// response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanLogEntry {
    /// Unique log entry id
    pub id: String,

    /// Device that reported the scan
    pub device_id: DeviceId,

    /// Raw tag value
    pub rfid_tag: RfidTag,

    /// Resolved user, when the tag was known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    /// Whether the scan was accepted
    pub accepted: bool,

    /// Routing outcome in one line ("late entry", "unknown tag", ...)
    pub detail: String,

    /// When the scan arrived
    pub at: DateTime<Utc>,
}

impl ScanLogEntry {
    /// Creates a log entry, generating a fresh id.
    pub fn new(
        device_id: DeviceId,
        rfid_tag: RfidTag,
        user_id: Option<UserId>,
        accepted: bool,
        detail: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id,
            rfid_tag,
            user_id,
            accepted,
            detail: detail.into(),
            at,
        }
    }
}
