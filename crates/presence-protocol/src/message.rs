//! Protocol message types for device communication.

use presence_core::{DeviceId, InRoomState, RfidTag, Role};
use serde::{Deserialize, Serialize};

/// Messages sent by reader devices (and dashboard clients) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Device handshake. Must be the first message on a connection.
    Authenticate {
        /// Device identifier configured in firmware
        device_id: DeviceId,
    },

    /// An RFID tag was read.
    RfidScan {
        /// Raw tag value
        rfid_tag: RfidTag,
        /// Device identifier (repeated per scan by reader firmware)
        device_id: DeviceId,
    },

    /// Dashboard client requesting the event feed.
    Subscribe,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

impl DeviceMessage {
    /// Creates an authenticate message.
    pub fn authenticate(device_id: impl Into<DeviceId>) -> Self {
        Self::Authenticate {
            device_id: device_id.into(),
        }
    }

    /// Creates a scan message.
    pub fn rfid_scan(rfid_tag: impl Into<RfidTag>, device_id: impl Into<DeviceId>) -> Self {
        Self::RfidScan {
            rfid_tag: rfid_tag.into(),
            device_id: device_id.into(),
        }
    }
}

/// Buzzer pattern hint for the reader's feedback tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeepPattern {
    /// Accepted scan.
    Single,

    /// Benign rejection (duplicate action, already verified).
    Double,

    /// Hard rejection (unknown tag, closed, role/placement violation).
    Long,
}

/// IN/OUT movement reported back to the device display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Movement {
    In,
    Out,
}

impl Movement {
    /// Converts a presence state into a reportable movement, when definite.
    pub fn from_state(state: InRoomState) -> Option<Self> {
        match state {
            InRoomState::In => Some(Self::In),
            InRoomState::Out => Some(Self::Out),
            InRoomState::Unknown => None,
        }
    }
}

/// Minimal user info echoed on the reader display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanUser {
    /// Display name
    pub name: String,

    /// Registration / roll number
    pub reg: String,
}

/// Messages sent from the daemon to devices and dashboard clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake result.
    Authenticated {
        /// Whether the device was accepted
        success: bool,
        /// Rejection detail, when refused
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Outcome of one scan.
    ScanResult {
        /// Whether the scan was accepted
        success: bool,
        /// Human-readable outcome for the reader display
        message: String,
        /// Outcome classification ("present", "late", "verified", ...)
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        /// Scanned user, when the tag resolved
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<ScanUser>,
        /// Role of the scanned user
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        /// Resulting movement, for movement toggles
        #[serde(skip_serializing_if = "Option::is_none")]
        movement: Option<Movement>,
        /// Points credited by this scan
        #[serde(skip_serializing_if = "Option::is_none")]
        points: Option<u32>,
        /// Feedback tone
        #[serde(skip_serializing_if = "Option::is_none")]
        beep_pattern: Option<BeepPattern>,
        /// True when a substitute teacher check-in was recorded
        #[serde(skip_serializing_if = "Option::is_none")]
        is_override: Option<bool>,
    },

    /// Server-initiated room alert (break ending soon).
    BuzzerAlert {
        /// How long the buzzer should sound
        duration_secs: u32,
        /// Alert text for devices with displays
        message: String,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
    },
}

impl ServerMessage {
    /// Creates a successful handshake response.
    pub fn authenticated() -> Self {
        Self::Authenticated {
            success: true,
            message: None,
        }
    }

    /// Creates a refused handshake response.
    pub fn auth_rejected(reason: &str) -> Self {
        Self::Authenticated {
            success: false,
            message: Some(reason.to_string()),
        }
    }

    /// Creates a buzzer alert.
    pub fn buzzer_alert(duration_secs: u32, message: &str) -> Self {
        Self::BuzzerAlert {
            duration_secs,
            message: message.to_string(),
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}
