//! Type-safe identifiers for the presence domain.
//!
//! Each identifier wraps a plain string so that a room id can never be
//! passed where a device id is expected. All wrappers serialize
//! transparently, matching the document shapes in the store.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the underlying string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Unique identifier for a user (teacher or student).
    UserId
}

string_id! {
    /// Unique identifier for a reader device.
    DeviceId
}

string_id! {
    /// Unique identifier for a class (enrollment group).
    ClassId
}

string_id! {
    /// Unique identifier for an organization (campus / school).
    OrgId
}

string_id! {
    /// Raw RFID tag value as reported by a reader.
    RfidTag
}

string_id! {
    /// Reference to a timetable slot (one scheduled period definition).
    SlotRef
}

/// Canonical identifier for a physical room.
///
/// Reader firmware is configured by hand and the same room shows up as
/// `"R101"`, `"room 101"`, or `"RM-101"` across devices. All ingress paths
/// normalize through [`RoomId::canonical`] so the per-room state map has
/// exactly one entry per physical room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Creates a room id from an already-canonical string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Normalizes a raw room label into its canonical form.
    ///
    /// Lowercases, trims, strips a leading `room`/`rm` word and drops
    /// separator characters, so `"Room 101"`, `"RM-101"` and `"r101"` all
    /// map to `"r101"` (a bare number keeps a `r` prefix for readability).
    pub fn canonical(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        let stripped = lowered
            .strip_prefix("room")
            .or_else(|| lowered.strip_prefix("rm"))
            .unwrap_or(&lowered);
        let compact: String = stripped
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if compact.chars().all(|c| c.is_ascii_digit()) && !compact.is_empty() {
            Self(format!("r{compact}"))
        } else {
            Self(compact)
        }
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a persisted session (one room/slot occurrence).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_canonicalization() {
        assert_eq!(RoomId::canonical("Room 101").as_str(), "r101");
        assert_eq!(RoomId::canonical("RM-101").as_str(), "r101");
        assert_eq!(RoomId::canonical("r101").as_str(), "r101");
        assert_eq!(RoomId::canonical(" 101 ").as_str(), "r101");
        assert_eq!(RoomId::canonical("LAB_B").as_str(), "labb");
    }

    #[test]
    fn test_room_canonical_is_idempotent() {
        let once = RoomId::canonical("Room 204");
        let twice = RoomId::canonical(once.as_str());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_session_id_generate_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_session_id_short() {
        let id = SessionId::new("8e11bfb5-7dc2-432b-9206-928fa5c35731");
        assert_eq!(id.short(), "8e11bfb5");

        let tiny = SessionId::new("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let tag = RfidTag::new("04:A3:22:F1");
        let json = serde_json::to_string(&tag).expect("serialize");
        assert_eq!(json, "\"04:A3:22:F1\"");
    }
}
