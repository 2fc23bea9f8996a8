//! Domain-specific error types following panic-free policy.

use crate::ids::{RoomId, SessionId, UserId};
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// Session not found in the registry
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    /// No active slot exists for the room
    #[error("no active slot in room: {room}")]
    NoActiveSlot { room: RoomId },

    /// User not found for a tag or id
    #[error("user not found: {user_id}")]
    UserNotFound { user_id: UserId },

    /// Invalid field value
    #[error("invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Parse error for incoming data
    #[error("failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
