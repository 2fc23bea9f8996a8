//! Presence Protocol - Wire protocol for reader and dashboard communication
//!
//! This crate provides message types for communication between RFID reader
//! devices and the daemon, and between the daemon and dashboard clients.
//! All frames are line-delimited JSON with an internal `type` tag.

pub mod dashboard;
pub mod message;

pub use dashboard::DashboardEvent;
pub use message::{BeepPattern, DeviceMessage, Movement, ScanUser, ServerMessage};
