//! presenced - RFID classroom presence daemon
//!
//! This crate provides the core infrastructure for the presence daemon:
//! - `store` - document-store traits plus the in-memory implementation
//! - `schedule` - read-only timetable projections
//! - `ledger` - idempotent attendance records and room presence
//! - `sessions` - persisted session lifecycle (find-or-create, sweeps)
//! - `poller` - teacher-arrival snapshot attendance
//! - `mode` / `tracker` - the global mode and per-room slot state machines
//! - `coordinator` - the single-owner actor routing every scan and tick
//! - `gateway` - TCP server for reader devices and dashboard clients
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌──────────────────────────────┐
//! │  GatewayServer  │─────▶│      CoordinatorActor        │
//! │  (TCP readers)  │      │  (mode + per-room slot map)  │
//! └────────┬────────┘      └──────┬────────────────┬──────┘
//!          │ connections          │ stores         │ events
//!          ▼                      ▼                ▼
//! ┌─────────────────┐      ┌─────────────┐  ┌──────────────────┐
//! │ConnectionHandler│      │ Ledger /    │  │ broadcast::Sender│
//! │  (per reader)   │      │ Sessions /  │  │ (dashboards +    │
//! └─────────────────┘      │ Poller      │  │  buzzer alerts)  │
//!                          └─────────────┘  └──────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate avoids `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` and `todo!()`. Fallible operations return
//! `Result` or `Option`; channel operations handle closure gracefully.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod ledger;
pub mod mode;
pub mod notify;
pub mod poller;
pub mod schedule;
pub mod sessions;
pub mod store;
pub mod tracker;
