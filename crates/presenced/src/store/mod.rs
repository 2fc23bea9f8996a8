//! Document-store interface.
//!
//! The daemon persists sessions, attendance, room presence, devices and the
//! raw scan log through narrow, object-safe traits. Any backend offering
//! atomic conditional inserts and bulk filtered reads can implement them;
//! the bundled [`MemoryStore`] keeps everything in mutex-guarded maps and
//! is used for tests, development and single-node deployments.
//!
//! The two conditional inserts are the load-bearing operations:
//! - [`AttendanceStore::insert_if_absent`] keyed (student, slot, date) is
//!   what makes attendance idempotent and points exactly-once.
//! - [`SessionStore::insert_if_vacant`] keyed (room, slot, non-terminal)
//!   guards session uniqueness across daemon processes.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use presence_core::{
    AttendanceRecord, ClassId, DeviceId, DeviceRecord, RfidTag, RoomId, RoomPresence,
    ScanLogEntry, SessionId, SessionRecord, SlotRef, User, UserId,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by store implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The referenced document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Backend failure (connection, serialization, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a conditional session insert.
#[derive(Debug, Clone)]
pub enum SessionInsert {
    /// No competing session existed; the record was stored.
    Inserted(SessionRecord),

    /// A non-terminal session for the same room and slot already existed;
    /// the caller must reuse it.
    Existing(SessionRecord),
}

impl SessionInsert {
    /// The stored or pre-existing record, either way.
    pub fn into_record(self) -> SessionRecord {
        match self {
            Self::Inserted(r) | Self::Existing(r) => r,
        }
    }
}

/// Persisted sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts the record unless a non-terminal session already exists for
    /// the same room and slot. Atomic: two concurrent calls for the same
    /// occurrence yield one `Inserted` and one `Existing`.
    async fn insert_if_vacant(&self, record: SessionRecord) -> StoreResult<SessionInsert>;

    /// Fetches a session by id.
    async fn get(&self, id: &SessionId) -> StoreResult<Option<SessionRecord>>;

    /// Finds the non-terminal session occupying a room, if any.
    async fn find_active_in_room(&self, room: &RoomId) -> StoreResult<Option<SessionRecord>>;

    /// Replaces a session document.
    async fn update(&self, record: &SessionRecord) -> StoreResult<()>;

    /// Lists every non-terminal session (startup rehydration, sweeps).
    async fn list_non_terminal(&self) -> StoreResult<Vec<SessionRecord>>;
}

/// Persisted attendance records.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Inserts the record unless one already exists for the same
    /// (student, slot, date). Returns true if the record was stored.
    async fn insert_if_absent(&self, record: AttendanceRecord) -> StoreResult<bool>;

    /// Fetches the record for (student, slot, date).
    async fn find(
        &self,
        student: &UserId,
        slot_ref: &SlotRef,
        date: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>>;

    /// Replaces an attendance document.
    async fn update(&self, record: &AttendanceRecord) -> StoreResult<()>;

    /// Lists all records for a slot occurrence.
    async fn list_for_slot(
        &self,
        slot_ref: &SlotRef,
        date: NaiveDate,
    ) -> StoreResult<Vec<AttendanceRecord>>;
}

/// Per-(student, room) presence state.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Inserts or replaces the presence row for (student, room).
    async fn upsert(&self, presence: RoomPresence) -> StoreResult<()>;

    /// Fetches the presence row for (student, room).
    async fn get(&self, student: &UserId, room: &RoomId) -> StoreResult<Option<RoomPresence>>;

    /// Bulk-fetches presence rows for many students in one room.
    ///
    /// Students without a row are simply absent from the result.
    async fn get_many(
        &self,
        students: &[UserId],
        room: &RoomId,
    ) -> StoreResult<Vec<RoomPresence>>;

    /// Clears all presence rows (the nightly reset on entering Closed).
    /// Returns how many rows were removed.
    async fn reset_all(&self) -> StoreResult<u64>;
}

/// Provisioned reader devices.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Fetches a device by id.
    async fn get(&self, id: &DeviceId) -> StoreResult<Option<DeviceRecord>>;

    /// Inserts or replaces a device document.
    async fn upsert(&self, record: DeviceRecord) -> StoreResult<()>;

    /// Marks a device online and stamps `last_seen`.
    ///
    /// Returns the updated record, or `None` for an unknown device.
    async fn set_online(
        &self,
        id: &DeviceId,
        online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<DeviceRecord>>;
}

/// Users (read-mostly; owned by the admin layer).
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Resolves an RFID tag to a user.
    async fn find_by_tag(&self, tag: &RfidTag) -> StoreResult<Option<User>>;

    /// Fetches a user by id.
    async fn get(&self, id: &UserId) -> StoreResult<Option<User>>;

    /// Lists the students of a class.
    async fn list_class_students(&self, class_id: &ClassId) -> StoreResult<Vec<User>>;
}

/// Append-only raw scan log.
#[async_trait]
pub trait ScanLogStore: Send + Sync {
    /// Appends a scan log entry.
    async fn append(&self, entry: ScanLogEntry) -> StoreResult<()>;
}

/// The full set of collections the daemon works with.
///
/// Cheap to clone; every field is an `Arc` onto a trait object so backends
/// can be mixed (and tests can share one `MemoryStore` across all six).
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub attendance: Arc<dyn AttendanceStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub users: Arc<dyn UserStore>,
    pub scan_log: Arc<dyn ScanLogStore>,
}

impl Stores {
    /// Builds all collections over one shared in-memory store.
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let stores = Self {
            sessions: memory.clone(),
            attendance: memory.clone(),
            presence: memory.clone(),
            devices: memory.clone(),
            users: memory.clone(),
            scan_log: memory.clone(),
        };
        (stores, memory)
    }
}
