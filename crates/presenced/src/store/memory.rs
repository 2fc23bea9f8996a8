//! In-memory store implementation.
//!
//! Backs tests, development and single-node deployments. Every collection
//! is guarded by its own mutex; the conditional inserts check and insert
//! under a single lock acquisition, which is what makes them atomic.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use presence_core::{
    AttendanceRecord, ClassId, DeviceId, DeviceRecord, RfidTag, RoomId, RoomPresence,
    ScanLogEntry, SessionId, SessionRecord, SlotRef, User, UserId,
};

use super::{
    AttendanceStore, DeviceStore, PresenceStore, ScanLogStore, SessionInsert, SessionStore,
    StoreResult, UserStore,
};

/// Mutex-guarded in-memory collections.
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    attendance: Mutex<HashMap<(UserId, SlotRef, NaiveDate), AttendanceRecord>>,
    presence: Mutex<HashMap<(UserId, RoomId), RoomPresence>>,
    devices: Mutex<HashMap<DeviceId, DeviceRecord>>,
    users: Mutex<HashMap<UserId, User>>,
    scan_log: Mutex<Vec<ScanLogEntry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            attendance: Mutex::new(HashMap::new()),
            presence: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            scan_log: Mutex::new(Vec::new()),
        }
    }

    /// Seeds a user. Not part of the `UserStore` trait: users are owned by
    /// the admin layer; the daemon only reads them.
    pub fn add_user(&self, user: User) {
        lock(&self.users).insert(user.id.clone(), user);
    }

    /// Seeds a device.
    pub fn add_device(&self, device: DeviceRecord) {
        lock(&self.devices).insert(device.device_id.clone(), device);
    }

    /// Number of stored attendance records.
    pub fn attendance_count(&self) -> usize {
        lock(&self.attendance).len()
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Number of scan log entries.
    pub fn scan_log_count(&self) -> usize {
        lock(&self.scan_log).len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_if_vacant(&self, record: SessionRecord) -> StoreResult<SessionInsert> {
        let mut sessions = lock(&self.sessions);
        let existing = sessions
            .values()
            .find(|s| {
                !s.status.is_terminal()
                    && s.room == record.room
                    && s.slot_ref == record.slot_ref
            })
            .cloned();
        if let Some(existing) = existing {
            return Ok(SessionInsert::Existing(existing));
        }
        sessions.insert(record.session_id.clone(), record.clone());
        Ok(SessionInsert::Inserted(record))
    }

    async fn get(&self, id: &SessionId) -> StoreResult<Option<SessionRecord>> {
        Ok(lock(&self.sessions).get(id).cloned())
    }

    async fn find_active_in_room(&self, room: &RoomId) -> StoreResult<Option<SessionRecord>> {
        Ok(lock(&self.sessions)
            .values()
            .find(|s| !s.status.is_terminal() && s.room == *room)
            .cloned())
    }

    async fn update(&self, record: &SessionRecord) -> StoreResult<()> {
        lock(&self.sessions).insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn list_non_terminal(&self) -> StoreResult<Vec<SessionRecord>> {
        Ok(lock(&self.sessions)
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn insert_if_absent(&self, record: AttendanceRecord) -> StoreResult<bool> {
        let key = (
            record.student_id.clone(),
            record.slot_ref.clone(),
            record.date,
        );
        let mut attendance = lock(&self.attendance);
        if attendance.contains_key(&key) {
            return Ok(false);
        }
        attendance.insert(key, record);
        Ok(true)
    }

    async fn find(
        &self,
        student: &UserId,
        slot_ref: &SlotRef,
        date: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let key = (student.clone(), slot_ref.clone(), date);
        Ok(lock(&self.attendance).get(&key).cloned())
    }

    async fn update(&self, record: &AttendanceRecord) -> StoreResult<()> {
        let key = (
            record.student_id.clone(),
            record.slot_ref.clone(),
            record.date,
        );
        lock(&self.attendance).insert(key, record.clone());
        Ok(())
    }

    async fn list_for_slot(
        &self,
        slot_ref: &SlotRef,
        date: NaiveDate,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        Ok(lock(&self.attendance)
            .values()
            .filter(|r| r.slot_ref == *slot_ref && r.date == date)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn upsert(&self, presence: RoomPresence) -> StoreResult<()> {
        let key = (presence.student_id.clone(), presence.room.clone());
        lock(&self.presence).insert(key, presence);
        Ok(())
    }

    async fn get(&self, student: &UserId, room: &RoomId) -> StoreResult<Option<RoomPresence>> {
        let key = (student.clone(), room.clone());
        Ok(lock(&self.presence).get(&key).cloned())
    }

    async fn get_many(
        &self,
        students: &[UserId],
        room: &RoomId,
    ) -> StoreResult<Vec<RoomPresence>> {
        let presence = lock(&self.presence);
        Ok(students
            .iter()
            .filter_map(|s| presence.get(&(s.clone(), room.clone())).cloned())
            .collect())
    }

    async fn reset_all(&self) -> StoreResult<u64> {
        let mut presence = lock(&self.presence);
        let count = presence.len() as u64;
        presence.clear();
        Ok(count)
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get(&self, id: &DeviceId) -> StoreResult<Option<DeviceRecord>> {
        Ok(lock(&self.devices).get(id).cloned())
    }

    async fn upsert(&self, record: DeviceRecord) -> StoreResult<()> {
        lock(&self.devices).insert(record.device_id.clone(), record);
        Ok(())
    }

    async fn set_online(
        &self,
        id: &DeviceId,
        online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<DeviceRecord>> {
        let mut devices = lock(&self.devices);
        Ok(devices.get_mut(id).map(|d| {
            d.online = online;
            d.last_seen = Some(at);
            d.clone()
        }))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_tag(&self, tag: &RfidTag) -> StoreResult<Option<User>> {
        Ok(lock(&self.users)
            .values()
            .find(|u| u.rfid_tag == *tag)
            .cloned())
    }

    async fn get(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(lock(&self.users).get(id).cloned())
    }

    async fn list_class_students(&self, class_id: &ClassId) -> StoreResult<Vec<User>> {
        let mut students: Vec<User> = lock(&self.users)
            .values()
            .filter(|u| u.is_student() && u.class_id.as_ref() == Some(class_id))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(students)
    }
}

#[async_trait]
impl ScanLogStore for MemoryStore {
    async fn append(&self, entry: ScanLogEntry) -> StoreResult<()> {
        lock(&self.scan_log).push(entry);
        Ok(())
    }
}
