//! Attendance ledger.
//!
//! Every write funnels through the store's conditional insert keyed
//! (student, slot, date), so replaying a scan or a snapshot can never
//! produce a second record or a second points credit. The ledger computes
//! status and points; it never decides *whether* a path may run - that is
//! the router's job.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use presence_core::{
    AttendanceRecord, AttendanceSource, AttendanceStatus, DeviceId, InRoomState, RfidTag,
    RoomId, RoomPresence, SlotContext, SlotRef, User, UserId,
};

use crate::config::DaemonConfig;
use crate::store::{AttendanceStore, PresenceStore, StoreError, StoreResult};

/// Errors for ledger operations that must surface as terminal rejections.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record already exists for this (student, slot, date).
    #[error("attendance already recorded")]
    AlreadyRecorded,

    /// Verification attempted with no record present.
    #[error("no attendance record; scan outside first")]
    NoRecord,

    /// Verification attempted twice.
    #[error("attendance already verified")]
    AlreadyVerified,

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a successful late-entry insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateEntry {
    /// present or late
    pub status: AttendanceStatus,

    /// Points credited
    pub points: u32,
}

/// Idempotent attendance records plus per-room presence.
pub struct AttendanceLedger {
    attendance: Arc<dyn AttendanceStore>,
    presence: Arc<dyn PresenceStore>,
    present_points: u32,
    late_points: u32,
    late_threshold: Duration,
}

impl AttendanceLedger {
    /// Creates a ledger over the given collections.
    pub fn new(
        attendance: Arc<dyn AttendanceStore>,
        presence: Arc<dyn PresenceStore>,
        config: &DaemonConfig,
    ) -> Self {
        Self {
            attendance,
            presence,
            present_points: config.present_points,
            late_points: config.late_points,
            late_threshold: config.late_threshold(),
        }
    }

    /// Bulk-creates `present` records for the given students.
    ///
    /// Students who already hold a record for this (slot, date) are
    /// skipped; points are credited only for rows actually inserted.
    /// Returns how many records were created.
    pub async fn create_from_snapshot(
        &self,
        students: &[UserId],
        ctx: &SlotContext,
        now: DateTime<Utc>,
        source: AttendanceSource,
    ) -> StoreResult<u32> {
        let mut created = 0u32;
        for student in students {
            let record = self.build_record(
                student.clone(),
                ctx,
                now,
                AttendanceStatus::Present,
                self.present_points,
                source,
            );
            if self.attendance.insert_if_absent(record).await? {
                created += 1;
            } else {
                debug!(
                    student = %student,
                    slot = %ctx.slot_ref,
                    "Snapshot skipped student with existing record"
                );
            }
        }
        Ok(created)
    }

    /// Records a late entry for one student.
    ///
    /// Status and points follow the elapsed time since the context's
    /// reference time (teacher arrival, or slot start before arrival):
    /// strictly more than the threshold is late, anything up to and
    /// including it is present. Fails with `AlreadyRecorded` if a record
    /// exists; the caller must not credit points in that case.
    pub async fn late_entry(
        &self,
        student: &User,
        ctx: &SlotContext,
        now: DateTime<Utc>,
        device_id: &DeviceId,
        rfid_tag: &RfidTag,
    ) -> Result<LateEntry, LedgerError> {
        let elapsed = now.signed_duration_since(ctx.reference_time);
        let (status, points) = if elapsed > self.late_threshold {
            (AttendanceStatus::Late, self.late_points)
        } else {
            (AttendanceStatus::Present, self.present_points)
        };

        let mut record = self.build_record(
            student.id.clone(),
            ctx,
            now,
            status,
            points,
            AttendanceSource::LateEntry,
        );
        record.device_id = Some(device_id.clone());
        record.rfid_tag = rfid_tag.clone();

        if !self.attendance.insert_if_absent(record).await? {
            return Err(LedgerError::AlreadyRecorded);
        }

        self.set_presence(&student.id, &ctx.room, InRoomState::In, Some(&ctx.slot_ref), now)
            .await?;

        Ok(LateEntry { status, points })
    }

    /// Two-phase confirmation from the inside reader.
    ///
    /// Fails if no record exists ("scan outside first") or if the record
    /// was already verified.
    pub async fn verify(
        &self,
        student: &UserId,
        slot_ref: &SlotRef,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut record = self
            .attendance
            .find(student, slot_ref, now.date_naive())
            .await?
            .ok_or(LedgerError::NoRecord)?;
        if record.is_verified {
            return Err(LedgerError::AlreadyVerified);
        }
        record.verify(now);
        record.in_room_status = InRoomState::In;
        self.attendance.update(&record).await?;
        Ok(())
    }

    /// Flips a student's IN/OUT state for a room.
    ///
    /// Updates the linked attendance record's movement fields when a slot
    /// is supplied and a record exists. Returns the new state.
    pub async fn toggle_movement(
        &self,
        student: &UserId,
        room: &RoomId,
        slot_ref: Option<&SlotRef>,
        now: DateTime<Utc>,
    ) -> StoreResult<InRoomState> {
        let current = self.presence_state(student, room).await?;
        let next = current.toggled();
        self.set_presence(student, room, next, slot_ref, now).await?;

        if let Some(slot_ref) = slot_ref {
            if let Some(mut record) =
                self.attendance.find(student, slot_ref, now.date_naive()).await?
            {
                record.in_room_status = next;
                record.last_movement_at = now;
                if let Err(e) = self.attendance.update(&record).await {
                    // Presence already moved; the linked record catches up
                    // on the next movement.
                    warn!(student = %student, error = %e, "Failed to update record movement");
                }
            }
        }

        Ok(next)
    }

    /// Upserts the presence row for (student, room).
    pub async fn set_presence(
        &self,
        student: &UserId,
        room: &RoomId,
        state: InRoomState,
        slot_ref: Option<&SlotRef>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut presence = RoomPresence::new(student.clone(), room.clone(), state, now);
        presence.slot_ref = slot_ref.cloned();
        self.presence.upsert(presence).await
    }

    /// Current presence state for (student, room); `Unknown` when no row
    /// exists.
    pub async fn presence_state(
        &self,
        student: &UserId,
        room: &RoomId,
    ) -> StoreResult<InRoomState> {
        Ok(self
            .presence
            .get(student, room)
            .await?
            .map(|p| p.status)
            .unwrap_or_default())
    }

    fn build_record(
        &self,
        student: UserId,
        ctx: &SlotContext,
        now: DateTime<Utc>,
        status: AttendanceStatus,
        points: u32,
        source: AttendanceSource,
    ) -> AttendanceRecord {
        let mut record = AttendanceRecord::new(
            student,
            ctx.slot_ref.clone(),
            now,
            status,
            points,
            source,
            InRoomState::In,
        );
        record.subject_name = Some(ctx.subject_name.clone());
        record.subject_code = ctx.subject_code.clone();
        record.teacher_id = Some(ctx.teacher_id.clone());
        record.organization_id = ctx.organization_id.clone();
        record
    }
}
