//! Persisted session lifecycle.
//!
//! One `SessionRecord` per (room, slot) occurrence, created by whichever
//! event gets there first and reused by everyone after. Expired and
//! abandoned sessions self-heal: lazily on the next availability check, or
//! via the periodic sweeps.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use presence_core::{
    RoomId, SessionId, SessionRecord, SessionStatus, UserId,
};

use crate::store::{SessionInsert, SessionStore, StoreError, StoreResult};

/// Errors for session registry operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The referenced session does not exist.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// A teacher already checked in for this session.
    #[error("session already has a teacher checked in")]
    AlreadyCheckedIn,

    /// The session has already closed or been cancelled.
    #[error("session is terminal: {0}")]
    Terminal(SessionStatus),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a room availability check.
#[derive(Debug, Clone)]
pub struct RoomAvailability {
    /// True when no live session occupies the room
    pub available: bool,

    /// The occupying session, when present
    pub active_session: Option<SessionRecord>,

    /// Teacher the occupying session is attributed to
    pub occupied_by: Option<UserId>,

    /// When the occupying session ends
    pub occupied_until: Option<DateTime<Utc>>,
}

/// Result of a teacher check-in.
#[derive(Debug, Clone)]
pub struct CheckInResult {
    /// True when the arriving teacher differs from the scheduled one
    pub is_override: bool,

    /// The updated session
    pub session: SessionRecord,
}

/// Registry over the persisted session collection.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
}

impl SessionRegistry {
    /// Creates a registry over the given store.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Reports whether a room is free, lazily closing a session whose end
    /// time has already passed.
    pub async fn check_room_availability(
        &self,
        room: &RoomId,
        now: DateTime<Utc>,
    ) -> StoreResult<RoomAvailability> {
        let Some(mut session) = self.store.find_active_in_room(room).await? else {
            return Ok(RoomAvailability {
                available: true,
                active_session: None,
                occupied_by: None,
                occupied_until: None,
            });
        };

        if session.is_expired(now) {
            session.status = SessionStatus::Closed;
            session.updated_at = now;
            self.store.update(&session).await?;
            info!(
                session_id = %session.session_id,
                room = %room,
                "Lazily closed expired session"
            );
            return Ok(RoomAvailability {
                available: true,
                active_session: None,
                occupied_by: None,
                occupied_until: None,
            });
        }

        Ok(RoomAvailability {
            available: false,
            occupied_by: Some(session.effective_teacher().clone()),
            occupied_until: Some(session.end_time),
            active_session: Some(session),
        })
    }

    /// Creates a session, or returns the existing non-terminal session for
    /// the same room and slot.
    pub async fn create_session(&self, record: SessionRecord) -> StoreResult<SessionRecord> {
        match self.store.insert_if_vacant(record).await? {
            SessionInsert::Inserted(record) => {
                info!(
                    session_id = %record.session_id,
                    room = %record.room,
                    subject = %record.subject_name,
                    "Session created"
                );
                Ok(record)
            }
            SessionInsert::Existing(existing) => {
                debug!(
                    session_id = %existing.session_id,
                    room = %existing.room,
                    "Reusing existing session"
                );
                Ok(existing)
            }
        }
    }

    /// Fetches a session by id.
    pub async fn get(&self, session_id: &SessionId) -> Result<SessionRecord, SessionError> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))
    }

    /// Records the teacher check-in. At most one check-in succeeds per
    /// session; any later attempt (by any teacher) is a duplicate.
    pub async fn teacher_check_in(
        &self,
        session_id: &SessionId,
        teacher_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<CheckInResult, SessionError> {
        let mut session = self.get(session_id).await?;
        if session.status.is_terminal() {
            return Err(SessionError::Terminal(session.status));
        }
        if session.teacher_arrived_at.is_some() {
            return Err(SessionError::AlreadyCheckedIn);
        }

        let is_override = *teacher_id != session.teacher_id;
        if is_override {
            session.actual_teacher_id = Some(teacher_id.clone());
            session.is_overridden = true;
        }
        session.teacher_arrived_at = Some(now);
        session.status = SessionStatus::Active;
        session.updated_at = now;
        self.store.update(&session).await?;

        info!(
            session_id = %session.session_id,
            teacher = %teacher_id,
            is_override,
            "Teacher checked in"
        );

        Ok(CheckInResult {
            is_override,
            session,
        })
    }

    /// Sets a session's status (mirroring the in-memory slot machine).
    ///
    /// Extends the end time when supplied, used when a session is carried
    /// through a break past its original end.
    pub async fn update_status(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
        extend_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, SessionError> {
        let mut session = self.get(session_id).await?;
        if session.status.is_terminal() && !status.is_terminal() {
            return Err(SessionError::Terminal(session.status));
        }
        session.status = status;
        if let Some(until) = extend_until {
            session.end_time = until;
        }
        session.updated_at = now;
        self.store.update(&session).await?;
        Ok(session)
    }

    /// Closes a session.
    pub async fn close_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.update_status(session_id, SessionStatus::Closed, None, now)
            .await?;
        Ok(())
    }

    /// Adds a student to the session's re-verified set.
    ///
    /// Returns false if the student was already recorded.
    pub async fn mark_student_re_verified(
        &self,
        session_id: &SessionId,
        student: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        let mut session = self.get(session_id).await?;
        if session.re_verified_students.contains(student) {
            return Ok(false);
        }
        session.re_verified_students.push(student.clone());
        session.updated_at = now;
        self.store.update(&session).await?;
        Ok(true)
    }

    /// The students re-verified during this session's break.
    pub async fn re_verified_students(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<UserId>, SessionError> {
        Ok(self.get(session_id).await?.re_verified_students)
    }

    /// Latches the poller trigger and stores the arrival snapshot counts.
    pub async fn set_poller_triggered(
        &self,
        session_id: &SessionId,
        inside_count: u32,
        outside_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut session = self.get(session_id).await?;
        session.attendance_poller_triggered = true;
        session.teacher_arrival_snapshot = Some(presence_core::ArrivalSnapshot {
            at: now,
            inside_count,
            outside_count,
        });
        session.updated_at = now;
        self.store.update(&session).await?;
        Ok(())
    }

    /// Closes every non-terminal session whose end time has passed.
    ///
    /// Safe no-op when nothing is due. Returns how many sessions closed.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> StoreResult<u32> {
        let mut closed = 0u32;
        for mut session in self.store.list_non_terminal().await? {
            if session.is_expired(now) {
                session.status = SessionStatus::Closed;
                session.updated_at = now;
                if let Err(e) = self.store.update(&session).await {
                    warn!(session_id = %session.session_id, error = %e, "Failed to close expired session");
                    continue;
                }
                closed += 1;
            }
        }
        if closed > 0 {
            info!(count = closed, "Closed expired sessions");
        }
        Ok(closed)
    }

    /// Cancels sessions still waiting for a teacher past the grace period.
    ///
    /// Safe no-op when nothing is due. Returns how many sessions were
    /// cancelled.
    pub async fn cancel_abandoned(
        &self,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<u32> {
        let mut cancelled = 0u32;
        for mut session in self.store.list_non_terminal().await? {
            if session.status == SessionStatus::WaitingForTeacher
                && now.signed_duration_since(session.start_time) > grace
            {
                session.status = SessionStatus::Cancelled;
                session.updated_at = now;
                if let Err(e) = self.store.update(&session).await {
                    warn!(session_id = %session.session_id, error = %e, "Failed to cancel abandoned session");
                    continue;
                }
                info!(
                    session_id = %session.session_id,
                    room = %session.room,
                    "Cancelled abandoned session"
                );
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Every non-terminal session, for startup rehydration.
    pub async fn rehydrate(&self) -> StoreResult<Vec<SessionRecord>> {
        self.store.list_non_terminal().await
    }
}
