//! Per-room slot state machine.
//!
//! Owns the one-ActiveSlot-per-room map. The tracker mutates in-memory
//! state and reports what happened as [`SlotAction`]s; mirroring into the
//! session registry and broadcasting belong to the coordinator actor,
//! which is the only caller.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use presence_core::{ActiveSlot, RoomId, SessionId, SlotStatus, UserId};

use crate::config::DaemonConfig;

/// Outcome of a teacher check-in attempt.
#[derive(Debug, Clone)]
pub enum CheckinOutcome {
    /// The slot went `WaitingForTeacher` → `SlotActive`.
    Activated {
        slot: ActiveSlot,
        is_override: bool,
    },

    /// A teacher already checked in; duplicate attempt.
    AlreadyActive { slot: ActiveSlot },

    /// The room has no active slot.
    NoSlot,

    /// The slot exists but is not waiting for a teacher.
    NotWaiting { status: SlotStatus },
}

/// Time-driven transition reported by [`SlotTracker::check_time`].
#[derive(Debug, Clone)]
pub enum SlotAction {
    /// Teacher never arrived within the grace period.
    Cancelled { slot: ActiveSlot },

    /// An active slot reached its end time.
    Closed { slot: ActiveSlot },

    /// One-shot warning: the break ends in `minutes_left` minutes.
    BreakWarning {
        slot: ActiveSlot,
        minutes_left: i64,
    },

    /// The break's end time was reached; the re-verification window opened.
    BreakEnded { slot: ActiveSlot },

    /// The re-verification window elapsed; the room should roll over.
    ReVerificationElapsed { slot: ActiveSlot },
}

/// In-memory map of active slots, one per room.
pub struct SlotTracker {
    rooms: HashMap<RoomId, ActiveSlot>,
    teacher_grace: Duration,
    re_verification_grace: Duration,
    break_warning: Duration,
}

impl SlotTracker {
    /// Creates an empty tracker.
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            teacher_grace: config.teacher_grace(),
            re_verification_grace: config.re_verification_grace(),
            break_warning: config.break_warning(),
        }
    }

    /// The slot currently occupying a room.
    pub fn get(&self, room: &RoomId) -> Option<&ActiveSlot> {
        self.rooms.get(room)
    }

    /// Number of tracked rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True when no rooms are tracked.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Initializes a room's slot, first writer wins.
    ///
    /// A room already holding a non-terminal slot keeps it. A terminal
    /// slot is replaced only by a *different* occurrence: re-initializing
    /// the same slot after it closed or cancelled returns the terminal
    /// slot unchanged, so a cancellation never reverts. Returns the slot
    /// now occupying the room and whether the candidate was installed.
    pub fn initialize(&mut self, candidate: ActiveSlot) -> (ActiveSlot, bool) {
        let room = candidate.room.clone();
        match self.rooms.get(&room) {
            Some(existing)
                if !existing.status.is_terminal()
                    || existing.slot_ref == candidate.slot_ref =>
            {
                debug!(
                    room = %room,
                    existing = %existing.slot_ref,
                    candidate = %candidate.slot_ref,
                    "Room already has a slot for this occurrence, keeping it"
                );
                (existing.clone(), false)
            }
            _ => {
                info!(
                    room = %room,
                    slot = %candidate.slot_ref,
                    status = %candidate.status,
                    "Slot initialized"
                );
                self.rooms.insert(room, candidate.clone());
                (candidate, true)
            }
        }
    }

    /// Unconditionally installs a slot (rollover, break carry-over).
    pub fn replace(&mut self, slot: ActiveSlot) {
        info!(room = %slot.room, slot = %slot.slot_ref, status = %slot.status, "Slot replaced");
        self.rooms.insert(slot.room.clone(), slot);
    }

    /// Links a persisted session to the room's slot.
    ///
    /// Returns false if the room has no slot.
    pub fn attach_session(&mut self, room: &RoomId, session_id: SessionId) -> bool {
        match self.rooms.get_mut(room) {
            Some(slot) => {
                slot.session_id = Some(session_id);
                true
            }
            None => false,
        }
    }

    /// Attempts a teacher check-in for a room.
    pub fn handle_teacher_checkin(
        &mut self,
        room: &RoomId,
        teacher_id: &UserId,
        now: DateTime<Utc>,
    ) -> CheckinOutcome {
        let Some(slot) = self.rooms.get_mut(room) else {
            return CheckinOutcome::NoSlot;
        };
        match slot.status {
            SlotStatus::WaitingForTeacher => {
                let is_override = slot.record_checkin(teacher_id, now);
                info!(
                    room = %room,
                    teacher = %teacher_id,
                    is_override,
                    "Teacher check-in activated slot"
                );
                CheckinOutcome::Activated {
                    slot: slot.clone(),
                    is_override,
                }
            }
            SlotStatus::SlotActive | SlotStatus::Break | SlotStatus::ReVerification => {
                CheckinOutcome::AlreadyActive { slot: slot.clone() }
            }
            status @ (SlotStatus::SlotClosed | SlotStatus::SlotCancelled) => {
                CheckinOutcome::NotWaiting { status }
            }
        }
    }

    /// Periodic time check over every room.
    ///
    /// Applies all due transitions and returns them, oldest room first for
    /// deterministic ordering. Safe no-op when nothing is due.
    pub fn check_time(&mut self, now: DateTime<Utc>) -> Vec<SlotAction> {
        let mut actions = Vec::new();

        let mut keys: Vec<RoomId> = self.rooms.keys().cloned().collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        for room in keys {
            let Some(slot) = self.rooms.get_mut(&room) else {
                continue;
            };
            match slot.status {
                SlotStatus::WaitingForTeacher => {
                    if now.signed_duration_since(slot.start_time) > self.teacher_grace {
                        slot.status = SlotStatus::SlotCancelled;
                        info!(room = %room, slot = %slot.slot_ref, "Slot cancelled: teacher never arrived");
                        actions.push(SlotAction::Cancelled { slot: slot.clone() });
                    }
                }
                SlotStatus::SlotActive => {
                    if now >= slot.end_time {
                        slot.status = SlotStatus::SlotClosed;
                        info!(room = %room, slot = %slot.slot_ref, "Slot closed");
                        actions.push(SlotAction::Closed { slot: slot.clone() });
                    }
                }
                SlotStatus::Break => {
                    if now >= slot.end_time {
                        slot.status = SlotStatus::ReVerification;
                        slot.re_verification_until =
                            Some(slot.end_time + self.re_verification_grace);
                        info!(room = %room, slot = %slot.slot_ref, "Break ended, re-verification window open");
                        actions.push(SlotAction::BreakEnded { slot: slot.clone() });
                    } else if !slot.warning_triggered
                        && now >= slot.end_time - self.break_warning
                    {
                        slot.warning_triggered = true;
                        let minutes_left =
                            slot.end_time.signed_duration_since(now).num_minutes();
                        actions.push(SlotAction::BreakWarning {
                            slot: slot.clone(),
                            minutes_left,
                        });
                    }
                }
                SlotStatus::ReVerification => {
                    let until = slot
                        .re_verification_until
                        .unwrap_or(slot.end_time + self.re_verification_grace);
                    if now >= until {
                        slot.status = SlotStatus::SlotClosed;
                        info!(room = %room, slot = %slot.slot_ref, "Re-verification window elapsed");
                        actions.push(SlotAction::ReVerificationElapsed { slot: slot.clone() });
                    }
                }
                SlotStatus::SlotClosed | SlotStatus::SlotCancelled => {}
            }
        }

        actions
    }
}
