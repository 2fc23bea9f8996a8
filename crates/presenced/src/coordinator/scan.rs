//! Scan routing.
//!
//! Every scan dispatches on (placement, role, mode, slot status) and
//! resolves to exactly one terminal `ScanOutcome`: an acceptance with its
//! side effects committed, or a rejection with none. Store failures
//! surface as a rejected outcome and never crash the actor.

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use presence_core::{
    ActiveSlot, DeviceId, DeviceRecord, GateAction, InRoomState, Placement, RfidTag, RoomId,
    ScanLogEntry, SessionRecord, SlotRef, SlotStatus, SystemMode, User,
};
use presence_protocol::{BeepPattern, DashboardEvent};

use crate::ledger::LedgerError;
use crate::sessions::SessionError;
use crate::store::{AttendanceStore, DeviceStore, ScanLogStore, StoreError, UserStore};

use super::actor::CoordinatorActor;
use super::commands::ScanOutcome;

impl CoordinatorActor {
    /// Routes one scan end to end: device lookup, tag resolution, placement
    /// and role dispatch, audit log, dashboard broadcast.
    pub(super) async fn handle_scan(
        &mut self,
        device_id: DeviceId,
        rfid_tag: RfidTag,
    ) -> ScanOutcome {
        let now = self.clock.now();

        let device = match self.stores.devices.get(&device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!(device = %device_id, "Scan from unknown device");
                return ScanOutcome::rejected("Unknown device", BeepPattern::Long);
            }
            Err(e) => {
                error!(device = %device_id, error = %e, "Device lookup failed");
                return ScanOutcome::rejected("Temporary error, try again", BeepPattern::Long);
            }
        };

        let user = match self.stores.users.find_by_tag(&rfid_tag).await {
            Ok(user) => user,
            Err(e) => {
                error!(device = %device_id, error = %e, "Tag lookup failed");
                return ScanOutcome::rejected("Temporary error, try again", BeepPattern::Long);
            }
        };

        let outcome = match &user {
            // Unknown tag: terminal rejection, no state mutation
            None => {
                debug!(device = %device_id, tag = %rfid_tag, "Unknown tag");
                ScanOutcome::rejected("Unknown card", BeepPattern::Long)
            }
            Some(user) => {
                let routed = match device.placement {
                    Placement::Outside => {
                        self.handle_outside_scan(&device, user, &rfid_tag, now).await
                    }
                    Placement::Inside => {
                        self.handle_inside_scan(&device, user, now).await
                    }
                };
                match routed {
                    Ok(outcome) => outcome.with_user(user),
                    Err(e) => {
                        error!(device = %device_id, user = %user.id, error = %e, "Scan routing failed");
                        ScanOutcome::rejected("Temporary error, try again", BeepPattern::Long)
                            .with_user(user)
                    }
                }
            }
        };

        self.log_scan(&device, &rfid_tag, user.as_ref(), &outcome, now).await;

        let _ = self.events.send(DashboardEvent::DeviceActivity {
            device_id: device.device_id.clone(),
            room: device.room.clone(),
            user_name: user.as_ref().map(|u| u.name.clone()),
            accepted: outcome.accepted,
            detail: outcome.message.clone(),
            at: now,
        });

        outcome
    }

    /// Raw scan audit entry. Failures are swallowed so they never block
    /// the protocol response.
    async fn log_scan(
        &self,
        device: &DeviceRecord,
        rfid_tag: &RfidTag,
        user: Option<&User>,
        outcome: &ScanOutcome,
        now: DateTime<Utc>,
    ) {
        let entry = ScanLogEntry::new(
            device.device_id.clone(),
            rfid_tag.clone(),
            user.map(|u| u.id.clone()),
            outcome.accepted,
            outcome.message.clone(),
            now,
        );
        if let Err(e) = self.stores.scan_log.append(entry).await {
            warn!(device = %device.device_id, error = %e, "Scan log write failed");
        }
    }

    // ========================================================================
    // Outside Handler
    // ========================================================================

    async fn handle_outside_scan(
        &mut self,
        device: &DeviceRecord,
        user: &User,
        rfid_tag: &RfidTag,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        let mode = self.mode.current();

        if mode == SystemMode::Closed {
            if user.is_student() {
                return self.emergency_exit(user, &device.room, now).await;
            }
            return Ok(ScanOutcome::rejected("Campus is closed", BeepPattern::Long));
        }

        // Early-access and post-class windows: pure movement, no
        // attendance semantics for anyone
        if mode.is_free_access() {
            return self.movement_toggle(user, &device.room, None, now).await;
        }

        if user.is_teacher() {
            self.outside_teacher(device, user, now).await
        } else {
            self.outside_student(device, user, rfid_tag, now).await
        }
    }

    async fn outside_teacher(
        &mut self,
        device: &DeviceRecord,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        if !self.mode.can_perform(GateAction::TeacherCheckin) {
            return Ok(ScanOutcome::rejected(
                "Check-in is not allowed right now",
                BeepPattern::Long,
            ));
        }

        let room = device.room.clone();

        // Find the room's slot, or initialize it from the teacher's own
        // schedule
        let slot = match self.live_slot(&room) {
            Some(slot) => slot,
            None => {
                let Some(row) = self.resolver.current_teacher_slot(&user.id, now) else {
                    return Ok(ScanOutcome::rejected(
                        "No scheduled class right now",
                        BeepPattern::Long,
                    ));
                };
                if row.room != room {
                    return Ok(ScanOutcome::rejected(
                        format!("Your class is in {}", row.room),
                        BeepPattern::Long,
                    ));
                }
                let (slot, _) = self.tracker.initialize(ActiveSlot::from_timetable(&row, now));
                slot
            }
        };

        match slot.status {
            SlotStatus::WaitingForTeacher => {}
            SlotStatus::SlotActive | SlotStatus::Break | SlotStatus::ReVerification => {
                return Ok(ScanOutcome::rejected("Already checked in", BeepPattern::Double));
            }
            SlotStatus::SlotClosed | SlotStatus::SlotCancelled => {
                return Ok(ScanOutcome::rejected(
                    "No scheduled class right now",
                    BeepPattern::Long,
                ));
            }
        }

        // Ensure a session exists; a student scan may have initialized the
        // slot without one, in which case the session id is attached here
        let session_id = match &slot.session_id {
            Some(session_id) => session_id.clone(),
            None => {
                // Lazily closes an expired leftover session so the
                // conditional insert below cannot hand it back
                let availability = self.registry.check_room_availability(&room, now).await?;
                if let Some(occupant) = &availability.active_session {
                    debug!(
                        room = %room,
                        session = %occupant.session_id,
                        "Room already has a live session, reusing"
                    );
                }
                let record =
                    SessionRecord::from_slot(&slot, device.device_id.clone(), self.org(), now);
                let session = self.registry.create_session(record).await?;
                self.tracker.attach_session(&room, session.session_id.clone());
                session.session_id
            }
        };

        let checkin = self.tracker.handle_teacher_checkin(&room, &user.id, now);
        let (slot, is_override) = match checkin {
            crate::tracker::CheckinOutcome::Activated { slot, is_override } => {
                (slot, is_override)
            }
            crate::tracker::CheckinOutcome::AlreadyActive { .. } => {
                return Ok(ScanOutcome::rejected("Already checked in", BeepPattern::Double));
            }
            crate::tracker::CheckinOutcome::NoSlot
            | crate::tracker::CheckinOutcome::NotWaiting { .. } => {
                return Ok(ScanOutcome::rejected(
                    "No scheduled class right now",
                    BeepPattern::Long,
                ));
            }
        };

        // Durable check-in; the store is the cross-process duplicate guard
        match self.registry.teacher_check_in(&session_id, &user.id, now).await {
            Ok(_) => {}
            Err(SessionError::AlreadyCheckedIn) => {
                return Ok(ScanOutcome::rejected("Already checked in", BeepPattern::Double));
            }
            Err(SessionError::Store(e)) => return Err(e),
            Err(e) => {
                warn!(session = %session_id, error = %e, "Durable check-in failed");
                return Ok(ScanOutcome::rejected("Unable to check in", BeepPattern::Long));
            }
        }

        // Teacher arrival jumps the mode without waiting for the tick
        if let Some(transition) =
            self.mode
                .force(SystemMode::SlotActive, "teacher arrival", "teacher_checkin", now)
        {
            let _ = self.events.send(DashboardEvent::ModeChanged {
                from: transition.from,
                to: transition.to,
                reason: transition.reason,
                at: transition.at,
            });
        }

        // Snapshot poll: credit everyone already inside, notify the rest
        let ctx = self.slot_context(&slot);
        let report = self.poller.trigger_poll(&ctx, now).await?;
        if let Err(e) = self
            .registry
            .set_poller_triggered(
                &session_id,
                report.snapshot.inside_count,
                report.snapshot.outside_count,
                now,
            )
            .await
        {
            warn!(session = %session_id, error = %e, "Failed to latch poller trigger");
        }

        let _ = self.events.send(DashboardEvent::TeacherArrived {
            room: room.clone(),
            teacher_id: user.id.clone(),
            teacher_name: user.name.clone(),
            subject_name: slot.subject_name.clone(),
            is_override,
            at: now,
        });

        Ok(ScanOutcome::accepted(format!(
            "Class started: {} present, {} notified",
            report.marked_present, report.notified_absent
        ))
        .with_status("checked_in")
        .with_override(is_override))
    }

    async fn outside_student(
        &mut self,
        device: &DeviceRecord,
        user: &User,
        rfid_tag: &RfidTag,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        if !self.mode.can_perform(GateAction::StudentEntry) {
            return Ok(ScanOutcome::rejected(
                "Entry is not allowed right now",
                BeepPattern::Long,
            ));
        }

        let room = device.room.clone();

        // Proactively initialize a waiting slot from the schedule when the
        // room has none; the session stays lazy until the teacher arrives
        let slot = match self.live_slot(&room) {
            Some(slot) => slot,
            None => {
                let Some(class_id) = user.class_id.as_ref() else {
                    return Ok(ScanOutcome::rejected("No class on file", BeepPattern::Long));
                };
                let Some(row) = self.resolver.current_class_slot(class_id, now) else {
                    return Ok(ScanOutcome::rejected(
                        "No class scheduled here for you",
                        BeepPattern::Long,
                    ));
                };
                if row.room != room {
                    return Ok(ScanOutcome::rejected(
                        format!("Your class is in {}", row.room),
                        BeepPattern::Long,
                    ));
                }
                let (slot, _) = self.tracker.initialize(ActiveSlot::from_timetable(&row, now));
                slot
            }
        };

        if slot.class_id.as_ref() != user.class_id.as_ref() {
            return Ok(ScanOutcome::rejected("Not your class", BeepPattern::Long));
        }

        match slot.status {
            SlotStatus::WaitingForTeacher => {
                self.movement_toggle(user, &room, Some(&slot.slot_ref), now).await
            }
            SlotStatus::SlotActive => {
                let existing = self
                    .stores
                    .attendance
                    .find(&user.id, &slot.slot_ref, now.date_naive())
                    .await?;
                match existing {
                    None => self.student_late_entry(device, user, rfid_tag, &slot, now).await,
                    Some(_) => {
                        self.movement_toggle(user, &room, Some(&slot.slot_ref), now).await
                    }
                }
            }
            SlotStatus::Break | SlotStatus::ReVerification => {
                Ok(ScanOutcome::rejected("Class is on break", BeepPattern::Double))
            }
            SlotStatus::SlotClosed | SlotStatus::SlotCancelled => {
                Ok(ScanOutcome::rejected("No active class", BeepPattern::Long))
            }
        }
    }

    async fn student_late_entry(
        &mut self,
        device: &DeviceRecord,
        user: &User,
        rfid_tag: &RfidTag,
        slot: &ActiveSlot,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        let ctx = self.slot_context(slot);
        match self
            .ledger
            .late_entry(user, &ctx, now, &device.device_id, rfid_tag)
            .await
        {
            Ok(entry) => {
                let _ = self.events.send(DashboardEvent::NewActivity {
                    student_id: user.id.clone(),
                    name: user.name.clone(),
                    room: slot.room.clone(),
                    slot_ref: slot.slot_ref.clone(),
                    status: entry.status.to_string(),
                    points: entry.points,
                    at: now,
                });
                Ok(ScanOutcome::accepted(format!(
                    "Marked {} (+{} pts)",
                    entry.status, entry.points
                ))
                .with_attendance_status(entry.status)
                .with_points(entry.points)
                .with_movement(InRoomState::In))
            }
            // Lost the race against another path that recorded first; the
            // scan degrades to a movement toggle
            Err(LedgerError::AlreadyRecorded) => {
                self.movement_toggle(user, &slot.room, Some(&slot.slot_ref), now).await
            }
            Err(LedgerError::Store(e)) => Err(e),
            Err(e) => {
                warn!(student = %user.id, error = %e, "Late entry failed");
                Ok(ScanOutcome::rejected("Unable to record entry", BeepPattern::Long))
            }
        }
    }

    // ========================================================================
    // Inside Handler
    // ========================================================================

    async fn handle_inside_scan(
        &mut self,
        device: &DeviceRecord,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        // Teachers check in outside; the inside reader is student-only
        if user.is_teacher() {
            return Ok(ScanOutcome::rejected(
                "Check in at the outside reader",
                BeepPattern::Long,
            ));
        }

        if self.mode.current() == SystemMode::Closed {
            return self.emergency_exit(user, &device.room, now).await;
        }

        let room = device.room.clone();
        let Some(slot) = self.live_slot(&room) else {
            if self.mode.can_perform(GateAction::MovementTracking) {
                return self.movement_toggle(user, &room, None, now).await;
            }
            return Ok(ScanOutcome::rejected("No active class", BeepPattern::Long));
        };

        match slot.status {
            SlotStatus::Break => {
                let window_opens = slot.end_time - self.config.re_verification_window();
                if now >= window_opens && now < slot.end_time {
                    self.re_verify(&slot, user, now).await
                } else {
                    self.movement_toggle(user, &room, Some(&slot.slot_ref), now).await
                }
            }
            // The post-break grace window exists precisely to catch
            // stragglers, so it accepts re-verification too
            SlotStatus::ReVerification => self.re_verify(&slot, user, now).await,
            SlotStatus::WaitingForTeacher => {
                self.movement_toggle(user, &room, Some(&slot.slot_ref), now).await
            }
            SlotStatus::SlotActive => self.inside_active(&slot, user, now).await,
            SlotStatus::SlotClosed | SlotStatus::SlotCancelled => {
                Ok(ScanOutcome::rejected("No active class", BeepPattern::Long))
            }
        }
    }

    /// Inside scan during a live class: two-phase verification, then
    /// movement toggling.
    async fn inside_active(
        &mut self,
        slot: &ActiveSlot,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        let record = self
            .stores
            .attendance
            .find(&user.id, &slot.slot_ref, now.date_naive())
            .await?;

        match record {
            None => Ok(ScanOutcome::rejected("Scan outside first", BeepPattern::Long)),
            Some(record) if !record.is_verified => {
                match self.ledger.verify(&user.id, &slot.slot_ref, now).await {
                    Ok(()) => {
                        self.ledger
                            .set_presence(
                                &user.id,
                                &slot.room,
                                InRoomState::In,
                                Some(&slot.slot_ref),
                                now,
                            )
                            .await?;
                        Ok(ScanOutcome::accepted("Attendance verified")
                            .with_status("verified")
                            .with_movement(InRoomState::In))
                    }
                    Err(LedgerError::AlreadyVerified) => Ok(ScanOutcome::rejected(
                        "Already verified",
                        BeepPattern::Double,
                    )),
                    Err(LedgerError::NoRecord) => Ok(ScanOutcome::rejected(
                        "Scan outside first",
                        BeepPattern::Long,
                    )),
                    Err(LedgerError::Store(e)) => Err(e),
                    Err(LedgerError::AlreadyRecorded) => Ok(ScanOutcome::rejected(
                        "Already recorded",
                        BeepPattern::Double,
                    )),
                }
            }
            Some(_) => self.movement_toggle(user, &slot.room, Some(&slot.slot_ref), now).await,
        }
    }

    /// Break-end re-verification: record the student in the session, set
    /// them IN, and credit the slot after the break with a forward record.
    async fn re_verify(
        &mut self,
        slot: &ActiveSlot,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        if slot.class_id.as_ref() != user.class_id.as_ref() {
            return Ok(ScanOutcome::rejected("Not your class", BeepPattern::Long));
        }

        if let Some(session_id) = &slot.session_id {
            match self
                .registry
                .mark_student_re_verified(session_id, &user.id, now)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    return Ok(ScanOutcome::rejected("Already re-verified", BeepPattern::Double));
                }
                Err(SessionError::Store(e)) => return Err(e),
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Re-verified marking failed");
                }
            }
        }

        self.ledger
            .set_presence(&user.id, &slot.room, InRoomState::In, Some(&slot.slot_ref), now)
            .await?;

        let Some(next_row) = self.resolver.next_slot_after_break(&slot.slot_ref) else {
            return Ok(ScanOutcome::accepted("Re-verified")
                .with_status("re_verified")
                .with_movement(InRoomState::In));
        };

        let ctx = self.row_context(&next_row, now);
        let created = self
            .ledger
            .create_from_snapshot(
                std::slice::from_ref(&user.id),
                &ctx,
                now,
                presence_core::AttendanceSource::AutoReVerification,
            )
            .await?;

        if created == 0 && slot.session_id.is_none() {
            // Without a session the forward record is the only dedup
            return Ok(ScanOutcome::rejected("Already re-verified", BeepPattern::Double));
        }

        if created > 0 {
            let _ = self.events.send(DashboardEvent::NewActivity {
                student_id: user.id.clone(),
                name: user.name.clone(),
                room: next_row.room.clone(),
                slot_ref: next_row.slot_ref.clone(),
                status: "present".to_string(),
                points: self.config.present_points,
                at: now,
            });
        }

        Ok(ScanOutcome::accepted(format!("Re-verified for {}", next_row.subject_name))
            .with_status("re_verified")
            .with_movement(InRoomState::In))
    }

    // ========================================================================
    // Shared Paths
    // ========================================================================

    /// Movement toggle with no attendance semantics.
    async fn movement_toggle(
        &mut self,
        user: &User,
        room: &RoomId,
        slot_ref: Option<&SlotRef>,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        if !self.mode.can_perform(GateAction::MovementTracking) {
            return Ok(ScanOutcome::rejected(
                "Movement is not tracked right now",
                BeepPattern::Long,
            ));
        }
        let state = self.ledger.toggle_movement(&user.id, room, slot_ref, now).await?;
        let message = match state {
            InRoomState::In => "Entry recorded",
            InRoomState::Out => "Exit recorded",
            InRoomState::Unknown => "Movement recorded",
        };
        Ok(ScanOutcome::accepted(message)
            .with_status("movement")
            .with_movement(state))
    }

    /// Closed mode admits exactly one action: a student currently inside
    /// may leave.
    async fn emergency_exit(
        &mut self,
        user: &User,
        room: &RoomId,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        let state = self.ledger.presence_state(&user.id, room).await?;
        if !state.is_in() {
            return Ok(ScanOutcome::rejected("Campus is closed", BeepPattern::Long));
        }
        self.ledger
            .set_presence(&user.id, room, InRoomState::Out, None, now)
            .await?;
        Ok(ScanOutcome::accepted("Emergency exit recorded")
            .with_status("emergency_exit")
            .with_movement(InRoomState::Out))
    }
}
