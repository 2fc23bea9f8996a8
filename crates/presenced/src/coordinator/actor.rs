//! Coordinator actor - owns all live coordination state.
//!
//! The actor is the single owner of the global mode and the per-room slot
//! map. It receives commands via an mpsc channel, processes them strictly
//! in arrival order, and publishes dashboard events via broadcast. Routing
//! every scan and tick through one queue is what makes the
//! check-then-create sequences (slot init, session creation, check-in)
//! race-free within a daemon process; the store-level conditional inserts
//! remain as the cross-process guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use presence_core::{
    ActiveSlot, OrgId, SessionStatus, SlotContext, SlotKind, SlotRef, SlotStatus, SystemMode,
    TimetableSlot,
};
use presence_protocol::DashboardEvent;

use crate::clock::Clock;
use crate::config::DaemonConfig;
use crate::ledger::AttendanceLedger;
use crate::mode::ModeCoordinator;
use crate::poller::AttendancePoller;
use crate::schedule::ScheduleResolver;
use crate::sessions::SessionRegistry;
use crate::store::{DeviceStore, PresenceStore, Stores};
use crate::tracker::{SlotAction, SlotTracker};

use super::commands::{CoordinatorCommand, CoordinatorError};

/// The coordinator actor.
///
/// # Ownership
///
/// The actor owns:
/// - the global mode state machine and its transition history
/// - the per-room `ActiveSlot` map
///
/// Everything durable (sessions, attendance, presence) lives behind the
/// store traits and is reached through the registry, ledger and poller.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task.
pub struct CoordinatorActor {
    /// Command receiver
    pub(super) receiver: mpsc::Receiver<CoordinatorCommand>,

    /// Global mode state machine
    pub(super) mode: ModeCoordinator,

    /// Per-room slot state machine
    pub(super) tracker: SlotTracker,

    /// Persisted session lifecycle
    pub(super) registry: SessionRegistry,

    /// Idempotent attendance + presence
    pub(super) ledger: Arc<AttendanceLedger>,

    /// Teacher-arrival snapshot algorithm
    pub(super) poller: AttendancePoller,

    /// Timetable projections
    pub(super) resolver: Arc<dyn ScheduleResolver>,

    /// Document collections (devices, users, scan log)
    pub(super) stores: Stores,

    /// Daemon configuration
    pub(super) config: Arc<DaemonConfig>,

    /// Time source
    pub(super) clock: Arc<dyn Clock>,

    /// Event publisher for dashboards and buzzer alerts
    pub(super) events: broadcast::Sender<DashboardEvent>,
}

impl CoordinatorActor {
    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!("Coordinator actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!(rooms = self.tracker.len(), "Coordinator actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    pub(super) async fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::AuthenticateDevice {
                device_id,
                respond_to,
            } => {
                let result = self.handle_authenticate(device_id).await;
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            CoordinatorCommand::DeviceDisconnected { device_id } => {
                let now = self.clock.now();
                match self.stores.devices.set_online(&device_id, false, now).await {
                    Ok(Some(_)) => debug!(device = %device_id, "Device marked offline"),
                    Ok(None) => {}
                    Err(e) => warn!(device = %device_id, error = %e, "Failed to mark device offline"),
                }
            }
            CoordinatorCommand::Scan {
                device_id,
                rfid_tag,
                respond_to,
            } => {
                let outcome = self.handle_scan(device_id, rfid_tag).await;
                let _ = respond_to.send(outcome);
            }
            CoordinatorCommand::ModeTick => {
                self.run_mode_check().await;
            }
            CoordinatorCommand::SlotTick => {
                self.run_slot_tick().await;
            }
            CoordinatorCommand::Sweep => {
                self.run_sweep().await;
            }
            CoordinatorCommand::GetMode { respond_to } => {
                let _ = respond_to.send(self.mode.current());
            }
            CoordinatorCommand::GetModeHistory { respond_to } => {
                let _ = respond_to.send(self.mode.history().to_vec());
            }
            CoordinatorCommand::GetSlot { room, respond_to } => {
                let _ = respond_to.send(self.tracker.get(&room).cloned());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    async fn handle_authenticate(
        &mut self,
        device_id: presence_core::DeviceId,
    ) -> Result<presence_core::DeviceRecord, CoordinatorError> {
        let now = self.clock.now();
        match self.stores.devices.set_online(&device_id, true, now).await? {
            Some(record) => {
                info!(
                    device = %device_id,
                    room = %record.room,
                    placement = %record.placement,
                    "Device authenticated"
                );
                Ok(record)
            }
            None => {
                warn!(device = %device_id, "Authentication from unknown device");
                Err(CoordinatorError::UnknownDevice(device_id))
            }
        }
    }

    /// Mode tick: recompute the mode, apply side effects of the transition.
    async fn run_mode_check(&mut self) {
        let now = self.clock.now();
        if let Some(transition) = self.mode.check_transitions(now) {
            if transition.to == SystemMode::Closed {
                // Entering Closed resets all room presence for the next day
                match self.stores.presence.reset_all().await {
                    Ok(count) => info!(count, "Presence reset on entering Closed"),
                    Err(e) => warn!(error = %e, "Presence reset failed"),
                }
            }
            let _ = self.events.send(DashboardEvent::ModeChanged {
                from: transition.from,
                to: transition.to,
                reason: transition.reason,
                at: transition.at,
            });
        }
    }

    /// Slot tick: apply due time transitions, then lazily initialize slots
    /// the schedule says should be occupying rooms.
    async fn run_slot_tick(&mut self) {
        let now = self.clock.now();

        let actions = self.tracker.check_time(now);
        for action in actions {
            self.apply_slot_action(action, now).await;
        }

        for row in self.resolver.active_slots(now) {
            let replaceable = self
                .tracker
                .get(&row.room)
                .map(|s| s.status.is_terminal())
                .unwrap_or(true);
            if replaceable {
                let slot = ActiveSlot::from_timetable(&row, now);
                self.tracker.initialize(slot);
            }
        }
    }

    /// Sweep: self-heal expired and abandoned sessions.
    async fn run_sweep(&mut self) {
        let now = self.clock.now();
        if let Err(e) = self.registry.cleanup_expired(now).await {
            warn!(error = %e, "Expired session sweep failed");
        }
        if let Err(e) = self
            .registry
            .cancel_abandoned(self.config.abandoned_grace(), now)
            .await
        {
            warn!(error = %e, "Abandoned session sweep failed");
        }
    }

    /// Applies one time-driven slot transition.
    async fn apply_slot_action(&mut self, action: SlotAction, now: DateTime<Utc>) {
        match action {
            SlotAction::Cancelled { slot } => {
                if let Some(session_id) = &slot.session_id {
                    if let Err(e) = self
                        .registry
                        .update_status(session_id, SessionStatus::Cancelled, None, now)
                        .await
                    {
                        warn!(session = %session_id, error = %e, "Failed to mirror cancellation");
                    }
                }
            }
            SlotAction::Closed { slot } => {
                self.close_or_carry_into_break(slot, now).await;
            }
            SlotAction::BreakWarning { slot, minutes_left } => {
                let _ = self.events.send(DashboardEvent::BreakWarning {
                    room: slot.room.clone(),
                    slot_ref: slot.slot_ref.clone(),
                    break_ends_at: slot.end_time,
                    minutes_left,
                });
            }
            SlotAction::BreakEnded { slot } => {
                // Re-verification mirrors as Active on the persisted side
                if let Some(session_id) = &slot.session_id {
                    if let Err(e) = self
                        .registry
                        .update_status(session_id, SessionStatus::Active, None, now)
                        .await
                    {
                        warn!(session = %session_id, error = %e, "Failed to mirror re-verification");
                    }
                }
            }
            SlotAction::ReVerificationElapsed { slot } => {
                self.roll_over_after_break(slot, now).await;
            }
        }
    }

    /// A class slot reached its end. If a break immediately follows in the
    /// same room, the session is carried through it (status Break, end time
    /// extended to cover the break and its grace window); otherwise the
    /// session closes.
    async fn close_or_carry_into_break(&mut self, slot: ActiveSlot, now: DateTime<Utc>) {
        let following_break = self.resolver.active_slots(now).into_iter().find(|row| {
            row.kind == SlotKind::Break
                && row.room == slot.room
                && Some(&row.class_id) == slot.class_id.as_ref()
        });

        match following_break {
            Some(break_row) => {
                let mut break_slot = ActiveSlot::from_timetable(&break_row, now);
                break_slot.session_id = slot.session_id.clone();
                break_slot.teacher_arrived_at = slot.teacher_arrived_at;
                break_slot.actual_teacher_id = slot.actual_teacher_id.clone();
                break_slot.is_overridden = slot.is_overridden;

                if let Some(session_id) = &slot.session_id {
                    let extended =
                        break_slot.end_time + self.config.re_verification_grace();
                    if let Err(e) = self
                        .registry
                        .update_status(
                            session_id,
                            SessionStatus::Break,
                            Some(extended),
                            now,
                        )
                        .await
                    {
                        warn!(session = %session_id, error = %e, "Failed to carry session into break");
                    }
                }
                self.tracker.replace(break_slot);
            }
            None => {
                if let Some(session_id) = &slot.session_id {
                    if let Err(e) = self.registry.close_session(session_id, now).await {
                        warn!(session = %session_id, error = %e, "Failed to close session");
                    }
                }
            }
        }
    }

    /// The post-break grace elapsed: close the carried session and roll the
    /// room into the next scheduled class slot without a new check-in.
    /// Re-verified students already hold forward attendance for it.
    async fn roll_over_after_break(&mut self, slot: ActiveSlot, now: DateTime<Utc>) {
        let carried_device = match &slot.session_id {
            Some(session_id) => {
                let device = self
                    .registry
                    .get(session_id)
                    .await
                    .map(|s| s.device_id)
                    .ok();
                if let Err(e) = self.registry.close_session(session_id, now).await {
                    warn!(session = %session_id, error = %e, "Failed to close session after break");
                }
                device
            }
            None => None,
        };

        let Some(next_row) = self.resolver.next_slot_after_break(&slot.slot_ref) else {
            debug!(room = %slot.room, "No slot follows the break, room stays closed");
            return;
        };

        let mut next = ActiveSlot::from_timetable(&next_row, now);
        next.status = SlotStatus::SlotActive;
        next.teacher_arrived_at = Some(now);

        let record = presence_core::SessionRecord::from_slot(
            &next,
            carried_device.unwrap_or_else(|| presence_core::DeviceId::new("system")),
            self.org(),
            now,
        );
        match self.registry.create_session(record).await {
            Ok(session) => {
                next.session_id = Some(session.session_id);
            }
            Err(e) => {
                warn!(room = %next.room, error = %e, "Failed to create rollover session");
            }
        }
        info!(room = %next.room, slot = %next.slot_ref, "Room rolled over after break");
        self.tracker.replace(next);
    }

    // ========================================================================
    // Shared Helpers
    // ========================================================================

    pub(super) fn org(&self) -> OrgId {
        OrgId::new(self.config.organization_id.clone())
    }

    /// Attendance context for a live slot. The reference time is teacher
    /// arrival when known, slot start otherwise.
    pub(super) fn slot_context(&self, slot: &ActiveSlot) -> SlotContext {
        SlotContext {
            slot_ref: slot.slot_ref.clone(),
            room: slot.room.clone(),
            class_id: slot.class_id.clone().unwrap_or_default(),
            teacher_id: slot.effective_teacher().clone(),
            subject_name: slot.subject_name.clone(),
            subject_code: slot.subject_code.clone(),
            organization_id: Some(self.org()),
            reference_time: slot.late_reference(),
        }
    }

    /// Attendance context for a timetable row that is not live yet
    /// (forward records created by re-verification).
    pub(super) fn row_context(&self, row: &TimetableSlot, now: DateTime<Utc>) -> SlotContext {
        SlotContext {
            slot_ref: row.slot_ref.clone(),
            room: row.room.clone(),
            class_id: row.class_id.clone(),
            teacher_id: row.teacher_id.clone(),
            subject_name: row.subject_name.clone(),
            subject_code: row.subject_code.clone(),
            organization_id: Some(self.org()),
            reference_time: row.start_at(now),
        }
    }

    /// The room's slot, ignoring terminal leftovers.
    pub(super) fn live_slot(&self, room: &presence_core::RoomId) -> Option<ActiveSlot> {
        self.tracker
            .get(room)
            .filter(|s| !s.status.is_terminal())
            .cloned()
    }
}

/// Builds an in-memory `ActiveSlot` from a rehydrated session record.
///
/// Used at startup to rebuild the per-room map from non-terminal sessions
/// so a restart does not lose live rooms.
pub(super) fn slot_from_session(
    session: &presence_core::SessionRecord,
    grace: chrono::Duration,
) -> Option<ActiveSlot> {
    let status = match session.status {
        SessionStatus::WaitingForTeacher => SlotStatus::WaitingForTeacher,
        SessionStatus::Active => SlotStatus::SlotActive,
        SessionStatus::Break => SlotStatus::Break,
        SessionStatus::Closed | SessionStatus::Cancelled => return None,
    };
    let slot_ref = session
        .slot_ref
        .clone()
        .unwrap_or_else(|| SlotRef::new(format!("session-{}", session.session_id)));
    Some(ActiveSlot {
        slot_ref,
        room: session.room.clone(),
        start_time: session.start_time,
        end_time: session.end_time,
        teacher_id: session.teacher_id.clone(),
        actual_teacher_id: session.actual_teacher_id.clone(),
        subject_name: session.subject_name.clone(),
        subject_code: session.subject_code.clone(),
        class_id: Some(session.class_id.clone()),
        session_id: Some(session.session_id.clone()),
        status,
        is_overridden: session.is_overridden,
        teacher_arrived_at: session.teacher_arrived_at,
        re_verification_until: match status {
            SlotStatus::Break => Some(session.end_time + grace),
            _ => None,
        },
        warning_triggered: false,
    })
}
