//! Integration tests for the coordinator actor.
//!
//! These drive the spawned actor through its handle with a manual clock,
//! exercising scan routing, the mode and slot machines, the ledger and
//! the poller together.

mod common;

use std::sync::atomic::Ordering;

use presence_core::{
    AttendanceSource, AttendanceStatus, DeviceId, InRoomState, RoomId, SessionStatus, SlotRef,
    SlotStatus, SystemMode, UserId,
};
use presence_protocol::Movement;
use presenced::store::{AttendanceStore, PresenceStore, SessionStore};

use common::{at, at_s, build_world, student_id, tag, TestWorld};

const OUT_101: &str = "out-101";
const IN_101: &str = "in-101";

async fn scan(world: &TestWorld, device: &str, user: &str) -> presenced::coordinator::ScanOutcome {
    world
        .handle
        .scan(DeviceId::new(device), tag(user))
        .await
        .expect("coordinator alive")
}

/// Drives both tick paths at the clock's current instant.
async fn tick(world: &TestWorld) {
    world.handle.tick_mode().await;
    world.handle.tick_slots().await;
    // A request-response command behind the ticks guarantees they ran
    let _ = world.handle.mode().await;
}

// ============================================================================
// The §8 morning scenario
// ============================================================================

#[tokio::test]
async fn test_full_morning_scenario() {
    let world = build_world().await;
    let room = RoomId::canonical("r101");

    // 08:45, early access: 18 students enter (pure movement)
    world.clock.set(at(8, 45));
    tick(&world).await;
    assert_eq!(world.handle.mode().await, Some(SystemMode::EarlyAccessFirstSlot));

    for n in 1..=18 {
        let outcome = scan(&world, OUT_101, &format!("s-{n}")).await;
        assert!(outcome.accepted, "student {n} should enter: {}", outcome.message);
        assert_eq!(outcome.movement, Some(Movement::In));
    }
    // No attendance yet - early access has no attendance semantics
    assert_eq!(world.memory.attendance_count(), 0);

    // 09:00 tick: class period begins, room slot waits for the teacher
    world.clock.set(at(9, 0));
    tick(&world).await;
    assert_eq!(world.handle.mode().await, Some(SystemMode::SlotActive));
    let slot = world.handle.slot(room.clone()).await.expect("slot");
    assert_eq!(slot.status, SlotStatus::WaitingForTeacher);

    // 09:03: teacher arrives, session activates, snapshot runs
    world.clock.set(at(9, 3));
    let outcome = scan(&world, OUT_101, "t-1").await;
    assert!(outcome.accepted, "{}", outcome.message);
    assert_eq!(outcome.status.as_deref(), Some("checked_in"));
    assert!(!outcome.is_override);

    // 18 inside marked present, 12 outside notified
    assert_eq!(world.memory.attendance_count(), 18);
    assert_eq!(world.notifier.sent.load(Ordering::SeqCst), 12);

    let slot = world.handle.slot(room.clone()).await.expect("slot");
    assert_eq!(slot.status, SlotStatus::SlotActive);
    let session_id = slot.session_id.clone().expect("session attached");
    let session = SessionStore::get(world.memory.as_ref(), &session_id)
        .await
        .expect("store")
        .expect("session");
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.attendance_poller_triggered);
    let snapshot = session.teacher_arrival_snapshot.expect("snapshot");
    assert_eq!(snapshot.inside_count, 18);
    assert_eq!(snapshot.outside_count, 12);

    // A second check-in is rejected as duplicate
    let outcome = scan(&world, OUT_101, "t-1").await;
    assert!(!outcome.accepted);
    assert_eq!(world.memory.attendance_count(), 18);

    // 09:06 (3 min after arrival): student 19 is present, 10 pts
    world.clock.set(at(9, 6));
    let outcome = scan(&world, OUT_101, "s-19").await;
    assert!(outcome.accepted, "{}", outcome.message);
    assert_eq!(outcome.status.as_deref(), Some("present"));
    assert_eq!(outcome.points, Some(10));

    // 09:08 (exactly 5 min after arrival): still present - the boundary
    // is strictly greater than
    world.clock.set(at(9, 8));
    let outcome = scan(&world, OUT_101, "s-21").await;
    assert_eq!(outcome.status.as_deref(), Some("present"));
    assert_eq!(outcome.points, Some(10));

    // One second past the boundary: late, 5 pts
    world.clock.set(at_s(9, 8, 1));
    let outcome = scan(&world, OUT_101, "s-22").await;
    assert_eq!(outcome.status.as_deref(), Some("late"));
    assert_eq!(outcome.points, Some(5));

    // 09:10 (7 min after arrival): late, 5 pts
    world.clock.set(at(9, 10));
    let outcome = scan(&world, OUT_101, "s-20").await;
    assert_eq!(outcome.status.as_deref(), Some("late"));
    assert_eq!(outcome.points, Some(5));

    // Students who never scanned have no record at all - absent is never
    // materialized
    assert_eq!(world.memory.attendance_count(), 22);
    let ghost = AttendanceStore::find(
        world.memory.as_ref(),
        &student_id(30),
        &SlotRef::new("math"),
        at(9, 0).date_naive(),
    )
    .await
    .expect("store");
    assert!(ghost.is_none());
}

// ============================================================================
// Rejections that must not mutate state
// ============================================================================

#[tokio::test]
async fn test_unknown_tag_mutates_nothing() {
    let world = build_world().await;

    world.clock.set(at(9, 0));
    tick(&world).await;

    let outcome = world
        .handle
        .scan(DeviceId::new(OUT_101), presence_core::RfidTag::new("no-such-tag"))
        .await
        .expect("coordinator alive");
    assert!(!outcome.accepted);
    assert_eq!(outcome.message, "Unknown card");
    assert!(outcome.user.is_none());

    assert_eq!(world.memory.attendance_count(), 0);
    // The scan is still audited
    assert_eq!(world.memory.scan_log_count(), 1);
    // No session was created for the room
    let session = SessionStore::find_active_in_room(world.memory.as_ref(), &RoomId::canonical("r101"))
        .await
        .expect("store");
    assert!(session.is_none());
}

#[tokio::test]
async fn test_unknown_device_rejected() {
    let world = build_world().await;
    world.clock.set(at(9, 5));

    let outcome = world
        .handle
        .scan(DeviceId::new("ghost-reader"), tag("s-1"))
        .await
        .expect("coordinator alive");
    assert!(!outcome.accepted);
    assert_eq!(world.memory.scan_log_count(), 0);
}

#[tokio::test]
async fn test_wrong_class_rejected() {
    let world = build_world().await;
    world.clock.set(at(9, 0));
    tick(&world).await;

    // s-b1 belongs to 10b (room r202); scanning at r101 is rejected
    let outcome = scan(&world, OUT_101, "s-b1").await;
    assert!(!outcome.accepted);
    assert_eq!(outcome.message, "Not your class");
}

#[tokio::test]
async fn test_teacher_rejected_at_inside_reader() {
    let world = build_world().await;
    world.clock.set(at(9, 3));
    tick(&world).await;

    let outcome = scan(&world, IN_101, "t-1").await;
    assert!(!outcome.accepted);
    assert_eq!(outcome.message, "Check in at the outside reader");
}

// ============================================================================
// Teacher no-show and cancellation
// ============================================================================

#[tokio::test]
async fn test_no_show_cancels_and_never_reverts() {
    let world = build_world().await;
    let room = RoomId::canonical("r101");

    // A student scan initializes the waiting slot
    world.clock.set(at(9, 1));
    tick(&world).await;
    let outcome = scan(&world, OUT_101, "s-1").await;
    assert!(outcome.accepted);
    assert_eq!(
        world.handle.slot(room.clone()).await.map(|s| s.status),
        Some(SlotStatus::WaitingForTeacher)
    );

    // Grace is 15 min from the 09:00 start; the 09:16 tick cancels
    world.clock.set(at(9, 16));
    tick(&world).await;
    assert_eq!(
        world.handle.slot(room.clone()).await.map(|s| s.status),
        Some(SlotStatus::SlotCancelled)
    );

    // Later scans cannot resurrect the occurrence
    world.clock.set(at(9, 20));
    let outcome = scan(&world, OUT_101, "s-2").await;
    assert!(!outcome.accepted);
    let outcome = scan(&world, OUT_101, "t-1").await;
    assert!(!outcome.accepted);
    assert_eq!(
        world.handle.slot(room).await.map(|s| s.status),
        Some(SlotStatus::SlotCancelled)
    );
    assert_eq!(world.memory.attendance_count(), 0);
}

// ============================================================================
// Substitute override
// ============================================================================

#[tokio::test]
async fn test_substitute_override_attribution() {
    let world = build_world().await;

    // One student inside before the teacher
    world.clock.set(at(8, 45));
    tick(&world).await;
    scan(&world, OUT_101, "s-1").await;

    world.clock.set(at(9, 0));
    tick(&world).await;

    // t-2 (scheduled for physics later, not math) checks in for math
    world.clock.set(at(9, 3));
    let outcome = scan(&world, OUT_101, "t-2").await;
    assert!(outcome.accepted, "{}", outcome.message);
    assert!(outcome.is_override);

    let slot = world.handle.slot(RoomId::canonical("r101")).await.expect("slot");
    let session = SessionStore::get(world.memory.as_ref(), &slot.session_id.expect("session"))
        .await
        .expect("store")
        .expect("session");
    assert!(session.is_overridden);
    assert_eq!(session.teacher_id, UserId::new("t-1"));
    assert_eq!(session.actual_teacher_id, Some(UserId::new("t-2")));
    assert_eq!(session.effective_teacher(), &UserId::new("t-2"));

    // The snapshot attendance is attributed to the arriving teacher
    let record = AttendanceStore::find(
        world.memory.as_ref(),
        &student_id(1),
        &SlotRef::new("math"),
        at(9, 3).date_naive(),
    )
    .await
    .expect("store")
    .expect("record");
    assert_eq!(record.teacher_id, Some(UserId::new("t-2")));
    assert_eq!(record.source, AttendanceSource::TeacherArrival);
}

// ============================================================================
// Verification and movement
// ============================================================================

#[tokio::test]
async fn test_verification_then_movement_cycle() {
    let world = build_world().await;

    world.clock.set(at(8, 50));
    tick(&world).await;
    scan(&world, OUT_101, "s-1").await; // IN during early access

    world.clock.set(at(9, 0));
    tick(&world).await;
    world.clock.set(at(9, 3));
    scan(&world, OUT_101, "t-1").await; // snapshot credits s-1

    // Inside scan verifies the unverified snapshot record
    world.clock.set(at(9, 10));
    let outcome = scan(&world, IN_101, "s-1").await;
    assert!(outcome.accepted);
    assert_eq!(outcome.status.as_deref(), Some("verified"));

    // Verification is two-phase: the record is now verified exactly once
    let record = AttendanceStore::find(
        world.memory.as_ref(),
        &student_id(1),
        &SlotRef::new("math"),
        at(9, 10).date_naive(),
    )
    .await
    .expect("store")
    .expect("record");
    assert!(record.is_verified);
    assert_eq!(record.verified_at, Some(at(9, 10)));

    // Further inside scans alternate movement OUT -> IN -> OUT
    let outcome = scan(&world, IN_101, "s-1").await;
    assert_eq!(outcome.movement, Some(Movement::Out));
    let outcome = scan(&world, IN_101, "s-1").await;
    assert_eq!(outcome.movement, Some(Movement::In));
    let outcome = scan(&world, IN_101, "s-1").await;
    assert_eq!(outcome.movement, Some(Movement::Out));
}

#[tokio::test]
async fn test_inside_scan_without_record_rejected() {
    let world = build_world().await;

    world.clock.set(at(9, 0));
    tick(&world).await;
    world.clock.set(at(9, 3));
    scan(&world, OUT_101, "t-1").await;

    // s-5 never scanned outside; the inside reader refuses
    world.clock.set(at(9, 12));
    let outcome = scan(&world, IN_101, "s-5").await;
    assert!(!outcome.accepted);
    assert_eq!(outcome.message, "Scan outside first");
    assert_eq!(world.memory.attendance_count(), 0);
}

// ============================================================================
// Break, re-verification, rollover
// ============================================================================

#[tokio::test]
async fn test_break_reverification_and_rollover() {
    let world = build_world().await;
    let room = RoomId::canonical("r101");
    let mut events = world.handle.subscribe();

    // Teacher starts math with s-1 inside
    world.clock.set(at(8, 50));
    tick(&world).await;
    scan(&world, OUT_101, "s-1").await;
    world.clock.set(at(9, 0));
    tick(&world).await;
    world.clock.set(at(9, 3));
    scan(&world, OUT_101, "t-1").await;

    let math_session_id = world
        .handle
        .slot(room.clone())
        .await
        .and_then(|s| s.session_id)
        .expect("math session");

    // 09:45 tick: math ends, the session is carried into the break
    world.clock.set(at(9, 45));
    tick(&world).await;
    let slot = world.handle.slot(room.clone()).await.expect("slot");
    assert_eq!(slot.status, SlotStatus::Break);
    assert_eq!(slot.slot_ref, SlotRef::new("break"));
    assert_eq!(slot.session_id.as_ref(), Some(&math_session_id));
    let session = SessionStore::get(world.memory.as_ref(), &math_session_id)
        .await
        .expect("store")
        .expect("session");
    assert_eq!(session.status, SessionStatus::Break);

    // 09:48: before the trailing window (opens 09:50), inside scans are
    // plain movement
    world.clock.set(at(9, 48));
    let outcome = scan(&world, IN_101, "s-1").await;
    assert_eq!(outcome.status.as_deref(), Some("movement"));

    // 09:52: inside the window - re-verification
    world.clock.set(at(9, 52));
    let outcome = scan(&world, IN_101, "s-1").await;
    assert!(outcome.accepted, "{}", outcome.message);
    assert_eq!(outcome.status.as_deref(), Some("re_verified"));

    // At most once per student
    let outcome = scan(&world, IN_101, "s-1").await;
    assert!(!outcome.accepted);
    assert_eq!(outcome.message, "Already re-verified");

    let session = SessionStore::get(world.memory.as_ref(), &math_session_id)
        .await
        .expect("store")
        .expect("session");
    assert_eq!(session.re_verified_students, vec![student_id(1)]);

    // The forward record credits the physics slot
    let forward = AttendanceStore::find(
        world.memory.as_ref(),
        &student_id(1),
        &SlotRef::new("physics"),
        at(9, 52).date_naive(),
    )
    .await
    .expect("store")
    .expect("forward record");
    assert_eq!(forward.source, AttendanceSource::AutoReVerification);
    assert_eq!(forward.status, AttendanceStatus::Present);

    // 09:56 tick: one-shot break warning
    world.clock.set(at(9, 56));
    tick(&world).await;
    let mut saw_warning = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, presence_protocol::DashboardEvent::BreakWarning { .. }) {
            saw_warning = true;
        }
    }
    assert!(saw_warning, "break warning should have been broadcast");

    // 10:00 tick: re-verification window opens
    world.clock.set(at(10, 0));
    tick(&world).await;
    assert_eq!(
        world.handle.slot(room.clone()).await.map(|s| s.status),
        Some(SlotStatus::ReVerification)
    );

    // 10:05 tick: window elapses, room rolls into physics without a new
    // check-in; the carried session closes
    world.clock.set(at(10, 5));
    tick(&world).await;
    let slot = world.handle.slot(room.clone()).await.expect("slot");
    assert_eq!(slot.slot_ref, SlotRef::new("physics"));
    assert_eq!(slot.status, SlotStatus::SlotActive);
    let physics_session_id = slot.session_id.expect("physics session");
    assert_ne!(physics_session_id, math_session_id);

    let math_session = SessionStore::get(world.memory.as_ref(), &math_session_id)
        .await
        .expect("store")
        .expect("session");
    assert_eq!(math_session.status, SessionStatus::Closed);

    // The re-verified student needs no further scan for physics, and the
    // forward record stays unique
    let outcome = scan(&world, OUT_101, "s-1").await;
    assert_eq!(outcome.status.as_deref(), Some("movement"));
    let records = AttendanceStore::list_for_slot(
        world.memory.as_ref(),
        &SlotRef::new("physics"),
        at(10, 5).date_naive(),
    )
    .await
    .expect("store");
    assert_eq!(records.len(), 1);
}

// ============================================================================
// Closed mode
// ============================================================================

#[tokio::test]
async fn test_closed_mode_and_emergency_exit() {
    let world = build_world().await;

    world.clock.set(at(19, 0));
    tick(&world).await;
    assert_eq!(world.handle.mode().await, Some(SystemMode::Closed));

    // Ordinary entry is rejected
    let outcome = scan(&world, OUT_101, "s-1").await;
    assert!(!outcome.accepted);
    let outcome = scan(&world, OUT_101, "t-1").await;
    assert!(!outcome.accepted);

    // A student somehow still inside may leave
    PresenceStore::upsert(
        world.memory.as_ref(),
        presence_core::RoomPresence::new(
            student_id(2),
            RoomId::canonical("r101"),
            InRoomState::In,
            at(19, 0),
        ),
    )
    .await
    .expect("seed presence");
    let outcome = scan(&world, OUT_101, "s-2").await;
    assert!(outcome.accepted, "{}", outcome.message);
    assert_eq!(outcome.status.as_deref(), Some("emergency_exit"));
    assert_eq!(outcome.movement, Some(Movement::Out));

    // And only once - they are OUT now
    let outcome = scan(&world, OUT_101, "s-2").await;
    assert!(!outcome.accepted);
}

#[tokio::test]
async fn test_entering_closed_resets_presence() {
    let world = build_world().await;

    world.clock.set(at(8, 45));
    tick(&world).await;
    scan(&world, OUT_101, "s-1").await;
    scan(&world, OUT_101, "s-2").await;

    let presence = PresenceStore::get(
        world.memory.as_ref(),
        &student_id(1),
        &RoomId::canonical("r101"),
    )
    .await
    .expect("store");
    assert!(presence.is_some());

    // Day ends: the into-Closed transition wipes presence for tomorrow
    world.clock.set(at(19, 0));
    tick(&world).await;
    let presence = PresenceStore::get(
        world.memory.as_ref(),
        &student_id(1),
        &RoomId::canonical("r101"),
    )
    .await
    .expect("store");
    assert!(presence.is_none());
}

// ============================================================================
// Mode history
// ============================================================================

#[tokio::test]
async fn test_mode_history_chains() {
    let world = build_world().await;

    world.clock.set(at(8, 45));
    tick(&world).await;
    world.clock.set(at(9, 0));
    tick(&world).await;
    world.clock.set(at(9, 50));
    tick(&world).await;

    let history = world.handle.mode_history().await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].to, SystemMode::EarlyAccessFirstSlot);
    assert_eq!(history[1].to, SystemMode::SlotActive);
    assert_eq!(history[2].to, SystemMode::Break);
    assert_eq!(history[1].from, history[0].to);
    assert_eq!(history[2].from, history[1].to);
    assert!(history.iter().all(|t| t.triggered_by == "tick"));
}
