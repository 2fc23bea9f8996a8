//! Shared world builder for integration tests.
#![allow(dead_code)] // each test binary uses a different slice of this module
//!
//! One campus: room r101 runs math (09:00-09:45, t-1), a break
//! (09:45-10:00) and physics (10:00-10:45, t-2) for class 10a; room r202
//! runs history (09:00-09:45, t-3) for class 10b.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use presence_core::{
    ClassId, DeviceId, DeviceRecord, OrgId, Placement, RfidTag, Role, RoomId, SlotKind, SlotRef,
    TimetableSlot, User, UserId,
};
use presenced::clock::ManualClock;
use presenced::config::DaemonConfig;
use presenced::coordinator::{spawn_coordinator, CoordinatorHandle};
use presenced::notify::NotificationSender;
use presenced::schedule::StaticTimetable;
use presenced::store::{MemoryStore, Stores};

/// Notifier that counts send attempts; succeeds or fails on command.
pub struct CountingNotifier {
    pub sent: AtomicUsize,
    pub succeed: bool,
}

#[async_trait]
impl NotificationSender for CountingNotifier {
    async fn send_direct_message(&self, _address: &str, _text: &str) -> bool {
        self.sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.succeed
    }
}

pub struct TestWorld {
    pub handle: CoordinatorHandle,
    pub clock: ManualClock,
    pub memory: Arc<MemoryStore>,
    pub notifier: Arc<CountingNotifier>,
    pub config: Arc<DaemonConfig>,
    pub cancel: CancellationToken,
}

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, h, m, 0).single().expect("valid instant")
}

pub fn at_s(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, h, m, s).single().expect("valid instant")
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
}

fn row(
    slot_ref: &str,
    kind: SlotKind,
    room: &str,
    class: &str,
    teacher: &str,
    subject: &str,
    start: NaiveTime,
    end: NaiveTime,
) -> TimetableSlot {
    TimetableSlot {
        slot_ref: SlotRef::new(slot_ref),
        kind,
        room: RoomId::canonical(room),
        class_id: ClassId::new(class),
        teacher_id: UserId::new(teacher),
        subject_name: subject.to_string(),
        subject_code: None,
        start,
        end,
    }
}

fn teacher(id: &str) -> User {
    User {
        id: UserId::new(id),
        name: format!("Teacher {id}"),
        reg_no: format!("staff-{id}"),
        role: Role::Teacher,
        class_id: None,
        organization_id: OrgId::new("org-1"),
        rfid_tag: RfidTag::new(format!("tag-{id}")),
        phone: Some(format!("+1555-{id}")),
    }
}

fn student(id: &str, class: &str) -> User {
    User {
        id: UserId::new(id),
        name: format!("Student {id}"),
        reg_no: format!("reg-{id}"),
        role: Role::Student,
        class_id: Some(ClassId::new(class)),
        organization_id: OrgId::new("org-1"),
        rfid_tag: RfidTag::new(format!("tag-{id}")),
        phone: Some(format!("+1555-{id}")),
    }
}

/// Tag for a seeded user id.
pub fn tag(id: &str) -> RfidTag {
    RfidTag::new(format!("tag-{id}"))
}

/// Student ids s-1 ... s-30 (class 10a).
pub fn student_id(n: usize) -> UserId {
    UserId::new(format!("s-{n}"))
}

pub async fn build_world() -> TestWorld {
    let start = at(8, 0);
    let config = Arc::new(DaemonConfig::default());
    let (stores, memory) = Stores::in_memory();

    for id in ["t-1", "t-2", "t-3"] {
        memory.add_user(teacher(id));
    }
    for n in 1..=30 {
        memory.add_user(student(&format!("s-{n}"), "10a"));
    }
    memory.add_user(student("s-b1", "10b"));

    memory.add_device(DeviceRecord::new(
        DeviceId::new("out-101"),
        RoomId::canonical("r101"),
        Placement::Outside,
    ));
    memory.add_device(DeviceRecord::new(
        DeviceId::new("in-101"),
        RoomId::canonical("r101"),
        Placement::Inside,
    ));
    memory.add_device(DeviceRecord::new(
        DeviceId::new("out-202"),
        RoomId::canonical("r202"),
        Placement::Outside,
    ));

    let resolver = Arc::new(StaticTimetable::new(
        vec![
            row("math", SlotKind::Class, "r101", "10a", "t-1", "Mathematics", t(9, 0), t(9, 45)),
            row("break", SlotKind::Break, "r101", "10a", "t-1", "Morning Break", t(9, 45), t(10, 0)),
            row("physics", SlotKind::Class, "r101", "10a", "t-2", "Physics", t(10, 0), t(10, 45)),
            row("history", SlotKind::Class, "r202", "10b", "t-3", "History", t(9, 0), t(9, 45)),
        ],
        config.early_access(),
    ));

    let clock = ManualClock::at(start);
    let notifier = Arc::new(CountingNotifier {
        sent: AtomicUsize::new(0),
        succeed: true,
    });
    let cancel = CancellationToken::new();

    let handle = spawn_coordinator(
        config.clone(),
        stores,
        resolver,
        notifier.clone(),
        Arc::new(clock.clone()),
        cancel.clone(),
    )
    .await
    .expect("spawn coordinator");

    TestWorld {
        handle,
        clock,
        memory,
        notifier,
        config,
        cancel,
    }
}
