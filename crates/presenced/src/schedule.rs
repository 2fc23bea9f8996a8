//! Read-only timetable projections.
//!
//! The daemon never writes through this interface; the timetable is owned
//! by the administrative layer and only projected here. All methods are
//! pure functions of the timetable and `now`, so the trait is sync and
//! implementations are trivially shareable.

use chrono::{DateTime, Utc};
use presence_core::{ClassId, EntryWindow, SlotKind, SlotRef, TimetableSlot, UserId};

/// Projections over the daily timetable.
pub trait ScheduleResolver: Send + Sync {
    /// The school-wide period running at `now`, preferring a class period
    /// over a simultaneous break.
    fn active_period(&self, now: DateTime<Utc>) -> Option<TimetableSlot>;

    /// Every timetable row active at `now`, across all rooms.
    fn active_slots(&self, now: DateTime<Utc>) -> Vec<TimetableSlot>;

    /// The class slot a teacher can check in for at `now`: a slot of theirs
    /// whose entry window (early access before start, through slot end)
    /// contains `now`.
    fn current_teacher_slot(&self, teacher: &UserId, now: DateTime<Utc>)
        -> Option<TimetableSlot>;

    /// The class slot a class can enter at `now`, by the same window rule.
    fn current_class_slot(&self, class: &ClassId, now: DateTime<Utc>) -> Option<TimetableSlot>;

    /// The earliest slot of the day.
    fn first_slot_of_day(&self) -> Option<TimetableSlot>;

    /// The latest-ending slot of the day.
    fn last_slot_of_day(&self) -> Option<TimetableSlot>;

    /// The next class slot in the same room after a break ends.
    fn next_slot_after_break(&self, break_ref: &SlotRef) -> Option<TimetableSlot>;

    /// True if the given slot is the first slot of the day.
    fn is_first_slot_of_today(&self, slot_ref: &SlotRef) -> bool;

    /// The entry window for a slot.
    fn entry_window(&self, slot_ref: &SlotRef) -> Option<EntryWindow>;
}

/// A resolver over a fixed list of timetable rows.
///
/// Room labels are expected to be canonical already (the config loader
/// normalizes them on the way in).
pub struct StaticTimetable {
    slots: Vec<TimetableSlot>,
    early_access: chrono::Duration,
}

impl StaticTimetable {
    /// Creates a resolver over the given rows.
    pub fn new(slots: Vec<TimetableSlot>, early_access: chrono::Duration) -> Self {
        Self {
            slots,
            early_access,
        }
    }

    fn row(&self, slot_ref: &SlotRef) -> Option<&TimetableSlot> {
        self.slots.iter().find(|s| s.slot_ref == *slot_ref)
    }

    fn window_contains(&self, slot: &TimetableSlot, now: DateTime<Utc>) -> bool {
        let t = now.time();
        let opens = slot.start - self.early_access;
        // Windows never wrap midnight in practice; a wrapped open time
        // degenerates to "open from the start of the day".
        let open_ok = if opens <= slot.start { t >= opens } else { true };
        open_ok && t < slot.end
    }
}

impl ScheduleResolver for StaticTimetable {
    fn active_period(&self, now: DateTime<Utc>) -> Option<TimetableSlot> {
        let t = now.time();
        let mut active = self.slots.iter().filter(|s| s.contains(t));
        let mut fallback = None;
        for slot in active.by_ref() {
            if slot.kind == SlotKind::Class {
                return Some(slot.clone());
            }
            fallback.get_or_insert_with(|| slot.clone());
        }
        fallback
    }

    fn active_slots(&self, now: DateTime<Utc>) -> Vec<TimetableSlot> {
        let t = now.time();
        self.slots.iter().filter(|s| s.contains(t)).cloned().collect()
    }

    fn current_teacher_slot(
        &self,
        teacher: &UserId,
        now: DateTime<Utc>,
    ) -> Option<TimetableSlot> {
        self.slots
            .iter()
            .filter(|s| s.kind == SlotKind::Class && s.teacher_id == *teacher)
            .filter(|s| self.window_contains(s, now))
            .min_by_key(|s| s.start)
            .cloned()
    }

    fn current_class_slot(&self, class: &ClassId, now: DateTime<Utc>) -> Option<TimetableSlot> {
        self.slots
            .iter()
            .filter(|s| s.kind == SlotKind::Class && s.class_id == *class)
            .filter(|s| self.window_contains(s, now))
            .min_by_key(|s| s.start)
            .cloned()
    }

    fn first_slot_of_day(&self) -> Option<TimetableSlot> {
        self.slots.iter().min_by_key(|s| s.start).cloned()
    }

    fn last_slot_of_day(&self) -> Option<TimetableSlot> {
        self.slots.iter().max_by_key(|s| s.end).cloned()
    }

    fn next_slot_after_break(&self, break_ref: &SlotRef) -> Option<TimetableSlot> {
        let break_row = self.row(break_ref)?;
        self.slots
            .iter()
            .filter(|s| {
                s.kind == SlotKind::Class && s.room == break_row.room && s.start >= break_row.end
            })
            .min_by_key(|s| s.start)
            .cloned()
    }

    fn is_first_slot_of_today(&self, slot_ref: &SlotRef) -> bool {
        self.first_slot_of_day()
            .map(|s| s.slot_ref == *slot_ref)
            .unwrap_or(false)
    }

    fn entry_window(&self, slot_ref: &SlotRef) -> Option<EntryWindow> {
        let row = self.row(slot_ref)?;
        Some(EntryWindow {
            opens_at: row.start - self.early_access,
            closes_at: row.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use presence_core::RoomId;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, h, m, 0).single().expect("valid")
    }

    fn row(
        slot_ref: &str,
        kind: SlotKind,
        room: &str,
        class: &str,
        teacher: &str,
        start: NaiveTime,
        end: NaiveTime,
    ) -> TimetableSlot {
        TimetableSlot {
            slot_ref: SlotRef::new(slot_ref),
            kind,
            room: RoomId::canonical(room),
            class_id: ClassId::new(class),
            teacher_id: UserId::new(teacher),
            subject_name: slot_ref.to_string(),
            subject_code: None,
            start,
            end,
        }
    }

    fn timetable() -> StaticTimetable {
        StaticTimetable::new(
            vec![
                row("math", SlotKind::Class, "r101", "10a", "t-1", t(9, 0), t(9, 45)),
                row("break", SlotKind::Break, "r101", "10a", "t-1", t(9, 45), t(10, 0)),
                row("physics", SlotKind::Class, "r101", "10a", "t-2", t(10, 0), t(10, 45)),
                row("history", SlotKind::Class, "r202", "10b", "t-3", t(9, 0), t(9, 45)),
            ],
            chrono::Duration::minutes(30),
        )
    }

    #[test]
    fn test_active_period_prefers_class() {
        let tt = timetable();
        let period = tt.active_period(at(9, 10)).expect("class period");
        assert_eq!(period.kind, SlotKind::Class);

        let break_period = tt.active_period(at(9, 50)).expect("break period");
        assert_eq!(break_period.kind, SlotKind::Break);

        assert!(tt.active_period(at(11, 0)).is_none());
    }

    #[test]
    fn test_active_slots_spans_rooms() {
        let tt = timetable();
        let active = tt.active_slots(at(9, 10));
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn test_teacher_slot_respects_entry_window() {
        let tt = timetable();
        // 08:35 is within the 30-minute early-access window for 09:00
        let slot = tt.current_teacher_slot(&UserId::new("t-1"), at(8, 35));
        assert_eq!(slot.map(|s| s.slot_ref), Some(SlotRef::new("math")));

        // 08:25 is before the window opens
        assert!(tt.current_teacher_slot(&UserId::new("t-1"), at(8, 25)).is_none());

        // After the slot ends nothing matches for t-1
        assert!(tt.current_teacher_slot(&UserId::new("t-1"), at(9, 50)).is_none());
    }

    #[test]
    fn test_class_slot_lookup() {
        let tt = timetable();
        let slot = tt.current_class_slot(&ClassId::new("10b"), at(9, 10));
        assert_eq!(slot.map(|s| s.slot_ref), Some(SlotRef::new("history")));
    }

    #[test]
    fn test_first_and_last_slots() {
        let tt = timetable();
        assert!(tt.is_first_slot_of_today(&SlotRef::new("math")) || {
            // Two slots share the earliest start; either may be first
            tt.is_first_slot_of_today(&SlotRef::new("history"))
        });
        let last = tt.last_slot_of_day().expect("has slots");
        assert_eq!(last.slot_ref, SlotRef::new("physics"));
    }

    #[test]
    fn test_next_slot_after_break() {
        let tt = timetable();
        let next = tt.next_slot_after_break(&SlotRef::new("break")).expect("next");
        assert_eq!(next.slot_ref, SlotRef::new("physics"));

        // Unknown break ref yields nothing
        assert!(tt.next_slot_after_break(&SlotRef::new("nope")).is_none());
    }

    #[test]
    fn test_entry_window() {
        let tt = timetable();
        let window = tt.entry_window(&SlotRef::new("math")).expect("window");
        assert_eq!(window.opens_at, t(8, 30));
        assert_eq!(window.closes_at, t(9, 45));
    }
}
