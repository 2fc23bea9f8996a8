//! Teacher-arrival snapshot attendance.
//!
//! The poll converts a continuous, unreliable scan stream into one
//! authoritative cutover: at teacher arrival, everyone already inside is
//! credited present in bulk, and everyone else gets a grace-window message.
//! Late handling is left to the much smaller late-entry path.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use presence_core::{ArrivalSnapshot, AttendanceSource, SlotContext, User, UserId};

use crate::config::DaemonConfig;
use crate::ledger::AttendanceLedger;
use crate::notify::NotificationSender;
use crate::store::{PresenceStore, StoreResult, UserStore};

/// Result of one poll.
#[derive(Debug, Clone)]
pub struct PollReport {
    /// Records created for students inside the room
    pub marked_present: u32,

    /// Outside students successfully notified
    pub notified_absent: u32,

    /// Notification attempts that failed (logged, never fatal)
    pub notify_failures: u32,

    /// Students partitioned inside at the snapshot instant
    pub inside: Vec<UserId>,

    /// Students partitioned outside at the snapshot instant
    pub outside: Vec<UserId>,

    /// Counts for the session's arrival snapshot
    pub snapshot: ArrivalSnapshot,
}

/// Snapshot algorithm triggered on teacher arrival.
pub struct AttendancePoller {
    users: Arc<dyn UserStore>,
    presence: Arc<dyn PresenceStore>,
    ledger: Arc<AttendanceLedger>,
    notifier: Arc<dyn NotificationSender>,
    config: Arc<DaemonConfig>,
}

impl AttendancePoller {
    /// Creates a poller over the given collaborators.
    pub fn new(
        users: Arc<dyn UserStore>,
        presence: Arc<dyn PresenceStore>,
        ledger: Arc<AttendanceLedger>,
        notifier: Arc<dyn NotificationSender>,
        config: Arc<DaemonConfig>,
    ) -> Self {
        Self {
            users,
            presence,
            ledger,
            notifier,
            config,
        }
    }

    /// Runs the snapshot for one slot occurrence.
    ///
    /// 1. Fetch the class roster.
    /// 2. Bulk-read presence for the whole roster in one query.
    /// 3. Partition into inside (IN) and outside (everything else).
    /// 4. Bulk-create present records for the inside partition.
    /// 5. Best-effort notify every contactable outside student; failures
    ///    are counted and logged, step 4 is never rolled back.
    pub async fn trigger_poll(
        &self,
        ctx: &SlotContext,
        now: DateTime<Utc>,
    ) -> StoreResult<PollReport> {
        let roster = self.users.list_class_students(&ctx.class_id).await?;
        let ids: Vec<UserId> = roster.iter().map(|u| u.id.clone()).collect();

        let rows = self.presence.get_many(&ids, &ctx.room).await?;
        let inside_set: std::collections::HashSet<&UserId> = rows
            .iter()
            .filter(|p| p.status.is_in())
            .map(|p| &p.student_id)
            .collect();

        let (inside, outside): (Vec<&User>, Vec<&User>) =
            roster.iter().partition(|u| inside_set.contains(&u.id));

        let inside_ids: Vec<UserId> = inside.iter().map(|u| u.id.clone()).collect();
        let outside_ids: Vec<UserId> = outside.iter().map(|u| u.id.clone()).collect();

        let marked_present = self
            .ledger
            .create_from_snapshot(&inside_ids, ctx, now, AttendanceSource::TeacherArrival)
            .await?;

        let mut notified = 0u32;
        let mut failures = 0u32;
        for student in &outside {
            let Some(address) = student.phone.as_deref() else {
                debug!(student = %student.id, "Outside student has no contact address");
                continue;
            };
            let text = self.grace_message(ctx);
            if self.notifier.send_direct_message(address, &text).await {
                notified += 1;
            } else {
                failures += 1;
                warn!(student = %student.id, "Grace-window notification failed");
            }
        }

        let snapshot = ArrivalSnapshot {
            at: now,
            inside_count: inside_ids.len() as u32,
            outside_count: outside_ids.len() as u32,
        };

        info!(
            room = %ctx.room,
            slot = %ctx.slot_ref,
            inside = snapshot.inside_count,
            outside = snapshot.outside_count,
            marked_present,
            notified,
            failures,
            "Arrival snapshot complete"
        );

        Ok(PollReport {
            marked_present,
            notified_absent: notified,
            notify_failures: failures,
            inside: inside_ids,
            outside: outside_ids,
            snapshot,
        })
    }

    fn grace_message(&self, ctx: &SlotContext) -> String {
        format!(
            "{} has started in {}. Scan at the door within {} minutes to be \
             marked present ({} pts); after that you will be marked late ({} pts).",
            ctx.subject_name,
            ctx.room,
            self.config.late_threshold_minutes,
            self.config.present_points,
            self.config.late_points,
        )
    }
}
