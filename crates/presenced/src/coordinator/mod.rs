//! Scan and tick coordination using the actor pattern.
//!
//! The coordinator is the single owner of live state: the global mode and
//! the per-room slot map. Scans from the gateway and the periodic ticks
//! all arrive as commands on one mpsc channel and are processed strictly
//! in arrival order.
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ Reader devices  │────▶│  CoordinatorActor │────▶│ Broadcast Channel│
//! └─────────────────┘     └───────────────────┘     └──────────────────┘
//!         │                        │                         │
//!         │  CoordinatorCommand    │  mode + slot map        │
//!         │  (mpsc channel)        │  ledger / sessions      │
//!         ▼                        ▼                         ▼
//!    rfid scans               stores (documents)      dashboards, buzzer
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod actor;
mod commands;
mod handle;
mod scan;

pub use actor::CoordinatorActor;
pub use commands::{CoordinatorCommand, CoordinatorError, ScanOutcome};
pub use handle::CoordinatorHandle;

use crate::clock::Clock;
use crate::config::DaemonConfig;
use crate::ledger::AttendanceLedger;
use crate::mode::ModeCoordinator;
use crate::notify::NotificationSender;
use crate::poller::AttendancePoller;
use crate::schedule::ScheduleResolver;
use crate::sessions::SessionRegistry;
use crate::store::{StoreError, Stores};
use crate::tracker::SlotTracker;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 256;

/// Spawns the coordinator actor and its tick tasks.
///
/// This function:
/// 1. Builds the ledger, session registry and poller over the stores
/// 2. Rehydrates the per-room slot map from non-terminal sessions
/// 3. Spawns the actor plus the mode, slot and sweep tick tasks
/// 4. Returns a `CoordinatorHandle` for the gateway and tests
///
/// Tick tasks stop on cancellation or when the actor goes away.
pub async fn spawn_coordinator(
    config: Arc<DaemonConfig>,
    stores: Stores,
    resolver: Arc<dyn ScheduleResolver>,
    notifier: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    cancel_token: CancellationToken,
) -> Result<CoordinatorHandle, StoreError> {
    let ledger = Arc::new(AttendanceLedger::new(
        stores.attendance.clone(),
        stores.presence.clone(),
        &config,
    ));
    let registry = SessionRegistry::new(stores.sessions.clone());
    let poller = AttendancePoller::new(
        stores.users.clone(),
        stores.presence.clone(),
        ledger.clone(),
        notifier,
        config.clone(),
    );

    // Rebuild the in-memory room map from surviving sessions so a restart
    // does not lose live rooms
    let mut tracker = SlotTracker::new(&config);
    let rehydrated = registry.rehydrate().await?;
    for session in &rehydrated {
        if let Some(slot) = actor::slot_from_session(session, config.re_verification_grace()) {
            tracker.replace(slot);
        }
    }
    if !rehydrated.is_empty() {
        info!(count = rehydrated.len(), "Rehydrated live rooms from sessions");
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = CoordinatorActor {
        receiver: cmd_rx,
        mode: ModeCoordinator::new(config.clone(), resolver.clone()),
        tracker,
        registry,
        ledger,
        poller,
        resolver,
        stores,
        config: config.clone(),
        clock,
        events: event_tx.clone(),
    };
    tokio::spawn(actor.run());

    spawn_tick_task(
        cmd_tx.clone(),
        || CoordinatorCommand::ModeTick,
        Duration::from_secs(config.mode_tick_secs),
        cancel_token.clone(),
        "mode tick",
    );
    spawn_tick_task(
        cmd_tx.clone(),
        || CoordinatorCommand::SlotTick,
        Duration::from_secs(config.slot_tick_secs),
        cancel_token.clone(),
        "slot tick",
    );
    spawn_tick_task(
        cmd_tx.clone(),
        || CoordinatorCommand::Sweep,
        Duration::from_secs(config.sweep_interval_secs),
        cancel_token,
        "session sweep",
    );

    Ok(CoordinatorHandle::new(cmd_tx, event_tx))
}

/// Spawns a background task that periodically sends a fire-and-forget
/// command to the actor.
fn spawn_tick_task(
    sender: mpsc::Sender<CoordinatorCommand>,
    make_command: impl Fn() -> CoordinatorCommand + Send + 'static,
    period: Duration,
    cancel_token: CancellationToken,
    name: &'static str,
) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // The first tick fires immediately; skip it so startup state
        // settles before the first timed pass
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!(task = name, "Tick task stopping: shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    if sender.send(make_command()).await.is_err() {
                        debug!(task = name, "Tick task stopping: coordinator gone");
                        break;
                    }
                }
            }
        }
    });
}
