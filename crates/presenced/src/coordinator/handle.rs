//! Client interface for interacting with the CoordinatorActor.
//!
//! The `CoordinatorHandle` is a cheap-to-clone facade that sends commands
//! to the actor and subscribes to dashboard events. Channel errors are
//! mapped to `CoordinatorError::ChannelClosed` or graceful defaults.

use tokio::sync::{broadcast, mpsc, oneshot};

use presence_core::{
    ActiveSlot, DeviceId, DeviceRecord, ModeTransition, RfidTag, RoomId, SystemMode,
};
use presence_protocol::DashboardEvent;

use super::commands::{CoordinatorCommand, CoordinatorError, ScanOutcome};

/// Handle for interacting with the coordinator actor.
///
/// Clone freely; all clones talk to the same actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<CoordinatorCommand>,

    /// Event broadcaster for subscribing to dashboard events
    event_sender: broadcast::Sender<DashboardEvent>,
}

impl CoordinatorHandle {
    /// Creates a new handle.
    pub fn new(
        sender: mpsc::Sender<CoordinatorCommand>,
        event_sender: broadcast::Sender<DashboardEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Device handshake: marks the device online and returns its record.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::UnknownDevice` for unprovisioned device ids
    /// - `CoordinatorError::ChannelClosed` if the actor has shut down
    pub async fn authenticate_device(
        &self,
        device_id: DeviceId,
    ) -> Result<DeviceRecord, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::AuthenticateDevice {
                device_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)?
    }

    /// Marks a device offline after its connection dropped.
    ///
    /// Fire-and-forget: send errors are ignored (actor may be shutting
    /// down).
    pub async fn device_disconnected(&self, device_id: DeviceId) {
        let _ = self
            .sender
            .send(CoordinatorCommand::DeviceDisconnected { device_id })
            .await;
    }

    /// Routes one scan and returns its terminal outcome.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::ChannelClosed` if the actor has shut down
    pub async fn scan(
        &self,
        device_id: DeviceId,
        rfid_tag: RfidTag,
    ) -> Result<ScanOutcome, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::Scan {
                device_id,
                rfid_tag,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// The current global mode, or `None` if the actor is gone.
    pub async fn mode(&self) -> Option<SystemMode> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::GetMode { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// The mode transition history, oldest first.
    ///
    /// Returns an empty vector if the actor is gone.
    pub async fn mode_history(&self) -> Vec<ModeTransition> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(CoordinatorCommand::GetModeHistory { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// The active slot for a room, if any.
    pub async fn slot(&self, room: RoomId) -> Option<ActiveSlot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::GetSlot {
                room,
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok()?
    }

    /// Triggers a mode recomputation (normally driven by the tick task).
    pub async fn tick_mode(&self) {
        let _ = self.sender.send(CoordinatorCommand::ModeTick).await;
    }

    /// Triggers a slot time-check (normally driven by the tick task).
    pub async fn tick_slots(&self) {
        let _ = self.sender.send(CoordinatorCommand::SlotTick).await;
    }

    /// Triggers a session sweep (normally driven by the sweep task).
    pub async fn sweep(&self) {
        let _ = self.sender.send(CoordinatorCommand::Sweep).await;
    }

    /// Subscribes to dashboard events.
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.event_sender.subscribe()
    }

    /// True if the actor is still accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (CoordinatorHandle, mpsc::Receiver<CoordinatorCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        (CoordinatorHandle::new(cmd_tx, event_tx), cmd_rx)
    }

    #[tokio::test]
    async fn test_scan_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let responder = tokio::spawn(async move {
            match rx.recv().await {
                Some(CoordinatorCommand::Scan {
                    device_id,
                    rfid_tag,
                    respond_to,
                }) => {
                    assert_eq!(device_id.as_str(), "reader-101-out");
                    assert_eq!(rfid_tag.as_str(), "04:A3");
                    let _ = respond_to.send(ScanOutcome::accepted("ok"));
                    true
                }
                _ => false,
            }
        });

        let outcome = handle
            .scan(DeviceId::new("reader-101-out"), RfidTag::new("04:A3"))
            .await
            .expect("scan");
        assert!(outcome.accepted);
        assert!(responder.await.expect("join"));
    }

    #[tokio::test]
    async fn test_channel_closed_errors() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle
            .scan(DeviceId::new("reader-101-out"), RfidTag::new("04:A3"))
            .await;
        assert!(matches!(result, Err(CoordinatorError::ChannelClosed)));

        assert!(handle.mode().await.is_none());
        assert!(handle.mode_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_is_fire_and_forget_on_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Must not panic or error
        handle.tick_mode().await;
        handle.tick_slots().await;
        handle.sweep().await;
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }
}
