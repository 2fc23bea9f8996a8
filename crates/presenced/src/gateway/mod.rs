//! TCP gateway for reader devices and dashboard clients.
//!
//! The gateway:
//! - listens on a TCP socket, one connection per reader or dashboard
//! - spawns a ConnectionHandler for each connection
//! - forwards dashboard events to subscribers
//! - pushes buzzer alerts to the devices of a room on break warnings
//! - supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  GatewayServer  │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌────────────────────┐
//! │ConnectionHandler│────▶│  CoordinatorHandle │
//! │ (per connection)│     │                    │
//! └─────────────────┘     └────────────────────┘
//!         │
//!         │ broadcast
//!         ▼
//! ┌─────────────────┐
//! │   Dashboards    │
//! │  (subscribers)  │
//! └─────────────────┘
//! ```

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use presence_core::{DeviceId, RoomId};
use presence_protocol::{DashboardEvent, ServerMessage};

use crate::coordinator::CoordinatorHandle;

/// Shared writer handle for one connection.
pub type ConnWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Dashboard subscribers keyed by client id.
pub type SubscribersMap = Arc<RwLock<HashMap<String, ConnWriter>>>;

/// A bound device connection.
pub struct BoundDevice {
    /// Writer for server-initiated frames (buzzer alerts)
    pub writer: ConnWriter,

    /// Canonical room the device serves
    pub room: RoomId,
}

/// Device connections keyed by device id.
pub type DevicesMap = Arc<RwLock<HashMap<DeviceId, BoundDevice>>>;

/// Maximum number of concurrent dashboard clients
const MAX_DASHBOARD_CLIENTS: usize = 16;

/// Buzzer duration for break warnings, seconds
const BREAK_WARNING_BUZZER_SECS: u32 = 3;

/// TCP gateway server.
pub struct GatewayServer {
    /// Address to listen on
    listen_addr: String,

    /// Handle to the coordinator actor
    coordinator: CoordinatorHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for client ids
    connection_counter: AtomicU64,

    /// Active dashboard subscribers
    subscribers: SubscribersMap,

    /// Bound device connections
    devices: DevicesMap,
}

impl GatewayServer {
    /// Creates a new gateway server.
    pub fn new(
        listen_addr: impl Into<String>,
        coordinator: CoordinatorHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            coordinator,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            devices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Runs the server until the cancellation token fires.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener =
            TcpListener::bind(&self.listen_addr)
                .await
                .map_err(|e| ServerError::Bind {
                    addr: self.listen_addr.clone(),
                    error: e.to_string(),
                })?;

        info!(addr = %self.listen_addr, "Gateway listening");

        self.run_with_listener(listener).await
    }

    /// Runs the server on an already-bound listener (tests bind port 0 and
    /// read the address back before starting).
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.spawn_event_broadcaster();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Gateway shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(peer = %addr, "Connection accepted");
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Keep accepting other connections
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Number of active dashboard subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Number of bound device connections.
    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    fn handle_connection(&self, stream: tokio::net::TcpStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let coordinator = self.coordinator.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let devices = Arc::clone(&self.devices);

        tokio::spawn(async move {
            let handler = ConnectionHandler::new(
                reader,
                writer,
                coordinator.clone(),
                Arc::clone(&subscribers),
                Arc::clone(&devices),
                connection_number,
            );

            let bound = handler.run().await;

            // Deregister whatever this connection had bound
            if let Some(device_id) = bound.device_id {
                devices.write().await.remove(&device_id);
                coordinator.device_disconnected(device_id).await;
            }
            if let Some(client_id) = bound.subscriber_id {
                if subscribers.write().await.remove(&client_id).is_some() {
                    debug!(client_id = %client_id, "Removed disconnected subscriber");
                }
            }
        });
    }

    /// Forwards coordinator events to subscribers and room devices.
    fn spawn_event_broadcaster(&self) {
        let mut event_rx = self.coordinator.subscribe();
        let subscribers = Arc::clone(&self.subscribers);
        let devices = Arc::clone(&self.devices);
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Event broadcaster shutting down");
                        break;
                    }

                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => {
                                broadcast_event(&subscribers, &devices, &event).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event broadcaster lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    async fn cleanup(&self) {
        self.subscribers.write().await.clear();
        self.devices.write().await.clear();
        info!("Gateway cleanup complete");
    }
}

/// Limit exposed for the connection handler.
pub(crate) const fn max_dashboard_clients() -> usize {
    MAX_DASHBOARD_CLIENTS
}

/// Sends one dashboard event to all subscribers, and a buzzer alert to the
/// affected room's devices for break warnings. Dead writers are dropped.
async fn broadcast_event(
    subscribers: &SubscribersMap,
    devices: &DevicesMap,
    event: &DashboardEvent,
) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "Failed to serialize event");
            return;
        }
    };

    // Fan out to dashboards, collecting dead subscribers
    let mut failed_clients = Vec::new();
    {
        let subs = subscribers.read().await;
        for (client_id, writer) in subs.iter() {
            if write_line(writer, &json).await.is_err() {
                failed_clients.push(client_id.clone());
            }
        }
    }
    if !failed_clients.is_empty() {
        let mut subs = subscribers.write().await;
        for client_id in failed_clients {
            subs.remove(&client_id);
            debug!(client_id = %client_id, "Removed failed subscriber");
        }
    }

    // Break warnings additionally ring the room's readers
    if let DashboardEvent::BreakWarning { room, minutes_left, .. } = event {
        let alert = ServerMessage::buzzer_alert(
            BREAK_WARNING_BUZZER_SECS,
            &format!("Break ends in {minutes_left} min"),
        );
        let alert_json = match serde_json::to_string(&alert) {
            Ok(j) => j,
            Err(e) => {
                error!(error = %e, "Failed to serialize buzzer alert");
                return;
            }
        };

        let conns = devices.read().await;
        for (device_id, bound) in conns.iter() {
            if bound.room != *room {
                continue;
            }
            if let Err(e) = write_line(&bound.writer, &alert_json).await {
                debug!(device = %device_id, error = %e, "Failed to send buzzer alert");
            }
        }
    }
}

/// Writes one line-delimited frame to a shared writer.
async fn write_line(writer: &ConnWriter, json: &str) -> Result<(), std::io::Error> {
    let mut writer = writer.lock().await;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Errors that can occur in gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:7642".to_string(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:7642"));
        assert!(err.to_string().contains("address in use"));
    }
}
