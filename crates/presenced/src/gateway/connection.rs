//! Connection handler for individual reader and dashboard connections.
//!
//! Each connection gets its own `ConnectionHandler` that:
//! - requires an `authenticate` (reader) or `subscribe` (dashboard) frame
//!   before anything else
//! - parses line-delimited JSON frames with size and time limits
//! - routes scans to the coordinator and answers with `scan_result`
//!
//! Connection errors are logged and end in a graceful disconnect; a bad
//! frame gets an error response but keeps the connection alive.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use presence_core::{DeviceId, DeviceRecord};
use presence_protocol::{DeviceMessage, ServerMessage};

use crate::coordinator::{CoordinatorError, CoordinatorHandle};

use super::{max_dashboard_clients, BoundDevice, ConnWriter, DevicesMap, SubscribersMap};

/// Maximum frame size (64 KiB)
const MAX_FRAME_SIZE: usize = 65_536;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// What a finished connection had bound, for deregistration.
#[derive(Debug, Default)]
pub struct ConnectionBindings {
    /// Device id, for reader connections
    pub device_id: Option<DeviceId>,

    /// Subscriber client id, for dashboard connections
    pub subscriber_id: Option<String>,
}

/// Handler for a single reader or dashboard connection.
pub struct ConnectionHandler {
    /// Buffered reader for incoming frames
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer, shared so the broadcaster can push alerts
    writer: ConnWriter,

    /// Handle to the coordinator
    coordinator: CoordinatorHandle,

    /// Shared dashboard subscriber map
    subscribers: SubscribersMap,

    /// Shared device connection map
    devices: DevicesMap,

    /// Device bound by a successful authenticate
    device: Option<DeviceRecord>,

    /// Subscriber id bound by a subscribe
    subscriber_id: Option<String>,

    /// Unique number for this connection
    connection_number: u64,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        coordinator: CoordinatorHandle,
        subscribers: SubscribersMap,
        devices: DevicesMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            coordinator,
            subscribers,
            devices,
            device: None,
            subscriber_id: None,
            connection_number,
        }
    }

    /// Runs the connection to completion and returns what it had bound.
    pub async fn run(mut self) -> ConnectionBindings {
        debug!(connection = self.connection_number, "New connection");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return self.bindings();
        }

        if let Err(e) = self.process_messages().await {
            debug!(
                connection = self.connection_number,
                device = ?self.device.as_ref().map(|d| d.device_id.clone()),
                error = %e,
                "Connection closed"
            );
        }

        info!(
            connection = self.connection_number,
            device = ?self.device.as_ref().map(|d| d.device_id.clone()),
            "Disconnected"
        );
        self.bindings()
    }

    fn bindings(&self) -> ConnectionBindings {
        ConnectionBindings {
            device_id: self.device.as_ref().map(|d| d.device_id.clone()),
            subscriber_id: self.subscriber_id.clone(),
        }
    }

    /// First frame must bind the connection: `authenticate` for readers,
    /// `subscribe` for dashboards.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        match msg {
            DeviceMessage::Authenticate { device_id } => {
                match self.coordinator.authenticate_device(device_id.clone()).await {
                    Ok(record) => {
                        self.devices.write().await.insert(
                            record.device_id.clone(),
                            BoundDevice {
                                writer: Arc::clone(&self.writer),
                                room: record.room.clone(),
                            },
                        );
                        info!(
                            device = %record.device_id,
                            room = %record.room,
                            placement = %record.placement,
                            "Reader bound"
                        );
                        self.device = Some(record);
                        self.send_message(ServerMessage::authenticated()).await
                    }
                    Err(CoordinatorError::UnknownDevice(id)) => {
                        self.send_message(ServerMessage::auth_rejected("Unknown device"))
                            .await?;
                        Err(ConnectionError::AuthRejected(id.to_string()))
                    }
                    Err(e) => {
                        self.send_message(ServerMessage::auth_rejected("Service unavailable"))
                            .await?;
                        Err(ConnectionError::Coordinator(e.to_string()))
                    }
                }
            }
            DeviceMessage::Subscribe => self.handle_subscribe().await,
            other => {
                self.send_message(ServerMessage::error(
                    "Expected authenticate or subscribe",
                ))
                .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Main message processing loop.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(connection = self.connection_number, "Peer sent EOF");
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(connection = self.connection_number, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            match msg {
                DeviceMessage::RfidScan { rfid_tag, device_id } => {
                    let Some(bound) = self.device.clone() else {
                        self.send_message(ServerMessage::error(
                            "Scans require an authenticated reader",
                        ))
                        .await?;
                        continue;
                    };
                    // Firmware repeats the device id in every scan frame;
                    // the bound identity wins on mismatch
                    if device_id != bound.device_id {
                        warn!(
                            bound = %bound.device_id,
                            claimed = %device_id,
                            "Scan frame claims a different device id"
                        );
                    }

                    match self.coordinator.scan(bound.device_id.clone(), rfid_tag).await {
                        Ok(outcome) => {
                            self.send_message(outcome.into_message()).await?;
                        }
                        Err(e) => {
                            warn!(device = %bound.device_id, error = %e, "Scan dispatch failed");
                            self.send_message(ServerMessage::error("Service unavailable"))
                                .await?;
                        }
                    }
                }

                DeviceMessage::Subscribe => {
                    if let Err(e) = self.handle_subscribe().await {
                        warn!(connection = self.connection_number, error = %e, "Subscribe failed");
                    }
                }

                DeviceMessage::Ping { seq } => {
                    self.send_message(ServerMessage::pong(seq)).await?;
                }

                DeviceMessage::Authenticate { .. } => {
                    self.send_message(ServerMessage::error("Already bound")).await?;
                }

                DeviceMessage::Disconnect => {
                    debug!(connection = self.connection_number, "Peer requested disconnect");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_subscribe(&mut self) -> Result<(), ConnectionError> {
        let client_id = format!("dash-{}", self.connection_number);
        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= max_dashboard_clients() && !subs.contains_key(&client_id) {
                self.send_message(ServerMessage::error("Too many dashboard clients"))
                    .await?;
                return Err(ConnectionError::TooManySubscribers);
            }
            subs.insert(client_id.clone(), Arc::clone(&self.writer));
        }
        self.subscriber_id = Some(client_id.clone());
        debug!(client_id = %client_id, "Dashboard subscribed");
        Ok(())
    }

    /// Reads a single frame.
    async fn read_message(&mut self) -> Result<DeviceMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_FRAME_SIZE {
            return Err(ConnectionError::FrameTooLarge {
                size: line.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        serde_json::from_str(&line).map_err(|e| ConnectionError::Parse(e.to_string()))
    }

    /// Sends a frame to the peer.
    async fn send_message(&self, msg: ServerMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::Parse(e.to_string()))?;

        let mut writer = self.writer.lock().await;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("authentication rejected for device {0}")]
    AuthRejected(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("connection closed")]
    Eof,

    #[error("read timeout")]
    Timeout,

    #[error("write timeout")]
    WriteTimeout,

    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("too many dashboard subscribers")]
    TooManySubscribers,

    #[error("coordinator error: {0}")]
    Coordinator(String),
}
