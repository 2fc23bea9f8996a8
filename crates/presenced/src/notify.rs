//! Outbound notifications.
//!
//! Delivery is best-effort by contract: a failed send is logged and
//! counted, never propagated. Nothing in the attendance pipeline waits on
//! or rolls back because of a notification.

use async_trait::async_trait;
use tracing::info;

/// Sends direct messages to users (SMS, chat, whatever the deployment
/// wires up).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends `text` to `address`. Returns true if the message was handed
    /// off successfully.
    async fn send_direct_message(&self, address: &str, text: &str) -> bool;
}

/// Default sender: logs the message instead of delivering it.
///
/// Stands in until a deployment provides a real transport; also what
/// integration tests swap for a recording fake.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationSender for LoggingNotifier {
    async fn send_direct_message(&self, address: &str, text: &str) -> bool {
        info!(address = %address, text = %text, "Direct message (logging sender)");
        true
    }
}
