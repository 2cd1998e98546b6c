//! Event router seam
//!
//! Shards hand every decoded dispatch to an [`EventRouter`]. Each hand-off
//! runs on its own task so a slow router never stalls a socket read.

use super::GatewayEventType;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// A decoded dispatch, tagged with the shard that received it
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub shard_id: u32,
    pub kind: GatewayEventType,
    pub sequence: Option<u64>,
    pub data: Value,
}

/// Receives dispatch events from every shard
#[async_trait]
pub trait EventRouter: Send + Sync + 'static {
    async fn dispatch(&self, event: DispatchEvent);
}

/// Logs every event at debug level and drops it
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRouter;

#[async_trait]
impl EventRouter for LoggingRouter {
    async fn dispatch(&self, event: DispatchEvent) {
        tracing::debug!(
            shard_id = event.shard_id,
            event = %event.kind,
            sequence = ?event.sequence,
            "Dispatch received"
        );
    }
}

/// Forwards events into an unbounded channel
///
/// Useful when the consumer wants a single ordered stream instead of a
/// callback per event.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl ChannelRouter {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventRouter for ChannelRouter {
    async fn dispatch(&self, event: DispatchEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Dispatch receiver dropped");
        }
    }
}
