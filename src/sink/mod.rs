//! Outbound destination for pipeline events.
//!
//! The git poller hands every detected pipeline to an [`EventSink`]. A failed
//! publish is the sink's caller's problem only to the extent of logging it:
//! pollers drop the event and carry on.
//!
//! Implementations:
//! - [`RedisSink`](crate::bus::RedisSink): publishes JSON on a redis channel
//! - [`ChannelSink`]: forwards events into an in-process queue

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::pipeline::PipelineEvent;

/// Errors publishing an event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Publish(#[from] redis::RedisError),

    #[error("event queue closed")]
    Closed,
}

/// Somewhere pipeline events can be published.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish(&self, event: &PipelineEvent) -> Result<(), SinkError>;
}

/// Forwards events into an in-process queue.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        ChannelSink { tx }
    }

    /// Creates a sink and the receiving end of its queue.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (ChannelSink { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: &PipelineEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}
