//! Redis message bus.
//!
//! The service talks to the rest of the system over two pub/sub channels:
//!
//! - pipeline events are published as JSON on the pipelines channel
//!   ([`RedisSink`])
//! - poller control requests arrive on the control channel ([`RedisBus::listen`])
//!
//! Connecting retries with exponential backoff (see [`retry`]). A subscription
//! that drops is re-established the same way.

pub mod retry;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::PipelineEvent;
use crate::sink::{EventSink, SinkError};

pub use retry::{RetryConfig, retry_with_backoff};

/// Errors talking to the bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Connection to the redis bus.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
    retry: RetryConfig,
}

impl RedisBus {
    /// Connects to `url`, retrying per `retry`.
    pub async fn connect(url: &str, retry: RetryConfig) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = retry_with_backoff(retry, "redis connect", || {
            ConnectionManager::new(client.clone())
        })
        .await?;

        info!(url, "Connected to redis");
        Ok(RedisBus {
            client,
            conn,
            retry,
        })
    }

    /// Returns a sink publishing pipeline events on `channel`.
    pub fn sink(&self, channel: impl Into<String>) -> RedisSink {
        RedisSink {
            conn: self.conn.clone(),
            channel: channel.into(),
        }
    }

    /// Forwards every message on `channel` into `tx` until `shutdown` fires or
    /// the receiver is dropped.
    ///
    /// A dropped subscription is re-established; the error is returned only if
    /// that fails after every retry.
    pub async fn listen(
        &self,
        channel: &str,
        tx: mpsc::Sender<Vec<u8>>,
        shutdown: CancellationToken,
    ) -> Result<(), BusError> {
        loop {
            let mut pubsub = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = self.subscribe(channel) => result?,
            };
            info!(channel, "Subscribed to control channel");

            let mut messages = Box::pin(pubsub.on_message());
            loop {
                let msg = tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    msg = messages.next() => msg,
                };

                let Some(msg) = msg else {
                    warn!(channel, "Subscription ended, resubscribing");
                    break;
                };

                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel, error = %e, "Ignoring unreadable message");
                        continue;
                    }
                };

                debug!(channel, bytes = payload.len(), "Received control message");
                if tx.send(payload).await.is_err() {
                    debug!(channel, "Control receiver dropped, unsubscribing");
                    return Ok(());
                }
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<redis::aio::PubSub, BusError> {
        let pubsub = retry_with_backoff(self.retry, "redis subscribe", move || async move {
            let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
            pubsub.subscribe(channel).await?;
            Ok::<_, redis::RedisError>(pubsub)
        })
        .await?;
        Ok(pubsub)
    }
}

/// Publishes pipeline events as JSON on a redis channel.
#[derive(Clone)]
pub struct RedisSink {
    conn: ConnectionManager,
    channel: String,
}

#[async_trait]
impl EventSink for RedisSink {
    async fn publish(&self, event: &PipelineEvent) -> Result<(), SinkError> {
        let payload = encode_event(event)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        debug!(
            channel = %self.channel,
            pipeline = %event.name,
            receivers,
            "Published pipeline event"
        );
        Ok(())
    }
}

/// Encodes an event as its wire JSON.
pub fn encode_event(event: &PipelineEvent) -> Result<Vec<u8>, SinkError> {
    Ok(serde_json::to_vec(event)?)
}
