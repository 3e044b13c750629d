//! Poller management shared by the HTTP and message-bus control surfaces.
//!
//! [`PollerControl`] turns a `(remote, branch)` request into pool operations:
//! it derives the registry key, builds the poller through the configured
//! factory and forwards to the pool. The bus side decodes
//! [`ControlMessage`]s and feeds them through the same path.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::poller::PollerFactory;
use crate::pool::{PollerPool, PoolError};
use crate::types::{KEY_DELIMITER, PollerKey, Target};

/// Errors handling a control request.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid control message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown op {0:?}")]
    UnknownOp(String),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// The field would not survive being split back out of the poller key.
    #[error("{0} must not contain {delimiter:?}", delimiter = KEY_DELIMITER)]
    ContainsDelimiter(&'static str),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// What a control request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Create,
    Delete,
}

impl ControlOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "create" => Some(ControlOp::Create),
            "delete" => Some(ControlOp::Delete),
            _ => None,
        }
    }
}

/// A control request as it arrives on the bus.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    pub remote: String,
    pub branch: String,
    pub op: String,
}

impl ControlMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, ControlError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn target(&self) -> Target {
        Target::new(self.remote.clone(), self.branch.clone())
    }
}

/// Creates, deletes and lists pollers by target.
#[derive(Clone)]
pub struct PollerControl {
    pool: PollerPool,
    factory: Arc<dyn PollerFactory>,
}

impl PollerControl {
    pub fn new(pool: PollerPool, factory: Arc<dyn PollerFactory>) -> Self {
        PollerControl { pool, factory }
    }

    /// Starts a poller for `target`. Returns `false` if one is already
    /// registered.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn create(&self, target: &Target) -> Result<bool, ControlError> {
        validate(target)?;
        let added = self
            .pool
            .add(target.key(), self.factory.build(target))
            .await?;
        if added {
            info!("Poller created");
        } else {
            debug!("Poller already registered");
        }
        Ok(added)
    }

    /// Stops the poller for `target`. Returns `false` if none was registered.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn delete(&self, target: &Target) -> Result<bool, ControlError> {
        let removed = self.pool.delete(&target.key()).await?;
        if removed {
            info!("Poller deleted");
        } else {
            debug!("No poller registered");
        }
        Ok(removed)
    }

    /// Registry keys in sorted order.
    pub async fn list(&self) -> Result<Vec<PollerKey>, ControlError> {
        Ok(self.pool.list().await?)
    }

    /// Decodes one bus payload and applies it.
    pub async fn handle_message(&self, payload: &[u8]) -> Result<(), ControlError> {
        let msg = ControlMessage::decode(payload)?;
        let target = msg.target();
        match ControlOp::parse(&msg.op) {
            Some(ControlOp::Create) => {
                self.create(&target).await?;
            }
            Some(ControlOp::Delete) => {
                self.delete(&target).await?;
            }
            None => return Err(ControlError::UnknownOp(msg.op)),
        }
        Ok(())
    }

    /// Applies bus payloads from `rx` until it closes, `shutdown` fires or
    /// the pool stops.
    ///
    /// Bad messages are logged and skipped.
    pub async fn run(self, mut rx: mpsc::Receiver<Vec<u8>>, shutdown: CancellationToken) {
        loop {
            let payload = tokio::select! {
                _ = shutdown.cancelled() => break,
                payload = rx.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };

            match self.handle_message(&payload).await {
                Ok(()) => {}
                Err(ControlError::Pool(e)) => {
                    error!(error = %e, "Poller pool unavailable, stopping control dispatcher");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping control message");
                }
            }
        }
        debug!("Control dispatcher stopped");
    }
}

fn validate(target: &Target) -> Result<(), ControlError> {
    if target.remote.is_empty() {
        return Err(ControlError::EmptyField("remote"));
    }
    if target.branch.is_empty() {
        return Err(ControlError::EmptyField("branch"));
    }
    // Keys split on the first delimiter, so only the branch may contain it.
    if target.remote.contains(KEY_DELIMITER) {
        return Err(ControlError::ContainsDelimiter("remote"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{StubEvent, StubFactory, eventually, next_event};

    fn control() -> (PollerControl, mpsc::UnboundedReceiver<StubEvent>) {
        let (factory, events) = StubFactory::new();
        (
            PollerControl::new(PollerPool::spawn(), Arc::new(factory)),
            events,
        )
    }

    #[test]
    fn op_parsing() {
        assert_eq!(ControlOp::parse("create"), Some(ControlOp::Create));
        assert_eq!(ControlOp::parse("delete"), Some(ControlOp::Delete));
        assert_eq!(ControlOp::parse("CREATE"), None);
        assert_eq!(ControlOp::parse(""), None);
    }

    #[tokio::test]
    async fn create_registers_under_target_key() {
        let (control, mut events) = control();
        let target = Target::new("repo", "main");

        assert!(control.create(&target).await.unwrap());
        assert!(!control.create(&target).await.unwrap());

        assert_eq!(control.list().await.unwrap(), vec![PollerKey::from("repo#main")]);
        assert_eq!(
            next_event(&mut events).await,
            StubEvent::Started("repo#main".into())
        );
    }

    #[tokio::test]
    async fn create_rejects_empty_fields() {
        let (control, _events) = control();

        let result = control.create(&Target::new("", "main")).await;
        assert!(matches!(result, Err(ControlError::EmptyField("remote"))));

        let result = control.create(&Target::new("repo", "")).await;
        assert!(matches!(result, Err(ControlError::EmptyField("branch"))));

        assert!(control.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_delimiter_in_remote() {
        let (control, _events) = control();

        let result = control
            .create(&Target::new("https://h/repo.git#frag", "main"))
            .await;
        assert!(matches!(
            result,
            Err(ControlError::ContainsDelimiter("remote"))
        ));
        assert!(control.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn branch_with_delimiter_lists_back_unchanged() {
        let (control, _events) = control();
        let target = Target::new("repo", "feature#42");

        assert!(control.create(&target).await.unwrap());

        let keys = control.list().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].target(), Some(target));
    }

    #[tokio::test]
    async fn messages_create_and_delete() {
        let (control, mut events) = control();

        control
            .handle_message(br#"{"remote":"repo","branch":"main","op":"create"}"#)
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            StubEvent::Started("repo#main".into())
        );

        control
            .handle_message(br#"{"remote":"repo","branch":"main","op":"delete"}"#)
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            StubEvent::Cancelled("repo#main".into())
        );
        assert!(control.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_op_is_rejected() {
        let (control, _events) = control();

        let result = control
            .handle_message(br#"{"remote":"repo","branch":"main","op":"restart"}"#)
            .await;

        assert!(matches!(result, Err(ControlError::UnknownOp(op)) if op == "restart"));
        assert!(control.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_message_is_rejected() {
        let (control, _events) = control();

        let result = control.handle_message(b"not json").await;
        assert!(matches!(result, Err(ControlError::Decode(_))));

        let result = control.handle_message(br#"{"remote":"repo"}"#).await;
        assert!(matches!(result, Err(ControlError::Decode(_))));
    }

    #[tokio::test]
    async fn run_skips_bad_messages_and_keeps_going() {
        let (control, mut events) = control();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let dispatcher = tokio::spawn(control.clone().run(rx, shutdown.clone()));

        tx.send(b"garbage".to_vec()).await.unwrap();
        tx.send(br#"{"remote":"repo","branch":"main","op":"bogus"}"#.to_vec())
            .await
            .unwrap();
        tx.send(br#"{"remote":"repo","branch":"main","op":"create"}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            StubEvent::Started("repo#main".into())
        );
        eventually(|| {
            let control = control.clone();
            async move { control.list().await.unwrap().len() == 1 }
        })
        .await;

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), dispatcher)
            .await
            .expect("dispatcher should stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_sender_dropped() {
        let (control, _events) = control();
        let (tx, rx) = mpsc::channel(1);
        let dispatcher = tokio::spawn(control.run(rx, CancellationToken::new()));

        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(1), dispatcher)
            .await
            .expect("dispatcher should stop once its input closes")
            .unwrap();
    }
}
