//! Stub pollers and helpers shared by tests.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::poller::{Poller, PollerError, PollerFactory};
use crate::types::Target;

/// Something a stub poller observed, tagged with the stub's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubEvent {
    Started(String),
    Cancelled(String),
}

/// What a stub poller does once started.
#[derive(Debug, Clone, Copy)]
pub enum StubBehavior {
    /// Waits for cancellation, then returns `Ok`.
    UntilCancelled,
    /// Returns a terminal error after the given delay.
    FailAfter(Duration),
    /// Waits for cancellation, then returns a terminal error.
    FailOnCancel,
    /// Panics immediately.
    Panic,
}

/// A poller that reports what happens to it on a channel.
pub struct StubPoller {
    name: String,
    behavior: StubBehavior,
    events: mpsc::UnboundedSender<StubEvent>,
}

impl StubPoller {
    pub fn new(
        name: impl Into<String>,
        behavior: StubBehavior,
        events: mpsc::UnboundedSender<StubEvent>,
    ) -> Box<dyn Poller> {
        Box::new(StubPoller {
            name: name.into(),
            behavior,
            events,
        })
    }

    pub fn until_cancelled(
        name: impl Into<String>,
        events: &mpsc::UnboundedSender<StubEvent>,
    ) -> Box<dyn Poller> {
        Self::new(name, StubBehavior::UntilCancelled, events.clone())
    }
}

#[async_trait]
impl Poller for StubPoller {
    async fn poll(&mut self, cancel: CancellationToken) -> Result<(), PollerError> {
        let _ = self.events.send(StubEvent::Started(self.name.clone()));

        match self.behavior {
            StubBehavior::UntilCancelled => {
                cancel.cancelled().await;
                let _ = self.events.send(StubEvent::Cancelled(self.name.clone()));
                Ok(())
            }
            StubBehavior::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                Err(PollerError::Fatal(format!("{} gave up", self.name)))
            }
            StubBehavior::FailOnCancel => {
                cancel.cancelled().await;
                let _ = self.events.send(StubEvent::Cancelled(self.name.clone()));
                Err(PollerError::Fatal(format!("{} failed while stopping", self.name)))
            }
            StubBehavior::Panic => panic!("{} panicked", self.name),
        }
    }
}

/// A factory that builds [`StubPoller`]s named after the target's key.
pub struct StubFactory {
    pub events: mpsc::UnboundedSender<StubEvent>,
}

impl StubFactory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StubEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (StubFactory { events }, rx)
    }
}

impl PollerFactory for StubFactory {
    fn build(&self, target: &Target) -> Box<dyn Poller> {
        StubPoller::until_cancelled(target.key().0, &self.events)
    }
}

/// Receives the next stub event, failing the test after one second.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<StubEvent>) -> StubEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a stub event")
        .expect("stub event channel closed")
}

/// Polls `check` until it returns true, failing the test after one second.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within one second"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
