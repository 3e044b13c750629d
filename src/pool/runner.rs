//! The poller pool: a registry of running pollers owned by one control loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐                 ┌──────────────────────────┐
//! │ HTTP handler │ ──┐             │        PoolRunner        │
//! └──────────────┘   │  PoolMessage│  registry: key -> entry  │ ──spawn──► supervisor ─► poller
//! ┌──────────────┐   ├───────────► │  (only writer/reader)    │                 │
//! │ bus handler  │ ──┘   (mpsc)    └──────────────────────────┘ ◄──Exited───────┘
//! └──────────────┘                        ▲
//!                                         └── oneshot replies for add/delete/list
//! ```
//!
//! [`PollerPool`] is a cheap cloneable handle; every method is a message to
//! the [`PoolRunner`]. The runner applies messages one at a time, so registry
//! mutations are totally ordered and the registry needs no lock.
//!
//! # Poller lifecycle
//!
//! An accepted add creates an entry holding a child of the pool's shutdown
//! token and spawns a supervisor task that runs the poller. When the poller
//! returns (cleanly, with an error, or by panicking) the supervisor reports
//! the exit back through the same channel and the runner forgets the entry.
//! Delete cancels the token and forgets the entry immediately; it does not
//! wait for the poller to stop.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::poller::{Poller, PollerError};
use crate::types::PollerKey;

use super::message::{EntryId, PoolMessage};

/// Channel buffer size for pool control messages.
const POOL_CHANNEL_BUFFER: usize = 64;

/// Errors returned by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The control loop has stopped (shutdown, or it was never started).
    #[error("poller pool is not running")]
    Closed,
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// One registered poller.
struct PollerEntry {
    id: EntryId,

    /// Fired exactly once, by the control loop, when the entry is removed.
    cancel: CancellationToken,
}

/// Handle to a running poller pool.
///
/// Cloning the handle is cheap; all clones talk to the same control loop.
#[derive(Clone)]
pub struct PollerPool {
    tx: mpsc::Sender<PoolMessage>,
    shutdown: CancellationToken,
}

impl PollerPool {
    /// Creates a pool handle and the control loop that serves it.
    ///
    /// Nothing happens until [`PoolRunner::run`] is polled.
    pub fn new() -> (PollerPool, PoolRunner) {
        Self::with_shutdown(CancellationToken::new())
    }

    /// Creates a pool whose pollers are all children of `shutdown`.
    pub fn with_shutdown(shutdown: CancellationToken) -> (PollerPool, PoolRunner) {
        let (tx, rx) = mpsc::channel(POOL_CHANNEL_BUFFER);
        let runner = PoolRunner {
            rx,
            exits: tx.downgrade(),
            registry: BTreeMap::new(),
            next_id: 0,
            shutdown: shutdown.clone(),
        };
        (PollerPool { tx, shutdown }, runner)
    }

    /// Creates a pool and spawns its control loop on the current runtime.
    pub fn spawn() -> PollerPool {
        let (pool, runner) = Self::new();
        tokio::spawn(runner.run());
        pool
    }

    /// Registers `poller` under `key` and starts it.
    ///
    /// Returns `false` without starting anything if `key` is already
    /// registered; the existing poller keeps running. Returns once the control
    /// loop has processed the registration.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn add(&self, key: PollerKey, poller: Box<dyn Poller>) -> Result<bool> {
        self.request(|reply| PoolMessage::Add { key, poller, reply })
            .await
    }

    /// Cancels and forgets the poller registered under `key`.
    ///
    /// Returns `false` if nothing was registered under `key`. The poller
    /// stops on its own schedule after observing cancellation.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn delete(&self, key: &PollerKey) -> Result<bool> {
        let key = key.clone();
        self.request(|reply| PoolMessage::Delete { key, reply })
            .await
    }

    /// Returns the registered keys, sorted.
    ///
    /// The snapshot reflects the registry at the moment the control loop
    /// served the request.
    pub async fn list(&self) -> Result<Vec<PollerKey>> {
        self.request(|reply| PoolMessage::List { reply }).await
    }

    /// Stops the control loop and cancels every registered poller.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns the pool's shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn request<T>(&self, message: impl FnOnce(oneshot::Sender<T>) -> PoolMessage) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(message(reply))
            .await
            .map_err(|_| PoolError::Closed)?;
        rx.await.map_err(|_| PoolError::Closed)
    }
}

/// The pool's control loop and the registry it owns.
pub struct PoolRunner {
    rx: mpsc::Receiver<PoolMessage>,

    /// Handed to supervisors so they can report exits. Weak, so that the loop
    /// stops once every [`PollerPool`] handle is gone.
    exits: mpsc::WeakSender<PoolMessage>,

    registry: BTreeMap<PollerKey, PollerEntry>,
    next_id: EntryId,
    shutdown: CancellationToken,
}

impl PoolRunner {
    /// Runs the control loop.
    ///
    /// Returns when the shutdown token is cancelled or every pool handle has
    /// been dropped. All pollers still registered are cancelled on the way
    /// out.
    pub async fn run(mut self) {
        info!("Poller pool control loop started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping poller pool");
                    break;
                }

                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_message(msg),
                        None => {
                            info!("All pool handles dropped, stopping poller pool");
                            break;
                        }
                    }
                }
            }
        }

        self.cancel_all();
    }

    fn handle_message(&mut self, msg: PoolMessage) {
        trace!(?msg, "Handling pool message");

        match msg {
            PoolMessage::Add { key, poller, reply } => {
                let added = self.add(key, poller);
                let _ = reply.send(added);
            }
            PoolMessage::Delete { key, reply } => {
                let removed = self.delete(&key);
                let _ = reply.send(removed);
            }
            PoolMessage::List { reply } => {
                let keys: Vec<PollerKey> = self.registry.keys().cloned().collect();
                let _ = reply.send(keys);
            }
            PoolMessage::Exited { key, id, error } => self.exited(key, id, error),
        }
    }

    fn add(&mut self, key: PollerKey, poller: Box<dyn Poller>) -> bool {
        if self.registry.contains_key(&key) {
            debug!(key = %key, "Poller already registered, ignoring add");
            return false;
        }

        let id = self.next_id;
        self.next_id += 1;

        let cancel = self.shutdown.child_token();
        tokio::spawn(supervise(
            key.clone(),
            id,
            poller,
            cancel.clone(),
            self.exits.clone(),
        ));

        info!(key = %key, id, "Poller started");
        self.registry.insert(key, PollerEntry { id, cancel });
        true
    }

    fn delete(&mut self, key: &PollerKey) -> bool {
        match self.registry.remove(key) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(key = %key, id = entry.id, "Poller cancelled");
                true
            }
            None => {
                debug!(key = %key, "No poller registered, ignoring delete");
                false
            }
        }
    }

    fn exited(&mut self, key: PollerKey, id: EntryId, error: Option<PollerError>) {
        // A deleted-then-re-added key carries a new id; the old poller's late
        // report must leave the new entry alone.
        if self.registry.get(&key).is_none_or(|entry| entry.id != id) {
            trace!(key = %key, id, "Exit report for a poller that is no longer registered");
            return;
        }

        if let Some(entry) = self.registry.remove(&key) {
            entry.cancel.cancel();
        }

        match error {
            Some(e) => warn!(key = %key, id, error = %e, "Removed failed poller"),
            None => info!(key = %key, id, "Removed finished poller"),
        }
    }

    fn cancel_all(&mut self) {
        let count = self.registry.len();
        for (key, entry) in std::mem::take(&mut self.registry) {
            trace!(key = %key, "Cancelling poller");
            entry.cancel.cancel();
        }
        info!(cancelled = count, "Poller pool stopped");
    }
}

/// Runs one poller and reports its exit to the control loop.
///
/// The poller runs in its own task so that a panic surfaces here as a
/// `JoinError` instead of skipping the exit report.
async fn supervise(
    key: PollerKey,
    id: EntryId,
    mut poller: Box<dyn Poller>,
    cancel: CancellationToken,
    exits: mpsc::WeakSender<PoolMessage>,
) {
    let outcome = tokio::spawn(async move { poller.poll(cancel).await }).await;

    let error = match outcome {
        Ok(Ok(())) => {
            debug!(key = %key, id, "Poller exited");
            None
        }
        Ok(Err(e)) => {
            error!(key = %key, id, error = %e, "Poller returned a terminal error");
            Some(e)
        }
        Err(e) => {
            error!(key = %key, id, error = %e, "Poller task panicked or was aborted");
            Some(PollerError::Worker(e))
        }
    };

    if let Some(tx) = exits.upgrade() {
        let _ = tx.send(PoolMessage::Exited { key, id, error }).await;
    }
}
