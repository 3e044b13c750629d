//! The task abstraction the pool runs.
//!
//! A [`Poller`] is a long-running unit of work that repeatedly checks an
//! external resource and emits events when it changes. The pool does not know
//! what a poller does; it only starts it with a cancellation token and reacts
//! when it returns.
//!
//! # Contract
//!
//! - `poll` runs until `cancel` fires, checking it at every natural yield point
//!   (between cycles and while sleeping).
//! - Returning `Ok(())` is the expected outcome of cooperative cancellation.
//! - Returning `Err` is terminal: the pool forgets the poller. Transient
//!   failures (one failed clone, one bad file) are the poller's own business
//!   and must not be reported this way.

pub mod git;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::Target;

pub use git::{GitPoller, GitPollerConfig, GitPollerFactory};

/// Terminal errors a poller can report to the pool.
#[derive(Debug, Error)]
pub enum PollerError {
    /// The poller's blocking work panicked or was aborted.
    #[error("poller worker thread failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// The poller was configured with a target it can never poll.
    #[error("invalid poll target: {0}")]
    InvalidTarget(String),

    /// Any other condition the poller considers fatal.
    #[error("{0}")]
    Fatal(String),
}

/// A unit of work the pool can run until cancelled.
#[async_trait]
pub trait Poller: Send + 'static {
    /// Runs the poller's loop until `cancel` fires or a fatal condition occurs.
    async fn poll(&mut self, cancel: CancellationToken) -> Result<(), PollerError>;
}

/// Builds pollers for the control surfaces.
///
/// The HTTP and bus adapters only know a remote and a branch; the factory
/// decides what kind of poller watches them.
pub trait PollerFactory: Send + Sync + 'static {
    fn build(&self, target: &Target) -> Box<dyn Poller>;
}
