//! Concurrent registry of running pollers.
//!
//! The pool starts, enumerates and cancels pollers keyed by a caller-supplied
//! [`PollerKey`](crate::types::PollerKey). A single control loop owns the
//! registry; everything else talks to it through messages.
//!
//! # Module Structure
//!
//! - [`message`]: control-loop message types
//! - [`runner`]: the handle, the control loop and the per-poller supervisor

mod message;
mod runner;


pub use message::{EntryId, PoolMessage};
pub use runner::{PollerPool, PoolError, PoolRunner, Result};
