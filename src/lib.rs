//! git-poller - watches git branches and publishes their pipeline definitions.
//!
//! A [`pool::PollerPool`] runs one [`poller::Poller`] per watched
//! `(remote, branch)`. Pollers are added and removed over HTTP ([`server`]) or
//! the redis control channel ([`bus`], [`control`]); the git poller publishes a
//! [`pipeline::PipelineEvent`] per pipeline file whenever the branch moves.

pub mod bus;
pub mod config;
pub mod control;
pub mod git;
pub mod pipeline;
pub mod poller;
pub mod pool;
pub mod server;
pub mod sink;
pub mod types;

#[cfg(test)]
pub mod test_utils;
