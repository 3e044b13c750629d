//! Poller that watches one branch of a git remote.
//!
//! Every cycle the poller shallow-clones the branch into a scratch directory,
//! compares HEAD with the last HEAD it published for, and on change publishes
//! one [`PipelineEvent`] per file under `pipelines/`. The clone is thrown away
//! after each cycle.
//!
//! # Failure handling
//!
//! Nothing that goes wrong inside a cycle stops the poller: a failed clone or
//! a missing `pipelines/` directory is logged and retried next cycle (HEAD is
//! not recorded, so the pipelines are published once the problem clears), a
//! bad pipeline file is skipped, a failed publish drops that one event. The
//! only terminal errors are an unusable target and the blocking worker dying.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::git::{self, GitError};
use crate::pipeline::{PIPELINES_DIR, PipelineEvent, load_pipeline};
use crate::sink::EventSink;
use crate::types::{Sha, Target};

use super::{Poller, PollerError, PollerFactory};

/// Default time between two checks of the same branch.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Prefix of the scratch directories clones are made in.
const SCRATCH_PREFIX: &str = "git-poller.";

/// Errors from one check of a repository.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("unable to list {dir}: {source}")]
    Pipelines {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one check of a repository.
#[derive(Debug)]
pub struct Scan {
    /// HEAD of the cloned branch.
    pub head: Sha,

    /// The branch's pipelines, or `None` if HEAD was unchanged.
    pub pipelines: Option<Vec<PipelineEvent>>,
}

/// Configuration shared by every git poller.
#[derive(Debug, Clone)]
pub struct GitPollerConfig {
    /// Time between two checks of the same branch.
    pub interval: Duration,

    /// Directory scratch clones are created in.
    pub scratch_dir: PathBuf,
}

impl Default for GitPollerConfig {
    fn default() -> Self {
        GitPollerConfig {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            scratch_dir: std::env::temp_dir(),
        }
    }
}

/// Watches one branch and publishes its pipelines whenever HEAD moves.
pub struct GitPoller {
    target: Target,
    config: GitPollerConfig,
    sink: Arc<dyn EventSink>,
    last_head: Option<Sha>,
}

impl GitPoller {
    pub fn new(target: Target, config: GitPollerConfig, sink: Arc<dyn EventSink>) -> Self {
        GitPoller {
            target,
            config,
            sink,
            last_head: None,
        }
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PollerError> {
        if self.target.remote.is_empty() || self.target.branch.is_empty() {
            return Err(PollerError::InvalidTarget(self.target.key().0));
        }

        info!("Git poller started");

        while !cancel.is_cancelled() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                result = self.check() => result?,
            }

            debug!(interval = ?self.config.interval, "Sleeping");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("Cancellation received, shutting down poller");
        Ok(())
    }

    /// Runs one check and publishes whatever it found.
    async fn check(&mut self) -> Result<(), PollerError> {
        let target = self.target.clone();
        let last_head = self.last_head.clone();
        let scratch_dir = self.config.scratch_dir.clone();

        // Blocking threads inherit neither the span nor a scoped subscriber.
        let span = tracing::Span::current();
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let scan = tokio::task::spawn_blocking(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                span.in_scope(|| scan_repo(&target, last_head.as_ref(), &scratch_dir))
            })
        })
        .await?;

        match scan {
            Err(e) => {
                error!(error = %e, "Unable to check repository");
            }
            Ok(Scan {
                head,
                pipelines: None,
            }) => {
                debug!(head = %head.short(), "HEAD unchanged");
            }
            Ok(Scan {
                head,
                pipelines: Some(events),
            }) => {
                info!(head = %head.short(), pipelines = events.len(), "HEAD changed, publishing pipelines");
                for event in &events {
                    if let Err(e) = self.sink.publish(event).await {
                        warn!(pipeline = %event.name, error = %e, "Unable to publish pipeline event, dropping it");
                    }
                }
                self.last_head = Some(head);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Poller for GitPoller {
    async fn poll(&mut self, cancel: CancellationToken) -> Result<(), PollerError> {
        let span = info_span!(
            "git_poller",
            remote = %self.target.remote,
            branch = %self.target.branch
        );
        self.run(cancel).instrument(span).await
    }
}

/// Clones `target`, reads HEAD and, if it differs from `last_head`, loads
/// every pipeline definition.
///
/// Pipeline files that cannot be read or parsed are logged and left out.
/// Blocking; call from `spawn_blocking`.
pub fn scan_repo(
    target: &Target,
    last_head: Option<&Sha>,
    scratch_dir: &Path,
) -> Result<Scan, ScanError> {
    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(scratch_dir)?;
    let clone_dir = scratch.path().join("repo");

    debug!(dir = %clone_dir.display(), "Cloning");
    git::clone_shallow(&target.remote, &target.branch, &clone_dir)?;
    let head = git::rev_parse(&clone_dir, "HEAD")?;

    if last_head == Some(&head) {
        return Ok(Scan {
            head,
            pipelines: None,
        });
    }

    let pipelines = load_pipelines(&clone_dir.join(PIPELINES_DIR), target)?;

    if let Err(e) = scratch.close() {
        warn!(error = %e, "Unable to clean up scratch clone");
    }

    Ok(Scan {
        head,
        pipelines: Some(pipelines),
    })
}

/// Loads every pipeline file in `dir`, in file name order.
fn load_pipelines(dir: &Path, target: &Target) -> Result<Vec<PipelineEvent>, ScanError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| ScanError::Pipelines {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut events = Vec::with_capacity(paths.len());
    for path in paths {
        match load_pipeline(&path, target) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping pipeline file");
            }
        }
    }

    Ok(events)
}

/// Builds a [`GitPoller`] for each requested target, all publishing to one sink.
pub struct GitPollerFactory {
    config: GitPollerConfig,
    sink: Arc<dyn EventSink>,
}

impl GitPollerFactory {
    pub fn new(config: GitPollerConfig, sink: Arc<dyn EventSink>) -> Self {
        GitPollerFactory { config, sink }
    }
}

impl PollerFactory for GitPollerFactory {
    fn build(&self, target: &Target) -> Box<dyn Poller> {
        Box::new(GitPoller::new(
            target.clone(),
            self.config.clone(),
            Arc::clone(&self.sink),
        ))
    }
}
