//! Local git operations used by the git poller.
//!
//! The poller only ever needs a throwaway shallow clone of one branch and the
//! SHA of its HEAD. Everything runs through the `git` CLI with system and user
//! configuration disabled, so hooks, aliases and credential prompts on the host
//! cannot change behaviour.

use std::path::Path;
use std::process::Output;

use thiserror::Error;

use crate::types::Sha;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// `rev-parse` printed something that is not a SHA.
    #[error("invalid SHA: {0}")]
    InvalidSha(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Create a git Command with clean environment (no system/user config).
///
/// This ensures consistent behavior across different machines by ignoring
/// system and user git configuration (e.g., hooks, aliases).
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    use std::process::Command;

    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");

    // A remote asking for credentials must fail, not hang the poller.
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a GitError on failure.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command and return stdout as a string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Shallow-clones a single branch of `remote` into `dest`.
///
/// `dest` must not exist or be an empty directory. The clone has depth 1 and
/// tracks only `branch`.
pub fn clone_shallow(remote: &str, branch: &str, dest: &Path) -> GitResult<()> {
    let parent = dest.parent().unwrap_or(dest);
    let dest = dest.to_string_lossy();
    run_git_sync(
        parent,
        &[
            "clone",
            "--quiet",
            "--depth",
            "1",
            "--single-branch",
            "--branch",
            branch,
            "--",
            remote,
            dest.as_ref(),
        ],
    )?;
    Ok(())
}

/// Get the SHA of a revision.
pub fn rev_parse(workdir: &Path, rev: &str) -> GitResult<Sha> {
    let sha_str = run_git_stdout(workdir, &["rev-parse", rev])?;
    if is_sha(&sha_str) {
        Ok(Sha::new(sha_str))
    } else {
        Err(GitError::InvalidSha(sha_str))
    }
}

/// Accepts SHA-1 (40) and SHA-256 (64) object names.
fn is_sha(s: &str) -> bool {
    matches!(s.len(), 40 | 64) && s.bytes().all(|b| b.is_ascii_hexdigit())
}
