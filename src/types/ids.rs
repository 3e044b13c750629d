//! Newtype wrappers for poller identifiers.
//!
//! A poller is registered under an opaque [`PollerKey`]. The control surfaces
//! derive that key from a [`Target`] (a remote and a branch) and split it back
//! when listing, so the delimiter lives here and nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separates the remote from the branch inside a [`PollerKey`].
pub const KEY_DELIMITER: char = '#';

/// The key a poller is registered under in the pool.
///
/// The pool treats it as opaque. Keys built by [`Target::key`] have the form
/// `<remote>#<branch>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollerKey(pub String);

impl PollerKey {
    pub fn new(s: impl Into<String>) -> Self {
        PollerKey(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the key back into the target it was built from.
    ///
    /// Splits on the first delimiter. Returns `None` for keys that were not
    /// built from a target.
    pub fn target(&self) -> Option<Target> {
        let (remote, branch) = self.0.split_once(KEY_DELIMITER)?;
        Some(Target::new(remote, branch))
    }
}

impl fmt::Display for PollerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PollerKey {
    fn from(s: &str) -> Self {
        PollerKey(s.to_string())
    }
}

impl From<String> for PollerKey {
    fn from(s: String) -> Self {
        PollerKey(s)
    }
}

/// A git remote and branch to watch.
///
/// This is also the wire shape of the HTTP API (`{"remote": .., "branch": ..}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub remote: String,
    pub branch: String,
}

impl Target {
    pub fn new(remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Target {
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    /// Returns the pool key for this target.
    pub fn key(&self) -> PollerKey {
        PollerKey(format!("{}{}{}", self.remote, KEY_DELIMITER, self.branch))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.remote, self.branch)
    }
}

/// A git commit SHA as printed by `git rev-parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string.
    ///
    /// Note: This does not validate the format.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
