//! Messages understood by the pool's control loop.
//!
//! Every public pool operation is one of these messages. Callers that need an
//! answer pass a oneshot sender; the control loop replies once it has applied
//! the message to the registry.

use tokio::sync::oneshot;

use crate::poller::{Poller, PollerError};
use crate::types::PollerKey;

/// Identifies one registration of a key.
///
/// A key can be deleted and registered again; the id tells the two
/// registrations apart so that a late exit report from the first cannot
/// remove the second.
pub type EntryId = u64;

/// Messages processed by [`PoolRunner`](super::PoolRunner).
pub enum PoolMessage {
    /// Register a poller under a key unless the key is taken.
    ///
    /// Replies `true` if the poller was registered and started.
    Add {
        key: PollerKey,
        poller: Box<dyn Poller>,
        reply: oneshot::Sender<bool>,
    },

    /// Cancel and forget the poller under a key.
    ///
    /// Replies `true` if an entry was removed.
    Delete {
        key: PollerKey,
        reply: oneshot::Sender<bool>,
    },

    /// Snapshot the registered keys.
    List { reply: oneshot::Sender<Vec<PollerKey>> },

    /// Sent by a poller's supervisor when the poller's `poll` returned.
    Exited {
        key: PollerKey,
        id: EntryId,
        error: Option<PollerError>,
    },
}

impl std::fmt::Debug for PoolMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolMessage::Add { key, .. } => f.debug_struct("Add").field("key", key).finish(),
            PoolMessage::Delete { key, .. } => f.debug_struct("Delete").field("key", key).finish(),
            PoolMessage::List { .. } => f.write_str("List"),
            PoolMessage::Exited { key, id, error } => f
                .debug_struct("Exited")
                .field("key", key)
                .field("id", id)
                .field("error", error)
                .finish(),
        }
    }
}
