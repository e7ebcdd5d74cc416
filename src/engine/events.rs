//! The merged event stream.
//!
//! Every input source is normalized into one tagged variant so the
//! reconciler can consume a single serialized sequence. Node and role
//! identities are the final segment of the originating KV key.

use crate::edn::Value;
use crate::engine::state::StateSnapshot;
use crate::kv::{basename, PrefixChange};
use tokio::sync::oneshot;

/// An event consumed by the reconciler.
pub enum Event {
    /// A node key appeared.
    NodeNew { name: String, value: String },
    /// A node key changed.
    NodeUpdated { name: String, value: String },
    /// A node key disappeared.
    NodeRemoved { name: String },
    /// A role key appeared.
    RoleNew { key: String, value: String },
    /// A role key changed.
    RoleUpdated { key: String, value: String },
    /// A role key disappeared.
    RoleRemoved { key: String },
    /// A watcher delivered a new (already parsed) value.
    WatcherChanged { key: String, value: Value },
    /// A watcher stream ended without being stopped. Fatal.
    WatcherEof { key: String },
    /// Out-of-band state query; the snapshot reflects exactly the
    /// events processed before it.
    GetState {
        reply: oneshot::Sender<StateSnapshot>,
    },
}

impl Event {
    /// Map a nodes-prefix change into an event.
    pub fn node_change(change: PrefixChange) -> Self {
        match change {
            PrefixChange::New { key, value } => Self::NodeNew {
                name: basename(&key).to_string(),
                value,
            },
            PrefixChange::Updated { key, value } => Self::NodeUpdated {
                name: basename(&key).to_string(),
                value,
            },
            PrefixChange::Removed { key } => Self::NodeRemoved {
                name: basename(&key).to_string(),
            },
        }
    }

    /// Map a roles-prefix change into an event.
    pub fn role_change(change: PrefixChange) -> Self {
        match change {
            PrefixChange::New { key, value } => Self::RoleNew {
                key: basename(&key).to_string(),
                value,
            },
            PrefixChange::Updated { key, value } => Self::RoleUpdated {
                key: basename(&key).to_string(),
                value,
            },
            PrefixChange::Removed { key } => Self::RoleRemoved {
                key: basename(&key).to_string(),
            },
        }
    }

    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NodeNew { .. } => "node-new",
            Self::NodeUpdated { .. } => "node-updated",
            Self::NodeRemoved { .. } => "node-removed",
            Self::RoleNew { .. } => "role-new",
            Self::RoleUpdated { .. } => "role-updated",
            Self::RoleRemoved { .. } => "role-removed",
            Self::WatcherChanged { .. } => "watcher-changed",
            Self::WatcherEof { .. } => "watcher-eof",
            Self::GetState { .. } => "get-state",
        }
    }
}
