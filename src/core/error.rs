//! Error types.
//!
//! Trellis separates domain errors (this module, `thiserror`) from the
//! application layer, which wraps them with `anyhow` context. Only one
//! condition is fatal to the engine: a watcher stream ending while the
//! watcher is still referenced.

use thiserror::Error;

/// Common Trellis error conditions.
#[derive(Debug, Error)]
pub enum TrellisError {
    /// Configuration is structurally valid but semantically wrong.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A matcher expression failed to compile.
    #[error(transparent)]
    Matcher(#[from] crate::matcher::MatcherError),

    /// A symbolic value failed to parse.
    #[error(transparent)]
    Edn(#[from] crate::edn::ParseError),

    /// A node record could not be decoded.
    #[error("malformed node record {key}: {message}")]
    NodeRecord { key: String, message: String },

    /// A role record could not be decoded.
    #[error("malformed role record {key}: {message}")]
    RoleRecord { key: String, message: String },

    /// An expanded service document failed schema validation.
    #[error("service document rejected: {message}")]
    Schema { message: String },

    /// A KV store operation failed (transport or server side).
    #[error("kv store: {message}")]
    Kv { message: String },

    /// The query endpoint could not serve.
    #[error("query endpoint: {message}")]
    Query { message: String },

    /// A watcher stream ended while the watcher was still referenced.
    ///
    /// This is the only fatal condition: the engine cannot guarantee
    /// convergence for documents embedding a value it no longer observes.
    #[error("watch stream for {key} ended unexpectedly")]
    WatcherEof { key: String },
}

impl TrellisError {
    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a Kv error.
    pub fn kv(message: impl Into<String>) -> Self {
        Self::Kv {
            message: message.into(),
        }
    }

    /// Create a Schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a Query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Check whether this error must terminate the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WatcherEof { .. })
    }
}

/// Result type using TrellisError.
pub type TrellisResult<T> = Result<T, TrellisError>;
