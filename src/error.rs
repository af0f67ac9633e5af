//! Unified error type.

use std::path::PathBuf;

/// The error type returned by weave's fallible operations.
///
/// Only the serving side can fail. Composing and dispatching a chain never
/// returns an error: a handler that stops the chain is ordinary control flow,
/// and a handler that panics unwinds to the server's connection task.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Binding the listener or accepting a connection failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The address handed to [`Server::bind`](crate::Server::bind) is not a
    /// valid `host:port` pair.
    #[error("invalid socket address `{addr}`")]
    InvalidAddress { addr: String },

    /// The TLS certificate or key could not be loaded.
    #[error("tls: {path}: {reason}")]
    Tls { path: PathBuf, reason: String },
}

/// Shorthand for `Result<T, weave::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn tls(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Tls { path: path.into(), reason: reason.to_string() }
    }
}
