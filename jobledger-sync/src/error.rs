//! Error types for jobledger-sync.

use std::path::PathBuf;

use thiserror::Error;

use jobledger_canon::CanonError;

/// Errors from the orchestrator client.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The job does not exist at the source. Not a pipeline failure.
    #[error("job '{namespace}/{name}' not found")]
    NotFound { namespace: String, name: String },

    /// No HTTP exchange happened at all (DNS, refused, timeout).
    #[error("cannot reach orchestrator at {address}: {message}")]
    Unreachable { address: String, message: String },

    /// The orchestrator answered with an unexpected status.
    #[error("orchestrator returned HTTP {status} for {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// The response body was not the JSON we expected.
    #[error("cannot decode orchestrator response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Errors from a storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// The REST API answered with an unexpected status.
    #[error("storage API returned HTTP {status} for {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// No HTTP exchange happened at all.
    #[error("cannot reach storage API at {url}: {message}")]
    Transport { url: String, message: String },

    #[error("cannot decode storage response: {0}")]
    Decode(String),

    /// A commit, file or reference that was asked for does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The local branch and its remote counterpart each have commits the
    /// other lacks.
    #[error("branch '{branch}' has diverged from remote '{remote}'")]
    Diverged { branch: String, remote: String },

    /// An operation was attempted before `initialize` or after `close`.
    #[error("backend '{0}' is not initialized")]
    NotInitialized(&'static str),
}

/// All errors that abort a sync run or a single job.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("render error: {0}")]
    Canon(#[from] CanonError),
}

/// Convenience constructor for [`BackendError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BackendError {
    BackendError::Io {
        path: path.into(),
        source,
    }
}
