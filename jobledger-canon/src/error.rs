//! Error types for jobledger-canon.

use thiserror::Error;

/// Errors that can arise while rendering a canonical document.
///
/// Normalization never fails; rendering fails only when the job has no identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonError {
    /// The job's name is absent or empty.
    #[error("invalid job: {0}")]
    InvalidJob(String),
}
