//! # jobledger-sync
//!
//! Fetch, compare and commit orchestration.
//!
//! - [`source`] — [`JobSource`] and the Nomad HTTP client
//! - [`backend`] — [`Backend`] / [`History`] with git and GitHub implementations
//! - [`compare`] — New / Unchanged / Modified classification and diffs
//! - [`pipeline`] — [`run`] drives every configured job through the stages
//! - [`deploy`] — re-submit stored documents to the orchestrator

pub mod backend;
pub mod compare;
pub mod deploy;
pub mod error;
mod http;
pub mod pipeline;
pub mod source;

pub use backend::{Backend, History, HistoryFilter, LedgerBackend};
pub use compare::{compare, ChangeKind, ChangeRecord, INITIAL_VERSION_MESSAGE};
pub use deploy::{deploy, Deployment, JobRegistry};
pub use error::{BackendError, SourceError, SyncError};
pub use pipeline::{
    preview, run, JobOutcome, JobResult, Preview, SyncOptions, SyncReport, SyncStage,
};
pub use source::{JobSource, NomadClient};
