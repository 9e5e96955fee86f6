//! Storage backends.
//!
//! [`Backend`] is the capability set the sync pipeline needs: staged writes,
//! one commit per job, push. [`History`] adds read access to past commits for
//! `history`, `show` and `deploy`. Two independent implementations exist and
//! are selected by configuration:
//!
//! | `backend.type` | implementation      | push               |
//! |----------------|---------------------|--------------------|
//! | `git`          | [`GitBackend`]      | to the git remote  |
//! | `github`       | [`GitHubBackend`]   | no-op (immediate)  |
//!
//! Paths are repository-relative and always `/`-separated.

use chrono::{DateTime, Utc};

use jobledger_core::{BackendConfig, JobKey};

use crate::error::BackendError;

pub mod git;
pub mod github;

pub use git::GitBackend;
pub use github::GitHubBackend;

/// Staged-write / commit / push storage.
pub trait Backend {
    /// Open or create the underlying store. Must be called first.
    fn initialize(&mut self) -> Result<(), BackendError>;

    /// Whether `path` exists in the latest committed state.
    fn file_exists(&self, path: &str) -> Result<bool, BackendError>;

    /// Contents of `path` in the latest committed state.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, BackendError>;

    /// Stage `content` at `path`. Nothing is committed yet.
    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), BackendError>;

    /// Commit everything staged. Returns the commit id, or an empty string
    /// when nothing was staged.
    fn commit(&mut self, message: &str) -> Result<String, BackendError>;

    /// Publish local commits.
    fn push(&mut self) -> Result<(), BackendError>;

    /// Release resources. Staged but uncommitted writes are discarded.
    fn close(&mut self) -> Result<(), BackendError>;

    /// Short name for logs and reports.
    fn name(&self) -> &str;
}

/// Read access to past commits.
pub trait History {
    /// Commits touching job documents, newest first.
    fn log(&self, filter: &HistoryFilter) -> Result<Vec<CommitInfo>, BackendError>;

    /// One commit and the documents it changed.
    fn show(&self, id: &str) -> Result<CommitDetail, BackendError>;

    /// Contents of `path` as of commit `id`.
    fn read_file_at(&self, id: &str, path: &str) -> Result<Vec<u8>, BackendError>;
}

/// Everything the CLI needs from a configured backend.
pub trait LedgerBackend: Backend + History {}

impl<T: Backend + History> LedgerBackend for T {}

/// Build the backend selected by `config`. Nothing is opened yet.
pub fn from_config(config: &BackendConfig) -> Box<dyn LedgerBackend> {
    match config {
        BackendConfig::Git(git) => Box::new(GitBackend::new(git.clone())),
        BackendConfig::GitHub(gh) => Box::new(GitHubBackend::new(gh.clone())),
    }
}

// ---------------------------------------------------------------------------
// History types
// ---------------------------------------------------------------------------

/// Which commits `log` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub job: Option<String>,
    pub namespace: Option<String>,
    pub limit: usize,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            job: None,
            namespace: None,
            limit: 20,
        }
    }
}

impl HistoryFilter {
    /// Whether a changed `path` is one this filter selects.
    ///
    /// Paths that are not job documents never match.
    pub fn matches(&self, path: &str) -> bool {
        let Some(key) = JobKey::from_document_path(path) else {
            return false;
        };
        self.job.as_ref().map_or(true, |job| *job == key.name)
            && self
                .namespace
                .as_ref()
                .map_or(true, |namespace| *namespace == key.namespace)
    }
}

/// A commit as listed by `history`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: String,
    /// First line of the commit message.
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Job documents the commit touched.
    pub files: Vec<String>,
}

impl CommitInfo {
    /// First seven characters of the id.
    pub fn short_id(&self) -> &str {
        self.id.get(..7).unwrap_or(&self.id)
    }
}

/// How a file changed in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One changed file of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: FileChangeKind,
    /// Unified diff of the change; may be empty when the backend cannot provide one.
    pub patch: String,
}

/// A commit with its changed files, as printed by `show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetail {
    pub info: CommitInfo,
    pub changes: Vec<FileChange>,
}
