//! Sync pipeline shared by every CLI command that touches jobs.
//!
//! One job at a time, in configuration order:
//!
//! ```text
//! Fetching ─┬─ not found ─────────────────────────────────────────▶ Skipped
//!           └─ Normalizing → Serializing → Canonicalizing → Comparing
//!                 ├─ unchanged ──────────────────────────────────▶ Unchanged
//!                 └─ new / modified → Persisting → Committing → (Pushing) ▶ Committed
//! ```
//!
//! A failure in any stage is recorded on that job and the next job starts.
//! Only an unreachable job source or a backend that cannot initialize abort
//! the run.

use std::fmt;

use jobledger_canon::{normalize, serialize, CanonicalDocument};
use jobledger_core::{IgnoreSet, JobKey, JobRef};

use crate::backend::Backend;
use crate::compare::{compare, fingerprint, load_stored, ChangeKind, ChangeRecord};
use crate::error::{SourceError, SyncError};
use crate::source::JobSource;

/// Where in the per-job pipeline something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStage {
    Fetching,
    Normalizing,
    Serializing,
    Canonicalizing,
    Comparing,
    Persisting,
    Committing,
    Pushing,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Fetching => "fetching",
            SyncStage::Normalizing => "normalizing",
            SyncStage::Serializing => "serializing",
            SyncStage::Canonicalizing => "canonicalizing",
            SyncStage::Comparing => "comparing",
            SyncStage::Persisting => "persisting",
            SyncStage::Committing => "committing",
            SyncStage::Pushing => "pushing",
        };
        f.write_str(name)
    }
}

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Classify only: nothing is written, committed or pushed.
    pub dry_run: bool,
    /// Push after every commit.
    pub push: bool,
    /// Region for jobs that do not carry one.
    pub region: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            push: true,
            region: None,
        }
    }
}

/// What happened to one job.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job does not exist at the source.
    Skipped,
    Unchanged,
    Committed {
        change: ChangeRecord,
        /// Empty when the backend reported nothing to commit.
        commit_id: String,
    },
    /// Dry run: the job would have been committed.
    WouldCommit { change: ChangeRecord },
    Failed { stage: SyncStage, error: SyncError },
}

impl JobOutcome {
    /// Short machine-friendly name.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Skipped => "skipped",
            JobOutcome::Unchanged => "unchanged",
            JobOutcome::Committed { .. } => "committed",
            JobOutcome::WouldCommit { .. } => "would-commit",
            JobOutcome::Failed { .. } => "failed",
        }
    }

    /// The comparison result, when the job got that far.
    pub fn change(&self) -> Option<&ChangeRecord> {
        match self {
            JobOutcome::Committed { change, .. } | JobOutcome::WouldCommit { change } => {
                Some(change)
            }
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}

/// Per-job line of a [`SyncReport`].
#[derive(Debug)]
pub struct JobResult {
    pub job: JobRef,
    /// Storage identity; known once the job has been fetched.
    pub key: Option<JobKey>,
    /// SHA-256 of the canonical document, when one was produced.
    pub fingerprint: Option<String>,
    pub outcome: JobOutcome,
}

/// Everything a run did, in configuration order.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub backend: String,
    pub dry_run: bool,
    pub results: Vec<JobResult>,
}

/// Outcome tallies of a [`SyncReport`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    pub committed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failure())
    }

    pub fn counts(&self) -> SyncCounts {
        let mut counts = SyncCounts::default();
        for result in &self.results {
            match result.outcome {
                JobOutcome::Committed { .. } | JobOutcome::WouldCommit { .. } => {
                    counts.committed += 1
                }
                JobOutcome::Unchanged => counts.unchanged += 1,
                JobOutcome::Skipped => counts.skipped += 1,
                JobOutcome::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }
}

/// A job rendered and compared without touching the backend's staging area.
#[derive(Debug)]
pub struct Preview {
    pub key: JobKey,
    pub stored: Option<Vec<u8>>,
    pub document: CanonicalDocument,
    pub change: ChangeRecord,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run the pipeline over `jobs`.
///
/// Returns `Err` only for fatal conditions; per-job failures are in the
/// report. The backend is closed before returning in either case once it
/// has been initialized.
pub fn run<S, B>(
    source: &S,
    backend: &mut B,
    jobs: &[JobRef],
    ignore: &IgnoreSet,
    opts: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    S: JobSource + ?Sized,
    B: Backend + ?Sized,
{
    source.check()?;
    backend.initialize()?;
    tracing::info!(
        "syncing {} job(s) into {} backend{}",
        jobs.len(),
        backend.name(),
        if opts.dry_run { " (dry run)" } else { "" }
    );

    let mut report = SyncReport {
        backend: backend.name().to_string(),
        dry_run: opts.dry_run,
        results: Vec::with_capacity(jobs.len()),
    };
    for job in jobs {
        let result = sync_job(source, backend, job, ignore, opts);
        log_result(&result);
        report.results.push(result);
    }

    if let Err(e) = backend.close() {
        tracing::warn!("closing {} backend failed: {}", backend.name(), e);
    }

    let counts = report.counts();
    tracing::info!(
        "sync finished: {} committed, {} unchanged, {} skipped, {} failed",
        counts.committed,
        counts.unchanged,
        counts.skipped,
        counts.failed
    );
    Ok(report)
}

/// Render and compare one job against an initialized backend.
///
/// `Ok(None)` when the job does not exist at the source.
pub fn preview<S, B>(
    source: &S,
    backend: &B,
    job: &JobRef,
    ignore: &IgnoreSet,
    region: Option<&str>,
) -> Result<Option<Preview>, SyncError>
where
    S: JobSource + ?Sized,
    B: Backend + ?Sized,
{
    match render(source, backend, job, ignore, region) {
        Ok(Rendered::Missing) => Ok(None),
        Ok(Rendered::Found(preview)) => Ok(Some(preview)),
        Err(failure) => Err(failure.error),
    }
}

/// Commit message for a change that needs one.
pub fn commit_message(key: &JobKey, change: &ChangeRecord) -> String {
    match (change.kind, change.description.as_deref()) {
        (ChangeKind::Modified, Some(description)) => {
            format!("{}/{}: {}", key.namespace, key.name, description)
        }
        (ChangeKind::Modified, None) => {
            format!("{}/{}: Update job definition", key.namespace, key.name)
        }
        _ => crate::compare::INITIAL_VERSION_MESSAGE.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Per job
// ---------------------------------------------------------------------------

struct StageFailure {
    stage: SyncStage,
    error: SyncError,
}

impl StageFailure {
    fn at(stage: SyncStage) -> impl FnOnce(SyncError) -> Self {
        move |error| Self { stage, error }
    }
}

enum Rendered {
    Missing,
    Found(Preview),
}

fn render<S, B>(
    source: &S,
    backend: &B,
    job: &JobRef,
    ignore: &IgnoreSet,
    region: Option<&str>,
) -> Result<Rendered, StageFailure>
where
    S: JobSource + ?Sized,
    B: Backend + ?Sized,
{
    let spec = match source.fetch_job_spec(&job.namespace, &job.name) {
        Ok(spec) => spec,
        Err(SourceError::NotFound { .. }) => return Ok(Rendered::Missing),
        Err(e) => return Err(StageFailure::at(SyncStage::Fetching)(e.into())),
    };
    let key = JobKey::for_job(&spec, job, region);

    let normalized = normalize(&spec, ignore);
    let bytes = serialize(&normalized)
        .map_err(|e| StageFailure::at(SyncStage::Serializing)(e.into()))?;
    let document = CanonicalDocument::from_bytes(&bytes);

    let stored = load_stored(backend, &key.document_path())
        .map_err(|e| StageFailure::at(SyncStage::Comparing)(e.into()))?;
    let change = compare(stored.as_deref(), document.as_bytes());

    Ok(Rendered::Found(Preview {
        key,
        stored,
        document,
        change,
    }))
}

fn sync_job<S, B>(
    source: &S,
    backend: &mut B,
    job: &JobRef,
    ignore: &IgnoreSet,
    opts: &SyncOptions,
) -> JobResult
where
    S: JobSource + ?Sized,
    B: Backend + ?Sized,
{
    let mut result = JobResult {
        job: job.clone(),
        key: None,
        fingerprint: None,
        outcome: JobOutcome::Skipped,
    };

    let preview = match render(source, &*backend, job, ignore, opts.region.as_deref()) {
        Ok(Rendered::Found(preview)) => preview,
        Ok(Rendered::Missing) => return result,
        Err(failure) => {
            result.outcome = JobOutcome::Failed {
                stage: failure.stage,
                error: failure.error,
            };
            return result;
        }
    };
    result.fingerprint = Some(fingerprint(preview.document.as_bytes()));
    result.key = Some(preview.key.clone());

    result.outcome = if !preview.change.needs_commit() {
        JobOutcome::Unchanged
    } else if opts.dry_run {
        JobOutcome::WouldCommit {
            change: preview.change,
        }
    } else {
        match persist(backend, &preview, opts.push) {
            Ok(commit_id) => JobOutcome::Committed {
                change: preview.change,
                commit_id,
            },
            Err(failure) => JobOutcome::Failed {
                stage: failure.stage,
                error: failure.error,
            },
        }
    };
    result
}

fn persist<B: Backend + ?Sized>(
    backend: &mut B,
    preview: &Preview,
    push: bool,
) -> Result<String, StageFailure> {
    let path = preview.key.document_path();
    backend
        .write_file(&path, preview.document.as_bytes())
        .map_err(|e| StageFailure::at(SyncStage::Persisting)(e.into()))?;

    let message = commit_message(&preview.key, &preview.change);
    let commit_id = backend
        .commit(&message)
        .map_err(|e| StageFailure::at(SyncStage::Committing)(e.into()))?;

    if push && !commit_id.is_empty() {
        backend
            .push()
            .map_err(|e| StageFailure::at(SyncStage::Pushing)(e.into()))?;
    }
    Ok(commit_id)
}

fn log_result(result: &JobResult) {
    let job = &result.job;
    match &result.outcome {
        JobOutcome::Skipped => tracing::warn!("{}: not found at source, skipped", job),
        JobOutcome::Unchanged => tracing::debug!("{}: unchanged", job),
        JobOutcome::Committed { change, commit_id } => {
            tracing::info!("{}: {} committed as {}", job, change.kind, commit_id)
        }
        JobOutcome::WouldCommit { change } => {
            tracing::info!("[dry-run] {}: {} would be committed", job, change.kind)
        }
        JobOutcome::Failed { stage, error } => {
            tracing::error!("{}: failed while {}: {}", job, stage, error)
        }
    }
}
