//! `jobledger sync` — fetch configured jobs and commit the ones that changed.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use jobledger_sync::{pipeline, JobOutcome, JobResult, NomadClient, SyncOptions, SyncReport};

use super::{backend_for, load_config, select_jobs};
use crate::GlobalArgs;

/// Arguments for `jobledger sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Classify jobs without writing, committing or pushing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Commit locally but do not push.
    #[arg(long)]
    pub no_push: bool,

    /// Only these jobs (`name` or `namespace/name`, comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "JOBS")]
    pub jobs: Vec<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;
        let jobs = select_jobs(&config, &self.jobs)?;
        let source = NomadClient::new(&config.nomad);
        let mut backend = backend_for(&config);
        let opts = SyncOptions {
            dry_run: self.dry_run,
            push: !self.no_push,
            region: config.nomad.region.clone(),
        };

        let report = pipeline::run(&source, &mut *backend, &jobs, &config.ignore_set(), &opts)
            .context("sync aborted")?;

        if self.json {
            print_json(&report)?;
        } else {
            print_table(&report);
        }

        let failed = report.counts().failed;
        if failed > 0 {
            bail!("{failed} job(s) failed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SyncReportJson {
    backend: String,
    dry_run: bool,
    summary: SummaryJson,
    jobs: Vec<JobJson>,
}

#[derive(Serialize)]
struct SummaryJson {
    committed: usize,
    unchanged: usize,
    skipped: usize,
    failed: usize,
}

#[derive(Serialize)]
struct JobJson {
    job: String,
    path: Option<String>,
    status: &'static str,
    change: Option<String>,
    description: Option<String>,
    commit: Option<String>,
    fingerprint: Option<String>,
    stage: Option<String>,
    error: Option<String>,
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "job")]
    job: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "commit")]
    commit: String,
}

fn job_json(result: &JobResult) -> JobJson {
    let change = result.outcome.change();
    let (commit, stage, error) = match &result.outcome {
        JobOutcome::Committed { commit_id, .. } => (Some(commit_id.clone()), None, None),
        JobOutcome::Failed { stage, error } => {
            (None, Some(stage.to_string()), Some(error.to_string()))
        }
        _ => (None, None, None),
    };
    JobJson {
        job: result.job.to_string(),
        path: result.key.as_ref().map(|k| k.document_path()),
        status: result.outcome.label(),
        change: change.map(|c| c.kind.to_string()),
        description: change.and_then(|c| c.description.clone()),
        commit,
        fingerprint: result.fingerprint.clone(),
        stage,
        error,
    }
}

fn print_json(report: &SyncReport) -> Result<()> {
    let counts = report.counts();
    let payload = SyncReportJson {
        backend: report.backend.clone(),
        dry_run: report.dry_run,
        summary: SummaryJson {
            committed: counts.committed,
            unchanged: counts.unchanged,
            skipped: counts.skipped,
            failed: counts.failed,
        },
        jobs: report.results.iter().map(job_json).collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize sync JSON")?
    );
    Ok(())
}

fn print_table(report: &SyncReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let counts = report.counts();
    println!(
        "{prefix}{} backend | {} committed | {} unchanged | {} skipped | {} failed",
        report.backend, counts.committed, counts.unchanged, counts.skipped, counts.failed,
    );
    if report.results.is_empty() {
        println!("No jobs configured.");
        return;
    }

    let rows: Vec<JobRow> = report
        .results
        .iter()
        .map(|result| {
            let (detail, commit) = match &result.outcome {
                JobOutcome::Skipped => ("not found at source".to_string(), String::new()),
                JobOutcome::Unchanged => ("up to date".to_string(), String::new()),
                JobOutcome::Committed { change, commit_id } => (
                    change.description.clone().unwrap_or_default(),
                    commit_id.chars().take(7).collect(),
                ),
                JobOutcome::WouldCommit { change } => {
                    (change.description.clone().unwrap_or_default(), String::new())
                }
                JobOutcome::Failed { stage, error } => (format!("{stage}: {error}"), String::new()),
            };
            JobRow {
                job: result.job.to_string(),
                status: status_label(&result.outcome),
                detail,
                commit,
            }
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn status_label(outcome: &JobOutcome) -> String {
    let label = outcome.label();
    match outcome {
        JobOutcome::Committed { .. } | JobOutcome::WouldCommit { .. } => {
            label.green().bold().to_string()
        }
        JobOutcome::Unchanged => label.bright_black().to_string(),
        JobOutcome::Skipped => label.yellow().to_string(),
        JobOutcome::Failed { .. } => label.red().bold().to_string(),
    }
}
