pub mod deploy;
pub mod diff;
pub mod history;
pub mod show;
pub mod sync;

use anyhow::{bail, Context, Result};

use jobledger_core::{config, JobRef, LedgerConfig};
use jobledger_sync::{backend, Backend, LedgerBackend};

use crate::GlobalArgs;

/// Load and validate the configuration the global flags point at.
pub(crate) fn load_config(global: &GlobalArgs) -> Result<LedgerConfig> {
    let path = config::resolve_path(global.config.as_deref())
        .context("cannot locate the configuration file")?;
    tracing::debug!(path = %path.display(), "loading configuration");
    config::load_at(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Configured jobs, narrowed to `filter` when it is non-empty.
///
/// Each filter entry is either `name` or `namespace/name`. An entry that
/// matches no configured job is an error.
pub(crate) fn select_jobs(config: &LedgerConfig, filter: &[String]) -> Result<Vec<JobRef>> {
    if filter.is_empty() {
        return Ok(config.jobs.clone());
    }

    let matches = |job: &JobRef, wanted: &str| match wanted.split_once('/') {
        Some((namespace, name)) => job.namespace == namespace && job.name == name,
        None => job.name == wanted,
    };

    let unknown: Vec<&str> = filter
        .iter()
        .map(|w| w.trim())
        .filter(|w| !config.jobs.iter().any(|job| matches(job, w)))
        .collect();
    if !unknown.is_empty() {
        bail!("unknown job(s) in --jobs: {}", unknown.join(", "));
    }

    Ok(config
        .jobs
        .iter()
        .filter(|job| filter.iter().any(|w| matches(job, w.trim())))
        .cloned()
        .collect())
}

/// Build the configured backend, uninitialized.
pub(crate) fn backend_for(config: &LedgerConfig) -> Box<dyn LedgerBackend> {
    backend::from_config(&config.backend)
}

/// Build and initialize the configured backend for read access.
pub(crate) fn open_backend(config: &LedgerConfig) -> Result<Box<dyn LedgerBackend>> {
    let mut backend = backend_for(config);
    backend
        .initialize()
        .with_context(|| format!("cannot open the {} backend", backend.name()))?;
    Ok(backend)
}

/// Close a backend opened with [`open_backend`]; failures are only logged.
pub(crate) fn close_backend(mut backend: Box<dyn LedgerBackend>) {
    if let Err(e) = backend.close() {
        tracing::warn!(error = %e, "closing backend failed");
    }
}
