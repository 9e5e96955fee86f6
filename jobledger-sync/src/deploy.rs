//! Re-deploy job documents from a past commit.
//!
//! The documents a commit added or modified are read back as of that commit
//! and submitted to the orchestrator as the jobs' next version.

use jobledger_core::JobKey;

use crate::backend::{FileChangeKind, History};
use crate::error::{BackendError, SourceError, SyncError};
use crate::source::NomadClient;

/// Write access to the orchestrator.
pub trait JobRegistry {
    /// Register `document` in `namespace`; returns the evaluation id.
    fn register(&self, namespace: &str, document: &str) -> Result<String, SourceError>;
}

impl JobRegistry for NomadClient {
    fn register(&self, namespace: &str, document: &str) -> Result<String, SourceError> {
        self.register_document(namespace, document)
    }
}

/// One job submitted by [`deploy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub key: JobKey,
    pub commit_id: String,
    pub eval_id: String,
}

/// Submit the documents changed by commit `id`, or only job `job` of them.
///
/// Stops at the first failed registration; jobs already submitted stay
/// submitted.
pub fn deploy<H, R>(
    history: &H,
    registry: &R,
    id: &str,
    job: Option<&str>,
) -> Result<Vec<Deployment>, SyncError>
where
    H: History + ?Sized,
    R: JobRegistry + ?Sized,
{
    let detail = history.show(id)?;
    let keys: Vec<JobKey> = detail
        .changes
        .iter()
        .filter(|change| change.kind != FileChangeKind::Deleted)
        .filter_map(|change| JobKey::from_document_path(&change.path))
        .filter(|key| job.map_or(true, |name| key.name == name))
        .collect();

    if keys.is_empty() {
        let what = match job {
            Some(name) => format!("job '{name}' in commit {}", detail.info.short_id()),
            None => format!("job documents in commit {}", detail.info.short_id()),
        };
        return Err(BackendError::NotFound(what).into());
    }

    let mut deployed = Vec::with_capacity(keys.len());
    for key in keys {
        let bytes = history.read_file_at(&detail.info.id, &key.document_path())?;
        let document = String::from_utf8_lossy(&bytes);
        tracing::info!("deploying {} from {}", key, detail.info.short_id());
        let eval_id = registry.register(&key.namespace, &document)?;
        deployed.push(Deployment {
            key,
            commit_id: detail.info.id.clone(),
            eval_id,
        });
    }
    Ok(deployed)
}
