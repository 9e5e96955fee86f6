//! Pipeline behaviour against fake collaborators and a real git repository.

use std::collections::{BTreeMap, HashMap};

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use jobledger_core::{GitBackendConfig, IgnoreSet, JobRef, JobSpecification};
use jobledger_sync::backend::GitBackend;
use jobledger_sync::compare::fingerprint;
use jobledger_sync::{
    preview, run, Backend, BackendError, ChangeKind, History, HistoryFilter, JobOutcome,
    JobSource, SourceError, SyncError, SyncOptions, SyncStage,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeSource {
    jobs: HashMap<(String, String), JobSpecification>,
    broken: Vec<String>,
    down: bool,
}

impl FakeSource {
    fn with(mut self, spec: JobSpecification) -> Self {
        let key = (
            spec.namespace.clone().unwrap_or_else(|| "default".into()),
            spec.name.clone().unwrap_or_default(),
        );
        self.jobs.insert(key, spec);
        self
    }
}

impl JobSource for FakeSource {
    fn check(&self) -> Result<(), SourceError> {
        if self.down {
            return Err(SourceError::Unreachable {
                address: "http://nomad.invalid".into(),
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    fn fetch_job_spec(&self, namespace: &str, name: &str) -> Result<JobSpecification, SourceError> {
        if self.broken.iter().any(|b| b == name) {
            return Err(SourceError::Http {
                status: 500,
                url: format!("http://nomad.invalid/v1/job/{name}"),
                body: "internal error".into(),
            });
        }
        self.jobs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                namespace: namespace.into(),
                name: name.into(),
            })
    }
}

/// Committed documents plus a log of what was asked of the backend.
#[derive(Default)]
struct MemoryBackend {
    files: BTreeMap<String, Vec<u8>>,
    staged: BTreeMap<String, Vec<u8>>,
    messages: Vec<String>,
    pushes: usize,
    initialized: bool,
    closed: bool,
    fail_init: bool,
    fail_read: Option<String>,
    fail_push: bool,
    fail_close: bool,
    writes: usize,
}

impl Backend for MemoryBackend {
    fn initialize(&mut self) -> Result<(), BackendError> {
        if self.fail_init {
            return Err(BackendError::NotFound("repository ops/jobs".into()));
        }
        self.initialized = true;
        self.closed = false;
        Ok(())
    }

    fn file_exists(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self.files.contains_key(path))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        if self.fail_read.as_deref() == Some(path) {
            return Err(BackendError::Io {
                path: path.into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(path.into()))
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), BackendError> {
        self.writes += 1;
        self.staged.insert(path.into(), content.to_vec());
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<String, BackendError> {
        if self.staged.is_empty() {
            return Ok(String::new());
        }
        self.files.append(&mut self.staged);
        self.messages.push(message.into());
        Ok(format!("{:040x}", self.messages.len()))
    }

    fn push(&mut self) -> Result<(), BackendError> {
        if self.fail_push {
            return Err(BackendError::Transport {
                url: "origin".into(),
                message: "rejected".into(),
            });
        }
        self.pushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.closed = true;
        self.staged.clear();
        if self.fail_close {
            return Err(BackendError::NotInitialized("memory"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn job(name: &str, namespace: &str, modify_index: u64, image: &str) -> JobSpecification {
    serde_json::from_value(json!({
        "ID": name,
        "Name": name,
        "Namespace": namespace,
        "Region": "global",
        "Type": "service",
        "Datacenters": ["dc2", "dc1"],
        "ModifyIndex": modify_index,
        "JobModifyIndex": modify_index,
        "SubmitTime": 1_700_000_000_000_000_000i64 + modify_index as i64,
        "Status": "running",
        "TaskGroups": [{
            "Name": "main",
            "Count": 1,
            "Tasks": [{
                "Name": name,
                "Driver": "docker",
                "Config": {"image": image},
            }],
        }],
    }))
    .expect("decode job")
}

fn refs(names: &[&str]) -> Vec<JobRef> {
    names.iter().map(|n| JobRef::new("default", *n)).collect()
}

fn sync(
    source: &FakeSource,
    backend: &mut MemoryBackend,
    jobs: &[JobRef],
) -> jobledger_sync::SyncReport {
    run(source, backend, jobs, &IgnoreSet::new(), &SyncOptions::default()).expect("run")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn first_sync_commits_initial_versions() {
    init_logging();
    let source = FakeSource::default()
        .with(job("web", "default", 5, "nginx:1.0"))
        .with(job("api", "default", 6, "api:2"));
    let mut backend = MemoryBackend::default();

    let report = sync(&source, &mut backend, &refs(&["web", "api"]));

    assert!(!report.has_failures());
    assert_eq!(report.counts().committed, 2);
    assert_eq!(backend.messages, vec!["Initial version", "Initial version"]);
    assert_eq!(backend.pushes, 2);
    assert!(backend.closed);

    let stored = String::from_utf8(backend.files["global/default/web.hcl"].clone()).unwrap();
    assert!(stored.contains("  datacenters = [\"dc1\", \"dc2\"]\n"));
    assert!(stored.ends_with("}\n"));
    assert_eq!(
        report.results[0].fingerprint.as_deref(),
        Some(fingerprint(stored.as_bytes()).as_str())
    );
}

#[test]
fn bookkeeping_only_changes_are_unchanged() {
    let mut backend = MemoryBackend::default();
    let first = FakeSource::default().with(job("web", "default", 5, "nginx:1.0"));
    sync(&first, &mut backend, &refs(&["web"]));

    let second = FakeSource::default().with(job("web", "default", 99, "nginx:1.0"));
    let report = sync(&second, &mut backend, &refs(&["web"]));

    assert!(matches!(report.results[0].outcome, JobOutcome::Unchanged));
    assert_eq!(backend.messages.len(), 1);
    assert_eq!(backend.writes, 1);
}

#[test]
fn image_change_is_committed_with_description() {
    let mut backend = MemoryBackend::default();
    sync(
        &FakeSource::default().with(job("web", "default", 5, "nginx:1.0")),
        &mut backend,
        &refs(&["web"]),
    );
    let report = sync(
        &FakeSource::default().with(job("web", "default", 6, "nginx:1.1")),
        &mut backend,
        &refs(&["web"]),
    );

    match &report.results[0].outcome {
        JobOutcome::Committed { change, commit_id } => {
            assert_eq!(change.kind, ChangeKind::Modified);
            assert!(change.description.as_deref().is_some_and(|d| !d.is_empty()));
            assert!(!commit_id.is_empty());
        }
        other => panic!("expected a commit, got {other:?}"),
    }
    assert_eq!(backend.messages[1], "default/web: Update image (+1 -1)");
}

#[test]
fn failures_are_recorded_per_job_and_the_run_continues() {
    let source = FakeSource {
        broken: vec!["broken".into()],
        ..Default::default()
    }
    .with(job("web", "default", 5, "nginx:1.0"))
    .with(job("api", "default", 5, "api:1"))
    .with(job("locked", "default", 5, "locked:1"));
    let mut backend = MemoryBackend {
        fail_read: Some("global/default/locked.hcl".into()),
        ..Default::default()
    };
    backend
        .files
        .insert("global/default/locked.hcl".into(), b"job \"locked\" {\n}\n".to_vec());

    let report = sync(
        &source,
        &mut backend,
        &refs(&["web", "broken", "missing", "locked", "api"]),
    );

    let labels: Vec<&str> = report.results.iter().map(|r| r.outcome.label()).collect();
    assert_eq!(
        labels,
        vec!["committed", "failed", "skipped", "failed", "committed"]
    );
    assert!(matches!(
        report.results[1].outcome,
        JobOutcome::Failed {
            stage: SyncStage::Fetching,
            error: SyncError::Source(SourceError::Http { status: 500, .. })
        }
    ));
    assert!(matches!(
        report.results[3].outcome,
        JobOutcome::Failed {
            stage: SyncStage::Comparing,
            error: SyncError::Backend(BackendError::Io { .. })
        }
    ));
    assert!(report.results[2].key.is_none());
    assert!(report.has_failures());
    assert_eq!(backend.messages.len(), 2);
}

#[test]
fn push_failure_keeps_the_commit() {
    let source = FakeSource::default().with(job("web", "default", 5, "nginx:1.0"));
    let mut backend = MemoryBackend {
        fail_push: true,
        ..Default::default()
    };
    let report = sync(&source, &mut backend, &refs(&["web"]));

    assert!(matches!(
        report.results[0].outcome,
        JobOutcome::Failed {
            stage: SyncStage::Pushing,
            ..
        }
    ));
    assert!(backend.files.contains_key("global/default/web.hcl"));
}

#[test]
fn no_push_option_skips_push() {
    let source = FakeSource::default().with(job("web", "default", 5, "nginx:1.0"));
    let mut backend = MemoryBackend::default();
    let opts = SyncOptions {
        push: false,
        ..Default::default()
    };
    run(&source, &mut backend, &refs(&["web"]), &IgnoreSet::new(), &opts).unwrap();
    assert_eq!(backend.messages.len(), 1);
    assert_eq!(backend.pushes, 0);
}

#[test]
fn dry_run_classifies_without_writing() {
    let source = FakeSource::default().with(job("web", "default", 5, "nginx:1.0"));
    let mut backend = MemoryBackend::default();
    let opts = SyncOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = run(&source, &mut backend, &refs(&["web"]), &IgnoreSet::new(), &opts).unwrap();

    assert!(report.dry_run);
    match &report.results[0].outcome {
        JobOutcome::WouldCommit { change } => assert_eq!(change.kind, ChangeKind::New),
        other => panic!("expected would-commit, got {other:?}"),
    }
    assert_eq!(backend.writes, 0);
    assert!(backend.messages.is_empty());
    assert!(backend.closed);
}

#[test]
fn unreachable_source_is_fatal_before_backend_init() {
    let source = FakeSource {
        down: true,
        ..Default::default()
    };
    let mut backend = MemoryBackend::default();
    let err = run(
        &source,
        &mut backend,
        &refs(&["web"]),
        &IgnoreSet::new(),
        &SyncOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SyncError::Source(SourceError::Unreachable { .. })));
    assert!(!backend.initialized);
}

#[test]
fn backend_init_failure_is_fatal() {
    let source = FakeSource::default().with(job("web", "default", 5, "nginx:1.0"));
    let mut backend = MemoryBackend {
        fail_init: true,
        ..Default::default()
    };
    let err = run(
        &source,
        &mut backend,
        &refs(&["web"]),
        &IgnoreSet::new(),
        &SyncOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SyncError::Backend(_)));
}

#[test]
fn close_failure_does_not_fail_the_run() {
    let source = FakeSource::default().with(job("web", "default", 5, "nginx:1.0"));
    let mut backend = MemoryBackend {
        fail_close: true,
        ..Default::default()
    };
    let report = sync(&source, &mut backend, &refs(&["web"]));
    assert!(!report.has_failures());
}

#[test]
fn ignore_set_hides_changes_in_ignored_fields() {
    let mut backend = MemoryBackend::default();
    let ignore: IgnoreSet = ["Priority"].into_iter().collect();
    let opts = SyncOptions::default();

    let mut v1 = job("web", "default", 5, "nginx:1.0");
    v1.priority = Some(50);
    let mut v2 = v1.clone();
    v2.priority = Some(70);

    run(&FakeSource::default().with(v1), &mut backend, &refs(&["web"]), &ignore, &opts).unwrap();
    let report =
        run(&FakeSource::default().with(v2), &mut backend, &refs(&["web"]), &ignore, &opts).unwrap();
    assert!(matches!(report.results[0].outcome, JobOutcome::Unchanged));
}

#[test]
fn preview_reports_stored_and_fresh_documents() {
    let mut backend = MemoryBackend::default();
    sync(
        &FakeSource::default().with(job("web", "default", 5, "nginx:1.0")),
        &mut backend,
        &refs(&["web"]),
    );

    let source = FakeSource::default().with(job("web", "default", 6, "nginx:1.1"));
    let ignore = IgnoreSet::new();
    let preview = preview(&source, &backend, &JobRef::new("default", "web"), &ignore, None)
        .unwrap()
        .expect("job exists");
    assert_eq!(preview.key.document_path(), "global/default/web.hcl");
    assert_eq!(preview.change.kind, ChangeKind::Modified);
    assert!(preview.stored.is_some());
    assert!(preview.document.to_text().contains("nginx:1.1"));

    let missing = preview_missing(&source, &backend);
    assert!(missing);
}

fn preview_missing(source: &FakeSource, backend: &MemoryBackend) -> bool {
    preview(source, backend, &JobRef::new("default", "nope"), &IgnoreSet::new(), None)
        .unwrap()
        .is_none()
}

// ---------------------------------------------------------------------------
// Real git backend
// ---------------------------------------------------------------------------

#[test]
fn git_backend_end_to_end() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let config = GitBackendConfig {
        path: tmp.path().join("ledger"),
        url: None,
        remote: "origin".into(),
        branch: "main".into(),
        author_name: "jobledger".into(),
        author_email: "jobledger@localhost".into(),
        token_env: None,
    };
    let opts = SyncOptions {
        push: false,
        ..Default::default()
    };
    let jobs = vec![JobRef::new("default", "web"), JobRef::new("batch", "report")];
    let ignore = IgnoreSet::new();

    let v1 = FakeSource::default()
        .with(job("web", "default", 5, "nginx:1.0"))
        .with(job("report", "batch", 5, "report:1"));
    let mut backend = GitBackend::new(config.clone());
    let first = run(&v1, &mut backend, &jobs, &ignore, &opts).unwrap();
    assert_eq!(first.counts().committed, 2);

    let v2 = FakeSource::default()
        .with(job("web", "default", 42, "nginx:1.1"))
        .with(job("report", "batch", 43, "report:1"));
    let mut backend = GitBackend::new(config.clone());
    let second = run(&v2, &mut backend, &jobs, &ignore, &opts).unwrap();
    let labels: Vec<&str> = second.results.iter().map(|r| r.outcome.label()).collect();
    assert_eq!(labels, vec!["committed", "unchanged"]);

    let mut backend = GitBackend::new(config);
    backend.initialize().unwrap();
    let log = backend.log(&HistoryFilter::default()).unwrap();
    let messages: Vec<&str> = log.iter().map(|c| c.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "default/web: Update image (+1 -1)",
            "Initial version",
            "Initial version"
        ]
    );

    let web_only = backend
        .log(&HistoryFilter {
            namespace: Some("batch".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(web_only.len(), 1);
    assert_eq!(web_only[0].files, vec!["global/batch/report.hcl"]);
}
