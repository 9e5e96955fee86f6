//! Full CLI runs against a stub orchestrator and a local git ledger.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Stub orchestrator
// ---------------------------------------------------------------------------

type Routes = Arc<Mutex<Vec<(String, u16, String)>>>;

/// HTTP/1.1 responder whose routes (request-target prefix, status, body)
/// can be swapped between CLI runs.
struct Orchestrator {
    address: String,
    routes: Routes,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Orchestrator {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let routes: Routes = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (table, seen) = (Arc::clone(&routes), Arc::clone(&requests));

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut head = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                    head.push_str(&line);
                }
                let mut body = vec![0u8; content_length];
                let _ = reader.read_exact(&mut body);
                head.push_str(&String::from_utf8_lossy(&body));

                let target = head.split_whitespace().nth(1).unwrap_or("").to_string();
                seen.lock().unwrap().push(head);

                let (status, reply) = table
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|(prefix, _, _)| target.starts_with(prefix.as_str()))
                    .map(|(_, status, body)| (*status, body.clone()))
                    .unwrap_or((404, "not found".to_string()));
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                    reply.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        Self {
            address,
            routes,
            requests,
        }
    }

    fn set_routes(&self, routes: &[(&str, u16, &str)]) {
        let mut table = self.routes.lock().unwrap();
        table.clear();
        table.push(("/v1/status/leader".into(), 200, "\"127.0.0.1:4647\"".into()));
        table.extend(
            routes
                .iter()
                .map(|(prefix, status, body)| (prefix.to_string(), *status, body.to_string())),
        );
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn job(name: &str, image: &str, modify_index: u64) -> String {
    format!(
        r#"{{"ID":"{name}","Name":"{name}","Namespace":"default","Type":"service","Priority":50,"Datacenters":["dc1"],"ModifyIndex":{modify_index},"JobModifyIndex":{modify_index},"SubmitTime":{modify_index}000,"Status":"running","TaskGroups":[{{"Name":"{name}","Count":2,"Tasks":[{{"Name":"server","Driver":"docker","Config":{{"image":"{image}"}}}}]}}]}}"#
    )
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

struct Workspace {
    home: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new(orchestrator: &Orchestrator) -> Self {
        let home = TempDir::new().unwrap();
        let config = home.path().join("config.yaml");
        fs::write(
            &config,
            format!(
                "nomad:\n  address: '{}'\n  timeout_secs: 5\nbackend:\n  type: git\n  path: '{}'\njobs:\n  - name: api\n  - name: web\n",
                orchestrator.address,
                home.path().join("ledger").display()
            ),
        )
        .unwrap();
        Self { home, config }
    }

    fn ledger(&self) -> PathBuf {
        self.home.path().join("ledger")
    }

    fn jobledger(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_jobledger"));
        cmd.env("HOME", self.home.path())
            .env_remove("NOMAD_TOKEN")
            .env_remove("JOBLEDGER_CONFIG")
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config);
        cmd
    }

    fn sync_json(&self, extra: &[&str]) -> (bool, Value) {
        let output = self
            .jobledger()
            .args(["sync", "--no-push", "--json"])
            .args(extra)
            .output()
            .unwrap();
        let report = serde_json::from_slice(&output.stdout).unwrap();
        (output.status.success(), report)
    }
}

fn job_entry<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .find(|j| j["job"] == format!("default/{name}"))
        .unwrap()
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn first_sync_commits_and_second_is_unchanged() {
    let nomad = Orchestrator::start();
    let web = job("web", "nginx:1.25", 10);
    let api = job("api", "api:3", 4);
    nomad.set_routes(&[("/v1/job/web", 200, &web), ("/v1/job/api", 200, &api)]);
    let ws = Workspace::new(&nomad);

    let (ok, report) = ws.sync_json(&[]);
    assert!(ok);
    assert_eq!(report["backend"], "git");
    assert_eq!(report["summary"]["committed"], 2);
    assert_eq!(job_entry(&report, "web")["change"], "new");
    assert_eq!(job_entry(&report, "web")["path"], "global/default/web.hcl");

    let document = read(&ws.ledger().join("global/default/web.hcl"));
    assert!(document.contains("nginx:1.25"));
    assert!(!document.contains("ModifyIndex"));
    assert!(document.ends_with('\n'));

    // Only bookkeeping moves on the orchestrator side.
    let web = job("web", "nginx:1.25", 99);
    let api = job("api", "api:3", 98);
    nomad.set_routes(&[("/v1/job/web", 200, &web), ("/v1/job/api", 200, &api)]);
    let (ok, report) = ws.sync_json(&[]);
    assert!(ok);
    assert_eq!(report["summary"]["committed"], 0);
    assert_eq!(report["summary"]["unchanged"], 2);
    assert_eq!(read(&ws.ledger().join("global/default/web.hcl")), document);
}

#[test]
fn modified_job_is_diffed_committed_and_listed() {
    let nomad = Orchestrator::start();
    let v1 = job("web", "nginx:1.25", 10);
    let api = job("api", "api:3", 4);
    nomad.set_routes(&[("/v1/job/web", 200, &v1), ("/v1/job/api", 200, &api)]);
    let ws = Workspace::new(&nomad);
    assert!(ws.sync_json(&[]).0);

    let v2 = job("web", "nginx:1.27", 11);
    nomad.set_routes(&[("/v1/job/web", 200, &v2), ("/v1/job/api", 200, &api)]);

    ws.jobledger()
        .arg("diff")
        .assert()
        .success()
        .stdout(contains("global/default/web.hcl"))
        .stdout(contains("-"))
        .stdout(contains("nginx:1.27"));

    let (ok, report) = ws.sync_json(&["--jobs", "web"]);
    assert!(ok);
    let web = job_entry(&report, "web");
    assert_eq!(web["status"], "committed");
    assert_eq!(web["change"], "modified");
    assert_eq!(report["jobs"].as_array().unwrap().len(), 1);

    ws.jobledger()
        .args(["history", "--job", "web"])
        .assert()
        .success()
        .stdout(contains("default/web:"))
        .stdout(contains("Initial version"));

    ws.jobledger()
        .arg("diff")
        .assert()
        .success()
        .stdout(contains("No differences."));
}

#[test]
fn diff_reports_other_jobs_when_one_fails() {
    let nomad = Orchestrator::start();
    let v1 = job("web", "nginx:1.25", 10);
    nomad.set_routes(&[("/v1/job/web", 200, &v1)]);
    let ws = Workspace::new(&nomad);
    assert!(ws.sync_json(&[]).0);

    // `api` comes first in the config, so `web` is diffed after the failure.
    let v2 = job("web", "nginx:1.27", 11);
    nomad.set_routes(&[("/v1/job/web", 200, &v2), ("/v1/job/api", 500, "boom")]);
    ws.jobledger()
        .arg("diff")
        .assert()
        .failure()
        .stdout(contains("nginx:1.27"))
        .stderr(contains("1 job(s) could not be diffed"));
}

#[test]
fn dry_run_touches_nothing() {
    let nomad = Orchestrator::start();
    let web = job("web", "nginx:1.25", 10);
    nomad.set_routes(&[("/v1/job/web", 200, &web)]);
    let ws = Workspace::new(&nomad);

    let (ok, report) = ws.sync_json(&["--dry-run"]);
    assert!(ok);
    assert_eq!(report["dry_run"], true);
    assert_eq!(job_entry(&report, "web")["status"], "would-commit");
    assert!(!ws.ledger().join("global/default/web.hcl").exists());
}

#[test]
fn missing_job_is_skipped_and_broken_job_fails_the_run() {
    let nomad = Orchestrator::start();
    let web = job("web", "nginx:1.25", 10);
    nomad.set_routes(&[("/v1/job/web", 200, &web)]);
    let ws = Workspace::new(&nomad);

    let (ok, report) = ws.sync_json(&[]);
    assert!(ok);
    assert_eq!(job_entry(&report, "api")["status"], "skipped");
    assert_eq!(job_entry(&report, "web")["status"], "committed");

    nomad.set_routes(&[("/v1/job/web", 200, &web), ("/v1/job/api", 500, "boom")]);
    let (ok, report) = ws.sync_json(&[]);
    assert!(!ok);
    let api = job_entry(&report, "api");
    assert_eq!(api["status"], "failed");
    assert_eq!(api["stage"], "fetching");
    assert_eq!(job_entry(&report, "web")["status"], "unchanged");
    assert_eq!(report["summary"]["failed"], 1);
}

#[test]
fn show_and_deploy_a_recorded_commit() {
    let nomad = Orchestrator::start();
    let web = job("web", "nginx:1.25", 10);
    nomad.set_routes(&[("/v1/job/web", 200, &web)]);
    let ws = Workspace::new(&nomad);

    let (ok, report) = ws.sync_json(&[]);
    assert!(ok);
    let commit = job_entry(&report, "web")["commit"]
        .as_str()
        .unwrap()
        .to_string();

    ws.jobledger()
        .args(["show", &commit[..7]])
        .assert()
        .success()
        .stdout(contains(commit.as_str()))
        .stdout(contains("Initial version"))
        .stdout(contains("global/default/web.hcl"))
        .stdout(contains("+"));

    nomad.set_routes(&[
        ("/v1/jobs/parse", 200, &web),
        ("/v1/jobs", 200, r#"{"EvalID":"eval-42","Index":11}"#),
    ]);
    ws.jobledger()
        .args(["deploy", &commit, "web"])
        .assert()
        .success()
        .stdout(contains("Deployed default/web"))
        .stdout(contains("eval-42"));

    let requests = nomad.requests();
    let parse = requests
        .iter()
        .find(|r| r.starts_with("POST /v1/jobs/parse"))
        .unwrap();
    assert!(parse.contains("nginx:1.25"));
    assert!(requests.iter().any(|r| r.starts_with("POST /v1/jobs?")));
}

#[test]
fn deploy_of_unknown_job_fails() {
    let nomad = Orchestrator::start();
    let web = job("web", "nginx:1.25", 10);
    nomad.set_routes(&[("/v1/job/web", 200, &web)]);
    let ws = Workspace::new(&nomad);

    let (_, report) = ws.sync_json(&[]);
    let commit = job_entry(&report, "web")["commit"]
        .as_str()
        .unwrap()
        .to_string();

    ws.jobledger()
        .args(["deploy", &commit, "cache"])
        .assert()
        .failure()
        .stderr(contains("deploy from"));
}
