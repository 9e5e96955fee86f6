//! GitHub-compatible REST API backend.
//!
//! Reads go through the contents API. Writes are staged in memory and turned
//! into one commit by the git data API: blobs, a tree on top of the branch
//! tip's tree, a commit, then a fast-forward of the branch ref. Every commit
//! is visible remotely as soon as `commit` returns, so `push` does nothing.
//!
//! An empty repository (no commits at all) is rejected by the git data API;
//! the repository needs at least one commit on some branch.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use jobledger_core::GitHubBackendConfig;

use crate::backend::{
    Backend, CommitDetail, CommitInfo, FileChange, FileChangeKind, History, HistoryFilter,
};
use crate::error::BackendError;
use crate::http;

const NAME: &str = "github";

/// Commits per page when listing history.
const PAGE_SIZE: usize = 100;

/// Pages scanned before `log` gives up looking for matching commits.
const MAX_PAGES: usize = 10;

pub struct GitHubBackend {
    config: GitHubBackendConfig,
    api: Option<Api>,
    staged: BTreeMap<String, Vec<u8>>,
}

impl GitHubBackend {
    pub fn new(config: GitHubBackendConfig) -> Self {
        Self {
            config,
            api: None,
            staged: BTreeMap::new(),
        }
    }

    fn api(&self) -> Result<&Api, BackendError> {
        self.api.as_ref().ok_or(BackendError::NotInitialized(NAME))
    }

    fn read_at(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let endpoint = format!("/contents/{}", http::encode_path(path));
        match self
            .api()?
            .get_optional::<ContentResponse>(&endpoint, &[("ref", reference)])?
        {
            Some(content) => decode_content(&content).map(Some),
            None => Ok(None),
        }
    }

    /// Sha of the branch tip, `None` when the branch does not exist yet.
    fn tip(&self) -> Result<Option<String>, BackendError> {
        let endpoint = format!("/git/ref/heads/{}", http::encode_path(&self.config.branch));
        Ok(self
            .api()?
            .get_optional::<RefResponse>(&endpoint, &[])?
            .map(|r| r.object.sha))
    }

    fn create_commit(
        &self,
        message: &str,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<String, BackendError> {
        let api = self.api()?;
        let parent = self.tip()?;
        let base_tree = match &parent {
            Some(sha) => Some(
                api.get::<GitCommitResponse>(&format!("/git/commits/{sha}"), &[])?
                    .tree
                    .sha,
            ),
            None => None,
        };

        let mut entries = Vec::with_capacity(files.len());
        for (path, content) in files {
            let blob: ShaResponse = api.send(
                "POST",
                "/git/blobs",
                &[],
                Some(&json!({ "content": STANDARD.encode(content), "encoding": "base64" })),
            )?;
            entries.push(json!({
                "path": path,
                "mode": "100644",
                "type": "blob",
                "sha": blob.sha,
            }));
        }

        let mut tree_request = json!({ "tree": entries });
        if let Some(base) = &base_tree {
            tree_request["base_tree"] = json!(base);
        }
        let tree: ShaResponse = api.send("POST", "/git/trees", &[], Some(&tree_request))?;

        let author = json!({
            "name": self.config.author_name,
            "email": self.config.author_email,
        });
        let commit: ShaResponse = api.send(
            "POST",
            "/git/commits",
            &[],
            Some(&json!({
                "message": message,
                "tree": tree.sha,
                "parents": parent.iter().collect::<Vec<_>>(),
                "author": author,
                "committer": author,
            })),
        )?;

        let branch = &self.config.branch;
        match parent {
            Some(_) => {
                let _: Value = api.send(
                    "PATCH",
                    &format!("/git/refs/heads/{}", http::encode_path(branch)),
                    &[],
                    Some(&json!({ "sha": commit.sha, "force": false })),
                )?;
            }
            None => {
                let _: Value = api.send(
                    "POST",
                    "/git/refs",
                    &[],
                    Some(&json!({ "ref": format!("refs/heads/{branch}"), "sha": commit.sha })),
                )?;
            }
        }
        Ok(commit.sha)
    }

    fn commit_detail(&self, id: &str) -> Result<CommitDetail, BackendError> {
        let endpoint = format!("/commits/{}", http::encode_segment(id));
        let response = match self.api()?.send::<CommitResponse>("GET", &endpoint, &[], None) {
            Ok(response) => response,
            Err(BackendError::Http { status, .. }) if matches!(status, 404 | 422) => {
                return Err(BackendError::NotFound(format!("commit '{id}'")))
            }
            Err(e) => return Err(e),
        };
        Ok(detail_from_response(response))
    }
}

impl Backend for GitHubBackend {
    fn initialize(&mut self) -> Result<(), BackendError> {
        let token = self.config.resolve_token();
        if token.is_none() {
            tracing::warn!(
                "{} is not set; requests to {} are unauthenticated",
                self.config.token_env,
                self.config.api_url
            );
        }
        let api = Api {
            agent: http::agent(self.config.timeout_secs),
            repo_url: format!(
                "{}/repos/{}/{}",
                self.config.api_url.trim_end_matches('/'),
                http::encode_segment(&self.config.owner),
                http::encode_segment(&self.config.repo)
            ),
            token,
        };
        if api.get_optional::<Value>("", &[])?.is_none() {
            return Err(BackendError::NotFound(format!(
                "repository {}/{}",
                self.config.owner, self.config.repo
            )));
        }
        tracing::debug!("using repository {}", api.repo_url);
        self.api = Some(api);
        self.staged.clear();
        Ok(())
    }

    fn file_exists(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self.read_at(&self.config.branch, path)?.is_some())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        self.read_at(&self.config.branch, path)?
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), BackendError> {
        self.api()?;
        self.staged.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<String, BackendError> {
        let files = std::mem::take(&mut self.staged);
        if files.is_empty() {
            return Ok(String::new());
        }
        let sha = self.create_commit(message, &files)?;
        tracing::info!("committed {}: {}", sha, message);
        Ok(sha)
    }

    fn push(&mut self) -> Result<(), BackendError> {
        tracing::debug!("push is a no-op for the {} backend", NAME);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.staged.clear();
        self.api = None;
        Ok(())
    }

    fn name(&self) -> &str {
        NAME
    }
}

impl History for GitHubBackend {
    fn log(&self, filter: &HistoryFilter) -> Result<Vec<CommitInfo>, BackendError> {
        let api = self.api()?;
        let mut commits = Vec::new();

        let per_page = PAGE_SIZE.to_string();
        for page in 1..=MAX_PAGES {
            let page = page.to_string();
            let query = [
                ("sha", self.config.branch.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ];
            let listed: Vec<ShaResponse> = match api.send("GET", "/commits", &query, None) {
                Ok(listed) => listed,
                // Missing branch or empty repository.
                Err(BackendError::Http { status, .. }) if matches!(status, 404 | 409 | 422) => {
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            let exhausted = listed.len() < PAGE_SIZE;

            for entry in listed {
                let mut detail = self.commit_detail(&entry.sha)?;
                detail.info.files.retain(|path| filter.matches(path));
                if !detail.info.files.is_empty() {
                    commits.push(detail.info);
                    if commits.len() >= filter.limit {
                        return Ok(commits);
                    }
                }
            }
            if exhausted {
                break;
            }
        }
        Ok(commits)
    }

    fn show(&self, id: &str) -> Result<CommitDetail, BackendError> {
        self.commit_detail(id)
    }

    fn read_file_at(&self, id: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        self.read_at(id, path)?
            .ok_or_else(|| BackendError::NotFound(format!("{path} at {id}")))
    }
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

struct Api {
    agent: ureq::Agent,
    /// `<api_url>/repos/<owner>/<repo>`
    repo_url: String,
    token: Option<String>,
}

impl Api {
    fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, BackendError> {
        let mut request = self
            .agent
            .request(method, &format!("{}{}", self.repo_url, endpoint))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28");
        for (key, value) in query {
            request = request.query(key, value);
        }
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        let url = request.url().to_string();

        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        match result {
            Ok(response) => response
                .into_json::<T>()
                .map_err(|e| BackendError::Decode(format!("{url}: {e}"))),
            Err(ureq::Error::Status(status, response)) => Err(BackendError::Http {
                status,
                url,
                body: http::error_body(response),
            }),
            Err(e) => Err(BackendError::Transport {
                url,
                message: e.to_string(),
            }),
        }
    }

    fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        self.send("GET", endpoint, query, None)
    }

    /// `GET`, mapping 404 to `None`.
    fn get_optional<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, BackendError> {
        match self.get(endpoint, query) {
            Ok(value) => Ok(Some(value)),
            Err(BackendError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct GitCommitResponse {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitBody,
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    message: String,
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: String,
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CommitFile {
    filename: String,
    status: String,
    #[serde(default)]
    patch: Option<String>,
}

fn decode_content(content: &ContentResponse) -> Result<Vec<u8>, BackendError> {
    if !content.encoding.is_empty() && content.encoding != "base64" {
        return Err(BackendError::Decode(format!(
            "unsupported content encoding '{}'",
            content.encoding
        )));
    }
    let packed: String = content
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(packed)
        .map_err(|e| BackendError::Decode(format!("invalid base64 content: {e}")))
}

fn change_kind(status: &str) -> FileChangeKind {
    match status {
        "added" => FileChangeKind::Added,
        "removed" => FileChangeKind::Deleted,
        _ => FileChangeKind::Modified,
    }
}

fn detail_from_response(response: CommitResponse) -> CommitDetail {
    let changes: Vec<FileChange> = response
        .files
        .into_iter()
        .map(|file| {
            let patch = match file.patch {
                Some(hunks) => format!(
                    "--- a/{path}\n+++ b/{path}\n{hunks}\n",
                    path = file.filename
                ),
                None => String::new(),
            };
            FileChange {
                kind: change_kind(&file.status),
                path: file.filename,
                patch,
            }
        })
        .collect();

    let (author, timestamp) = match response.commit.author {
        Some(author) => (author.name, author.date),
        None => (String::new(), DateTime::<Utc>::default()),
    };
    CommitDetail {
        info: CommitInfo {
            id: response.sha,
            message: response
                .commit
                .message
                .lines()
                .next()
                .unwrap_or_default()
                .to_string(),
            author,
            timestamp,
            files: changes.iter().map(|c| c.path.clone()).collect(),
        },
        changes,
    }
}
