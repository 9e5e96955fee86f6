//! Local git repository backend.
//!
//! Documents live in the working tree at their repository-relative paths.
//! `write_file` writes through a `.jobledger.tmp` sibling and renames into
//! place, then stages the path; `commit` records everything staged on the
//! configured branch. "Latest committed state" always means the tree of the
//! branch tip, never the working tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, CredentialType, Delta, Diff, ErrorCode, FetchOptions, Oid, Patch, PushOptions,
    RemoteCallbacks, Repository, RepositoryInitOptions, Signature, Sort, Tree,
};

use jobledger_core::GitBackendConfig;

use crate::backend::{
    Backend, CommitDetail, CommitInfo, FileChange, FileChangeKind, History, HistoryFilter,
};
use crate::error::{io_err, BackendError};

const NAME: &str = "git";

/// Authentication attempts per network operation before giving up.
const MAX_AUTH_ATTEMPTS: usize = 3;

pub struct GitBackend {
    config: GitBackendConfig,
    repo: Option<Repository>,
    staged: BTreeSet<String>,
}

impl GitBackend {
    pub fn new(config: GitBackendConfig) -> Self {
        Self {
            config,
            repo: None,
            staged: BTreeSet::new(),
        }
    }

    fn repo(&self) -> Result<&Repository, BackendError> {
        self.repo.as_ref().ok_or(BackendError::NotInitialized(NAME))
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.config.branch)
    }

    /// Tree of the branch tip, `None` while the branch has no commits.
    fn tip_tree(&self) -> Result<Option<Tree<'_>>, BackendError> {
        let repo = self.repo()?;
        match repo.find_reference(&self.branch_ref()) {
            Ok(reference) => Ok(Some(reference.peel_to_tree()?)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open_or_create(&self) -> Result<Repository, BackendError> {
        let path = &self.config.path;
        match Repository::open(path) {
            Ok(repo) => {
                tracing::debug!("opened repository at {}", path.display());
                return Ok(repo);
            }
            Err(e) if e.code() != ErrorCode::NotFound => return Err(e.into()),
            Err(_) => {}
        }

        if let Some(url) = &self.config.url {
            tracing::info!("cloning {} into {}", url, path.display());
            let mut fetch = FetchOptions::new();
            fetch.remote_callbacks(credential_callbacks(self.config.resolve_token()));
            return Ok(RepoBuilder::new().fetch_options(fetch).clone(url, path)?);
        }

        tracing::info!("initializing repository at {}", path.display());
        std::fs::create_dir_all(path).map_err(|e| io_err(path, e))?;
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(&self.config.branch);
        Ok(Repository::init_opts(path, &opts)?)
    }

    /// Undo index changes made since the last commit.
    fn unstage_all(&mut self) -> Result<(), BackendError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let paths: Vec<String> = std::mem::take(&mut self.staged).into_iter().collect();
        let repo = self.repo()?;
        match repo.find_reference(&self.branch_ref()) {
            Ok(reference) => {
                let tip = reference.peel(git2::ObjectType::Commit)?;
                repo.reset_default(Some(&tip), paths.iter().map(String::as_str))?;
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                let mut index = repo.index()?;
                for path in &paths {
                    index.remove_path(Path::new(path))?;
                }
                index.write()?;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!("discarded {} staged path(s)", paths.len());
        Ok(())
    }

    fn create_commit(&self, message: &str) -> Result<Oid, BackendError> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let signature = Signature::now(&self.config.author_name, &self.config.author_email)?;
        let parent = match repo.find_reference(&self.branch_ref()) {
            Ok(reference) => Some(reference.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let branch_ref = self.branch_ref();
        Ok(repo.commit(
            Some(branch_ref.as_str()),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?)
    }
}

/// Point HEAD at `branch`, creating it from the remote-tracking branch when
/// only that exists. An absent branch leaves HEAD unborn until the first commit.
fn checkout_branch(repo: &Repository, remote: &str, branch: &str) -> Result<(), git2::Error> {
    let refname = format!("refs/heads/{branch}");
    let head = repo.find_reference("HEAD")?;
    if head.symbolic_target() == Some(refname.as_str()) {
        return Ok(());
    }

    let exists = match repo.find_reference(&refname) {
        Ok(_) => true,
        Err(e) if e.code() == ErrorCode::NotFound => {
            let tracking = format!("refs/remotes/{remote}/{branch}");
            match repo.find_reference(&tracking) {
                Ok(reference) => {
                    let commit = reference.peel_to_commit()?;
                    repo.branch(branch, &commit, false)?;
                    true
                }
                Err(e) if e.code() == ErrorCode::NotFound => false,
                Err(e) => return Err(e),
            }
        }
        Err(e) => return Err(e),
    };

    repo.set_head(&refname)?;
    if exists {
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    }
    tracing::debug!("switched to branch {}", branch);
    Ok(())
}

/// Fetch the configured remote and return the tip of its copy of the branch.
///
/// `None` when no such remote is configured or the branch does not exist there yet.
fn fetch_branch(repo: &Repository, config: &GitBackendConfig) -> Result<Option<Oid>, BackendError> {
    let mut remote = match repo.find_remote(&config.remote) {
        Ok(remote) => remote,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut opts = FetchOptions::new();
    opts.remote_callbacks(credential_callbacks(config.resolve_token()));
    let refspec = format!(
        "+refs/heads/{b}:refs/remotes/{r}/{b}",
        b = config.branch,
        r = config.remote
    );
    remote.fetch(&[refspec.as_str()], Some(&mut opts), None)?;

    let tracking = format!("refs/remotes/{}/{}", config.remote, config.branch);
    match repo.find_reference(&tracking) {
        Ok(reference) => Ok(Some(reference.peel_to_commit()?.id())),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Move the checked-out branch forward to `upstream`.
///
/// A local branch that is already ahead (an earlier push failed) is left
/// alone; the next push carries its commits.
fn fast_forward(
    repo: &Repository,
    config: &GitBackendConfig,
    upstream: Oid,
) -> Result<(), BackendError> {
    let refname = format!("refs/heads/{}", config.branch);
    let target = repo.find_annotated_commit(upstream)?;
    let (analysis, _) = repo.merge_analysis(&[&target])?;

    if analysis.is_up_to_date() {
        return Ok(());
    }
    if analysis.is_unborn() {
        repo.reference(&refname, upstream, true, "jobledger: track remote branch")?;
    } else if analysis.is_fast_forward() {
        let mut reference = repo.find_reference(&refname)?;
        reference.set_target(upstream, &format!("jobledger: fast-forward to {upstream}"))?;
    } else {
        return Err(BackendError::Diverged {
            branch: config.branch.clone(),
            remote: config.remote.clone(),
        });
    }

    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    tracing::info!("fast-forwarded {} to {}", config.branch, upstream);
    Ok(())
}

/// Token via HTTPS basic auth, then the SSH agent, then libgit2 defaults.
fn credential_callbacks<'a>(token: Option<String>) -> RemoteCallbacks<'a> {
    let mut attempts = 0;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username, allowed| {
        attempts += 1;
        if attempts > MAX_AUTH_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if let Some(token) = &token {
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                return Cred::userpass_plaintext("x-access-token", token);
            }
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            if let Some(user) = username {
                return Cred::ssh_key_from_agent(user);
            }
        }
        Cred::default()
    });
    callbacks
}

fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.jobledger.tmp", path.display()))
}

impl Backend for GitBackend {
    fn initialize(&mut self) -> Result<(), BackendError> {
        let repo = self.open_or_create()?;
        if repo.is_bare() {
            return Err(BackendError::Git(git2::Error::from_str(
                "backend repository must have a working tree",
            )));
        }
        let fetched = fetch_branch(&repo, &self.config)?;
        checkout_branch(&repo, &self.config.remote, &self.config.branch)?;
        if let Some(upstream) = fetched {
            fast_forward(&repo, &self.config, upstream)?;
        }
        self.repo = Some(repo);
        self.staged.clear();
        Ok(())
    }

    fn file_exists(&self, path: &str) -> Result<bool, BackendError> {
        let Some(tree) = self.tip_tree()? else {
            return Ok(false);
        };
        match tree.get_path(Path::new(path)) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        let tree = self
            .tip_tree()?
            .ok_or_else(|| BackendError::NotFound(path.to_string()))?;
        read_blob(self.repo()?, &tree, path)
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), BackendError> {
        let repo = self.repo()?;
        let workdir = repo
            .workdir()
            .ok_or(BackendError::NotInitialized(NAME))?
            .to_path_buf();
        let target = workdir.join(path);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp = tmp_path(&target);
        std::fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&target, e));
        }

        let mut index = repo.index()?;
        index.add_path(Path::new(path))?;
        index.write()?;
        self.staged.insert(path.to_string());
        tracing::debug!("staged {}", path);
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<String, BackendError> {
        if self.staged.is_empty() {
            return Ok(String::new());
        }
        match self.create_commit(message) {
            Ok(oid) => {
                self.staged.clear();
                tracing::info!("committed {}: {}", oid, message);
                Ok(oid.to_string())
            }
            Err(e) => {
                if let Err(reset) = self.unstage_all() {
                    tracing::warn!("cannot discard staged changes: {}", reset);
                }
                Err(e)
            }
        }
    }

    fn push(&mut self) -> Result<(), BackendError> {
        let repo = self.repo()?;
        let mut remote = match repo.find_remote(&self.config.remote) {
            Ok(remote) => remote,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Err(BackendError::NotFound(format!(
                    "remote '{}'",
                    self.config.remote
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let mut callbacks = credential_callbacks(self.config.resolve_token());
        callbacks.push_update_reference(|refname, status| match status {
            Some(message) => Err(git2::Error::from_str(&format!(
                "{refname} rejected: {message}"
            ))),
            None => Ok(()),
        });
        let mut opts = PushOptions::new();
        opts.remote_callbacks(callbacks);

        let branch = &self.config.branch;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote.push(&[refspec.as_str()], Some(&mut opts))?;
        tracing::info!("pushed {} to {}", branch, self.config.remote);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.repo.is_some() {
            self.unstage_all()?;
        }
        self.repo = None;
        Ok(())
    }

    fn name(&self) -> &str {
        NAME
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

fn read_blob(repo: &Repository, tree: &Tree<'_>, path: &str) -> Result<Vec<u8>, BackendError> {
    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == ErrorCode::NotFound => {
            return Err(BackendError::NotFound(path.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let blob = entry.to_object(repo)?.peel_to_blob()?;
    Ok(blob.content().to_vec())
}

fn find_commit<'r>(repo: &'r Repository, id: &str) -> Result<git2::Commit<'r>, BackendError> {
    match repo.revparse_single(id) {
        Ok(object) => Ok(object.peel_to_commit()?),
        Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::Ambiguous) => {
            Err(BackendError::NotFound(format!("commit '{id}'")))
        }
        Err(e) => Err(e.into()),
    }
}

/// Diff of a commit against its first parent (or the empty tree).
fn commit_diff<'r>(
    repo: &'r Repository,
    commit: &git2::Commit<'r>,
) -> Result<Diff<'r>, BackendError> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(e) if e.code() == ErrorCode::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    Ok(repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?)
}

fn delta_path(delta: &git2::DiffDelta<'_>) -> Option<String> {
    delta
        .new_file()
        .path()
        .or_else(|| delta.old_file().path())
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn commit_info(commit: &git2::Commit<'_>, files: Vec<String>) -> CommitInfo {
    CommitInfo {
        id: commit.id().to_string(),
        message: commit.summary().unwrap_or_default().to_string(),
        author: commit.author().name().unwrap_or_default().to_string(),
        timestamp: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        files,
    }
}

impl History for GitBackend {
    fn log(&self, filter: &HistoryFilter) -> Result<Vec<CommitInfo>, BackendError> {
        let repo = self.repo()?;
        let tip = match repo.find_reference(&self.branch_ref()) {
            Ok(reference) => reference.peel_to_commit()?.id(),
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut revwalk = repo.revwalk()?;
        revwalk.push(tip)?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            if commits.len() >= filter.limit {
                break;
            }
            let commit = repo.find_commit(oid?)?;
            let diff = commit_diff(repo, &commit)?;
            let files: Vec<String> = diff
                .deltas()
                .filter_map(|delta| delta_path(&delta))
                .filter(|path| filter.matches(path))
                .collect();
            if !files.is_empty() {
                commits.push(commit_info(&commit, files));
            }
        }
        Ok(commits)
    }

    fn show(&self, id: &str) -> Result<CommitDetail, BackendError> {
        let repo = self.repo()?;
        let commit = find_commit(repo, id)?;
        let diff = commit_diff(repo, &commit)?;

        let mut changes = Vec::new();
        for (idx, delta) in diff.deltas().enumerate() {
            let Some(path) = delta_path(&delta) else {
                continue;
            };
            let kind = match delta.status() {
                Delta::Added => FileChangeKind::Added,
                Delta::Deleted => FileChangeKind::Deleted,
                _ => FileChangeKind::Modified,
            };
            let patch = match Patch::from_diff(&diff, idx)? {
                Some(mut patch) => String::from_utf8_lossy(&patch.to_buf()?).into_owned(),
                None => String::new(),
            };
            changes.push(FileChange { path, kind, patch });
        }

        let files = changes.iter().map(|c| c.path.clone()).collect();
        Ok(CommitDetail {
            info: commit_info(&commit, files),
            changes,
        })
    }

    fn read_file_at(&self, id: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let repo = self.repo()?;
        let tree = find_commit(repo, id)?.tree()?;
        read_blob(repo, &tree, path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
