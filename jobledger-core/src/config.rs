//! YAML configuration.
//!
//! # Lookup order
//!
//! 1. an explicit path (`--config`)
//! 2. `$JOBLEDGER_CONFIG`
//! 3. `~/.jobledger/config.yaml`
//!
//! # API pattern
//!
//! - `fn_at(path: &Path, …)` — explicit location; used in tests with `TempDir`
//! - `fn(…)` — resolves the location as above, delegates to `_at`

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{IgnoreSet, JobRef};

/// Environment variable that overrides the default config location.
pub const CONFIG_ENV: &str = "JOBLEDGER_CONFIG";

// ---------------------------------------------------------------------------
// 1. Shape
// ---------------------------------------------------------------------------

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub nomad: NomadConfig,
    pub backend: BackendConfig,
    /// Extra top-level job fields to treat as volatile.
    #[serde(default)]
    pub ignore_fields: Vec<String>,
    /// Jobs to capture, in processing order.
    #[serde(default)]
    pub jobs: Vec<JobRef>,
}

/// Where and how to reach the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NomadConfig {
    #[serde(default = "default_nomad_address")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Name of the environment variable holding the ACL token.
    #[serde(default = "default_nomad_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NomadConfig {
    fn default() -> Self {
        Self {
            address: default_nomad_address(),
            region: None,
            token_env: default_nomad_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Git(GitBackendConfig),
    #[serde(rename = "github")]
    GitHub(GitHubBackendConfig),
}

/// Local git repository backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitBackendConfig {
    /// Working tree of the repository.
    pub path: PathBuf,
    /// Clone from here when `path` holds no repository yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    /// Environment variable holding an HTTPS token for push/clone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

/// Remote REST API backend (GitHub-compatible).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubBackendConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_nomad_address() -> String {
    "http://127.0.0.1:4646".to_string()
}

fn default_nomad_token_env() -> String {
    "NOMAD_TOKEN".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_author_name() -> String {
    "jobledger".to_string()
}

fn default_author_email() -> String {
    "jobledger@localhost".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

impl LedgerConfig {
    /// The operator's extra volatile fields as an [`IgnoreSet`].
    pub fn ignore_set(&self) -> IgnoreSet {
        self.ignore_fields.iter().collect()
    }

    /// Reject configurations that cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nomad.address.trim().is_empty() {
            return Err(ConfigError::Invalid("nomad.address must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(ConfigError::Invalid("job names must not be empty".into()));
            }
            if job.namespace.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' has an empty namespace",
                    job.name
                )));
            }
            if !seen.insert((job.namespace.as_str(), job.name.as_str())) {
                return Err(ConfigError::Invalid(format!("job '{job}' is listed twice")));
            }
        }

        match &self.backend {
            BackendConfig::Git(git) => {
                if git.path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid("backend.path must not be empty".into()));
                }
                if git.branch.trim().is_empty() {
                    return Err(ConfigError::Invalid("backend.branch must not be empty".into()));
                }
            }
            BackendConfig::GitHub(gh) => {
                if gh.owner.trim().is_empty() || gh.repo.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "backend.owner and backend.repo must not be empty".into(),
                    ));
                }
                if gh.branch.trim().is_empty() {
                    return Err(ConfigError::Invalid("backend.branch must not be empty".into()));
                }
            }
        }
        Ok(())
    }
}

impl NomadConfig {
    /// ACL token from the configured environment variable, if set and non-empty.
    pub fn resolve_token(&self) -> Option<String> {
        resolve_env(&self.token_env)
    }
}

impl GitBackendConfig {
    pub fn resolve_token(&self) -> Option<String> {
        self.token_env.as_deref().and_then(resolve_env)
    }
}

impl GitHubBackendConfig {
    pub fn resolve_token(&self) -> Option<String> {
        resolve_env(&self.token_env)
    }
}

fn resolve_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// 2. Paths
// ---------------------------------------------------------------------------

/// `<home>/.jobledger/config.yaml` — pure, no I/O.
pub fn default_path_at(home: &Path) -> PathBuf {
    home.join(".jobledger").join("config.yaml")
}

/// Resolve the config location: explicit path, then `$JOBLEDGER_CONFIG`,
/// then `~/.jobledger/config.yaml`.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(default_path_at(&home))
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load and validate the configuration at `path`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML,
/// `ConfigError::Invalid` if it fails validation.
pub fn load_at(path: &Path) -> Result<LedgerConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: LedgerConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper using [`resolve_path`].
pub fn load(explicit: Option<&Path>) -> Result<LedgerConfig, ConfigError> {
    load_at(&resolve_path(explicit)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_under_dot_jobledger() {
        let path = default_path_at(Path::new("/home/ops"));
        assert_eq!(path, PathBuf::from("/home/ops/.jobledger/config.yaml"));
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_path(Some(Path::new("/etc/jobledger.yaml"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/jobledger.yaml"));
    }

    #[test]
    fn ignore_set_comes_from_ignore_fields() {
        let config: LedgerConfig = serde_yaml::from_str(
            "backend: {type: git, path: /tmp/repo}\nignore_fields: [Version, stable]\n",
        )
        .unwrap();
        let set = config.ignore_set();
        assert!(set.contains("Version"));
        assert!(set.contains("Stable"));
        assert_eq!(set.len(), 2);
    }
}
