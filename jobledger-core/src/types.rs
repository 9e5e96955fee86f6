//! Domain types for jobs as the orchestrator reports them.
//!
//! Field names follow the orchestrator's JSON API (PascalCase). Collections
//! the API may report as `null` deserialize as empty. Maps use [`IndexMap`]
//! so the order the API happened to use is preserved until normalization.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Region used for storage paths when a job does not report one.
pub const DEFAULT_REGION: &str = "global";

/// Namespace used when neither the job nor the configuration names one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Extension of every stored canonical document.
pub const DOCUMENT_EXTENSION: &str = "hcl";

/// Orchestrator bookkeeping fields that are stripped from every job.
pub const VOLATILE_FIELDS: &[&str] = &[
    "ModifyIndex",
    "ModifyTime",
    "JobModifyIndex",
    "SubmitTime",
    "CreateIndex",
    "Status",
    "StatusDescription",
];

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// ---------------------------------------------------------------------------
// Job specification
// ---------------------------------------------------------------------------

/// A job exactly as fetched from the orchestrator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSpecification {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub datacenters: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub meta: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateStrategy>,
    #[serde(default, deserialize_with = "nullable")]
    pub task_groups: Vec<TaskGroup>,

    // Volatile bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_modify_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,

    /// Top-level attributes this crate does not model.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Rolling-update strategy. Durations are nanoseconds, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_healthy_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy_deadline: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_deadline: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_revert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_promote: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stagger: Option<i64>,
}

impl UpdateStrategy {
    /// `true` when no attribute is set.
    pub fn is_empty(&self) -> bool {
        *self == UpdateStrategy::default()
    }
}

/// A group of tasks scheduled together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub meta: IndexMap<String, String>,
    #[serde(default, deserialize_with = "nullable")]
    pub tasks: Vec<Task>,
}

/// A single task within a group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Driver-specific configuration; values keep their JSON types.
    #[serde(default, deserialize_with = "nullable")]
    pub config: IndexMap<String, Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub env: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, deserialize_with = "nullable")]
    pub meta: IndexMap<String, String>,
}

/// Resource requests of a task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(rename = "CPU", default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i64>,
    #[serde(rename = "MemoryMB", default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    #[serde(rename = "MemoryMaxMB", default, skip_serializing_if = "Option::is_none")]
    pub memory_max_mb: Option<i64>,
}

impl Resources {
    /// `true` when no request is set.
    pub fn is_empty(&self) -> bool {
        *self == Resources::default()
    }
}

// ---------------------------------------------------------------------------
// IgnoreSet
// ---------------------------------------------------------------------------

/// Operator-configured field names treated as volatile in addition to
/// [`VOLATILE_FIELDS`].
///
/// Matching ignores ASCII case and underscores, so `job_modify_index`,
/// `jobmodifyindex` and `JobModifyIndex` all name the same field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IgnoreSet(BTreeSet<String>);

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when `field` is named by this set.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(&fold_field_name(field))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S: AsRef<str>> FromIterator<S> for IgnoreSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|s| fold_field_name(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

/// Fold a field name to the form used for forgiving comparisons.
pub fn fold_field_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// JobRef / JobKey
// ---------------------------------------------------------------------------

/// A configured job: what to ask the orchestrator for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl JobRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Storage identity of a job: region + namespace + name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub region: String,
    pub namespace: String,
    pub name: String,
}

impl JobKey {
    pub fn new(
        region: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a fetched job. Region and namespace fall back to the job
    /// reference and then to the defaults when the job does not carry them.
    pub fn for_job(spec: &JobSpecification, job: &JobRef, region: Option<&str>) -> Self {
        let non_empty = |s: &Option<String>| s.as_deref().filter(|v| !v.is_empty()).map(str::to_owned);
        Self {
            region: non_empty(&spec.region)
                .or_else(|| region.map(str::to_owned))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            namespace: non_empty(&spec.namespace).unwrap_or_else(|| job.namespace.clone()),
            name: non_empty(&spec.name).unwrap_or_else(|| job.name.clone()),
        }
    }

    /// `<region>/<namespace>/<name>.hcl` — always `/`-separated.
    pub fn document_path(&self) -> String {
        format!(
            "{}/{}/{}.{}",
            self.region, self.namespace, self.name, DOCUMENT_EXTENSION
        )
    }

    /// Inverse of [`JobKey::document_path`]; `None` for unrelated paths.
    pub fn from_document_path(path: &str) -> Option<Self> {
        let mut parts = path.split('/');
        let (region, namespace, file) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let name = file.strip_suffix(&format!(".{DOCUMENT_EXTENSION}"))?;
        if region.is_empty() || namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(region, namespace, name))
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
