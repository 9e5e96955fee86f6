//! Normalizer — strips volatile fields and rebuilds every unordered collection
//! in sorted order.
//!
//! The output never aliases the input: every string, map and list is freshly
//! constructed. Two fetches of the same job that differ only in bookkeeping
//! fields or in collection order normalize to equal values.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use jobledger_core::types::{
    fold_field_name, IgnoreSet, JobSpecification, Resources, Task, TaskGroup, UpdateStrategy,
    VOLATILE_FIELDS,
};

// ---------------------------------------------------------------------------
// Normalized model
// ---------------------------------------------------------------------------

/// A job with volatile fields removed and collections in canonical order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedJob {
    pub id: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub region: Option<String>,
    pub job_type: Option<String>,
    pub priority: Option<i64>,
    /// Sorted; empty entries dropped.
    pub datacenters: Vec<String>,
    pub meta: BTreeMap<String, String>,
    pub update: Option<UpdateStrategy>,
    /// Sorted by name, first-seen order among equal names.
    pub groups: Vec<NormalizedGroup>,
    /// Unmodelled top-level attributes that survived the ignore set.
    /// Carried for equality only; never rendered.
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedGroup {
    pub name: Option<String>,
    pub count: Option<i64>,
    pub meta: BTreeMap<String, String>,
    /// Sorted by name, first-seen order among equal names.
    pub tasks: Vec<NormalizedTask>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedTask {
    pub name: Option<String>,
    pub driver: Option<String>,
    pub config: BTreeMap<String, ConfigValue>,
    pub env: BTreeMap<String, String>,
    pub resources: Option<Resources>,
    pub meta: BTreeMap<String, String>,
}

/// A driver configuration value with a closed set of renderable shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<ConfigValue>),
    /// Anything else (objects, nulls inside lists, out-of-range integers),
    /// with objects rebuilt in sorted key order.
    Opaque(Value),
}

// ---------------------------------------------------------------------------
// normalize
// ---------------------------------------------------------------------------

/// Normalize a fetched job.
///
/// Always strips [`VOLATILE_FIELDS`]; additionally strips any top-level field
/// named in `ignore`. Names in `ignore` that match nothing are ignored.
pub fn normalize(spec: &JobSpecification, ignore: &IgnoreSet) -> NormalizedJob {
    let keep = |field: &str| !ignore.contains(field);

    NormalizedJob {
        id: keep_str(keep("ID"), &spec.id),
        name: keep_str(keep("Name"), &spec.name),
        namespace: keep_str(keep("Namespace"), &spec.namespace),
        region: keep_str(keep("Region"), &spec.region),
        job_type: keep_str(keep("Type"), &spec.job_type),
        priority: spec.priority.filter(|_| keep("Priority")),
        datacenters: if keep("Datacenters") {
            normalize_datacenters(&spec.datacenters)
        } else {
            Vec::new()
        },
        meta: if keep("Meta") {
            normalize_string_map(&spec.meta)
        } else {
            BTreeMap::new()
        },
        update: if keep("Update") {
            spec.update.as_ref().and_then(normalize_update)
        } else {
            None
        },
        groups: if keep("TaskGroups") {
            normalize_groups(&spec.task_groups)
        } else {
            Vec::new()
        },
        extra: spec
            .extra
            .iter()
            .filter(|(key, _)| !is_volatile(key) && keep(key))
            .filter(|(_, value)| !is_empty_value(value))
            .map(|(key, value)| (key.clone(), sorted_json(value)))
            .collect(),
    }
}

fn is_volatile(field: &str) -> bool {
    let folded = fold_field_name(field);
    VOLATILE_FIELDS
        .iter()
        .any(|volatile| fold_field_name(volatile) == folded)
}

fn keep_str(keep: bool, value: &Option<String>) -> Option<String> {
    if keep {
        non_empty(value)
    } else {
        None
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_owned)
}

fn normalize_datacenters(datacenters: &[String]) -> Vec<String> {
    let mut out: Vec<String> = datacenters
        .iter()
        .filter(|dc| !dc.is_empty())
        .cloned()
        .collect();
    out.sort();
    out
}

/// Keys sorted; an empty value is the same as an absent key.
fn normalize_string_map(map: &IndexMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn normalize_update(update: &UpdateStrategy) -> Option<UpdateStrategy> {
    let out = UpdateStrategy {
        health_check: non_empty(&update.health_check),
        ..update.clone()
    };
    (!out.is_empty()).then_some(out)
}

fn normalize_groups(groups: &[TaskGroup]) -> Vec<NormalizedGroup> {
    let mut out: Vec<NormalizedGroup> = groups.iter().map(normalize_group).collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn normalize_group(group: &TaskGroup) -> NormalizedGroup {
    let mut tasks: Vec<NormalizedTask> = group.tasks.iter().map(normalize_task).collect();
    tasks.sort_by(|a, b| a.name.cmp(&b.name));
    NormalizedGroup {
        name: non_empty(&group.name),
        count: group.count,
        meta: normalize_string_map(&group.meta),
        tasks,
    }
}

fn normalize_task(task: &Task) -> NormalizedTask {
    NormalizedTask {
        name: non_empty(&task.name),
        driver: non_empty(&task.driver),
        config: task
            .config
            .iter()
            .filter(|(_, value)| !is_empty_value(value))
            .map(|(key, value)| (key.clone(), ConfigValue::from_json(value)))
            .collect(),
        env: normalize_string_map(&task.env),
        resources: task.resources.as_ref().filter(|r| !r.is_empty()).cloned(),
        meta: normalize_string_map(&task.meta),
    }
}

/// `null`, `""`, `[]` and `{}` count as absent.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Deep copy of `value` with every object rebuilt in sorted key order.
fn sorted_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sorted_json(value)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_json).collect()),
        other => other.clone(),
    }
}

impl ConfigValue {
    /// Classify a JSON value. Never fails: unrecognized shapes become
    /// [`ConfigValue::Opaque`].
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(b) => ConfigValue::Bool(*b),
            Value::String(s) => ConfigValue::Str(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ConfigValue::Int(i)
                } else if n.is_f64() {
                    n.as_f64()
                        .map(ConfigValue::Float)
                        .unwrap_or_else(|| ConfigValue::Opaque(value.clone()))
                } else {
                    ConfigValue::Opaque(value.clone())
                }
            }
            Value::Array(items) => ConfigValue::List(items.iter().map(Self::from_json).collect()),
            Value::Null | Value::Object(_) => ConfigValue::Opaque(sorted_json(value)),
        }
    }

    /// Back to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            ConfigValue::Int(i) => Value::from(*i),
            ConfigValue::Float(f) => Value::from(*f),
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Str(s) => Value::String(s.clone()),
            ConfigValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ConfigValue::Opaque(value) => value.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Back to the wire shape
// ---------------------------------------------------------------------------

impl NormalizedJob {
    /// Rebuild an orchestrator-shaped job from this value.
    ///
    /// Normalizing the result yields `self` again.
    pub fn to_spec(&self) -> JobSpecification {
        JobSpecification {
            id: self.id.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            region: self.region.clone(),
            job_type: self.job_type.clone(),
            priority: self.priority,
            datacenters: self.datacenters.clone(),
            meta: to_index_map(&self.meta),
            update: self.update.clone(),
            task_groups: self
                .groups
                .iter()
                .map(|group| TaskGroup {
                    name: group.name.clone(),
                    count: group.count,
                    meta: to_index_map(&group.meta),
                    tasks: group.tasks.iter().map(NormalizedTask::to_task).collect(),
                })
                .collect(),
            extra: self
                .extra
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            ..Default::default()
        }
    }
}

impl NormalizedTask {
    fn to_task(&self) -> Task {
        Task {
            name: self.name.clone(),
            driver: self.driver.clone(),
            config: self
                .config
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
            env: to_index_map(&self.env),
            resources: self.resources.clone(),
            meta: to_index_map(&self.meta),
        }
    }
}

fn to_index_map(map: &BTreeMap<String, String>) -> IndexMap<String, String> {
    map.iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_from(value: Value) -> JobSpecification {
        serde_json::from_value(value).expect("decode job")
    }

    #[test]
    fn volatile_fields_are_always_stripped() {
        let a = spec_from(json!({
            "Name": "web", "ModifyIndex": 5, "SubmitTime": 1700000000,
            "Status": "running", "CreateIndex": 1, "JobModifyIndex": 5,
        }));
        let b = spec_from(json!({
            "Name": "web", "ModifyIndex": 99, "SubmitTime": 1800000000,
            "Status": "pending", "StatusDescription": "waiting",
        }));
        assert_eq!(
            normalize(&a, &IgnoreSet::new()),
            normalize(&b, &IgnoreSet::new())
        );
    }

    #[test]
    fn ignore_set_strips_typed_and_extra_fields() {
        let spec = spec_from(json!({
            "Name": "web", "Priority": 50, "Version": 7, "Meta": {"a": "1"},
        }));
        let ignore: IgnoreSet = ["version", "priority", "NoSuchField"].into_iter().collect();
        let job = normalize(&spec, &ignore);
        assert_eq!(job.priority, None);
        assert!(job.extra.is_empty());
        assert_eq!(job.meta.get("a").map(String::as_str), Some("1"));
    }

    #[test]
    fn empty_string_values_are_treated_as_absent() {
        let spec = spec_from(json!({
            "Name": "web",
            "Meta": {"owner": "", "team": "ops"},
            "TaskGroups": [{"Name": "g", "Tasks": [{
                "Name": "t", "Env": {"EMPTY": ""},
                "Config": {"image": "nginx", "args": [], "entrypoint": "", "extra": null},
            }]}],
        }));
        let job = normalize(&spec, &IgnoreSet::new());
        assert_eq!(job.meta.len(), 1);
        let task = &job.groups[0].tasks[0];
        assert!(task.env.is_empty());
        assert_eq!(task.config.keys().collect::<Vec<_>>(), vec!["image"]);
    }

    #[test]
    fn groups_and_tasks_sort_by_name_stably() {
        let spec = spec_from(json!({
            "Name": "web",
            "TaskGroups": [
                {"Name": "b", "Count": 1},
                {"Name": "a", "Tasks": [{"Name": "z"}, {"Name": "m", "Driver": "first"}, {"Name": "m", "Driver": "second"}]},
                {"Name": "b", "Count": 2},
            ],
        }));
        let job = normalize(&spec, &IgnoreSet::new());
        let names: Vec<_> = job.groups.iter().map(|g| g.name.clone().unwrap_or_default()).collect();
        assert_eq!(names, vec!["a", "b", "b"]);
        assert_eq!(job.groups[1].count, Some(1));
        assert_eq!(job.groups[2].count, Some(2));
        let drivers: Vec<_> = job.groups[0]
            .tasks
            .iter()
            .map(|t| t.driver.clone().unwrap_or_default())
            .collect();
        assert_eq!(drivers, vec!["first", "second", ""]);
    }

    #[test]
    fn config_values_are_classified() {
        let spec = spec_from(json!({
            "Name": "web",
            "TaskGroups": [{"Name": "g", "Tasks": [{"Name": "t", "Config": {
                "port": 8080, "ratio": 0.5, "privileged": true,
                "args": ["-v", 2], "logging": {"type": "json", "config": {"b": 1, "a": 2}},
            }}]}],
        }));
        let job = normalize(&spec, &IgnoreSet::new());
        let config = &job.groups[0].tasks[0].config;
        assert_eq!(config["port"], ConfigValue::Int(8080));
        assert_eq!(config["ratio"], ConfigValue::Float(0.5));
        assert_eq!(config["privileged"], ConfigValue::Bool(true));
        assert_eq!(
            config["args"],
            ConfigValue::List(vec![ConfigValue::Str("-v".into()), ConfigValue::Int(2)])
        );
        let ConfigValue::Opaque(logging) = &config["logging"] else {
            panic!("objects are opaque");
        };
        assert_eq!(
            serde_json::to_string(logging).unwrap(),
            r#"{"config":{"a":2,"b":1},"type":"json"}"#
        );
    }

    #[test]
    fn input_is_not_mutated() {
        let spec = spec_from(json!({
            "Name": "web", "ModifyIndex": 3, "Datacenters": ["dc2", "dc1"],
        }));
        let before = spec.clone();
        let _ = normalize(&spec, &IgnoreSet::new());
        assert_eq!(spec, before);
    }

    #[test]
    fn to_spec_renormalizes_to_itself() {
        let spec = spec_from(json!({
            "Name": "web", "Datacenters": ["dc2", "", "dc1"], "Stop": false,
            "Update": {"MaxParallel": 1, "HealthCheck": ""},
            "TaskGroups": [{"Name": "g", "Tasks": [{"Name": "t",
                "Resources": {"CPU": 100}, "Config": {"x": [null, {"b": 1}]}}]}],
        }));
        let once = normalize(&spec, &IgnoreSet::new());
        let twice = normalize(&once.to_spec(), &IgnoreSet::new());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_update_and_resources_collapse_to_none() {
        let spec = spec_from(json!({
            "Name": "web", "Update": {"HealthCheck": ""},
            "TaskGroups": [{"Name": "g", "Tasks": [{"Name": "t", "Resources": {}}]}],
        }));
        let job = normalize(&spec, &IgnoreSet::new());
        assert!(job.update.is_none());
        assert!(job.groups[0].tasks[0].resources.is_none());
    }
}
