//! Serializer — renders a [`NormalizedJob`] as a nested-block document.
//!
//! # Grammar
//!
//! ```text
//! block := indent keyword [SP quoted-name] SP "{" NL *(attr | block) indent "}" NL
//! attr  := indent key SP "=" SP value NL
//! value := quoted-string | integer | float | bool | "[" value-list "]"
//! ```
//!
//! # Attribute order
//!
//! | level    | order                                                                   |
//! |----------|-------------------------------------------------------------------------|
//! | job      | namespace, datacenters, type, priority, region, meta, update, group*    |
//! | group    | count, meta, task*                                                      |
//! | task     | driver, config, env, resources, meta                                    |
//! | update   | max_parallel, health_check, min_healthy_time, healthy_deadline,         |
//! |          | progress_deadline, auto_revert, auto_promote, canary, stagger           |
//! | resources| cpu, memory, memory_max                                                 |
//!
//! Absent attributes and empty blocks are omitted.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use jobledger_core::types::{IgnoreSet, JobSpecification, Resources, UpdateStrategy};
use serde_json::Value;

use crate::error::CanonError;
use crate::normalize::{normalize, ConfigValue, NormalizedGroup, NormalizedJob, NormalizedTask};
use crate::text::canonicalize;

const INDENT: &str = "  ";

// ---------------------------------------------------------------------------
// CanonicalDocument
// ---------------------------------------------------------------------------

/// The serialized, text-canonicalized form of a job. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalDocument(Vec<u8>);

impl CanonicalDocument {
    /// Canonicalize arbitrary bytes into a document.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(canonicalize(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Lossy UTF-8 view, for display.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl AsRef<[u8]> for CanonicalDocument {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Normalize, serialize and canonicalize `spec` in one step.
pub fn render_document(
    spec: &JobSpecification,
    ignore: &IgnoreSet,
) -> Result<CanonicalDocument, CanonError> {
    let job = normalize(spec, ignore);
    let bytes = serialize(&job)?;
    Ok(CanonicalDocument::from_bytes(&bytes))
}

// ---------------------------------------------------------------------------
// serialize
// ---------------------------------------------------------------------------

/// Render `job`. Fails only when the job has no name.
pub fn serialize(job: &NormalizedJob) -> Result<Vec<u8>, CanonError> {
    let name = job
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CanonError::InvalidJob("job name is absent or empty".to_string()))?;

    let mut w = BlockWriter::default();
    w.open("job", Some(name));
    w.opt_str("namespace", job.namespace.as_deref());
    if !job.datacenters.is_empty() {
        w.attr("datacenters", &string_list(&job.datacenters));
    }
    w.opt_str("type", job.job_type.as_deref());
    w.opt_int("priority", job.priority);
    w.opt_str("region", job.region.as_deref());
    w.string_map("meta", &job.meta);
    if let Some(update) = &job.update {
        write_update(&mut w, update);
    }
    for group in &job.groups {
        write_group(&mut w, group);
    }
    w.close();

    Ok(w.finish().into_bytes())
}

fn write_update(w: &mut BlockWriter, update: &UpdateStrategy) {
    if update.is_empty() {
        return;
    }
    w.open("update", None);
    w.opt_int("max_parallel", update.max_parallel);
    w.opt_str("health_check", update.health_check.as_deref());
    w.opt_duration("min_healthy_time", update.min_healthy_time);
    w.opt_duration("healthy_deadline", update.healthy_deadline);
    w.opt_duration("progress_deadline", update.progress_deadline);
    w.opt_bool("auto_revert", update.auto_revert);
    w.opt_bool("auto_promote", update.auto_promote);
    w.opt_int("canary", update.canary);
    w.opt_duration("stagger", update.stagger);
    w.close();
}

fn write_group(w: &mut BlockWriter, group: &NormalizedGroup) {
    w.open("group", Some(group.name.as_deref().unwrap_or_default()));
    w.opt_int("count", group.count);
    w.string_map("meta", &group.meta);
    for task in &group.tasks {
        write_task(w, task);
    }
    w.close();
}

fn write_task(w: &mut BlockWriter, task: &NormalizedTask) {
    w.open("task", Some(task.name.as_deref().unwrap_or_default()));
    w.opt_str("driver", task.driver.as_deref());
    if !task.config.is_empty() {
        w.open("config", None);
        for (key, value) in &task.config {
            w.attr(key, &config_value(value));
        }
        w.close();
    }
    w.string_map("env", &task.env);
    if let Some(resources) = &task.resources {
        write_resources(w, resources);
    }
    w.string_map("meta", &task.meta);
    w.close();
}

fn write_resources(w: &mut BlockWriter, resources: &Resources) {
    if resources.is_empty() {
        return;
    }
    w.open("resources", None);
    w.opt_int("cpu", resources.cpu);
    w.opt_int("memory", resources.memory_mb);
    w.opt_int("memory_max", resources.memory_max_mb);
    w.close();
}

// ---------------------------------------------------------------------------
// BlockWriter
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BlockWriter {
    out: String,
    depth: usize,
}

impl BlockWriter {
    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
    }

    fn open(&mut self, keyword: &str, name: Option<&str>) {
        self.indent();
        self.out.push_str(keyword);
        if let Some(name) = name {
            self.out.push(' ');
            self.out.push_str(&quote(name));
        }
        self.out.push_str(" {\n");
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str("}\n");
    }

    fn attr(&mut self, key: &str, value: &str) {
        self.indent();
        self.out.push_str(&render_key(key));
        self.out.push_str(" = ");
        self.out.push_str(value);
        self.out.push('\n');
    }

    fn opt_str(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.attr(key, &quote(value));
        }
    }

    fn opt_int(&mut self, key: &str, value: Option<i64>) {
        if let Some(value) = value {
            self.attr(key, &value.to_string());
        }
    }

    fn opt_bool(&mut self, key: &str, value: Option<bool>) {
        if let Some(value) = value {
            self.attr(key, if value { "true" } else { "false" });
        }
    }

    fn opt_duration(&mut self, key: &str, nanos: Option<i64>) {
        if let Some(nanos) = nanos {
            self.attr(key, &quote(&format_duration(nanos)));
        }
    }

    fn string_map(&mut self, keyword: &str, map: &BTreeMap<String, String>) {
        if map.is_empty() {
            return;
        }
        self.open(keyword, None);
        for (key, value) in map {
            self.attr(key, &quote(value));
        }
        self.close();
    }

    fn finish(self) -> String {
        self.out
    }
}

// ---------------------------------------------------------------------------
// Value rendering
// ---------------------------------------------------------------------------

/// Escape and double-quote a string.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn render_key(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

fn string_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|item| quote(item)).collect();
    format!("[{}]", quoted.join(", "))
}

fn config_value(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Int(i) => i.to_string(),
        ConfigValue::Float(f) => format_float(*f),
        ConfigValue::Bool(b) => b.to_string(),
        ConfigValue::Str(s) => quote(s),
        ConfigValue::List(items) => {
            let rendered: Vec<String> = items.iter().map(config_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        ConfigValue::Opaque(Value::Number(n)) => n.to_string(),
        ConfigValue::Opaque(other) => quote(&serde_json::to_string(other).unwrap_or_default()),
    }
}

/// Shortest representation that parses back to the same `f64`, always with a
/// fraction or exponent so it never reads as an integer.
fn format_float(f: f64) -> String {
    if f.is_finite() {
        format!("{f:?}")
    } else {
        quote(&f.to_string())
    }
}

/// Go-style duration text for a nanosecond count: `0s`, `250ms`, `1.5s`,
/// `5m0s`, `1h0m0s`.
pub fn format_duration(nanos: i64) -> String {
    const SECOND: u64 = 1_000_000_000;
    const MINUTE: u64 = 60 * SECOND;
    const HOUR: u64 = 60 * MINUTE;

    if nanos == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    if nanos < 0 {
        out.push('-');
    }
    let mut rest = nanos.unsigned_abs();

    if rest < SECOND {
        let (scale, unit) = if rest < 1_000 {
            (1, "ns")
        } else if rest < 1_000_000 {
            (1_000, "us")
        } else {
            (1_000_000, "ms")
        };
        let _ = write!(out, "{}{unit}", decimal(rest, scale));
        return out;
    }

    let hours = rest / HOUR;
    rest %= HOUR;
    let minutes = rest / MINUTE;
    rest %= MINUTE;
    let seconds = decimal(rest, SECOND);
    if hours > 0 {
        let _ = write!(out, "{hours}h{minutes}m{seconds}s");
    } else if minutes > 0 {
        let _ = write!(out, "{minutes}m{seconds}s");
    } else {
        let _ = write!(out, "{seconds}s");
    }
    out
}

/// `value / scale` as a decimal without trailing zeros. `scale` is a power of ten.
fn decimal(value: u64, scale: u64) -> String {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
