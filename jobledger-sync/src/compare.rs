//! Comparator — classifies a fresh canonical document against the stored one.
//!
//! Classification is byte equality after canonicalizing both sides. The
//! human-readable description is derived from a line diff and is best-effort
//! only; it never changes the classification.

use std::fmt;

use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};

use jobledger_canon::canonicalize;

use crate::backend::Backend;
use crate::error::BackendError;

/// Commit message used for a job's first stored version.
pub const INITIAL_VERSION_MESSAGE: &str = "Initial version";

/// How many changed attribute names a description lists before eliding.
const DESCRIBE_MAX_KEYS: usize = 3;

/// Outcome class of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Unchanged,
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::New => write!(f, "new"),
            ChangeKind::Unchanged => write!(f, "unchanged"),
            ChangeKind::Modified => write!(f, "modified"),
        }
    }
}

/// Result of comparing a fresh document with the stored one for the same job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub description: Option<String>,
}

impl ChangeRecord {
    /// `true` for `New` and `Modified`.
    pub fn needs_commit(&self) -> bool {
        matches!(self.kind, ChangeKind::New | ChangeKind::Modified)
    }
}

/// Classify `fresh` against `stored`.
///
/// `None` ⇒ `New`; otherwise both sides are canonicalized and compared
/// byte-for-byte.
pub fn compare(stored: Option<&[u8]>, fresh: &[u8]) -> ChangeRecord {
    let Some(stored) = stored else {
        return ChangeRecord {
            kind: ChangeKind::New,
            description: Some(INITIAL_VERSION_MESSAGE.to_string()),
        };
    };

    let stored = canonicalize(stored);
    let fresh = canonicalize(fresh);
    if stored == fresh {
        return ChangeRecord {
            kind: ChangeKind::Unchanged,
            description: None,
        };
    }
    ChangeRecord {
        kind: ChangeKind::Modified,
        description: Some(describe_change(&stored, &fresh)),
    }
}

/// Read the stored document at `path`, `None` when the backend has none.
///
/// Read errors propagate; they are never mistaken for "absent".
pub fn load_stored<B: Backend + ?Sized>(
    backend: &B,
    path: &str,
) -> Result<Option<Vec<u8>>, BackendError> {
    if !backend.file_exists(path)? {
        return Ok(None);
    }
    backend.read_file(path).map(Some)
}

/// Short summary of what changed: the touched attribute names and line counts.
pub fn describe_change(stored: &[u8], fresh: &[u8]) -> String {
    let old = String::from_utf8_lossy(stored);
    let new = String::from_utf8_lossy(fresh);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());

    let mut inserted = 0usize;
    let mut deleted = 0usize;
    let mut keys: Vec<String> = Vec::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => inserted += 1,
            ChangeTag::Delete => deleted += 1,
            ChangeTag::Equal => continue,
        }
        if let Some(key) = changed_key(change.value()) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    if keys.is_empty() {
        return format!("Update job definition (+{inserted} -{deleted})");
    }
    let mut listed = keys
        .iter()
        .take(DESCRIBE_MAX_KEYS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if keys.len() > DESCRIBE_MAX_KEYS {
        listed.push_str(&format!(" and {} more", keys.len() - DESCRIBE_MAX_KEYS));
    }
    format!("Update {listed} (+{inserted} -{deleted})")
}

/// Attribute or block name of a document line; `None` for closing braces.
fn changed_key(line: &str) -> Option<String> {
    let line = line.trim();
    if let Some((key, _)) = line.split_once(" = ") {
        return Some(key.trim_matches('"').to_string());
    }
    let head = line.strip_suffix('{')?.trim();
    if head.is_empty() {
        return None;
    }
    Some(head.to_string())
}

/// Unified diff between two documents, with `a/` and `b/` headers.
pub fn unified_diff(stored: &[u8], fresh: &[u8], path: &str) -> String {
    let old = String::from_utf8_lossy(stored);
    let new = String::from_utf8_lossy(fresh);
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(old.as_ref(), new.as_ref())
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

/// SHA-256 hex digest of a document.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}
