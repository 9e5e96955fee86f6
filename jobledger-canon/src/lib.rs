//! # jobledger-canon
//!
//! Turns a fetched job into a byte-deterministic document.
//!
//! ```text
//! JobSpecification ──normalize──▶ NormalizedJob ──serialize──▶ bytes ──canonicalize──▶ CanonicalDocument
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jobledger_canon::render_document;
//! use jobledger_core::{IgnoreSet, JobSpecification};
//!
//! fn show(spec: &JobSpecification) {
//!     if let Ok(doc) = render_document(spec, &IgnoreSet::new()) {
//!         print!("{}", doc.to_text());
//!     }
//! }
//! ```

pub mod document;
pub mod error;
pub mod normalize;
pub mod text;

pub use document::{render_document, serialize, CanonicalDocument};
pub use error::CanonError;
pub use normalize::{normalize, ConfigValue, NormalizedGroup, NormalizedJob, NormalizedTask};
pub use text::canonicalize;
