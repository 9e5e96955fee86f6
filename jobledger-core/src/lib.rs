//! jobledger core library — job model, configuration, errors.
//!
//! - [`types`] — the orchestrator's job model, [`IgnoreSet`], [`JobKey`]
//! - [`config`] — YAML configuration load / validate
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackendConfig, GitBackendConfig, GitHubBackendConfig, LedgerConfig, NomadConfig};
pub use error::ConfigError;
pub use types::{
    IgnoreSet, JobKey, JobRef, JobSpecification, Resources, Task, TaskGroup, UpdateStrategy,
};
