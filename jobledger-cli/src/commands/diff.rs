//! `jobledger diff` — show unified diffs of what sync would commit.

use anyhow::{bail, Result};
use clap::Args;

use jobledger_sync::compare::unified_diff;
use jobledger_sync::{preview, NomadClient};

use super::{close_backend, load_config, open_backend, select_jobs};
use crate::GlobalArgs;

/// Arguments for `jobledger diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Only these jobs (`name` or `namespace/name`, comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "JOBS")]
    pub jobs: Vec<String>,
}

impl DiffArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;
        let jobs = select_jobs(&config, &self.jobs)?;
        let source = NomadClient::new(&config.nomad);
        let ignore = config.ignore_set();
        let backend = open_backend(&config)?;

        let mut changed = 0;
        let mut failed = 0;
        for job in &jobs {
            let rendered = preview(
                &source,
                &*backend,
                job,
                &ignore,
                config.nomad.region.as_deref(),
            );
            let found = match rendered {
                Ok(Some(found)) => found,
                Ok(None) => {
                    tracing::warn!(job = %job, "not found at source");
                    continue;
                }
                Err(e) => {
                    tracing::error!(job = %job, error = %e, "diff failed");
                    failed += 1;
                    continue;
                }
            };
            if !found.change.needs_commit() {
                continue;
            }

            changed += 1;
            let diff = unified_diff(
                found.stored.as_deref().unwrap_or_default(),
                found.document.as_bytes(),
                &found.key.document_path(),
            );
            print!("{diff}");
            if !diff.ends_with('\n') {
                println!();
            }
        }
        close_backend(backend);

        if changed == 0 && failed == 0 {
            println!("No differences.");
        }
        if failed > 0 {
            bail!("{failed} job(s) could not be diffed");
        }
        Ok(())
    }
}
