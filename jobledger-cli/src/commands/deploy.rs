//! `jobledger deploy <id> [job]` — submit stored documents to the orchestrator.

use anyhow::{Context, Result};
use clap::Args;

use jobledger_sync::{deploy, NomadClient};

use super::{close_backend, load_config, open_backend};
use crate::GlobalArgs;

/// Arguments for `jobledger deploy`.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Commit whose documents to deploy.
    pub id: String,

    /// Deploy only this job from the commit.
    pub job: Option<String>,
}

impl DeployArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;
        let backend = open_backend(&config)?;
        let client = NomadClient::new(&config.nomad);

        let result = deploy(&*backend, &client, &self.id, self.job.as_deref());
        close_backend(backend);
        let deployed = result.with_context(|| format!("deploy from '{}' failed", self.id))?;

        for d in &deployed {
            println!(
                "✓ Deployed {}/{} from {} (evaluation {})",
                d.key.namespace,
                d.key.name,
                d.commit_id.chars().take(7).collect::<String>(),
                d.eval_id
            );
        }
        Ok(())
    }
}
