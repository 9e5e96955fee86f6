//! `jobledger show <id>` — one commit and the documents it changed.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use jobledger_sync::backend::FileChangeKind;
use jobledger_sync::History;

use super::{close_backend, load_config, open_backend};
use crate::GlobalArgs;

/// Arguments for `jobledger show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Commit id (full or abbreviated).
    pub id: String,
}

impl ShowArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;
        let backend = open_backend(&config)?;
        let detail = backend
            .show(&self.id)
            .with_context(|| format!("cannot show commit '{}'", self.id))?;
        close_backend(backend);

        let info = &detail.info;
        println!("{}", format!("commit {}", info.id).yellow());
        println!("Author: {}", info.author);
        println!("Date:   {}", info.timestamp.to_rfc2822());
        println!();
        println!("    {}", info.message);
        println!();

        for change in &detail.changes {
            let marker = match change.kind {
                FileChangeKind::Added => "added".green(),
                FileChangeKind::Modified => "modified".yellow(),
                FileChangeKind::Deleted => "deleted".red(),
            };
            println!("{marker}: {}", change.path);
            if !change.patch.is_empty() {
                print!("{}", change.patch);
                if !change.patch.ends_with('\n') {
                    println!();
                }
            }
        }
        Ok(())
    }
}
