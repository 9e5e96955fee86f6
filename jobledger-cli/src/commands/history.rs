//! `jobledger history` — list commits that touched job documents.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use jobledger_sync::{History, HistoryFilter};

use super::{close_backend, load_config, open_backend};
use crate::GlobalArgs;

/// Arguments for `jobledger history`.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Only commits touching this job name.
    #[arg(long)]
    pub job: Option<String>,

    /// Only commits touching jobs in this namespace.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Maximum number of commits to list.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Tabled)]
struct CommitRow {
    #[tabled(rename = "commit")]
    commit: String,
    #[tabled(rename = "date")]
    date: String,
    #[tabled(rename = "author")]
    author: String,
    #[tabled(rename = "message")]
    message: String,
    #[tabled(rename = "jobs")]
    jobs: String,
}

impl HistoryArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;
        let backend = open_backend(&config)?;
        let filter = HistoryFilter {
            job: self.job,
            namespace: self.namespace,
            limit: self.limit,
        };
        let commits = backend.log(&filter).context("failed to read history")?;
        close_backend(backend);

        if commits.is_empty() {
            println!("No history.");
            return Ok(());
        }

        let rows: Vec<CommitRow> = commits
            .iter()
            .map(|c| CommitRow {
                commit: c.short_id().to_string(),
                date: c.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                author: c.author.clone(),
                message: c.message.clone(),
                jobs: c.files.join(", "),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
