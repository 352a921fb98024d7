//! Sync command handlers

use anyhow::{Context, Result};

use backref_core::{Indexer, SyncOutcome, SyncReport};

use crate::output::Output;

/// Bring the index in line with the corpus
pub fn sync(indexer: &mut Indexer, output: &Output) -> Result<()> {
    let report = indexer.full_sync().context("Sync failed")?;
    finish(&report, output)
}

/// Drop the index contents and re-extract every document
pub fn rebuild(indexer: &mut Indexer, output: &Output) -> Result<()> {
    let report = indexer.rebuild().context("Rebuild failed")?;
    finish(&report, output)
}

fn finish(report: &SyncReport, output: &Output) -> Result<()> {
    output.print_sync_report(report)?;
    match report.outcome() {
        SyncOutcome::Clean => Ok(()),
        SyncOutcome::WithErrors(count) => {
            anyhow::bail!("{} document(s) could not be synced", count)
        }
    }
}
