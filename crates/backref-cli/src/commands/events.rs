//! Document event handlers
//!
//! These perform the file operation themselves and then notify the index,
//! the same way an editor integration would.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use backref_core::{DocumentSync, EventOutcome, Indexer};

use crate::output::{Output, OutputFormat};

/// Re-index a saved document
pub fn save(indexer: &mut Indexer, path: PathBuf, output: &Output) -> Result<()> {
    let outcome = indexer
        .on_save(&path)
        .with_context(|| format!("Failed to index {}", path.display()))?;
    report(&outcome, &path, output)
}

/// Move a document and rewrite every link pointing at it
pub fn rename(indexer: &mut Indexer, old: PathBuf, new: PathBuf, output: &Output) -> Result<()> {
    if !old.is_file() {
        bail!("No such file: {}", old.display());
    }
    if new.exists() {
        bail!("Refusing to overwrite existing file: {}", new.display());
    }
    if let Some(parent) = new.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::rename(&old, &new)
        .with_context(|| format!("Failed to move {} to {}", old.display(), new.display()))?;

    let outcome = indexer
        .on_rename(&old, &new)
        .with_context(|| format!("Moved file, but failed to update index for {}", new.display()))?;
    report(&outcome, &new, output)
}

/// Remove a document from disk and from the index
pub fn delete(indexer: &mut Indexer, path: PathBuf, output: &Output) -> Result<()> {
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    let outcome = indexer
        .on_delete(&path)
        .with_context(|| format!("Failed to update index for {}", path.display()))?;
    report(&outcome, &path, output)
}

fn report(outcome: &EventOutcome, path: &Path, output: &Output) -> Result<()> {
    let shown = output.path(path);
    match outcome {
        EventOutcome::Ignored => {
            output.message(&format!("{} is not part of the corpus; index unchanged", shown));
        }
        EventOutcome::Synced(DocumentSync::Unchanged) => {
            output.success(&format!("{} is up to date", shown));
        }
        EventOutcome::Synced(DocumentSync::Indexed(summary)) => {
            output.success(&format!(
                "Indexed {} ({} titles, {} links)",
                shown, summary.titles, summary.links
            ));
            if let Some(previous) = &summary.displaced_ref_owner {
                output.message(&format!(
                    "  Ref moved here from {}",
                    output.path(previous)
                ));
            }
        }
        EventOutcome::Removed { existed: true } => {
            output.success(&format!("Removed {} from index", shown));
        }
        EventOutcome::Removed { existed: false } => {
            output.message(&format!("{} was not indexed", shown));
        }
        EventOutcome::Renamed(rename) if output.format == OutputFormat::Json => {
            output.json(rename)?;
        }
        EventOutcome::Renamed(rename) => {
            output.success(&format!(
                "Moved to {}; rewrote {} link(s) in {} document(s)",
                shown,
                rename.links_rewritten,
                rename.rewritten_sources.len()
            ));
            for source in &rename.rewritten_sources {
                output.message(&format!("  {}", output.path(source)));
            }
            for error in &rename.errors {
                eprintln!("⚠ {}: {}", output.path(&error.identity), error.message);
            }
        }
    }

    if let EventOutcome::Renamed(rename) = outcome {
        if !rename.errors.is_empty() {
            bail!(
                "{} document(s) still link to the old path",
                rename.errors.len()
            );
        }
    }
    Ok(())
}
