//! Index query handlers

use std::path::Path;

use anyhow::Result;

use backref_core::corpus::canonicalize_path;
use backref_core::{Query, RefKind};

use crate::output::{Output, OutputFormat};

/// Completion candidate kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Titles,
    Refs,
}

/// Show every document linking to `path`
pub fn backlinks(query: &Query, path: &Path, output: &Output) -> Result<()> {
    let identity = canonicalize_path(path);
    let groups = query.backlinks(&identity)?;
    output.print_backlinks(&groups)
}

/// Show a document's title and aliases
pub fn titles(query: &Query, path: &Path, output: &Output) -> Result<()> {
    let identity = canonicalize_path(path);
    let titles = query.titles_for(&identity)?;

    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "identity": identity,
            "titles": titles,
        }))?,
        OutputFormat::Quiet => {
            for title in &titles {
                println!("{}", title);
            }
        }
        OutputFormat::Human => {
            if titles.is_empty() {
                println!("{} has no title (shown as '{}')", output.path(&identity), query.title_of(&identity)?);
                return Ok(());
            }
            println!("Title:   {}", titles[0]);
            for alias in &titles[1..] {
                println!("Alias:   {}", alias);
            }
        }
    }
    Ok(())
}

/// List completion candidates for link insertion
pub fn completions(
    query: &Query,
    kind: CompletionKind,
    ref_kind: Option<RefKind>,
    output: &Output,
) -> Result<()> {
    match kind {
        CompletionKind::Titles => output.print_title_completions(&query.title_completions()?),
        CompletionKind::Refs => {
            let refs: Vec<_> = query
                .ref_completions()?
                .into_iter()
                .filter(|r| ref_kind.map_or(true, |kind| r.kind == kind))
                .collect();
            output.print_refs(&refs)
        }
    }
}

/// Find the document bound to a ref key
pub fn find_ref(query: &Query, key: &str, output: &Output) -> Result<()> {
    let Some(identity) = query.find_ref(key)? else {
        anyhow::bail!("No document is bound to ref '{}'", key);
    };

    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "ref": key,
            "kind": RefKind::from_key(key),
            "identity": identity,
            "title": query.title_of(&identity)?,
        }))?,
        OutputFormat::Quiet => println!("{}", identity.display()),
        OutputFormat::Human => {
            println!("{} ({})", query.title_of(&identity)?, output.path(&identity));
        }
    }
    Ok(())
}
