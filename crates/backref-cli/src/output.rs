//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use backref_core::{BacklinkGroup, Link, Ref, SyncReport, TitleCompletion};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
    /// Corpus root; human output shows paths relative to it
    root: Option<PathBuf>,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format, root: None }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Path as shown to a human reader
    pub fn path(&self, path: &Path) -> String {
        let shown = self
            .root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        shown.display().to_string()
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print the result of a sync or rebuild
    pub fn print_sync_report(&self, report: &SyncReport) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if report.cancelled {
                    println!("⚠ Sync cancelled; removals were skipped");
                }
                println!(
                    "✓ Scanned {} documents in {:.2?}",
                    report.documents_scanned, report.elapsed
                );
                println!("  Updated:   {}", report.stats.documents_updated);
                println!("  Unchanged: {}", report.documents_skipped);
                println!("  Removed:   {}", report.stats.documents_removed);
                println!("  Links:     {}", report.stats.links_inserted);
                println!("  Titles:    {}", report.stats.titles_updated);
                println!("  Refs:      {}", report.stats.refs_updated);
                if !report.errors.is_empty() {
                    println!();
                    println!("── Errors ({}) ──", report.errors.len());
                    for error in &report.errors {
                        println!("{}: {}", self.path(&error.identity), error.message);
                    }
                }
            }
            OutputFormat::Json => self.json(report)?,
            OutputFormat::Quiet => {
                for error in &report.errors {
                    println!("{}", error.identity.display());
                }
            }
        }
        Ok(())
    }

    /// Print backlinks grouped by source
    pub fn print_backlinks(&self, groups: &[BacklinkGroup]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if groups.is_empty() {
                    println!("No backlinks found.");
                    return Ok(());
                }
                for group in groups {
                    println!(
                        "── {} ({}) ──",
                        group.source_title,
                        self.path(&group.source)
                    );
                    for occurrence in &group.occurrences {
                        println!("  @{}: {}", occurrence.offset, truncate_line(&occurrence.preview, 70));
                    }
                }
                let total: usize = groups.iter().map(|g| g.occurrences.len()).sum();
                println!("\n{} backlink(s) from {} document(s)", total, groups.len());
            }
            OutputFormat::Json => self.json(groups)?,
            OutputFormat::Quiet => {
                for group in groups {
                    println!("{}", group.source.display());
                }
            }
        }
        Ok(())
    }

    /// Print title completion candidates
    pub fn print_title_completions(&self, completions: &[TitleCompletion]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if completions.is_empty() {
                    println!("No titles found.");
                    return Ok(());
                }
                for completion in completions {
                    println!(
                        "{} | {}",
                        truncate(&completion.title, 40),
                        self.path(&completion.identity)
                    );
                }
                println!("\n{} title(s)", completions.len());
            }
            OutputFormat::Json => self.json(completions)?,
            OutputFormat::Quiet => {
                for completion in completions {
                    println!("{}", completion.title);
                }
            }
        }
        Ok(())
    }

    /// Print ref bindings
    pub fn print_refs(&self, refs: &[Ref]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if refs.is_empty() {
                    println!("No refs found.");
                    return Ok(());
                }
                for r in refs {
                    println!(
                        "{:<7} | {} | {}",
                        r.kind,
                        truncate(&r.key, 45),
                        self.path(&r.identity)
                    );
                }
                println!("\n{} ref(s)", refs.len());
            }
            OutputFormat::Json => self.json(refs)?,
            OutputFormat::Quiet => {
                for r in refs {
                    println!("{}", r.key);
                }
            }
        }
        Ok(())
    }

    /// Print links whose target is not indexed
    pub fn print_dangling(&self, links: &[Link]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if links.is_empty() {
                    println!("No dangling links.");
                    return Ok(());
                }
                for link in links {
                    println!(
                        "{} -> {}",
                        self.path(&link.source),
                        self.path(&link.target)
                    );
                }
                println!("\n{} dangling link(s)", links.len());
            }
            OutputFormat::Json => self.json(links)?,
            OutputFormat::Quiet => {
                for link in links {
                    println!("{}", link.target.display());
                }
            }
        }
        Ok(())
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
