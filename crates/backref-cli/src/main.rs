//! Backref CLI
//!
//! Command-line interface for backref - backlink indexing for plain-text notes.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use backref_core::corpus::canonicalize_path;
use backref_core::{Config, IndexError, Indexer, Query, RefKind, Store};

mod commands;
mod output;

use commands::query::CompletionKind;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "backref")]
#[command(about = "Backref - incremental backlink index for plain-text notes")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index in line with the corpus
    Sync,
    /// Clear the index and re-extract every document
    Rebuild,
    /// Re-index one document after it was written
    Save {
        /// Document path
        path: PathBuf,
    },
    /// Move a document and rewrite links pointing at it
    #[command(alias = "mv")]
    Rename {
        /// Current path
        old: PathBuf,
        /// New path
        new: PathBuf,
    },
    /// Delete a document and drop it from the index
    #[command(alias = "rm")]
    Delete {
        /// Document path
        path: PathBuf,
    },
    /// Show documents linking to a document
    Backlinks {
        /// Document path
        path: PathBuf,
    },
    /// Show a document's title and aliases
    Titles {
        /// Document path
        path: PathBuf,
    },
    /// List completion candidates for link insertion
    Completions {
        #[command(subcommand)]
        command: CompletionCommands,
    },
    /// Find the document bound to a ref key
    Ref {
        /// Ref key (citation key or URL)
        key: String,
    },
    /// Export the link graph (dot, or nodes and edges with --json)
    Graph,
    /// List links whose target is not indexed
    Dangling,
    /// Show index location and contents
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum CompletionCommands {
    /// Titles and aliases of every document
    Titles,
    /// Ref keys
    Refs {
        /// Only refs of this kind
        #[arg(short, long)]
        kind: Option<RefKindArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RefKindArg {
    Cite,
    Website,
    Other,
}

impl From<RefKindArg> for RefKind {
    fn from(kind: RefKindArg) -> Self {
        match kind {
            RefKindArg::Cite => RefKind::Cite,
            RefKindArg::Website => RefKind::Website,
            RefKindArg::Other => RefKind::Other,
        }
    }
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (corpus_root, db_path, extensions, exclude, ref_policy, log_file, log_level)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let result = run(cli);

    if let Err(ref e) = result {
        if let Some(hint) = e
            .downcast_ref::<IndexError>()
            .and_then(IndexError::recovery_suggestion)
        {
            eprintln!("hint: {}", hint);
        }
    }
    result
}

fn run(cli: Cli) -> Result<()> {
    let format = OutputFormat::from_flags(cli.json, cli.quiet);

    // Config commands don't need the index
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &Output::new(format));
    }

    let config =
        Config::load_with_cli_override(cli.config.as_ref()).context("Failed to load configuration")?;
    init_logging(&config, format == OutputFormat::Quiet);

    let output = Output::new(format).with_root(canonicalize_path(&config.corpus_root));

    match cli.command {
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Status => commands::status::show(&config, &output),
        Commands::Sync => commands::sync::sync(&mut open_indexer(&config)?, &output),
        Commands::Rebuild => commands::sync::rebuild(&mut open_indexer(&config)?, &output),
        Commands::Save { path } => {
            commands::events::save(&mut open_indexer(&config)?, path, &output)
        }
        Commands::Rename { old, new } => {
            commands::events::rename(&mut open_indexer(&config)?, old, new, &output)
        }
        Commands::Delete { path } => {
            commands::events::delete(&mut open_indexer(&config)?, path, &output)
        }
        command => handle_query_command(command, &config, &output),
    }
}

/// Commands that only read the index
fn handle_query_command(command: Commands, config: &Config, output: &Output) -> Result<()> {
    let store = Store::open_existing(&config.db_path())?;
    let query = Query::new(&store);

    match command {
        Commands::Backlinks { path } => commands::query::backlinks(&query, &path, output),
        Commands::Titles { path } => commands::query::titles(&query, &path, output),
        Commands::Completions { command } => match command {
            CompletionCommands::Titles => {
                commands::query::completions(&query, CompletionKind::Titles, None, output)
            }
            CompletionCommands::Refs { kind } => commands::query::completions(
                &query,
                CompletionKind::Refs,
                kind.map(RefKind::from),
                output,
            ),
        },
        Commands::Ref { key } => commands::query::find_ref(&query, &key, output),
        Commands::Graph => commands::graph::export(&query, output),
        Commands::Dangling => commands::graph::dangling(&query, output),
        _ => unreachable!(), // Write commands are dispatched in `run`
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

fn open_indexer(config: &Config) -> Result<Indexer> {
    Indexer::open(config).with_context(|| {
        format!(
            "Failed to open index for corpus {}",
            config.corpus_root.display()
        )
    })
}

/// Initialize logging to stderr, or to `log_file` when configured
fn init_logging(config: &Config, quiet: bool) {
    let level = if quiet { "error" } else { config.log_level.as_str() };
    let env_filter = EnvFilter::new(format!("backref_core={},backref_cli={}", level, level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore error if already initialized
    match &config.log_file {
        Some(path) => {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    return;
                }
            };
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }

    debug!("Logging initialized at level {}", level);
}
