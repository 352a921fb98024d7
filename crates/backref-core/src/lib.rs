//! Backref Core Library
//!
//! This crate keeps a persistent link-graph index over a corpus of
//! plain-text notes: which documents link to which, what each document is
//! titled, and which external keys (citations, URLs) they are bound to.
//!
//! # Architecture
//!
//! - **Files**: Source of truth; the index is always derivable from them
//! - **SQLite**: Derived index, one file per corpus root
//!
//! Documents are fingerprinted on every scan and only re-extracted when
//! their content changed.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let mut indexer = Indexer::open(&config)?;
//! indexer.full_sync()?;
//!
//! // React to host file events
//! indexer.on_rename(&old_path, &new_path)?;
//!
//! // Query backlinks
//! for group in indexer.query().backlinks(&new_path)? {
//!     println!("{}", group.source_title);
//! }
//! ```
//!
//! # Modules
//!
//! - `indexer`: Full and single-document reconciliation (main entry point)
//! - `maintain`: Save, delete and rename event handling
//! - `query`: Completions, backlinks and graph export
//! - `store`: Transactional SQLite index
//! - `extract`: Org-style title, ref and link extraction
//! - `corpus`: Corpus membership and file access
//! - `config`: Application configuration

pub mod config;
pub mod corpus;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod indexer;
pub mod maintain;
pub mod models;
pub mod query;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use corpus::Corpus;
pub use error::{IndexError, IndexResult};
pub use extract::{Extraction, Extractor, OrgExtractor};
pub use fingerprint::fingerprint;
pub use indexer::{DocumentError, DocumentSync, Indexer, SyncOutcome, SyncReport, SyncStats};
pub use maintain::{EventOutcome, RenameReport};
pub use models::{Backlink, Document, IndexCounts, Link, LinkProperties, Ref, RefKind};
pub use query::{BacklinkGroup, Graph, GraphEdge, GraphNode, Query, TitleCompletion};
pub use storage::SCHEMA_VERSION;
pub use store::{RefPolicy, Store, WriteSummary};
