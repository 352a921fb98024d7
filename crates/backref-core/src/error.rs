//! Index error handling
//!
//! Typed errors for the store, the reconciler and the consistency
//! maintainer. Per-document errors are recoverable and get aggregated by
//! `full_sync`; fatal errors make the store unusable until fixed.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while maintaining the index
#[derive(Error, Debug)]
pub enum IndexError {
    /// A document could not be read or written
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A ref key is already bound to another document (reject policy)
    #[error("Ref '{key}' is already bound to '{existing}', refusing to rebind it to '{attempted}'")]
    ConstraintViolation {
        key: String,
        existing: String,
        attempted: String,
    },

    /// On-disk schema is newer than supported, or too old to migrate
    #[error("Index schema version {found} is not supported (this build supports version {supported})")]
    SchemaVersionMismatch { found: i32, supported: i32 },

    /// The store file has no schema yet
    #[error("Index at '{path}' is not initialized. Run `backref sync` first.")]
    NotInitialized { path: PathBuf },

    /// A document path the index cannot store as a key
    #[error("Path '{path}' is not valid UTF-8")]
    NonUtf8Path { path: PathBuf },

    /// Document text is not UTF-8, so its links cannot be rewritten
    #[error("Document '{path}' is not valid UTF-8; links were not rewritten")]
    NonUtf8Text { path: PathBuf },

    /// Attempt to attach data to a document that has no row
    #[error("Document '{identity}' is not indexed")]
    UnknownDocument { identity: String },

    /// Invalid exclude pattern in configuration
    #[error("Invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Link properties could not be (de)serialized
    #[error("Malformed link properties: {0}")]
    Properties(#[from] serde_json::Error),
}

impl IndexError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error leaves the store unusable
    ///
    /// Non-fatal errors are confined to a single document (including a
    /// failed store transaction for it) and a corpus scan continues past
    /// them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::SchemaVersionMismatch { .. }
                | IndexError::NotInitialized { .. }
                | IndexError::InvalidPattern { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            IndexError::SchemaVersionMismatch { .. } => {
                Some("The index was written by a newer or unknown version. Remove the index file and run `backref rebuild`.")
            }
            IndexError::NotInitialized { .. } => Some("Run `backref sync` to build the index."),
            IndexError::ConstraintViolation { .. } => {
                Some("Remove the duplicate ROAM_KEY or set `ref_policy = \"overwrite\"`.")
            }
            IndexError::Io { .. } => Some("Check that the file exists and is readable."),
            IndexError::NonUtf8Path { .. } => Some("Rename the file to a UTF-8 name."),
            IndexError::NonUtf8Text { .. } => {
                Some("Convert the document to UTF-8 and update its links by hand.")
            }
            _ => None,
        }
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;
