//! Data models for backref
//!
//! Structured records for the rows the index keeps: documents, their
//! titles and refs, and the links between them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An indexed corpus member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Canonical absolute path
    pub identity: PathBuf,
    /// Content fingerprint at the last sync
    pub digest: String,
    /// When the document was last synchronized
    pub last_synced: DateTime<Utc>,
}

/// Where a link occurs in its source and what surrounds it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkProperties {
    /// Paragraph containing the link
    pub preview: String,
    /// Byte offset of the link in the source text
    pub offset: usize,
}

/// A directed edge from one document to another
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    pub source: PathBuf,
    pub target: PathBuf,
    pub properties: LinkProperties,
}

/// A link seen from its target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backlink {
    pub source: PathBuf,
    pub properties: LinkProperties,
}

/// What kind of external key a ref is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    /// Citation key (`cite:...`)
    Cite,
    /// Web address
    Website,
    Other,
}

impl RefKind {
    /// Classify a ref key
    pub fn from_key(key: &str) -> Self {
        if key.starts_with("cite:") {
            RefKind::Cite
        } else if key.starts_with("http://") || key.starts_with("https://") {
            RefKind::Website
        } else {
            RefKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Cite => "cite",
            RefKind::Website => "website",
            RefKind::Other => "other",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RefKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cite" => Ok(RefKind::Cite),
            "website" => Ok(RefKind::Website),
            "other" => Ok(RefKind::Other),
            other => Err(format!("unknown ref kind '{}'", other)),
        }
    }
}

/// An external key bound to one document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ref {
    pub key: String,
    pub kind: RefKind,
    pub identity: PathBuf,
}

impl Ref {
    pub fn new(key: impl Into<String>, identity: impl Into<PathBuf>) -> Self {
        let key = key.into();
        Self {
            kind: RefKind::from_key(&key),
            key,
            identity: identity.into(),
        }
    }
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct IndexCounts {
    pub documents: i64,
    pub links: i64,
    pub titles: i64,
    pub refs: i64,
}
