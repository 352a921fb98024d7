//! Transactional link index
//!
//! The `Store` owns the SQLite connection for one corpus and holds four
//! tables: documents, titles, refs and links. Every mutation runs in its
//! own transaction, so a crash mid-update leaves either the old rows or
//! the new ones, never a mix.
//!
//! ## Concurrency
//!
//! Mutating methods take `&mut self`, so a single `Store` admits one
//! writer at a time. Reads take `&self` and see committed state only. The
//! database runs in WAL mode, so other connections to the same file can
//! keep reading while a write is in progress.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = Store::open(&config.db_path())?;
//! store.upsert_document(&path, &digest, Utc::now())?;
//! store.replace_document_data(&path, &extraction)?;
//!
//! for backlink in store.backlinks_to(&target)? {
//!     println!("{}", backlink.source.display());
//! }
//! store.close()?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::extract::Extraction;
use crate::models::{Backlink, Document, IndexCounts, Link, LinkProperties, Ref, RefKind};
use crate::storage::schema;

/// How long a writer waits for a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Policy for a ref key that is already bound to another document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefPolicy {
    /// Last write wins: the key moves to the newly synced document
    #[default]
    Overwrite,
    /// Refuse the update with `ConstraintViolation`
    Reject,
}

/// What a document write put into the index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub titles: usize,
    pub links: usize,
    pub ref_bound: bool,
    /// Previous owner of the ref key, when the write took it over
    pub displaced_ref_owner: Option<PathBuf>,
}

/// SQLite-backed link index for one corpus
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
    ref_policy: RefPolicy,
}

impl Store {
    /// Open or create the index at `path`
    ///
    /// Creates the schema on first use and migrates older versions.
    pub fn open(path: &Path) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::io(e, parent))?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Open an index that must already exist
    ///
    /// Fails with `NotInitialized` instead of creating a schema.
    pub fn open_existing(path: &Path) -> IndexResult<Self> {
        let not_initialized = || IndexError::NotInitialized {
            path: path.to_path_buf(),
        };

        if !path.exists() {
            return Err(not_initialized());
        }

        let conn = Connection::open(path)?;
        if !schema::has_schema(&conn) {
            return Err(not_initialized());
        }
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory index (for testing)
    pub fn open_in_memory() -> IndexResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(mut conn: Connection, path: Option<PathBuf>) -> IndexResult<Self> {
        if path.is_some() {
            let mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            debug!("Index journal mode: {}", mode);
        }
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        schema::prepare(&mut conn)?;

        Ok(Self {
            conn,
            path,
            ref_policy: RefPolicy::default(),
        })
    }

    /// Choose how duplicate ref keys are handled
    pub fn with_ref_policy(mut self, policy: RefPolicy) -> Self {
        self.ref_policy = policy;
        self
    }

    /// Location of the index file (`None` when in memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn ref_policy(&self) -> RefPolicy {
        self.ref_policy
    }

    /// Release the connection, reporting any error from closing it
    ///
    /// Dropping the store also releases the connection, without the
    /// error report.
    pub fn close(self) -> IndexResult<()> {
        self.conn.close().map_err(|(_, e)| IndexError::Database(e))
    }

    // ==================== Mutations ====================

    /// Insert or replace the document row for `identity`
    pub fn upsert_document(
        &mut self,
        identity: &Path,
        digest: &str,
        synced_at: DateTime<Utc>,
    ) -> IndexResult<()> {
        let tx = self.conn.transaction()?;
        upsert_document_row(&tx, identity, digest, synced_at)?;
        tx.commit()?;
        Ok(())
    }

    /// Replace the titles, ref and outbound links of an indexed document
    ///
    /// Everything previously recorded for `identity` is removed first, so
    /// stale aliases and links never survive an edit.
    pub fn replace_document_data(
        &mut self,
        identity: &Path,
        data: &Extraction,
    ) -> IndexResult<WriteSummary> {
        let tx = self.conn.transaction()?;
        if !document_exists(&tx, identity)? {
            return Err(IndexError::UnknownDocument {
                identity: identity.display().to_string(),
            });
        }
        delete_document_data(&tx, identity)?;
        let summary = insert_document_data(&tx, identity, data, self.ref_policy)?;
        tx.commit()?;
        Ok(summary)
    }

    /// Upsert the document row and replace its data in one transaction
    pub fn write_document(
        &mut self,
        identity: &Path,
        digest: &str,
        synced_at: DateTime<Utc>,
        data: &Extraction,
    ) -> IndexResult<WriteSummary> {
        let tx = self.conn.transaction()?;
        upsert_document_row(&tx, identity, digest, synced_at)?;
        delete_document_data(&tx, identity)?;
        let summary = insert_document_data(&tx, identity, data, self.ref_policy)?;
        tx.commit()?;
        Ok(summary)
    }

    /// Retire `old` and write `new` in one transaction
    ///
    /// Used when a document moves, so no committed state lacks both rows.
    pub fn rename_document(
        &mut self,
        old: &Path,
        new: &Path,
        digest: &str,
        synced_at: DateTime<Utc>,
        data: &Extraction,
    ) -> IndexResult<WriteSummary> {
        let tx = self.conn.transaction()?;
        delete_document_rows(&tx, old)?;
        upsert_document_row(&tx, new, digest, synced_at)?;
        delete_document_data(&tx, new)?;
        let summary = insert_document_data(&tx, new, data, self.ref_policy)?;
        tx.commit()?;
        Ok(summary)
    }

    /// Remove a document and everything it owns
    ///
    /// Links from other documents that target it are kept. Returns whether
    /// a row existed; clearing an unknown identity is a no-op.
    pub fn clear_document(&mut self, identity: &Path) -> IndexResult<bool> {
        let tx = self.conn.transaction()?;
        let existed = delete_document_rows(&tx, identity)?;
        tx.commit()?;
        Ok(existed)
    }

    /// Remove every row (used before a forced rebuild)
    pub fn clear_all(&mut self) -> IndexResult<()> {
        let tx = self.conn.transaction()?;
        // Order matters due to foreign keys
        tx.execute("DELETE FROM links", [])?;
        tx.execute("DELETE FROM titles", [])?;
        tx.execute("DELETE FROM refs", [])?;
        tx.execute("DELETE FROM documents", [])?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Queries ====================

    /// Snapshot of identity -> digest for every indexed document
    pub fn list_documents(&self) -> IndexResult<HashMap<PathBuf, String>> {
        let mut stmt = self.conn.prepare("SELECT identity, digest FROM documents")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((PathBuf::from(row.get::<_, String>(0)?), row.get(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// The document row for `identity`, if indexed
    pub fn document(&self, identity: &Path) -> IndexResult<Option<Document>> {
        let row = self
            .conn
            .query_row(
                "SELECT identity, digest, last_synced FROM documents WHERE identity = ?",
                params![identity_key(identity)?],
                |row| {
                    Ok(DocumentRow {
                        identity: row.get(0)?,
                        digest: row.get(1)?,
                        last_synced: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row.map(DocumentRow::hydrate))
    }

    /// Stored fingerprint of `identity`
    pub fn digest_for(&self, identity: &Path) -> IndexResult<Option<String>> {
        let digest = self
            .conn
            .query_row(
                "SELECT digest FROM documents WHERE identity = ?",
                params![identity_key(identity)?],
                |row| row.get(0),
            )
            .optional()?;
        Ok(digest)
    }

    /// Titles of a document, primary title first
    pub fn titles_for(&self, identity: &Path) -> IndexResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT title FROM titles WHERE identity = ? ORDER BY position")?;
        let titles = stmt
            .query_map(params![identity_key(identity)?], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(titles)
    }

    /// Every link occurrence targeting `identity`
    ///
    /// Ordered by source, then by insertion order within a source.
    pub fn backlinks_to(&self, identity: &Path) -> IndexResult<Vec<Backlink>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, properties FROM links WHERE target = ? ORDER BY source, id")?;
        let rows = stmt
            .query_map(params![identity_key(identity)?], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(source, properties)| {
                Ok(Backlink {
                    source: PathBuf::from(source),
                    properties: serde_json::from_str(&properties)?,
                })
            })
            .collect()
    }

    /// Outbound links of `identity`, in source order
    pub fn links_from(&self, identity: &Path) -> IndexResult<Vec<Link>> {
        self.query_links(
            "SELECT source, target, properties FROM links WHERE source = ? ORDER BY id",
            Some(identity),
        )
    }

    /// Every indexed document with its titles (possibly empty)
    pub fn all_titles(&self) -> IndexResult<Vec<(PathBuf, Vec<String>)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT d.identity, t.title
            FROM documents d
            LEFT JOIN titles t ON t.identity = d.identity
            ORDER BY d.identity, t.position
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut grouped: Vec<(PathBuf, Vec<String>)> = Vec::new();
        for (identity, title) in rows {
            let identity = PathBuf::from(identity);
            match grouped.last_mut() {
                Some((last, titles)) if *last == identity => titles.extend(title),
                _ => grouped.push((identity, title.into_iter().collect())),
            }
        }
        Ok(grouped)
    }

    /// Every ref binding, ordered by key
    pub fn all_refs(&self) -> IndexResult<Vec<Ref>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ref, kind, identity FROM refs ORDER BY ref")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(key, kind, identity)| Ref {
                kind: kind.parse().unwrap_or_else(|_| RefKind::from_key(&key)),
                key,
                identity: PathBuf::from(identity),
            })
            .collect())
    }

    /// Distinct (source, target) pairs
    pub fn all_links(&self) -> IndexResult<Vec<(PathBuf, PathBuf)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT source, target FROM links ORDER BY source, target")?;
        let pairs = stmt
            .query_map([], |row| {
                Ok((
                    PathBuf::from(row.get::<_, String>(0)?),
                    PathBuf::from(row.get::<_, String>(1)?),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// Document bound to a ref key
    pub fn ref_lookup(&self, key: &str) -> IndexResult<Option<PathBuf>> {
        let identity: Option<String> = self
            .conn
            .query_row(
                "SELECT identity FROM refs WHERE ref = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(identity.map(PathBuf::from))
    }

    /// Links whose target has no document row
    pub fn dangling_links(&self) -> IndexResult<Vec<Link>> {
        self.query_links(
            r#"
            SELECT l.source, l.target, l.properties
            FROM links l
            LEFT JOIN documents d ON d.identity = l.target
            WHERE d.identity IS NULL
            ORDER BY l.target, l.source, l.id
            "#,
            None,
        )
    }

    /// Row counts per table
    pub fn counts(&self) -> IndexResult<IndexCounts> {
        let count = |table: &str| -> IndexResult<i64> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
        };
        Ok(IndexCounts {
            documents: count("documents")?,
            links: count("links")?,
            titles: count("titles")?,
            refs: count("refs")?,
        })
    }

    // ==================== Private helpers ====================

    fn query_links(&self, sql: &str, identity: Option<&Path>) -> IndexResult<Vec<Link>> {
        let mut stmt = self.conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(LinkRow {
                source: row.get(0)?,
                target: row.get(1)?,
                properties: row.get(2)?,
            })
        };
        let rows = match identity {
            Some(identity) => stmt
                .query_map(params![identity_key(identity)?], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter().map(LinkRow::hydrate).collect()
    }
}

// ==================== Internal structs ====================

struct DocumentRow {
    identity: String,
    digest: String,
    last_synced: i64,
}

impl DocumentRow {
    fn hydrate(self) -> Document {
        Document {
            identity: PathBuf::from(self.identity),
            digest: self.digest,
            last_synced: DateTime::from_timestamp_millis(self.last_synced)
                .unwrap_or_default(),
        }
    }
}

struct LinkRow {
    source: String,
    target: String,
    properties: String,
}

impl LinkRow {
    fn hydrate(self) -> IndexResult<Link> {
        Ok(Link {
            source: PathBuf::from(self.source),
            target: PathBuf::from(self.target),
            properties: serde_json::from_str(&self.properties)?,
        })
    }
}

/// Key used for an identity in every table
///
/// Identities must be valid UTF-8 so that a stored key maps back to
/// exactly one path.
fn identity_key(identity: &Path) -> IndexResult<&str> {
    identity.to_str().ok_or_else(|| IndexError::NonUtf8Path {
        path: identity.to_path_buf(),
    })
}

// ==================== Transaction helpers ====================

fn document_exists(tx: &Transaction, identity: &Path) -> IndexResult<bool> {
    let exists = tx
        .prepare("SELECT 1 FROM documents WHERE identity = ?")?
        .exists(params![identity_key(identity)?])?;
    Ok(exists)
}

fn upsert_document_row(
    tx: &Transaction,
    identity: &Path,
    digest: &str,
    synced_at: DateTime<Utc>,
) -> IndexResult<()> {
    tx.execute(
        r#"
        INSERT INTO documents (identity, digest, last_synced) VALUES (?1, ?2, ?3)
        ON CONFLICT(identity) DO UPDATE SET
            digest = excluded.digest,
            last_synced = excluded.last_synced
        "#,
        params![identity_key(identity)?, digest, synced_at.timestamp_millis()],
    )?;
    Ok(())
}

/// Delete titles, refs and outbound links owned by `identity`
fn delete_document_data(tx: &Transaction, identity: &Path) -> IndexResult<()> {
    let key = identity_key(identity)?;
    tx.execute("DELETE FROM links WHERE source = ?", params![key])?;
    tx.execute("DELETE FROM titles WHERE identity = ?", params![key])?;
    tx.execute("DELETE FROM refs WHERE identity = ?", params![key])?;
    Ok(())
}

/// Delete the document row and all data it owns
fn delete_document_rows(tx: &Transaction, identity: &Path) -> IndexResult<bool> {
    delete_document_data(tx, identity)?;
    let removed = tx.execute(
        "DELETE FROM documents WHERE identity = ?",
        params![identity_key(identity)?],
    )?;
    Ok(removed > 0)
}

fn insert_document_data(
    tx: &Transaction,
    identity: &Path,
    data: &Extraction,
    policy: RefPolicy,
) -> IndexResult<WriteSummary> {
    let key = identity_key(identity)?;
    let mut summary = WriteSummary::default();

    for (position, title) in data.titles.iter().enumerate() {
        tx.execute(
            "INSERT INTO titles (identity, title, position) VALUES (?, ?, ?)",
            params![key, title, position as i64],
        )?;
        summary.titles += 1;
    }

    if let Some(ref_key) = &data.ref_key {
        summary.displaced_ref_owner = bind_ref(tx, ref_key, key, policy)?;
        summary.ref_bound = true;
    }

    for link in &data.links {
        let properties = LinkProperties {
            preview: link.preview.clone(),
            offset: link.offset,
        };
        tx.execute(
            "INSERT INTO links (source, target, properties) VALUES (?, ?, ?)",
            params![
                key,
                identity_key(&link.target)?,
                serde_json::to_string(&properties)?
            ],
        )?;
        summary.links += 1;
    }

    Ok(summary)
}

/// Bind a ref key to `identity` under `policy`
///
/// Returns the previous owner when the key was taken over.
fn bind_ref(
    tx: &Transaction,
    ref_key: &str,
    identity: &str,
    policy: RefPolicy,
) -> IndexResult<Option<PathBuf>> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT identity FROM refs WHERE ref = ?",
            params![ref_key],
            |row| row.get(0),
        )
        .optional()?;

    let displaced = match existing {
        Some(owner) if owner != identity => match policy {
            RefPolicy::Reject => {
                return Err(IndexError::ConstraintViolation {
                    key: ref_key.to_string(),
                    existing: owner,
                    attempted: identity.to_string(),
                });
            }
            RefPolicy::Overwrite => {
                warn!(
                    "Ref '{}' moved from {} to {} (last write wins)",
                    ref_key, owner, identity
                );
                Some(PathBuf::from(owner))
            }
        },
        _ => None,
    };

    tx.execute(
        r#"
        INSERT INTO refs (ref, identity, kind) VALUES (?1, ?2, ?3)
        ON CONFLICT(ref) DO UPDATE SET identity = excluded.identity, kind = excluded.kind
        "#,
        params![ref_key, identity, RefKind::from_key(ref_key).as_str()],
    )?;
    debug!("Bound ref '{}' to {}", ref_key, identity);

    Ok(displaced)
}
