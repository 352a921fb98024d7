//! SQLite schema for the link index
//!
//! Four tables (documents, titles, refs, links) plus a version marker in
//! `schema_info`. Titles, refs and links cascade away with their document.

use rusqlite::{Connection, Result};
use tracing::info;

use crate::error::{IndexError, IndexResult};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

const SCHEMA: &str = r#"
    -- Schema version tracking
    CREATE TABLE IF NOT EXISTS schema_info (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- One row per indexed document
    CREATE TABLE IF NOT EXISTS documents (
        identity TEXT PRIMARY KEY,
        digest TEXT NOT NULL,
        last_synced INTEGER NOT NULL
    );

    -- Title and aliases, position 0 is the primary title
    CREATE TABLE IF NOT EXISTS titles (
        identity TEXT NOT NULL,
        title TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (identity, position),
        FOREIGN KEY (identity) REFERENCES documents(identity) ON DELETE CASCADE
    );

    -- External keys, unique across the corpus
    CREATE TABLE IF NOT EXISTS refs (
        ref TEXT PRIMARY KEY,
        identity TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT 'other',
        FOREIGN KEY (identity) REFERENCES documents(identity) ON DELETE CASCADE
    );

    -- One row per link occurrence; target may not be indexed
    CREATE TABLE IF NOT EXISTS links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        target TEXT NOT NULL,
        properties TEXT NOT NULL,
        FOREIGN KEY (source) REFERENCES documents(identity) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_links_target ON links(target);
    CREATE INDEX IF NOT EXISTS idx_links_source ON links(source);
    CREATE INDEX IF NOT EXISTS idx_refs_identity ON refs(identity);
"#;

/// Migration from version 1: refs gained a kind column
const MIGRATE_V1_TO_V2: &str = r#"
    ALTER TABLE refs ADD COLUMN kind TEXT NOT NULL DEFAULT 'other';
    UPDATE refs SET kind = CASE
        WHEN ref LIKE 'cite:%' THEN 'cite'
        WHEN ref LIKE 'http://%' OR ref LIKE 'https://%' THEN 'website'
        ELSE 'other'
    END;
"#;

/// Migrations keyed by the version they upgrade from
const MIGRATIONS: &[(i32, &str)] = &[(1, MIGRATE_V1_TO_V2)];

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    set_schema_version(conn, SCHEMA_VERSION)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check whether the schema has been created at all
pub fn has_schema(conn: &Connection) -> bool {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false)
}

/// Bring an opened database to the current schema version
///
/// Creates the schema on a fresh database and runs pending migrations on
/// an older one. Never migrates downward.
pub fn prepare(conn: &mut Connection) -> IndexResult<()> {
    if !has_schema(conn) {
        init_schema(conn)?;
        info!("Created index schema version {}", SCHEMA_VERSION);
        return Ok(());
    }

    let found = get_schema_version(conn)?.unwrap_or(0);
    if found == SCHEMA_VERSION {
        return Ok(());
    }
    if found > SCHEMA_VERSION {
        return Err(IndexError::SchemaVersionMismatch {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    let mut version = found;
    while version < SCHEMA_VERSION {
        let Some((_, sql)) = MIGRATIONS.iter().find(|(from, _)| *from == version) else {
            return Err(IndexError::SchemaVersionMismatch {
                found,
                supported: SCHEMA_VERSION,
            });
        };
        tx.execute_batch(sql)?;
        version += 1;
    }
    set_schema_version(&tx, SCHEMA_VERSION)?;
    tx.commit()?;

    info!("Migrated index schema from version {} to {}", found, SCHEMA_VERSION);
    Ok(())
}
