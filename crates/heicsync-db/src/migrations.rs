//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order. A
//! `schema_migrations` table tracks which versions have been applied.

use heicsync_common::{Error, Result};
use rusqlite::Connection;

/// V1: the conversion ledger.
const V1_INITIAL: &str = r#"
CREATE TABLE conversion_jobs (
    id                 TEXT PRIMARY KEY,
    kind               TEXT NOT NULL,
    source_path        TEXT NOT NULL,
    target_path        TEXT,
    state              TEXT NOT NULL DEFAULT 'pending',
    error              TEXT,
    started_at         TEXT,
    ended_at           TEXT,
    duration_secs      REAL,
    metadata_preserved INTEGER,
    metadata_summary   TEXT,
    source_timestamp   TEXT,
    target_timestamp   TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE INDEX idx_conversion_jobs_state ON conversion_jobs(state);
CREATE INDEX idx_conversion_jobs_kind ON conversion_jobs(kind);
CREATE INDEX idx_conversion_jobs_created ON conversion_jobs(created_at);
CREATE INDEX idx_conversion_jobs_source ON conversion_jobs(source_path);
"#;

/// All migrations in order: `(version, sql)`.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}

/// Latest schema version known to this build.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|&(v, _)| v).unwrap_or(0)
}
