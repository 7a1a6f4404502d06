//! Database connection pool management.
//!
//! Connection pooling for SQLite using r2d2. Migrations run once when a pool
//! is created.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use heicsync_common::{Error, Result};

use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Initialize a database pool backed by a file on disk.
///
/// Creates the parent directory and the SQLite file if needed, enables WAL
/// journal mode and a busy timeout on every connection, and runs pending
/// migrations.
///
/// # Example
///
/// ```no_run
/// use heicsync_db::pool::init_pool;
///
/// let pool = init_pool("/data/tasks.db").unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {e}")))?;

    let conn = get_conn(&pool)?;
    migrations::run_migrations(&conn)?;

    Ok(pool)
}

/// Initialize an in-memory database pool for testing.
///
/// Each call creates a uniquely-named in-memory database, so separate pools
/// stay isolated. The pool holds exactly one connection that is never
/// recycled: shared-cache databases lock whole tables and report
/// `SQLITE_LOCKED`, which `busy_timeout` does not retry, so concurrent callers
/// wait for the connection instead. The database is lost when the pool is
/// dropped.
///
/// ```
/// use heicsync_db::pool::init_memory_pool;
///
/// let pool = init_memory_pool().unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_memory_pool() -> Result<DbPool> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let uri = format!("file:heicsync_mem_{n}?mode=memory&cache=shared");

    let manager = SqliteConnectionManager::file(uri)
        .with_init(|conn| conn.execute_batch("PRAGMA busy_timeout = 5000;"));

    let pool = Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create in-memory pool: {e}")))?;

    let conn = get_conn(&pool)?;
    migrations::run_migrations(&conn)?;

    Ok(pool)
}

/// Get a connection from the pool.
///
/// Converts the r2d2 error into the common Error type.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("Failed to get connection from pool: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory_pool() {
        let pool = init_memory_pool().unwrap();
        assert_eq!(pool.max_size(), 1);
    }

    #[test]
    fn test_migrations_run_on_init() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='conversion_jobs'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_concurrent_writers_on_memory_pool() {
        let pool = init_memory_pool().unwrap();

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let conn = get_conn(&pool).unwrap();
                        conn.execute(
                            "INSERT INTO conversion_jobs (id, kind, source_path, state, created_at, updated_at)
                             VALUES (?1, 'once', '/a/b/c.jpg', 'pending', 'now', 'now')",
                            [format!("j{t}-{i}")],
                        )
                        .unwrap();
                        conn.execute(
                            "UPDATE conversion_jobs SET state = 'running' WHERE id = ?1",
                            [format!("j{t}-{i}")],
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let count: i64 = get_conn(&pool)
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM conversion_jobs WHERE state = 'running'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 400);
    }

    #[test]
    fn test_pools_are_isolated() {
        let a = init_memory_pool().unwrap();
        let b = init_memory_pool().unwrap();
        get_conn(&a)
            .unwrap()
            .execute(
                "INSERT INTO conversion_jobs (id, kind, source_path, state, created_at, updated_at)
                 VALUES ('j1', 'once', '/a/b/c.jpg', 'pending', 'now', 'now')",
                [],
            )
            .unwrap();

        let count: i64 = get_conn(&b)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM conversion_jobs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_pool_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.db");
        let pool = init_pool(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
        drop(pool);
    }
}
