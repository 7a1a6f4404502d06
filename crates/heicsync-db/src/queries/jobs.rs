//! Conversion job ledger operations.
//!
//! State changes are guarded in SQL (`WHERE state = ...`) so a job can only
//! move forward: `pending -> running -> succeeded | failed`. Finishing also
//! accepts a pending job, whose `started_at` is then filled in from the
//! outcome. Each update returns whether a row actually changed.

use chrono::{DateTime, Utc};
use heicsync_common::{Error, JobId, JobKind, JobState, Result};
use rusqlite::{params, Connection};

use crate::models::{ConversionJob, JobCompletion, JobFilter, JobStats};

/// Create a new pending job for `source_path`.
pub fn create_job(conn: &Connection, kind: JobKind, source_path: &str) -> Result<ConversionJob> {
    let id = JobId::new();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO conversion_jobs (id, kind, source_path, state, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
        params![id.to_string(), kind.as_str(), source_path, now.to_rfc3339()],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(ConversionJob {
        id,
        kind,
        source_path: source_path.to_string(),
        target_path: None,
        state: JobState::Pending,
        error: None,
        started_at: None,
        ended_at: None,
        duration_secs: None,
        metadata_preserved: None,
        metadata_summary: None,
        source_timestamp: None,
        target_timestamp: None,
        created_at: now,
        updated_at: now,
    })
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<ConversionJob>> {
    let q = format!(
        "SELECT {} FROM conversion_jobs WHERE id = ?1",
        ConversionJob::COLUMNS
    );
    match conn.query_row(&q, [id.to_string()], ConversionJob::from_row) {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List jobs newest first, with optional kind/state filters and pagination.
pub fn list_jobs(conn: &Connection, filter: &JobFilter) -> Result<Vec<ConversionJob>> {
    let mut clauses = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(kind) = filter.kind {
        values.push(Box::new(kind.as_str()));
        clauses.push(format!("kind = ?{}", values.len()));
    }
    if let Some(state) = filter.state {
        values.push(Box::new(state.as_str()));
        clauses.push(format!("state = ?{}", values.len()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    values.push(Box::new(filter.limit));
    let limit_idx = values.len();
    values.push(Box::new(filter.offset));
    let offset_idx = values.len();

    let q = format!(
        "SELECT {} FROM conversion_jobs {where_sql}
         ORDER BY created_at DESC, rowid DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
        ConversionJob::COLUMNS
    );

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(refs.as_slice(), ConversionJob::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows)
}

/// Mark a pending job as running.
pub fn start_job(conn: &Connection, id: JobId, started_at: DateTime<Utc>) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE conversion_jobs SET state = 'running', started_at = ?1, updated_at = ?2
             WHERE id = ?3 AND state = 'pending'",
            params![
                started_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Record a successful conversion on a pending or running job.
pub fn complete_job(conn: &Connection, id: JobId, done: &JobCompletion) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE conversion_jobs SET state = 'succeeded', target_path = ?1,
                started_at = COALESCE(started_at, ?2), ended_at = ?3,
                duration_secs = ?4, metadata_preserved = ?5, metadata_summary = ?6,
                source_timestamp = ?7, target_timestamp = ?8, updated_at = ?9
             WHERE id = ?10 AND state IN ('pending', 'running')",
            params![
                done.target_path,
                done.started_at.to_rfc3339(),
                done.ended_at.to_rfc3339(),
                done.duration_secs,
                done.metadata_preserved,
                done.metadata_summary,
                done.source_timestamp,
                done.target_timestamp,
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Record a failure on a pending or running job.
///
/// `started_at` is only written if the job has none yet; pass `None` for
/// jobs that never reached a worker.
pub fn fail_job(
    conn: &Connection,
    id: JobId,
    error: &str,
    target_path: Option<&str>,
    started_at: Option<DateTime<Utc>>,
    ended_at: DateTime<Utc>,
    duration_secs: Option<f64>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE conversion_jobs SET state = 'failed', error = ?1,
                target_path = COALESCE(?2, target_path),
                started_at = COALESCE(started_at, ?3), ended_at = ?4, duration_secs = ?5,
                metadata_preserved = 0, updated_at = ?6
             WHERE id = ?7 AND state IN ('pending', 'running')",
            params![
                error,
                target_path,
                started_at.map(|t| t.to_rfc3339()),
                ended_at.to_rfc3339(),
                duration_secs,
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Fail every job left pending or running by a previous process.
///
/// Returns the number of jobs updated.
pub fn reset_orphaned_jobs(conn: &Connection) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE conversion_jobs
             SET state = 'failed', error = 'interrupted before completion',
                 ended_at = ?1, updated_at = ?1
             WHERE state IN ('pending', 'running')",
            [now],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}

/// Aggregate job counts and the metadata preservation rate.
pub fn get_stats(conn: &Connection) -> Result<JobStats> {
    let (total, succeeded, failed, running, pending, preserved) = conn
        .query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(state = 'succeeded'), 0),
                    COALESCE(SUM(state = 'failed'), 0),
                    COALESCE(SUM(state = 'running'), 0),
                    COALESCE(SUM(state = 'pending'), 0),
                    COALESCE(SUM(state = 'succeeded' AND metadata_preserved = 1), 0)
             FROM conversion_jobs",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(JobStats {
        total,
        succeeded,
        failed,
        running,
        pending,
        metadata_preserved: preserved,
        metadata_preservation_rate: JobStats::preservation_rate(preserved, succeeded),
    })
}
