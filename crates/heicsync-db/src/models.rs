//! Rust models matching the ledger schema.

use chrono::{DateTime, Utc};
use heicsync_common::{JobId, JobKind, JobState};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One recorded conversion attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionJob {
    pub id: JobId,
    pub kind: JobKind,
    pub source_path: String,
    pub target_path: Option<String>,
    pub state: JobState,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub metadata_preserved: Option<bool>,
    pub metadata_summary: Option<String>,
    pub source_timestamp: Option<String>,
    pub target_timestamp: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversionJob {
    /// Column list matching [`ConversionJob::from_row`].
    pub const COLUMNS: &'static str = "id, kind, source_path, target_path, state, error,
        started_at, ended_at, duration_secs, metadata_preserved, metadata_summary,
        source_timestamp, target_timestamp, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_text(row, 0)?,
            kind: parse_text(row, 1)?,
            source_path: row.get(2)?,
            target_path: row.get(3)?,
            state: parse_text(row, 4)?,
            error: row.get(5)?,
            started_at: parse_opt_time(row, 6)?,
            ended_at: parse_opt_time(row, 7)?,
            duration_secs: row.get(8)?,
            metadata_preserved: row.get(9)?,
            metadata_summary: row.get(10)?,
            source_timestamp: row.get(11)?,
            target_timestamp: row.get(12)?,
            created_at: parse_time(row, 13)?,
            updated_at: parse_time(row, 14)?,
        })
    }

    /// Whether source and target timestamps agree.
    ///
    /// `None` unless both timestamps were recorded.
    pub fn timestamps_consistent(&self) -> Option<bool> {
        match (&self.source_timestamp, &self.target_timestamp) {
            (Some(src), Some(tgt)) => Some(src == tgt),
            _ => None,
        }
    }
}

/// Fields written when a job finishes successfully.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub target_path: Option<String>,
    /// Kept only if the job's start was never recorded.
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub metadata_preserved: bool,
    pub metadata_summary: String,
    pub source_timestamp: Option<String>,
    pub target_timestamp: Option<String>,
}

/// Optional filters and pagination for listing jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub state: Option<JobState>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            kind: None,
            state: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Aggregate counts over the whole ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStats {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub running: i64,
    pub pending: i64,
    /// Succeeded jobs whose timestamp survived conversion.
    pub metadata_preserved: i64,
    /// `metadata_preserved / succeeded * 100`, rounded to two decimals.
    pub metadata_preservation_rate: f64,
}

impl JobStats {
    /// Percentage of succeeded jobs with preserved metadata (0 when none succeeded).
    pub fn preservation_rate(metadata_preserved: i64, succeeded: i64) -> f64 {
        if succeeded == 0 {
            return 0.0;
        }
        let rate = metadata_preserved as f64 / succeeded as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

fn parse_text<T: FromStr>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    let s: String = row.get(idx)?;
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

fn parse_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    })
    .transpose()
}
