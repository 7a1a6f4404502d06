//! Glue between discovery, the queue and the ledger.
//!
//! Discovered paths become pending ledger jobs and are submitted to the
//! queue. Queue events are applied to the ledger by a single event loop, so
//! writes for one job never interleave.

use chrono::Utc;
use heicsync_common::{JobId, JobKind, Result};
use heicsync_db::models::JobCompletion;
use heicsync_db::pool::{get_conn, DbPool};
use heicsync_db::queries::jobs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::queue::{Completion, ConversionQueue, QueueEvent, SubmitStatus};

pub const ERROR_SHUTTING_DOWN: &str = "queue is shutting down";
pub const ERROR_DUPLICATE: &str = "already queued for conversion";

pub struct Coordinator {
    db: DbPool,
    queue: Arc<ConversionQueue>,
}

impl Coordinator {
    pub fn new(db: DbPool, queue: Arc<ConversionQueue>) -> Self {
        Self { db, queue }
    }

    pub fn queue(&self) -> &Arc<ConversionQueue> {
        &self.queue
    }

    /// Record a discovered file and queue it.
    ///
    /// Returns `None` without touching the ledger when the path is already
    /// in flight.
    pub fn submit_discovered(&self, path: &Path, kind: JobKind) -> Result<Option<JobId>> {
        let path = std::path::absolute(path)?;
        if self.queue.is_in_flight(&path) {
            tracing::debug!(path = %path.display(), "Already in flight, not recording");
            return Ok(None);
        }

        let conn = get_conn(&self.db)?;
        let job = jobs::create_job(&conn, kind, &path.to_string_lossy())?;

        match self.queue.submit(path.clone(), job.id) {
            SubmitStatus::Queued => {
                tracing::info!(job_id = %job.id, path = %path.display(), %kind, "Job created");
                Ok(Some(job.id))
            }
            SubmitStatus::Duplicate => {
                jobs::fail_job(&conn, job.id, ERROR_DUPLICATE, None, None, Utc::now(), None)?;
                Ok(None)
            }
            SubmitStatus::Closed => {
                jobs::fail_job(&conn, job.id, ERROR_SHUTTING_DOWN, None, None, Utc::now(), None)?;
                Ok(None)
            }
        }
    }

    /// Submit every path, logging and skipping ledger failures.
    ///
    /// Returns the number of jobs queued.
    pub fn submit_all(&self, paths: &[PathBuf], kind: JobKind) -> usize {
        let mut queued = 0;
        for path in paths {
            match self.submit_discovered(path, kind) {
                Ok(Some(_)) => queued += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to record job");
                }
            }
        }
        queued
    }

    /// Apply one queue event to the ledger.
    pub fn record(&self, event: QueueEvent) -> Result<()> {
        let conn = get_conn(&self.db)?;
        match event {
            QueueEvent::Started {
                job_id, started_at, ..
            } => {
                if !jobs::start_job(&conn, job_id, started_at)? {
                    tracing::warn!(job_id = %job_id, "Job was not pending, start ignored");
                }
            }
            QueueEvent::Finished(done) => {
                let applied = if done.outcome.success {
                    jobs::complete_job(&conn, done.job_id, &job_completion(&done))?
                } else {
                    let error = done.outcome.error.as_deref().unwrap_or("unknown error");
                    let target = done.target_path.as_ref().map(|p| p.to_string_lossy());
                    jobs::fail_job(
                        &conn,
                        done.job_id,
                        error,
                        target.as_deref(),
                        Some(done.started_at),
                        done.ended_at,
                        Some(done.duration_secs()),
                    )?
                };

                if !applied {
                    match jobs::get_job(&conn, done.job_id)? {
                        Some(job) if job.state.is_terminal() => {
                            tracing::debug!(job_id = %done.job_id, state = %job.state, "Job already finished, outcome ignored");
                        }
                        Some(job) => {
                            tracing::warn!(job_id = %done.job_id, state = %job.state, "Job not in a finishable state");
                        }
                        None => {
                            tracing::warn!(job_id = %done.job_id, "Finished job is missing from the ledger");
                        }
                    }
                } else if done.outcome.success {
                    tracing::info!(
                        job_id = %done.job_id,
                        path = %done.path.display(),
                        preserved = done.outcome.metadata_preserved,
                        "Conversion succeeded"
                    );
                } else {
                    tracing::error!(
                        job_id = %done.job_id,
                        path = %done.path.display(),
                        error = done.outcome.error.as_deref().unwrap_or_default(),
                        "Conversion failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Consume queue events until `cancel` fires, then apply whatever is
    /// still buffered.
    pub async fn run_events(
        &self,
        mut events: mpsc::UnboundedReceiver<QueueEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => self.apply(event),
                    None => return,
                },
            }
        }

        let mut flushed = 0;
        while let Ok(event) = events.try_recv() {
            self.apply(event);
            flushed += 1;
        }
        tracing::debug!(flushed, "Queue event loop stopped");
    }

    fn apply(&self, event: QueueEvent) {
        if let Err(e) = self.record(event) {
            tracing::error!(error = %e, "Failed to record queue event");
        }
    }
}

fn job_completion(done: &Completion) -> JobCompletion {
    JobCompletion {
        target_path: done
            .target_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        started_at: done.started_at,
        ended_at: done.ended_at,
        duration_secs: done.duration_secs(),
        metadata_preserved: done.outcome.metadata_preserved,
        metadata_summary: done.outcome.metadata_summary.clone(),
        source_timestamp: done.outcome.source_timestamp.clone(),
        target_timestamp: done.outcome.target_timestamp.clone(),
    }
}
