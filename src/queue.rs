//! Deduplicating conversion queue.
//!
//! [`ConversionQueue::submit`] never blocks: it records the path as in
//! flight and spawns a task that waits for one of `W` worker permits, then
//! runs the conversion on the blocking pool. Progress is reported as
//! [`QueueEvent`]s over an unbounded channel, so the queue knows nothing
//! about the ledger.

use chrono::{DateTime, Utc};
use heicsync_common::{Error, JobId, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::task::TaskTracker;

use crate::conversion::ConversionOutcome;

/// Work executed for each queued path.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, source: &Path) -> JobResult;
}

/// What a runner produced for one path.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub target_path: Option<PathBuf>,
    pub outcome: ConversionOutcome,
}

impl JobResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            target_path: None,
            outcome: ConversionOutcome::failed(error),
        }
    }
}

/// A finished job, successful or not.
#[derive(Debug, Clone)]
pub struct Completion {
    pub job_id: JobId,
    pub path: PathBuf,
    pub target_path: Option<PathBuf>,
    pub outcome: ConversionOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Completion {
    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The job acquired a worker.
    Started {
        job_id: JobId,
        path: PathBuf,
        started_at: DateTime<Utc>,
    },
    /// The job finished and its path left the in-flight set.
    Finished(Completion),
}

/// Result of [`ConversionQueue::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Queued,
    /// The path is already queued or converting; nothing was scheduled.
    Duplicate,
    /// The queue is draining and accepts no new work.
    Closed,
}

pub struct ConversionQueue {
    runner: Arc<dyn JobRunner>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    runtime: Handle,
    events: mpsc::UnboundedSender<QueueEvent>,
}

impl ConversionQueue {
    /// Create a queue running on the current tokio runtime.
    pub fn new(
        runner: Arc<dyn JobRunner>,
        workers: usize,
        events: mpsc::UnboundedSender<QueueEvent>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::internal(format!("conversion queue needs a tokio runtime: {e}")))?;
        let workers = workers.max(1);

        Ok(Self {
            runner,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
            runtime,
            events,
        })
    }

    /// Schedule `path` for conversion under `job_id`.
    ///
    /// Safe to call from any thread, async or not.
    pub fn submit(&self, path: PathBuf, job_id: JobId) -> SubmitStatus {
        // Held until the task is tracked, so `drain_all` cannot close in between.
        let mut in_flight_paths = self.in_flight.lock();

        if self.tracker.is_closed() {
            tracing::warn!(path = %path.display(), job_id = %job_id, "Queue is draining, rejecting job");
            return SubmitStatus::Closed;
        }

        if !in_flight_paths.insert(path.clone()) {
            tracing::debug!(path = %path.display(), "Already in flight, skipping");
            return SubmitStatus::Duplicate;
        }

        tracing::debug!(path = %path.display(), job_id = %job_id, "Job queued");

        let runner = self.runner.clone();
        let in_flight = self.in_flight.clone();
        let permits = self.permits.clone();
        let events = self.events.clone();

        self.tracker.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    in_flight.lock().remove(&path);
                    let now = Utc::now();
                    send(
                        &events,
                        QueueEvent::Finished(Completion {
                            job_id,
                            path,
                            target_path: None,
                            outcome: ConversionOutcome::failed("worker pool closed"),
                            started_at: now,
                            ended_at: now,
                        }),
                    );
                    return;
                };

                let started_at = Utc::now();
                send(
                    &events,
                    QueueEvent::Started {
                        job_id,
                        path: path.clone(),
                        started_at,
                    },
                );

                let source = path.clone();
                let result = tokio::task::spawn_blocking(move || runner.run(&source))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(job_id = %job_id, error = %e, "Conversion worker panicked");
                        JobResult::failed(format!("conversion worker panicked: {e}"))
                    });

                in_flight.lock().remove(&path);

                send(
                    &events,
                    QueueEvent::Finished(Completion {
                        job_id,
                        path,
                        target_path: result.target_path,
                        outcome: result.outcome,
                        started_at,
                        ended_at: Utc::now(),
                    }),
                );
            },
            &self.runtime,
        );
        drop(in_flight_paths);

        SubmitStatus::Queued
    }

    /// Number of paths currently queued or converting.
    pub fn size(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight.lock().contains(path)
    }

    pub fn is_accepting(&self) -> bool {
        !self.tracker.is_closed()
    }

    /// Stop accepting work and wait up to `timeout` for in-flight jobs.
    ///
    /// Returns `true` if every job finished in time. Jobs still running
    /// after the timeout are left to finish on their own.
    pub async fn drain(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.drain_all()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(remaining = self.size(), "Queue drain timed out");
                false
            }
        }
    }

    /// Stop accepting work and wait for every in-flight job.
    pub async fn drain_all(&self) {
        {
            let _in_flight = self.in_flight.lock();
            self.tracker.close();
        }
        let pending = self.size();
        if pending > 0 {
            tracing::info!(pending, "Draining conversion queue");
        }
        self.tracker.wait().await;
    }
}

fn send(events: &mpsc::UnboundedSender<QueueEvent>, event: QueueEvent) {
    if events.send(event).is_err() {
        tracing::debug!("Queue event receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps, then succeeds; records concurrency per path and overall.
    #[derive(Default)]
    struct SlowRunner {
        delay_ms: u64,
        running: AtomicUsize,
        max_running: AtomicUsize,
        per_path: parking_lot::Mutex<HashMap<PathBuf, usize>>,
        max_per_path: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowRunner {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                delay_ms,
                ..Default::default()
            })
        }
    }

    impl JobRunner for SlowRunner {
        fn run(&self, source: &Path) -> JobResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            {
                let mut per_path = self.per_path.lock();
                let n = per_path.entry(source.to_path_buf()).or_default();
                *n += 1;
                self.max_per_path.fetch_max(*n, Ordering::SeqCst);
            }

            std::thread::sleep(Duration::from_millis(self.delay_ms));

            *self.per_path.lock().get_mut(source).unwrap() -= 1;
            self.running.fetch_sub(1, Ordering::SeqCst);
            JobResult {
                target_path: Some(source.with_extension("heic")),
                outcome: ConversionOutcome {
                    success: true,
                    error: None,
                    metadata_preserved: true,
                    metadata_summary: String::new(),
                    source_timestamp: None,
                    target_timestamp: None,
                },
            }
        }
    }

    struct PanicRunner;

    impl JobRunner for PanicRunner {
        fn run(&self, _source: &Path) -> JobResult {
            panic!("decoder exploded");
        }
    }

    async fn next_completion(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Completion {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for completion")
                .expect("channel closed");
            if let QueueEvent::Finished(c) = event {
                return c;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_submissions_are_ignored() {
        let runner = SlowRunner::new(100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = ConversionQueue::new(runner.clone(), 4, tx).unwrap();
        let path = PathBuf::from("/photos/a/IMG_1.jpg");

        assert_eq!(queue.submit(path.clone(), JobId::new()), SubmitStatus::Queued);
        for _ in 0..5 {
            assert_eq!(
                queue.submit(path.clone(), JobId::new()),
                SubmitStatus::Duplicate
            );
        }
        assert_eq!(queue.size(), 1);
        assert!(queue.is_in_flight(&path));

        let done = next_completion(&mut rx).await;
        assert_eq!(done.path, path);
        assert_eq!(queue.size(), 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        // a finished path may be submitted again
        assert_eq!(queue.submit(path.clone(), JobId::new()), SubmitStatus::Queued);
        next_completion(&mut rx).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(runner.max_per_path.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submitters_never_overlap_a_path() {
        let runner = SlowRunner::new(20);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = Arc::new(ConversionQueue::new(runner.clone(), 4, tx).unwrap());
        let path = PathBuf::from("/photos/a/IMG_2.jpg");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            let path = path.clone();
            handles.push(std::thread::spawn(move || {
                (0..20)
                    .filter(|_| {
                        let queued = queue.submit(path.clone(), JobId::new());
                        std::thread::sleep(Duration::from_millis(1));
                        queued == SubmitStatus::Queued
                    })
                    .count()
            }));
        }
        let queued: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        for _ in 0..queued {
            next_completion(&mut rx).await;
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), queued);
        assert_eq!(runner.max_per_path.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_count_bounds_concurrency() {
        let runner = SlowRunner::new(50);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = ConversionQueue::new(runner.clone(), 2, tx).unwrap();

        for i in 0..6 {
            let status = queue.submit(PathBuf::from(format!("/p/a/{i}.jpg")), JobId::new());
            assert_eq!(status, SubmitStatus::Queued);
        }
        assert_eq!(queue.size(), 6);

        for _ in 0..6 {
            next_completion(&mut rx).await;
        }
        assert!(runner.max_running.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn started_precedes_finished() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = ConversionQueue::new(SlowRunner::new(1), 1, tx).unwrap();
        let id = JobId::new();
        queue.submit(PathBuf::from("/p/a/x.jpg"), id);

        match rx.recv().await.unwrap() {
            QueueEvent::Started { job_id, .. } => assert_eq!(job_id, id),
            other => panic!("expected Started, got {other:?}"),
        }
        let done = next_completion(&mut rx).await;
        assert_eq!(done.job_id, id);
        assert!(done.outcome.success);
        assert_eq!(done.target_path, Some(PathBuf::from("/p/a/x.heic")));
        assert!(done.duration_secs() >= 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_runner_becomes_failed_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = ConversionQueue::new(Arc::new(PanicRunner), 1, tx).unwrap();
        let path = PathBuf::from("/p/a/boom.jpg");
        queue.submit(path.clone(), JobId::new());

        let done = next_completion(&mut rx).await;
        assert!(!done.outcome.success);
        assert!(done.outcome.error.unwrap().contains("panicked"));
        assert!(!queue.is_in_flight(&path));

        // the pool keeps working after a panic
        assert_eq!(
            queue.submit(PathBuf::from("/p/a/next.jpg"), JobId::new()),
            SubmitStatus::Queued
        );
        next_completion(&mut rx).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_waits_then_rejects() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = ConversionQueue::new(SlowRunner::new(30), 2, tx).unwrap();
        for i in 0..3 {
            queue.submit(PathBuf::from(format!("/p/a/{i}.jpg")), JobId::new());
        }

        assert!(queue.drain(Duration::from_secs(5)).await);
        assert_eq!(queue.size(), 0);
        assert!(!queue.is_accepting());
        assert_eq!(
            queue.submit(PathBuf::from("/p/a/late.jpg"), JobId::new()),
            SubmitStatus::Closed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_times_out_on_slow_jobs() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = ConversionQueue::new(SlowRunner::new(500), 1, tx).unwrap();
        queue.submit(PathBuf::from("/p/a/slow.jpg"), JobId::new());

        assert!(!queue.drain(Duration::from_millis(20)).await);
        // the job still completes on its own
        next_completion(&mut rx).await;
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submissions_racing_drain_are_all_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = Arc::new(ConversionQueue::new(SlowRunner::new(0), 4, tx).unwrap());

        let submitter = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                (0..2000)
                    .filter(|i| {
                        let path = PathBuf::from(format!("/p/race/{i}.jpg"));
                        queue.submit(path, JobId::new()) == SubmitStatus::Queued
                    })
                    .count()
            })
        };

        tokio::time::sleep(Duration::from_millis(2)).await;
        queue.drain_all().await;
        let queued = tokio::task::spawn_blocking(move || submitter.join().unwrap())
            .await
            .unwrap();

        // every accepted job finished before drain_all returned
        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, QueueEvent::Finished(_)) {
                finished += 1;
            }
        }
        assert_eq!(finished, queued);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn new_outside_runtime_is_an_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(ConversionQueue::new(SlowRunner::new(0), 1, tx).is_err());
    }
}
