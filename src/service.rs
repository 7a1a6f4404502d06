//! Process wiring: ledger, queue, coordinator, discovery and HTTP.

use anyhow::{Context, Result};
use heicsync_common::JobKind;
use heicsync_db::models::JobStats;
use heicsync_db::pool::{get_conn, init_pool, DbPool};
use heicsync_db::queries::jobs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, WatchMode};
use crate::context::AppContext;
use crate::conversion::{ConversionPipeline, HeifEncTool, TargetEncoder};
use crate::coordinator::Coordinator;
use crate::queue::ConversionQueue;
use crate::watch::ChangeWatcher;
use crate::{scanner, server, tools};

/// A running queue and coordinator event loop around one ledger.
pub struct Service {
    ctx: AppContext,
    cancel: CancellationToken,
    events: JoinHandle<()>,
}

impl Service {
    /// Build the queue and coordinator, and start applying queue events to
    /// `db`. Must be called inside a tokio runtime.
    pub fn assemble(
        db: DbPool,
        config: Arc<Config>,
        encoder: Arc<dyn TargetEncoder>,
    ) -> Result<Self> {
        let pipeline = Arc::new(ConversionPipeline::from_config(&config, encoder));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(
            ConversionQueue::new(pipeline, config.conversion.max_workers, events_tx)
                .context("Failed to create conversion queue")?,
        );
        let coordinator = Arc::new(Coordinator::new(db.clone(), queue));

        let cancel = CancellationToken::new();
        let events = tokio::spawn({
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            async move { coordinator.run_events(events_rx, cancel).await }
        });

        Ok(Self {
            ctx: AppContext::new(db, config, coordinator),
            cancel,
            events,
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Scan `dirs` and queue every JPEG found.
    pub async fn scan(&self, dirs: Vec<PathBuf>, kind: JobKind) -> Result<usize> {
        let coordinator = self.ctx.coordinator.clone();
        let queued = tokio::task::spawn_blocking(move || {
            let paths = scanner::scan(&dirs);
            coordinator.submit_all(&paths, kind)
        })
        .await
        .context("Scan task failed")?;
        tracing::info!(queued, "Scan submitted");
        Ok(queued)
    }

    /// Drain the queue, then flush outstanding events into the ledger.
    ///
    /// With `timeout` set, jobs still running when it expires are abandoned
    /// and stay `running` until the next startup resets them. Returns
    /// whether the drain completed.
    pub async fn shutdown(self, timeout: Option<Duration>) -> bool {
        let drained = match timeout {
            Some(timeout) => self.ctx.queue.drain(timeout).await,
            None => {
                self.ctx.queue.drain_all().await;
                true
            }
        };

        self.cancel.cancel();
        if let Err(e) = self.events.await {
            tracing::error!(error = %e, "Queue event loop failed");
        }
        drained
    }
}

/// How long abandoned conversions may hold up process exit once the
/// service future has returned.
pub const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Run `fut` on a fresh multi-threaded runtime, then tear the runtime down
/// without waiting more than `grace` for blocking work still running.
pub fn run_to_completion<F>(fut: F, grace: Duration) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let rt = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = rt.block_on(fut);
    rt.shutdown_timeout(grace);
    result
}

/// Open the ledger at the configured path and fail jobs a previous process
/// left unfinished.
pub fn open_ledger(config: &Config) -> Result<DbPool> {
    let db_path = config.server.db_path.to_string_lossy();
    tracing::info!(
        path = %db_path,
        schema = heicsync_db::migrations::latest_version(),
        "Opening ledger"
    );
    let db = init_pool(&db_path).with_context(|| format!("Failed to open ledger at {db_path}"))?;

    let conn = get_conn(&db)?;
    match jobs::reset_orphaned_jobs(&conn) {
        Ok(count) if count > 0 => {
            tracing::info!("Reset {} orphaned jobs from previous session", count);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to reset orphaned jobs: {}", e);
        }
    }
    Ok(db)
}

fn warn_missing_tools(config: &Config) {
    for tool in tools::check_tools(&config.tools) {
        if !tool.available {
            tracing::warn!(tool = %tool.name, "Required tool is not available, conversions will fail");
        }
    }
}

/// Run the long-lived service until Ctrl+C or SIGTERM.
pub async fn start(config: Config) -> Result<()> {
    let config = Arc::new(config);
    tracing::info!(
        mode = ?config.watch.mode,
        dirs = ?config.watch.dirs,
        workers = config.conversion.max_workers,
        quality = config.conversion.quality,
        preserve_metadata = config.conversion.preserve_metadata,
        "Starting heicsync"
    );
    warn_missing_tools(&config);

    let db = open_ledger(&config)?;
    let encoder: Arc<dyn TargetEncoder> = Arc::new(HeifEncTool::new(&config.tools));
    let service = Service::assemble(db, config.clone(), encoder)?;
    let ctx = service.context().clone();

    let watcher = match config.watch.mode {
        WatchMode::Watch => {
            let (tx, mut rx) = mpsc::channel::<PathBuf>(256);
            let watcher = ChangeWatcher::start(&config.watch, tx)?;
            ctx.set_watching(true);

            let coordinator = ctx.coordinator.clone();
            tokio::spawn(async move {
                while let Some(path) = rx.recv().await {
                    tracing::info!(path = %path.display(), "New file detected");
                    let coordinator = coordinator.clone();
                    let recorded = tokio::task::spawn_blocking(move || {
                        if let Err(e) = coordinator.submit_discovered(&path, JobKind::Watch) {
                            tracing::error!(path = %path.display(), error = %e, "Failed to record job");
                        }
                    })
                    .await;
                    if let Err(e) = recorded {
                        tracing::error!(error = %e, "Job recording task failed");
                    }
                }
            });
            Some(watcher)
        }
        WatchMode::Once => None,
    };

    if config.watch.mode == WatchMode::Once || config.watch.scan_on_start {
        service.scan(config.watch.dirs.clone(), JobKind::Once).await?;
    }

    let served = server::serve(ctx.clone(), server::shutdown_signal()).await;

    tracing::info!("Shutting down...");
    if let Some(watcher) = watcher {
        watcher.stop().await;
        ctx.set_watching(false);
    }
    if !service
        .shutdown(Some(config.conversion.drain_timeout()))
        .await
    {
        tracing::warn!("Some conversions did not finish before shutdown");
    }

    served
}

/// Convert everything under `dirs` through the queue and ledger, then
/// return the ledger statistics.
pub async fn scan_once(config: Config, dirs: Vec<PathBuf>) -> Result<JobStats> {
    let config = Arc::new(config);
    warn_missing_tools(&config);

    let db = open_ledger(&config)?;
    let encoder: Arc<dyn TargetEncoder> = Arc::new(HeifEncTool::new(&config.tools));
    let service = Service::assemble(db.clone(), config, encoder)?;

    service.scan(dirs, JobKind::Once).await?;
    service.shutdown(None).await;

    let conn = get_conn(&db)?;
    Ok(jobs::get_stats(&conn)?)
}
