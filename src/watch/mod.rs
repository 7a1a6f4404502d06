pub mod settle;

pub use settle::{wait_until_stable, Stability, StabilityCheck, StabilitySettings};

use crate::config::WatchConfig;
use anyhow::{Context, Result};
use heicsync_common::paths::is_jpeg_file;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Watches directories for new JPEG files and emits them once they settle.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Start watching `config.dirs` recursively.
    ///
    /// Settled paths are sent on `settled_tx`. Directories that do not exist
    /// are skipped with a warning.
    pub fn start(config: &WatchConfig, settled_tx: mpsc::Sender<PathBuf>) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<PathBuf>(256);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for path in created_jpegs(&event) {
                        let _ = event_tx.blocking_send(path);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "File watcher error"),
            },
            notify::Config::default().with_poll_interval(config.poll_interval()),
        )
        .context("Failed to create file watcher")?;

        let mut watched = 0;
        for dir in &config.dirs {
            if !dir.is_dir() {
                tracing::warn!(dir = %dir.display(), "Watch directory does not exist");
                continue;
            }
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
            tracing::info!(dir = %dir.display(), "Watching directory");
            watched += 1;
        }
        if watched == 0 {
            tracing::warn!("No watch directories available");
        }

        let cancel = CancellationToken::new();
        let task = spawn_settle_loop(
            event_rx,
            StabilitySettings::from(config),
            settled_tx,
            cancel.clone(),
        );

        Ok(Self {
            _watcher: watcher,
            cancel,
            task,
        })
    }

    /// Stop watching. Files still settling are dropped.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "File watcher loop failed");
        }
        tracing::info!("File watcher stopped");
    }
}

/// Settle each detected path at most once at a time, emitting it on
/// `settled_tx` once stable.
fn spawn_settle_loop(
    mut event_rx: mpsc::Receiver<PathBuf>,
    settings: StabilitySettings,
    settled_tx: mpsc::Sender<PathBuf>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let settling: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));

    tokio::spawn(async move {
        loop {
            let path = tokio::select! {
                _ = cancel.cancelled() => break,
                next = event_rx.recv() => match next {
                    Some(path) => path,
                    None => break,
                },
            };

            if !settling.lock().insert(path.clone()) {
                tracing::debug!(path = %path.display(), "Already settling");
                continue;
            }

            tracing::debug!(path = %path.display(), "New file detected");
            tokio::spawn(settle_and_emit(
                path,
                settings,
                settling.clone(),
                settled_tx.clone(),
                cancel.clone(),
            ));
        }
        tracing::debug!("File watcher loop stopped");
    })
}

async fn settle_and_emit(
    path: PathBuf,
    settings: StabilitySettings,
    settling: Arc<Mutex<HashSet<PathBuf>>>,
    settled_tx: mpsc::Sender<PathBuf>,
    cancel: CancellationToken,
) {
    let verdict = tokio::select! {
        _ = cancel.cancelled() => None,
        v = wait_until_stable(&path, &settings) => Some(v),
    };
    settling.lock().remove(&path);

    match verdict {
        Some(Stability::Stable) => {
            if settled_tx.send(path).await.is_err() {
                tracing::debug!("Settled path receiver dropped");
            }
        }
        Some(Stability::Unstable) => {
            tracing::warn!(path = %path.display(), "File is not stable, skipping");
        }
        Some(Stability::Vanished) => {
            tracing::debug!(path = %path.display(), "File vanished before settling");
        }
        Some(Stability::Checking) | None => {}
    }
}

/// JPEG files an event reports as newly present.
///
/// Creations and renames into a watched tree count; modifications do not.
fn created_jpegs(event: &Event) -> Vec<PathBuf> {
    let paths: &[PathBuf] = match event.kind {
        EventKind::Create(_) => &event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => &event.paths,
        // both paths are reported, the destination last
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().map(std::slice::from_ref).unwrap_or(&[])
        }
        _ => &[],
    };
    paths.iter().filter(|p| is_jpeg_file(p)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;

    #[test]
    fn test_created_jpegs_filters_kind_and_extension() {
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/w/a/IMG_1.JPG"))
            .add_path(PathBuf::from("/w/a/notes.txt"));
        assert_eq!(created_jpegs(&create), vec![PathBuf::from("/w/a/IMG_1.JPG")]);

        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/w/a/IMG_1.jpg"));
        assert!(created_jpegs(&modify).is_empty());

        let remove = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/w/a/IMG_1.jpg"));
        assert!(created_jpegs(&remove).is_empty());
    }

    #[test]
    fn test_created_jpegs_follows_renames() {
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/a/.part"))
            .add_path(PathBuf::from("/w/a/IMG_2.jpeg"));
        assert_eq!(created_jpegs(&both), vec![PathBuf::from("/w/a/IMG_2.jpeg")]);

        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/w/a/IMG_3.jpg"));
        assert_eq!(created_jpegs(&to), vec![PathBuf::from("/w/a/IMG_3.jpg")]);
    }

    #[tokio::test]
    async fn test_settle_and_emit_sends_stable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let settling = Arc::new(Mutex::new(HashSet::from([path.clone()])));
        let (tx, mut rx) = mpsc::channel(1);
        let settings = StabilitySettings {
            initial_delay: Duration::ZERO,
            checks: 1,
            interval: Duration::from_millis(5),
        };
        settle_and_emit(
            path.clone(),
            settings,
            settling.clone(),
            tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(rx.recv().await, Some(path));
        assert!(settling.lock().is_empty());
    }

    #[tokio::test]
    async fn test_settle_and_emit_drops_vanished_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.jpg");

        let settling = Arc::new(Mutex::new(HashSet::from([path.clone()])));
        let (tx, mut rx) = mpsc::channel(1);
        let settings = StabilitySettings {
            initial_delay: Duration::ZERO,
            checks: 1,
            interval: Duration::from_millis(5),
        };
        settle_and_emit(path, settings, settling.clone(), tx, CancellationToken::new()).await;

        assert!(rx.recv().await.is_none());
        assert!(settling.lock().is_empty());
    }

    #[tokio::test]
    async fn test_settle_loop_emits_repeated_path_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_7.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let (event_tx, event_rx) = mpsc::channel(8);
        let (settled_tx, mut settled_rx) = mpsc::channel(8);
        let settings = StabilitySettings {
            initial_delay: Duration::from_millis(100),
            checks: 1,
            interval: Duration::from_millis(5),
        };
        let cancel = CancellationToken::new();
        let task = spawn_settle_loop(event_rx, settings, settled_tx, cancel.clone());

        // the second event arrives while the first is still settling
        event_tx.send(path.clone()).await.unwrap();
        event_tx.send(path.clone()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), settled_rx.recv())
            .await
            .expect("path was not emitted")
            .unwrap();
        assert_eq!(got, path);
        assert!(
            tokio::time::timeout(Duration::from_millis(400), settled_rx.recv())
                .await
                .is_err(),
            "path was emitted twice"
        );

        // once settled, the same path may be detected again
        event_tx.send(path.clone()).await.unwrap();
        let again = tokio::time::timeout(Duration::from_secs(5), settled_rx.recv())
            .await
            .expect("path was not emitted again")
            .unwrap();
        assert_eq!(again, path);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watcher_emits_new_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2024").join("01");
        std::fs::create_dir_all(&nested).unwrap();

        let config = WatchConfig {
            dirs: vec![dir.path().to_path_buf()],
            stability_delay_ms: 50,
            stability_checks: 1,
            stability_interval_ms: 20,
            poll_interval_ms: 100,
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::channel(8);
        let watcher = ChangeWatcher::start(&config, tx).unwrap();

        std::fs::write(nested.join("notes.txt"), b"skip me").unwrap();
        let photo = nested.join("IMG_0001.jpg");
        std::fs::write(&photo, b"jpeg bytes").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("watcher did not emit")
            .unwrap();
        assert_eq!(got.file_name(), photo.file_name());

        watcher.stop().await;
    }
}
