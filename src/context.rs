use heicsync_db::pool::DbPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::queue::ConversionQueue;

/// Everything the service's components share, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub queue: Arc<ConversionQueue>,
    pub coordinator: Arc<Coordinator>,
    watching: Arc<AtomicBool>,
}

impl AppContext {
    pub fn new(db: DbPool, config: Arc<Config>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            db,
            config,
            queue: coordinator.queue().clone(),
            coordinator,
            watching: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Relaxed)
    }

    pub fn set_watching(&self, watching: bool) {
        self.watching.store(watching, Ordering::Relaxed);
    }
}
