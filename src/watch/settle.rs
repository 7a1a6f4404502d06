use std::path::Path;
use std::time::Duration;

use crate::config::WatchConfig;

/// Verdict on a file that may still be being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Not enough consecutive equal readings yet.
    Checking,
    Stable,
    /// The size changed between two readings.
    Unstable,
    /// The file disappeared.
    Vanished,
}

impl Stability {
    pub fn is_final(self) -> bool {
        !matches!(self, Stability::Checking)
    }
}

/// Size-based stability state machine.
///
/// The first observation is the baseline. Every following reading that
/// matches the previous one counts as a confirmation; the file is stable
/// after `required` confirmations. Once a final verdict is reached it
/// sticks.
#[derive(Debug, Clone)]
pub struct StabilityCheck {
    required: u32,
    confirmations: u32,
    last_size: Option<u64>,
    verdict: Stability,
}

impl StabilityCheck {
    pub fn new(required: u32) -> Self {
        Self {
            required,
            confirmations: 0,
            last_size: None,
            verdict: Stability::Checking,
        }
    }

    pub fn verdict(&self) -> Stability {
        self.verdict
    }

    /// Feed the current size; `None` means the file is gone.
    pub fn observe(&mut self, size: Option<u64>) -> Stability {
        if self.verdict.is_final() {
            return self.verdict;
        }

        let Some(size) = size else {
            self.verdict = Stability::Vanished;
            return self.verdict;
        };

        match self.last_size {
            None => {
                self.last_size = Some(size);
            }
            Some(prev) if prev == size => {
                self.confirmations += 1;
            }
            Some(_) => {
                self.verdict = Stability::Unstable;
                return self.verdict;
            }
        }

        if self.confirmations >= self.required {
            self.verdict = Stability::Stable;
        }
        self.verdict
    }
}

/// Timing of the stability wait for a freshly created file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilitySettings {
    pub initial_delay: Duration,
    pub checks: u32,
    pub interval: Duration,
}

impl From<&WatchConfig> for StabilitySettings {
    fn from(config: &WatchConfig) -> Self {
        Self {
            initial_delay: config.stability_delay(),
            checks: config.stability_checks,
            interval: config.stability_interval(),
        }
    }
}

/// Wait for `path` to stop growing.
///
/// Sleeps `initial_delay`, takes the baseline size, then re-reads it every
/// `interval` until the check reaches a verdict.
pub async fn wait_until_stable(path: &Path, settings: &StabilitySettings) -> Stability {
    if !settings.initial_delay.is_zero() {
        tokio::time::sleep(settings.initial_delay).await;
    }

    let mut check = StabilityCheck::new(settings.checks);
    let mut verdict = check.observe(file_size(path));
    while verdict == Stability::Checking {
        tokio::time::sleep(settings.interval).await;
        verdict = check.observe(file_size(path));
    }

    tracing::debug!(path = %path.display(), ?verdict, "Stability check finished");
    verdict
}

fn file_size(path: &Path) -> Option<u64> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}
