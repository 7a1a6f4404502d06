use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite file holding the conversion ledger
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/tasks.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
        }
    }
}

/// How source files are discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Scan the watched directories once at startup.
    #[default]
    Once,
    /// Watch the directories for newly created files.
    Watch,
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "once" => Ok(Self::Once),
            "watch" => Ok(Self::Watch),
            _ => Err(format!("Invalid mode: {} (expected 'once' or 'watch')", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub mode: WatchMode,

    #[serde(default)]
    pub dirs: Vec<PathBuf>,

    /// Also run a bulk scan when starting in watch mode
    #[serde(default)]
    pub scan_on_start: bool,

    /// Wait before the first size check of a new file
    #[serde(default = "default_stability_delay")]
    pub stability_delay_ms: u64,

    /// Consecutive equal size readings required before a file is stable
    #[serde(default = "default_stability_checks")]
    pub stability_checks: u32,

    #[serde(default = "default_stability_interval")]
    pub stability_interval_ms: u64,

    /// Poll interval for backends that cannot deliver native events
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_stability_delay() -> u64 {
    1000
}
fn default_stability_checks() -> u32 {
    3
}
fn default_stability_interval() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    1000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::default(),
            dirs: Vec::new(),
            scan_on_start: false,
            stability_delay_ms: default_stability_delay(),
            stability_checks: default_stability_checks(),
            stability_interval_ms: default_stability_interval(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl WatchConfig {
    pub fn stability_delay(&self) -> Duration {
        Duration::from_millis(self.stability_delay_ms)
    }

    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionConfig {
    /// Encoder quality, 0-100
    #[serde(default = "default_quality")]
    pub quality: u8,

    #[serde(default = "default_preserve_metadata")]
    pub preserve_metadata: bool,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Sibling directory receiving converted files
    #[serde(default = "default_output_dir_name")]
    pub output_dir_name: String,

    /// How long shutdown waits for in-flight conversions
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_quality() -> u8 {
    90
}
fn default_preserve_metadata() -> bool {
    true
}
fn default_max_workers() -> usize {
    4
}
fn default_output_dir_name() -> String {
    "heic".to_string()
}
fn default_drain_timeout() -> u64 {
    30
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            preserve_metadata: default_preserve_metadata(),
            max_workers: default_max_workers(),
            output_dir_name: default_output_dir_name(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl ConversionConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub heif_enc_path: Option<PathBuf>,

    #[serde(default)]
    pub exiftool_path: Option<PathBuf>,
}
