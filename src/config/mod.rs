mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config.
///
/// Environment overrides are applied on top of whatever was loaded.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    let mut config = match custom_path {
        Some(path) => load_config(path)?,
        None => find_default_config()?.unwrap_or_default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;

    Ok(config)
}

fn find_default_config() -> Result<Option<Config>> {
    let default_paths = [
        "./heicsync.toml",
        "./config.toml",
        "~/.config/heicsync/config.toml",
        "/etc/heicsync/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path).map(Some);
        }
    }

    Ok(None)
}

/// Apply `HEICSYNC_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = lookup("HEICSYNC_MODE") {
        config.watch.mode = mode.parse().map_err(anyhow::Error::msg)?;
    }

    if let Some(dirs) = lookup("HEICSYNC_WATCH_DIRS") {
        config.watch.dirs = dirs
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .collect();
    }

    if let Some(db_path) = lookup("HEICSYNC_DB_PATH") {
        config.server.db_path = PathBuf::from(shellexpand::tilde(&db_path).as_ref());
    }

    if let Some(workers) = lookup("HEICSYNC_MAX_WORKERS") {
        config.conversion.max_workers = workers
            .parse()
            .with_context(|| format!("Invalid HEICSYNC_MAX_WORKERS: {}", workers))?;
    }

    if let Some(quality) = lookup("HEICSYNC_QUALITY") {
        config.conversion.quality = quality
            .parse()
            .with_context(|| format!("Invalid HEICSYNC_QUALITY: {}", quality))?;
    }

    if let Some(preserve) = lookup("HEICSYNC_PRESERVE_METADATA") {
        config.conversion.preserve_metadata = parse_bool(&preserve)
            .with_context(|| format!("Invalid HEICSYNC_PRESERVE_METADATA: {}", preserve))?;
    }

    if let Some(port) = lookup("HEICSYNC_PORT") {
        config.server.port = port
            .parse()
            .with_context(|| format!("Invalid HEICSYNC_PORT: {}", port))?;
    }

    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{}'", other),
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.conversion.quality > 100 {
        anyhow::bail!(
            "Conversion quality must be between 0 and 100, got {}",
            config.conversion.quality
        );
    }

    if config.conversion.max_workers == 0 {
        anyhow::bail!("max_workers must be at least 1");
    }

    let name = &config.conversion.output_dir_name;
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        anyhow::bail!("output_dir_name must be a plain directory name, got '{}'", name);
    }

    for path in &config.watch.dirs {
        if !path.exists() {
            tracing::warn!("Watch directory does not exist: {:?}", path);
        }
    }

    Ok(())
}
