//! External tool detection.
//!
//! HEIC encoding and EXIF embedding are delegated to `heif-enc` (libheif)
//! and `exiftool`. Paths come from `[tools]` in the config or from `PATH`.

use heicsync_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ToolsConfig;

pub const HEIF_ENC: &str = "heif-enc";
pub const EXIFTOOL: &str = "exiftool";

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Check a tool by running it with `version_arg`.
pub fn check_tool_with_arg(name: &str, configured: Option<&Path>, version_arg: &str) -> ToolInfo {
    let Ok(path) = get_tool_path(name, configured) else {
        return ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        };
    };

    match Command::new(&path).arg(version_arg).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .find(|l| !l.trim().is_empty())
                .map(|s| s.trim().to_string());

            ToolInfo {
                name: name.to_string(),
                available: true,
                version,
                path: Some(path),
            }
        }
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: Some(path),
        },
    }
}

/// Check every tool the encoder depends on.
pub fn check_tools(config: &ToolsConfig) -> Vec<ToolInfo> {
    vec![
        check_tool_with_arg(HEIF_ENC, config.heif_enc_path.as_deref(), "--version"),
        check_tool_with_arg(EXIFTOOL, config.exiftool_path.as_deref(), "-ver"),
    ]
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
pub fn get_tool_path(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(tool = name, path = %path.display(), "Configured tool path does not exist");
    }

    which::which(name).map_err(|_| Error::tool(name, "not found in PATH"))
}
