//! Target format encoders.
//!
//! The converter only sees [`TargetEncoder`]. The production implementation
//! drives libheif's `heif-enc` and `exiftool` as child processes.

use heicsync_common::{Error, Result};
use image::{ImageFormat, RgbImage};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ToolsConfig;
use crate::tools::{self, EXIFTOOL, HEIF_ENC};

/// Encodes decoded pixels into the target container.
///
/// Both methods write to `dest`, a temporary file in the target directory;
/// publishing it is the caller's job.
pub trait TargetEncoder: Send + Sync {
    /// File extension of the produced container, without the dot.
    fn extension(&self) -> &'static str;

    /// Encode `image` at `quality` (0-100) into `dest`.
    fn encode(&self, image: &RgbImage, quality: u8, dest: &Path) -> Result<()>;

    /// Embed a TIFF-structured EXIF block into the already-encoded `dest`.
    ///
    /// Failures must be reported as [`Error::Metadata`].
    fn embed_exif(&self, dest: &Path, payload: &[u8]) -> Result<()>;
}

/// HEIC encoder backed by `heif-enc` and `exiftool`.
#[derive(Debug, Clone, Default)]
pub struct HeifEncTool {
    heif_enc_path: Option<PathBuf>,
    exiftool_path: Option<PathBuf>,
}

impl HeifEncTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            heif_enc_path: config.heif_enc_path.clone(),
            exiftool_path: config.exiftool_path.clone(),
        }
    }

    fn staging_file(dest: &Path, suffix: &str) -> Result<tempfile::NamedTempFile> {
        let dir = dest
            .parent()
            .ok_or_else(|| Error::invalid_input(format!("{} has no parent", dest.display())))?;
        Ok(tempfile::Builder::new()
            .prefix(".heicsync-")
            .suffix(suffix)
            .tempfile_in(dir)?)
    }
}

impl TargetEncoder for HeifEncTool {
    fn extension(&self) -> &'static str {
        "heic"
    }

    fn encode(&self, image: &RgbImage, quality: u8, dest: &Path) -> Result<()> {
        let heif_enc = tools::get_tool_path(HEIF_ENC, self.heif_enc_path.as_deref())?;

        // heif-enc reads PNG losslessly; the staging file is removed on drop
        let staging = Self::staging_file(dest, ".png")?;
        image
            .save_with_format(staging.path(), ImageFormat::Png)
            .map_err(|e| Error::encode(format!("failed to stage pixels: {e}")))?;

        tracing::debug!(
            dest = %dest.display(),
            quality,
            width = image.width(),
            height = image.height(),
            "Running heif-enc"
        );

        let output = Command::new(&heif_enc)
            .arg("-q")
            .arg(quality.to_string())
            .arg("-o")
            .arg(dest)
            .arg(staging.path())
            .output()
            .map_err(|e| Error::tool(HEIF_ENC, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::encode(format!(
                "heif-enc exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    fn embed_exif(&self, dest: &Path, payload: &[u8]) -> Result<()> {
        let exiftool = tools::get_tool_path(EXIFTOOL, self.exiftool_path.as_deref())
            .map_err(|e| Error::metadata(e.to_string()))?;

        let mut block = Self::staging_file(dest, ".exif")
            .map_err(|e| Error::metadata(format!("failed to stage EXIF block: {e}")))?;
        block
            .write_all(payload)
            .and_then(|_| block.flush())
            .map_err(|e| Error::metadata(format!("failed to stage EXIF block: {e}")))?;

        let mut assign = std::ffi::OsString::from("-EXIF<=");
        assign.push(block.path());

        let output = Command::new(&exiftool)
            .arg("-q")
            .arg("-overwrite_original")
            .arg(assign)
            .arg(dest)
            .output()
            .map_err(|e| Error::metadata(format!("failed to run exiftool: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::metadata(format!(
                "exiftool exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
