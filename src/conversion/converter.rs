//! Single-file conversion.
//!
//! A conversion walks through fixed stages and always ends in a
//! [`ConversionOutcome`]; errors never escape [`Converter::convert`].

use heicsync_common::{Error, Result};
use image::ImageReader;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::encoder::TargetEncoder;
use super::metadata::{self, MetadataRecord};
use crate::config::ConversionConfig;

pub const NOTE_VERIFIED: &str = "timestamp verified";
pub const NOTE_NOT_IN_TARGET: &str = "timestamp not found in target";
pub const NOTE_NO_SOURCE_TIMESTAMP: &str = "no source timestamp to verify";
pub const NOTE_DISABLED: &str = "metadata preservation disabled";

/// Stages of a single conversion, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Decoding,
    Encoding,
    Writing,
    Verifying,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validating => "validating",
            Self::Decoding => "decoding",
            Self::Encoding => "encoding",
            Self::Writing => "writing",
            Self::Verifying => "verifying",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Result of one conversion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub success: bool,
    pub error: Option<String>,
    /// True when the target's timestamp matched the source's, or when
    /// preservation was not requested.
    pub metadata_preserved: bool,
    pub metadata_summary: String,
    pub source_timestamp: Option<String>,
    pub target_timestamp: Option<String>,
}

impl ConversionOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            metadata_preserved: false,
            metadata_summary: String::new(),
            source_timestamp: None,
            target_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConverterSettings {
    pub quality: u8,
    pub preserve_metadata: bool,
}

impl From<&ConversionConfig> for ConverterSettings {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            quality: config.quality,
            preserve_metadata: config.preserve_metadata,
        }
    }
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            quality: 90,
            preserve_metadata: true,
        }
    }
}

/// Converts one source file into the encoder's target format.
pub struct Converter {
    settings: ConverterSettings,
    encoder: Arc<dyn TargetEncoder>,
}

impl Converter {
    pub fn new(settings: ConverterSettings, encoder: Arc<dyn TargetEncoder>) -> Self {
        Self { settings, encoder }
    }

    /// Convert `source` into `target`.
    pub fn convert(&self, source: &Path, target: &Path) -> ConversionOutcome {
        let started = Instant::now();
        let mut stage = Stage::Validating;

        match self.run(source, target, &mut stage) {
            Ok(outcome) => {
                tracing::info!(
                    source = %source.display(),
                    output = %target.display(),
                    preserved = outcome.metadata_preserved,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Conversion succeeded"
                );
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    source = %source.display(),
                    stage = %stage,
                    error = %e,
                    "Conversion failed"
                );
                ConversionOutcome::failed(e.to_string())
            }
        }
    }

    fn run(&self, source: &Path, target: &Path, stage: &mut Stage) -> Result<ConversionOutcome> {
        if !source.is_file() {
            return Err(Error::not_found(source.display().to_string()));
        }

        *stage = Stage::Decoding;
        let decoded = ImageReader::open(source)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| Error::decode(e.to_string()))?;
        let record = if self.settings.preserve_metadata {
            metadata::extract(source)
        } else {
            MetadataRecord::default()
        };

        *stage = Stage::Encoding;
        let color = decoded.color();
        if color != image::ColorType::Rgb8 {
            tracing::debug!(source = %source.display(), ?color, "Converting to RGB8");
        }
        let rgb = decoded.into_rgb8();

        *stage = Stage::Writing;
        let mut entries = record.summary_entries();
        if let Some(note) = self.write_atomically(&rgb, &record, target)? {
            entries.push(note);
        }

        *stage = Stage::Verifying;
        let (preserved, target_timestamp, note) = self.verify(&record, target);
        entries.push(format!("verification: {note}"));

        *stage = Stage::Done;
        Ok(ConversionOutcome {
            success: true,
            error: None,
            metadata_preserved: preserved,
            metadata_summary: entries.join("; "),
            source_timestamp: record.primary_timestamp,
            target_timestamp,
        })
    }

    /// Encode into a temporary file beside `target`, then rename it into place.
    ///
    /// The temporary file is deleted on every early return. A failed EXIF
    /// embed does not abort the write; it comes back as a summary note.
    fn write_atomically(
        &self,
        rgb: &image::RgbImage,
        record: &MetadataRecord,
        target: &Path,
    ) -> Result<Option<String>> {
        let dir = target
            .parent()
            .ok_or_else(|| Error::invalid_input(format!("{} has no parent", target.display())))?;
        std::fs::create_dir_all(dir)?;

        let temp = tempfile::Builder::new()
            .prefix(".heicsync-")
            .suffix(&format!(".{}", self.encoder.extension()))
            .tempfile_in(dir)?;

        self.encoder
            .encode(rgb, self.settings.quality, temp.path())?;

        let mut note = None;
        if self.settings.preserve_metadata {
            match metadata::embed(self.encoder.as_ref(), record, temp.path()) {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(output = %target.display(), error = %e, "EXIF embed failed");
                    note = Some(format!("embed: {e}"));
                }
                Err(e) => return Err(e),
            }
        }

        let size = std::fs::metadata(temp.path())?.len();
        if size == 0 {
            return Err(Error::encode("encoder produced an empty file"));
        }

        temp.persist(target).map_err(|e| Error::Io(e.error))?;
        Ok(note)
    }

    /// Compare the target's timestamp with the source's.
    fn verify(&self, record: &MetadataRecord, target: &Path) -> (bool, Option<String>, String) {
        if !self.settings.preserve_metadata {
            return (true, None, NOTE_DISABLED.to_string());
        }

        let Some(source_ts) = record.primary_timestamp.as_deref() else {
            return (true, None, NOTE_NO_SOURCE_TIMESTAMP.to_string());
        };

        match metadata::verify(target) {
            Some(target_ts) if target_ts == source_ts => {
                (true, Some(target_ts), NOTE_VERIFIED.to_string())
            }
            Some(target_ts) => {
                let note = format!("timestamp mismatch: source {source_ts} != target {target_ts}");
                (false, Some(target_ts), note)
            }
            None => (false, None, NOTE_NOT_IN_TARGET.to_string()),
        }
    }
}
