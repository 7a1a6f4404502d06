//! EXIF extraction, embedding and verification.
//!
//! Only a handful of attributes are recognized. The capture timestamp is the
//! one that matters: `DateTimeOriginal` wins, `DateTime` is the fallback.
//! GPS data is recorded as present or absent, never by value.
//!
//! Reading goes through `kamadak-exif`, which understands both the JPEG APP1
//! segment and the HEIF `Exif` item, so the source and the converted file are
//! read by the same code.

use exif::{Context, Exif, Field, In, Tag, Value};
use heicsync_common::{Error, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::encoder::TargetEncoder;

pub const DATE_TIME_ORIGINAL: &str = "DateTimeOriginal";
pub const DATE_TIME: &str = "DateTime";

const PRESENT: &str = "present";

/// Normalized metadata extracted from an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    /// Best available capture timestamp, in EXIF `YYYY:MM:DD HH:MM:SS` form.
    pub primary_timestamp: Option<String>,
    pub fields: BTreeMap<String, String>,
    /// TIFF-structured EXIF block, re-embedded verbatim into the target.
    pub raw_payload: Option<Vec<u8>>,
}

impl MetadataRecord {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.raw_payload.is_none()
    }

    /// `key: value` entries for the job summary.
    pub fn summary_entries(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect()
    }
}

/// Extract the metadata record from `path`.
///
/// Never fails: a file without EXIF, or with EXIF that cannot be parsed,
/// yields an empty record.
pub fn extract(path: &Path) -> MetadataRecord {
    match read_exif(path) {
        Ok(Some(exif)) => record_from_exif(&exif),
        Ok(None) => {
            tracing::debug!(path = %path.display(), "No EXIF data in source");
            MetadataRecord::default()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read source EXIF");
            MetadataRecord::default()
        }
    }
}

/// Write the record's raw payload into the encoded file at `target`.
///
/// Returns `Ok(false)` when there is nothing to embed.
pub fn embed(encoder: &dyn TargetEncoder, record: &MetadataRecord, target: &Path) -> Result<bool> {
    let Some(payload) = record.raw_payload.as_deref() else {
        return Ok(false);
    };
    encoder.embed_exif(target, payload)?;
    Ok(true)
}

/// Read back the primary timestamp of a converted file.
pub fn verify(target: &Path) -> Option<String> {
    match read_exif(target) {
        Ok(Some(exif)) => primary_timestamp(&exif).map(|(_, ts)| ts),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(path = %target.display(), error = %e, "Failed to read target EXIF");
            None
        }
    }
}

fn read_exif(path: &Path) -> Result<Option<Exif>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => Ok(Some(exif)),
        Err(
            exif::Error::NotFound(_) | exif::Error::NotSupported(_) | exif::Error::BlankValue(_),
        ) => Ok(None),
        Err(exif::Error::Io(e)) => Err(Error::Io(e)),
        Err(e) => Err(Error::metadata(e.to_string())),
    }
}

fn record_from_exif(exif: &Exif) -> MetadataRecord {
    let mut fields = BTreeMap::new();

    let primary = primary_timestamp(exif);
    if let Some((key, ts)) = &primary {
        fields.insert(key.to_string(), ts.clone());
    }

    for (tag, key) in [
        (Tag::Make, "Make"),
        (Tag::Model, "Model"),
        (Tag::LensModel, "LensModel"),
    ] {
        if let Some(value) = ascii_value(exif, tag) {
            fields.insert(key.to_string(), value);
        }
    }

    if exif.fields().any(|f| f.tag.context() == Context::Gps) {
        fields.insert("GPS".to_string(), PRESENT.to_string());
    }
    if exif.get_field(Tag::GPSLatitude, In::PRIMARY).is_some() {
        fields.insert("GPSLatitude".to_string(), PRESENT.to_string());
    }
    if exif.get_field(Tag::GPSLongitude, In::PRIMARY).is_some() {
        fields.insert("GPSLongitude".to_string(), PRESENT.to_string());
    }

    MetadataRecord {
        primary_timestamp: primary.map(|(_, ts)| ts),
        fields,
        raw_payload: Some(exif.buf().to_vec()),
    }
}

fn primary_timestamp(exif: &Exif) -> Option<(&'static str, String)> {
    ascii_value(exif, Tag::DateTimeOriginal)
        .map(|ts| (DATE_TIME_ORIGINAL, ts))
        .or_else(|| ascii_value(exif, Tag::DateTime).map(|ts| (DATE_TIME, ts)))
}

fn ascii_value(exif: &Exif, tag: Tag) -> Option<String> {
    exif.get_field(tag, In::PRIMARY).and_then(field_text)
}

/// Raw ASCII content of a field, without the quoting `display_value` adds.
fn field_text(field: &Field) -> Option<String> {
    match &field.value {
        Value::Ascii(parts) => parts
            .iter()
            .map(|p| String::from_utf8_lossy(p).trim_end_matches('\0').trim().to_string())
            .find(|s| !s.is_empty()),
        _ => None,
    }
}
