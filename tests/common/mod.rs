//! Shared fixtures for integration tests.
//!
//! Provides JPEG files with hand-built EXIF blocks, a [`FakeEncoder`] that
//! writes JPEG containers (so round trips need no external tools), and a
//! [`TestHarness`] wrapping a fully assembled [`Service`] over an in-memory
//! ledger.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use exif::{Field, In, Rational, Tag, Value};
use heicsync::config::Config;
use heicsync::conversion::TargetEncoder;
use heicsync::service::Service;
use heicsync_common::{Error, Result};
use heicsync_db::pool::{get_conn, init_memory_pool, DbPool, PooledConnection};
use image::{ImageFormat, RgbImage};

pub const CAPTURED_AT: &str = "2024:01:15 14:30:00";

/// EXIF attributes for a fixture image.
#[derive(Debug, Clone, Default)]
pub struct ExifSpec {
    pub date_time_original: Option<String>,
    pub date_time: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub gps: bool,
}

impl ExifSpec {
    pub fn captured(ts: &str) -> Self {
        Self {
            date_time_original: Some(ts.to_string()),
            ..Default::default()
        }
    }

    pub fn camera(mut self, make: &str, model: &str) -> Self {
        self.make = Some(make.to_string());
        self.model = Some(model.to_string());
        self
    }

    pub fn with_gps(mut self) -> Self {
        self.gps = true;
        self
    }
}

fn ascii(tag: Tag, value: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![value.as_bytes().to_vec()]),
    }
}

fn degrees(d: u32, m: u32, s: u32) -> Value {
    Value::Rational(vec![
        Rational { num: d, denom: 1 },
        Rational { num: m, denom: 1 },
        Rational { num: s, denom: 1 },
    ])
}

/// Build a TIFF-structured EXIF block.
pub fn exif_block(spec: &ExifSpec) -> Vec<u8> {
    let mut fields = Vec::new();
    if let Some(ts) = &spec.date_time_original {
        fields.push(ascii(Tag::DateTimeOriginal, ts));
    }
    if let Some(ts) = &spec.date_time {
        fields.push(ascii(Tag::DateTime, ts));
    }
    if let Some(make) = &spec.make {
        fields.push(ascii(Tag::Make, make));
    }
    if let Some(model) = &spec.model {
        fields.push(ascii(Tag::Model, model));
    }
    if spec.gps {
        fields.push(ascii(Tag::GPSLatitudeRef, "N"));
        fields.push(Field {
            tag: Tag::GPSLatitude,
            ifd_num: In::PRIMARY,
            value: degrees(35, 41, 22),
        });
        fields.push(ascii(Tag::GPSLongitudeRef, "E"));
        fields.push(Field {
            tag: Tag::GPSLongitude,
            ifd_num: In::PRIMARY,
            value: degrees(139, 41, 30),
        });
    }
    // keep the primary IFD non-empty
    if fields.is_empty() {
        fields.push(ascii(Tag::Software, "heicsync-tests"));
    }

    let mut writer = exif::experimental::Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut buf = Cursor::new(Vec::new());
    writer
        .write(&mut buf, false)
        .expect("failed to write EXIF block");
    buf.into_inner()
}

/// Encode a small gradient as JPEG bytes.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 16) as u8, (y * 16) as u8, 128])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg)
        .expect("failed to encode JPEG");
    buf.into_inner()
}

/// Insert an APP1 `Exif` segment right after the JPEG SOI marker.
pub fn splice_exif(jpeg: &[u8], tiff: &[u8]) -> Vec<u8> {
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "not a JPEG");
    let len = u16::try_from(2 + 6 + tiff.len()).expect("EXIF block too large");

    let mut out = Vec::with_capacity(jpeg.len() + tiff.len() + 10);
    out.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE1]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Write a JPEG at `path`, creating parent directories.
pub fn write_jpeg(path: &Path, exif: Option<&ExifSpec>) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let jpeg = jpeg_bytes(16, 16);
    let bytes = match exif {
        Some(spec) => splice_exif(&jpeg, &exif_block(spec)),
        None => jpeg,
    };
    std::fs::write(path, bytes).unwrap();
    path.to_path_buf()
}

/// How a [`FakeEncoder`] behaves.
#[derive(Debug, Clone)]
pub enum FakeMode {
    /// Encode and embed faithfully.
    Faithful,
    /// Encoding fails after writing partial output.
    FailEncode,
    /// Embedding fails with a metadata error.
    FailEmbed,
    /// Embedding succeeds but writes nothing.
    DropExif,
    /// Embedding writes a block with this `DateTimeOriginal` instead.
    RewriteTimestamp(String),
}

/// Target encoder writing JPEG containers with an `.heic` extension.
pub struct FakeEncoder {
    mode: FakeMode,
    delay: Duration,
    pub encodes: AtomicUsize,
    pub embeds: AtomicUsize,
}

impl FakeEncoder {
    pub fn new(mode: FakeMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            delay: Duration::ZERO,
            encodes: AtomicUsize::new(0),
            embeds: AtomicUsize::new(0),
        })
    }

    pub fn faithful() -> Arc<Self> {
        Self::new(FakeMode::Faithful)
    }

    /// A faithful encoder that takes `delay` per file.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode: FakeMode::Faithful,
            delay,
            encodes: AtomicUsize::new(0),
            embeds: AtomicUsize::new(0),
        })
    }
}

impl TargetEncoder for FakeEncoder {
    fn extension(&self) -> &'static str {
        "heic"
    }

    fn encode(&self, image: &RgbImage, _quality: u8, dest: &Path) -> Result<()> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if let FakeMode::FailEncode = self.mode {
            std::fs::write(dest, b"partial")?;
            return Err(Error::encode("simulated encoder crash"));
        }
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Jpeg)
            .map_err(|e| Error::encode(e.to_string()))?;
        std::fs::write(dest, buf.into_inner())?;
        Ok(())
    }

    fn embed_exif(&self, dest: &Path, payload: &[u8]) -> Result<()> {
        self.embeds.fetch_add(1, Ordering::SeqCst);
        let block = match &self.mode {
            FakeMode::FailEmbed => return Err(Error::metadata("simulated exiftool failure")),
            FakeMode::DropExif => return Ok(()),
            FakeMode::RewriteTimestamp(ts) => exif_block(&ExifSpec::captured(ts)),
            FakeMode::Faithful | FakeMode::FailEncode => payload.to_vec(),
        };
        let jpeg = std::fs::read(dest).map_err(|e| Error::metadata(e.to_string()))?;
        std::fs::write(dest, splice_exif(&jpeg, &block))
            .map_err(|e| Error::metadata(e.to_string()))?;
        Ok(())
    }
}

/// Sorted file names in `dir`, empty if it does not exist.
pub fn file_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// A running service over an in-memory ledger and a temporary photo tree.
pub struct TestHarness {
    pub service: Service,
    pub db: DbPool,
    pub root: tempfile::TempDir,
}

impl TestHarness {
    /// Create a harness watching `<root>/photos`. Must run inside a tokio
    /// runtime.
    pub fn new(encoder: Arc<dyn TargetEncoder>) -> Self {
        Self::with_config(encoder, |_| {})
    }

    pub fn with_config(encoder: Arc<dyn TargetEncoder>, tweak: impl FnOnce(&mut Config)) -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let photos = root.path().join("photos");
        std::fs::create_dir_all(&photos).unwrap();

        let mut config = Config::default();
        config.watch.dirs = vec![photos];
        config.conversion.max_workers = 2;
        tweak(&mut config);

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let service =
            Service::assemble(db.clone(), Arc::new(config), encoder).expect("failed to assemble");

        Self { service, db, root }
    }

    pub fn photos(&self) -> PathBuf {
        self.root.path().join("photos")
    }

    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get connection")
    }
}
