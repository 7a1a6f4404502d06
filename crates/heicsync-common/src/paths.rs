//! Path utilities for detecting convertible source files by extension.

use std::path::Path;

/// Extensions accepted as conversion sources.
const JPEG_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Check if a path has a JPEG file extension (case-insensitive).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use heicsync_common::paths::is_jpeg_file;
///
/// assert!(is_jpeg_file(Path::new("IMG_0001.jpg")));
/// assert!(is_jpeg_file(Path::new("/photos/scan.JPEG")));
/// assert!(!is_jpeg_file(Path::new("/photos/heic/IMG_0001.heic")));
/// ```
pub fn is_jpeg_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| JPEG_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
