//! Bulk discovery of existing JPEG files.

use heicsync_common::paths::is_jpeg_file;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Recursively collect every JPEG file under `dirs`.
///
/// Missing directories are skipped with a warning. Paths come back in
/// walk order, per directory.
pub fn scan<P: AsRef<Path>>(dirs: &[P]) -> Vec<PathBuf> {
    let mut found = Vec::new();

    for dir in dirs {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Scan directory does not exist");
            continue;
        }

        let before = found.len();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_jpeg_file(entry.path()) {
                found.push(entry.into_path());
            }
        }
        info!(dir = %dir.display(), count = found.len() - before, "Scanned directory");
    }

    info!(total = found.len(), "Scan finished");
    found
}
