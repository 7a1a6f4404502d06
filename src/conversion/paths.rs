//! Target path derivation.

use heicsync_common::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Maps a source file to its converted sibling location.
///
/// `/a/b/c/pic.jpg` becomes `/a/b/<output_dir>/pic.<ext>`. An existing file
/// at that location is never overwritten: `_1`, `_2`, ... is appended to the
/// stem until a free name is found. The check is not atomic with the later
/// write, so two resolvers racing on the same name can both pick it.
#[derive(Debug, Clone)]
pub struct PathResolver {
    output_dir_name: String,
    extension: String,
}

impl PathResolver {
    pub fn new(output_dir_name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            output_dir_name: output_dir_name.into(),
            extension: extension.into(),
        }
    }

    /// Directory that receives converted files for `source`.
    pub fn target_dir(&self, source: &Path) -> Result<PathBuf> {
        let source = std::path::absolute(source)?;
        let grandparent = source
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "{} has no grandparent directory",
                    source.display()
                ))
            })?;
        Ok(grandparent.join(&self.output_dir_name))
    }

    /// Compute a non-colliding target path for `source`.
    pub fn resolve(&self, source: &Path) -> Result<PathBuf> {
        let stem = source
            .file_stem()
            .ok_or_else(|| Error::invalid_input(format!("{} has no file name", source.display())))?;
        let dir = self.target_dir(source)?;

        let mut candidate = dir.join(self.file_name(stem, None));
        let mut n = 1u32;
        while candidate.exists() {
            candidate = dir.join(self.file_name(stem, Some(n)));
            n += 1;
        }

        Ok(candidate)
    }

    fn file_name(&self, stem: &OsStr, index: Option<u32>) -> OsString {
        let mut name = stem.to_os_string();
        if let Some(n) = index {
            name.push(format!("_{n}"));
        }
        name.push(".");
        name.push(&self.extension);
        name
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new("heic", "heic")
    }
}
