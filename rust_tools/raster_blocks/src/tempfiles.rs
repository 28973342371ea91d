use crate::error::Result;
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

/// Temporary files of one run (reprojected views, rasterized vectors).
///
/// Everything lives under one directory that is removed when the registry is
/// dropped, so an early return on error cleans up as well.
pub struct TempRegistry {
    dir: TempDir,
    counter: AtomicUsize,
    created: Mutex<Vec<PathBuf>>,
}

impl TempRegistry {
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("raster_blocks_");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        debug!("Temporary directory {}", dir.path().display());
        Ok(Self {
            dir,
            counter: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh path in the run directory. The file is not created.
    pub fn new_path(&self, stem: &str, extension: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let stem: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = self.dir.path().join(format!("{:03}_{}.{}", n, stem, extension));
        self.created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.clone());
        path
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        debug!(
            "Removing {} temporary files under {}",
            self.files().len(),
            self.dir.path().display()
        );
    }
}
