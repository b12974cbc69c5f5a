use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{FixerError, FixerResult};

/// Advisory exclusive lock on `.selfevolve/run.lock`, released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock or fail fast with `WorkspaceBusy`
    pub fn acquire(path: &Path) -> FixerResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FixerError::WorkspaceWrite {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| FixerError::WorkspaceWrite {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        FileExt::try_lock_exclusive(&file)
            .map_err(|_| FixerError::WorkspaceBusy(path.to_path_buf()))?;
        debug!(path = %path.display(), "run lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
