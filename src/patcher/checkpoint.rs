use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::errors::{FixerError, FixerResult};

/// Pre-patch bytes of every file a patch touched. Exactly one per applied patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }

    pub fn capture(&mut self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        // First capture wins: it holds the true pre-patch state
        self.files.entry(path.into()).or_insert(bytes);
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write every captured file back. Safe to call more than once.
    pub fn restore(&self) -> FixerResult<()> {
        for (path, bytes) in &self.files {
            if fs::read(path).ok().as_deref() == Some(bytes.as_slice()) {
                continue;
            }
            fs::write(path, bytes).map_err(|e| FixerError::WorkspaceWrite {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }
        debug!(checkpoint = %self.id, files = self.files.len(), "checkpoint restored");
        Ok(())
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}
