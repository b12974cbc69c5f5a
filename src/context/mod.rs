// Context reader - snapshots the application subtree and loads the heuristic store
//
// Read-only. The snapshot is taken at the start of every iteration so the
// planner always sees the live workspace after any rollback.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::RunConfig;
use crate::errors::{FixerError, FixerResult};
use crate::store::HeuristicStore;

/// Directories never descended into
const SKIPPED_DIRS: &[&str] = &["__pycache__"];

/// Immutable map of workspace-relative path (forward slashes) to file contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    files: BTreeMap<String, String>,
    taken_at: Option<DateTime<Utc>>,
}

impl WorkspaceSnapshot {
    pub fn from_files(files: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            files: files.into_iter().collect(),
            taken_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Files in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, t)| (p.as_str(), t.as_str()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }
}

/// State handed to the planner for one iteration
#[derive(Debug, Clone)]
pub struct RunContext {
    pub snapshot: WorkspaceSnapshot,
    pub store: HeuristicStore,
}

#[derive(Debug, Clone)]
pub struct ContextReader {
    root: PathBuf,
    subtree: PathBuf,
    store_path: PathBuf,
    max_file_bytes: u64,
}

impl ContextReader {
    pub fn new(
        root: impl Into<PathBuf>,
        subtree: impl Into<PathBuf>,
        store_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            subtree: subtree.into(),
            store_path: store_path.into(),
            max_file_bytes: crate::config::constants::DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(&config.workspace, &config.subtree, config.store_path())
            .with_max_file_bytes(config.max_file_bytes)
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Fail with `WorkspaceUnreadable` unless both the root and the subtree are directories
    pub fn check_workspace(&self) -> FixerResult<()> {
        if !self.root.is_dir() {
            return Err(FixerError::unreadable(&self.root, "workspace root is not a directory"));
        }
        let subtree = self.root.join(&self.subtree);
        if !subtree.is_dir() {
            return Err(FixerError::unreadable(
                &subtree,
                "application subtree is missing",
            ));
        }
        fs::read_dir(&subtree).map_err(|e| FixerError::unreadable(&subtree, e))?;
        Ok(())
    }

    /// Snapshot every readable text file under the subtree
    pub fn snapshot(&self) -> FixerResult<WorkspaceSnapshot> {
        self.check_workspace()?;
        let subtree = self.root.join(&self.subtree);

        let mut files = BTreeMap::new();
        let walker = WalkDir::new(&subtree)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(text) = self.read_text(entry.path()) {
                if let Some(rel) = relative_key(&self.root, entry.path()) {
                    files.insert(rel, text);
                }
            }
        }

        debug!(files = files.len(), subtree = %self.subtree.display(), "workspace snapshot taken");
        Ok(WorkspaceSnapshot::from_files(files))
    }

    /// Load the heuristic store; absent means empty
    pub fn load_store(&self) -> FixerResult<HeuristicStore> {
        HeuristicStore::load(&self.store_path)
    }

    pub fn read(&self) -> FixerResult<RunContext> {
        let snapshot = self.snapshot()?;
        let store = self.load_store()?;
        Ok(RunContext { snapshot, store })
    }

    fn read_text(&self, path: &Path) -> Option<String> {
        let len = fs::metadata(path).ok()?.len();
        if len > self.max_file_bytes {
            debug!(path = %path.display(), bytes = len, "skipping large file");
            return None;
        }
        let bytes = fs::read(path).ok()?;
        String::from_utf8(bytes).ok()
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.iter().any(|d| *d == name)
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
