// Heuristic store persistence
//
// The store is the only state that survives runs. Saves go through a temp file,
// fsync and rename so a crash never leaves a half-written document behind.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::Heuristic;
use crate::errors::{FixerError, FixerResult};
use crate::signature::BugSignature;

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicStore {
    pub version: u32,
    #[serde(default)]
    pub heuristics: BTreeMap<String, Heuristic>,
}

impl Default for HeuristicStore {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            heuristics: BTreeMap::new(),
        }
    }
}

/// Outcome of merging imported heuristics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub replaced: usize,
    pub skipped: usize,
}

impl HeuristicStore {
    /// Load from `path`. A missing file is an empty store. A file that does not
    /// parse is moved aside to `<name>.corrupt` and an empty store is returned.
    pub fn load(path: &Path) -> FixerResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no heuristic store yet");
                return Ok(Self::default());
            }
            Err(e) => return Err(FixerError::unreadable(path, e)),
        };

        match serde_json::from_str::<Self>(&contents) {
            Ok(mut store) => {
                store.normalize();
                debug!(path = %path.display(), heuristics = store.len(), "heuristic store loaded");
                Ok(store)
            }
            Err(e) => {
                let aside = corrupt_path(path);
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "heuristic store is corrupt, starting empty"
                );
                if let Err(rename_err) = fs::rename(path, &aside) {
                    warn!(error = %rename_err, "failed to move corrupt store aside");
                }
                Ok(Self::default())
            }
        }
    }

    /// Save to `path` atomically
    pub fn save(&self, path: &Path) -> FixerResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FixerError::persistence(path, e))?;
        }

        let temp_path = path.with_extension("json.tmp");
        let json =
            serde_json::to_string_pretty(self).map_err(|e| FixerError::persistence(path, e))?;

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            Ok(())
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(FixerError::persistence(path, e));
        }

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            FixerError::persistence(path, e)
        })?;

        debug!(path = %path.display(), heuristics = self.len(), "heuristic store saved");
        Ok(())
    }

    /// Re-key entries by their pattern and repair out-of-range values
    fn normalize(&mut self) {
        let entries = std::mem::take(&mut self.heuristics);
        for (_, mut heuristic) in entries {
            heuristic.sanitize();
            let key = heuristic.key();
            let Some(other) = self.heuristics.remove(&key) else {
                self.heuristics.insert(key, heuristic);
                continue;
            };
            // Two entries share a pattern: keep the better ranked one
            let (kept, dropped) = if rank(&other, &heuristic) == Ordering::Greater {
                (heuristic, other)
            } else {
                (other, heuristic)
            };
            warn!(
                key = %key,
                kept = %kept.id,
                dropped = %dropped.id,
                "duplicate heuristic pattern in store, dropping one"
            );
            self.heuristics.insert(key, kept);
        }
    }

    pub fn len(&self) -> usize {
        self.heuristics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heuristics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Heuristic> {
        self.heuristics.values()
    }

    pub fn get(&self, key: &str) -> Option<&Heuristic> {
        self.heuristics.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Heuristic> {
        self.heuristics.get_mut(key)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Heuristic> {
        self.heuristics.values().find(|h| h.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Heuristic> {
        self.heuristics.values_mut().find(|h| h.id == id)
    }

    /// Insert keyed by pattern, returning any heuristic it displaced
    pub fn insert(&mut self, heuristic: Heuristic) -> Option<Heuristic> {
        self.heuristics.insert(heuristic.key(), heuristic)
    }

    /// Merge imported heuristics. Existing keys are kept unless `replace` is set.
    pub fn merge(&mut self, imported: Vec<Heuristic>, replace: bool) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for mut heuristic in imported {
            if let Err(e) = heuristic.template.validate() {
                warn!(key = %heuristic.key(), error = %e, "skipping heuristic with invalid template");
                summary.skipped += 1;
                continue;
            }
            heuristic.sanitize();
            let key = heuristic.key();
            match self.heuristics.get(&key) {
                Some(_) if !replace => summary.skipped += 1,
                Some(_) => {
                    self.heuristics.insert(key, heuristic);
                    summary.replaced += 1;
                }
                None => {
                    self.heuristics.insert(key, heuristic);
                    summary.added += 1;
                }
            }
        }
        info!(
            added = summary.added,
            replaced = summary.replaced,
            skipped = summary.skipped,
            "heuristics merged"
        );
        summary
    }

    /// Heuristics whose pattern matches, best first.
    ///
    /// Order: confidence desc, times_succeeded desc, times_applied asc, key asc.
    pub fn ranked_matches(&self, signature: &BugSignature) -> Vec<&Heuristic> {
        self.ranked_where(|h| h.pattern.matches(signature))
    }

    /// Every heuristic in the order the planner would try them
    pub fn ranked(&self) -> Vec<&Heuristic> {
        self.ranked_where(|_| true)
    }

    fn ranked_where(&self, keep: impl Fn(&Heuristic) -> bool) -> Vec<&Heuristic> {
        let mut matches: Vec<(&String, &Heuristic)> =
            self.heuristics.iter().filter(|(_, h)| keep(h)).collect();
        matches.sort_by(|(ka, a), (kb, b)| rank(a, b).then_with(|| ka.cmp(kb)));
        matches.into_iter().map(|(_, h)| h).collect()
    }
}

fn rank(a: &Heuristic, b: &Heuristic) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.times_succeeded.cmp(&a.times_succeeded))
        .then_with(|| a.times_applied.cmp(&b.times_applied))
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}
