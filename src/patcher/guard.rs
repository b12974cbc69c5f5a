// Patch guard - all-or-nothing validation of a proposal before anything is written
//
// Checks run in a fixed order: target paths, file count, changed-line budget,
// then line ranges against the live files. The first failure rejects the whole
// proposal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use super::proposal::{FileEdit, LineReplacement, PatchProposal};
use crate::errors::FixerError;

/// Why a proposal was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardRejection {
    PathTraversal,
    FileCountExceeded,
    LineChangeExceeded,
    OutsideSubtree,
    /// Range does not fit the live file, overlapping ranges, or missing target
    MalformedEdit,
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GuardRejection::PathTraversal => "path traversal",
            GuardRejection::FileCountExceeded => "file-count limit exceeded",
            GuardRejection::LineChangeExceeded => "line-change limit exceeded",
            GuardRejection::OutsideSubtree => "target outside allowed subtree",
            GuardRejection::MalformedEdit => "malformed edit",
        };
        f.write_str(s)
    }
}

/// Guard verdict as recorded in the run log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GuardResult {
    Accepted,
    Rejected {
        reason: GuardRejection,
        detail: String,
    },
}

impl GuardResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, GuardResult::Accepted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: GuardRejection,
    pub detail: String,
}

impl Rejection {
    fn new(reason: GuardRejection, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl From<Rejection> for FixerError {
    fn from(r: Rejection) -> Self {
        FixerError::PatchGuardRejected {
            reason: r.reason,
            detail: r.detail,
        }
    }
}

impl From<Rejection> for GuardResult {
    fn from(r: Rejection) -> Self {
        GuardResult::Rejected {
            reason: r.reason,
            detail: r.detail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardLimits {
    pub max_files: usize,
    pub max_changed_lines: usize,
}

/// One target file that passed validation, with its live contents
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub original: Vec<u8>,
    pub text: String,
    pub replacements: Vec<LineReplacement>,
}

#[derive(Debug, Clone)]
pub struct PatchGuard {
    root: PathBuf,
    subtree: PathBuf,
    limits: GuardLimits,
}

impl PatchGuard {
    pub fn new(root: impl Into<PathBuf>, subtree: impl Into<PathBuf>, limits: GuardLimits) -> Self {
        let subtree = subtree.into();
        // Edit paths are compared after normalization, so the subtree must be too
        let subtree = normalize_lexically(&subtree).unwrap_or(subtree);
        Self {
            root: root.into(),
            subtree,
            limits,
        }
    }

    pub fn limits(&self) -> GuardLimits {
        self.limits
    }

    /// Validate a proposal without touching the workspace
    pub fn validate(&self, proposal: &PatchProposal) -> Result<Vec<ValidatedFile>, Rejection> {
        let result = self.validate_inner(proposal);
        match &result {
            Ok(files) => debug!(files = files.len(), "patch accepted by guard"),
            Err(r) => warn!(reason = %r.reason, detail = %r.detail, "patch rejected by guard"),
        }
        result
    }

    fn validate_inner(&self, proposal: &PatchProposal) -> Result<Vec<ValidatedFile>, Rejection> {
        if proposal.is_empty() {
            return Err(Rejection::new(
                GuardRejection::MalformedEdit,
                "proposal contains no replacements",
            ));
        }

        // (a) paths, merging edits that name the same file
        let mut targets: BTreeMap<PathBuf, (String, Vec<LineReplacement>)> = BTreeMap::new();
        for edit in &proposal.edits {
            let normalized = self.resolve(edit)?;
            let entry = targets
                .entry(normalized)
                .or_insert_with(|| (edit.path.clone(), Vec::new()));
            entry.1.extend(edit.replacements.iter().cloned());
        }

        // (b) file count
        if targets.len() > self.limits.max_files {
            return Err(Rejection::new(
                GuardRejection::FileCountExceeded,
                format!(
                    "{} files > limit {}",
                    targets.len(),
                    self.limits.max_files
                ),
            ));
        }

        let mut files = Vec::with_capacity(targets.len());
        for (normalized, (rel_path, mut replacements)) in targets {
            let abs_path = self.root.join(&normalized);
            let original = fs::read(&abs_path).map_err(|e| {
                Rejection::new(
                    GuardRejection::MalformedEdit,
                    format!("cannot read target {}: {}", rel_path, e),
                )
            })?;
            let text = String::from_utf8(original.clone()).map_err(|_| {
                Rejection::new(
                    GuardRejection::MalformedEdit,
                    format!("target {} is not UTF-8", rel_path),
                )
            })?;
            replacements.sort_by_key(|r| (r.start, r.end));
            files.push(ValidatedFile {
                rel_path,
                abs_path,
                original,
                text,
                replacements,
            });
        }

        // (c) changed-line budget
        let changed: usize = files
            .iter()
            .map(|f| {
                let live: Vec<&str> = f.text.lines().collect();
                f.replacements
                    .iter()
                    .map(|r| changed_lines(&live, r))
                    .sum::<usize>()
            })
            .sum();
        if changed > self.limits.max_changed_lines {
            return Err(Rejection::new(
                GuardRejection::LineChangeExceeded,
                format!(
                    "{} changed lines > limit {}",
                    changed, self.limits.max_changed_lines
                ),
            ));
        }

        // (d) ranges fit the live file and do not overlap
        for file in &files {
            let line_count = file.text.lines().count();
            let mut previous_end = 0usize;
            for (i, r) in file.replacements.iter().enumerate() {
                if r.start > r.end || r.end > line_count {
                    return Err(Rejection::new(
                        GuardRejection::MalformedEdit,
                        format!(
                            "range {}..{} does not fit {} ({} lines)",
                            r.start, r.end, file.rel_path, line_count
                        ),
                    ));
                }
                if i > 0 && r.start < previous_end {
                    return Err(Rejection::new(
                        GuardRejection::MalformedEdit,
                        format!("overlapping ranges in {}", file.rel_path),
                    ));
                }
                previous_end = r.end;
            }
        }

        Ok(files)
    }

    /// Resolve an edit path to a normalized workspace-relative path inside the subtree
    fn resolve(&self, edit: &FileEdit) -> Result<PathBuf, Rejection> {
        let raw = Path::new(&edit.path);
        if edit.path.trim().is_empty() {
            return Err(Rejection::new(GuardRejection::MalformedEdit, "empty target path"));
        }
        if raw.is_absolute() || edit.path.starts_with('/') || edit.path.starts_with('\\') {
            return Err(Rejection::new(
                GuardRejection::OutsideSubtree,
                format!("absolute path {}", edit.path),
            ));
        }

        let normalized = normalize_lexically(raw).ok_or_else(|| {
            Rejection::new(
                GuardRejection::PathTraversal,
                format!("{} escapes the workspace", edit.path),
            )
        })?;

        if !normalized.starts_with(&self.subtree) || normalized == self.subtree {
            return Err(Rejection::new(
                GuardRejection::OutsideSubtree,
                format!(
                    "{} is not under {}/",
                    edit.path,
                    self.subtree.display()
                ),
            ));
        }

        // Symlinks inside the subtree may still point elsewhere
        let abs = self.root.join(&normalized);
        if abs.exists() {
            let allowed = self
                .root
                .join(&self.subtree)
                .canonicalize()
                .map_err(|e| {
                    Rejection::new(
                        GuardRejection::OutsideSubtree,
                        format!("subtree unavailable: {}", e),
                    )
                })?;
            let real = abs.canonicalize().map_err(|e| {
                Rejection::new(
                    GuardRejection::MalformedEdit,
                    format!("cannot resolve {}: {}", edit.path, e),
                )
            })?;
            if !real.starts_with(&allowed) {
                return Err(Rejection::new(
                    GuardRejection::PathTraversal,
                    format!("{} resolves outside the subtree", edit.path),
                ));
            }
        }

        Ok(normalized)
    }
}

/// Resolve `.` and `..` without touching the filesystem. `None` if it climbs above the root.
pub fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => parts.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().collect())
}

/// Removed plus added lines, not counting lines the replacement leaves as they were
pub fn changed_lines(live: &[&str], r: &LineReplacement) -> usize {
    let old: Vec<&str> = (r.start..r.end)
        .filter_map(|i| live.get(i).copied())
        .collect();
    let unchanged = old
        .iter()
        .zip(r.lines.iter())
        .filter(|(a, b)| **a == b.as_str())
        .count();
    old.len() + r.lines.len() - 2 * unchanged
}

// ── Tests ────────────────────────────────────────────────────────────────────
