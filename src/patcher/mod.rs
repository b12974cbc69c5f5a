// Guarded patcher - validates, applies and reverses patch proposals
//
// Nothing is written unless the whole proposal passes the guard. Every applied
// patch yields exactly one checkpoint, and rollback restores the exact bytes.

mod checkpoint;
mod diff;
mod guard;
mod proposal;

pub use checkpoint::Checkpoint;
pub use diff::render_file_diff;
pub use guard::{
    changed_lines, normalize_lexically, GuardLimits, GuardRejection, GuardResult, PatchGuard,
    Rejection, ValidatedFile,
};
pub use proposal::{FileEdit, LineReplacement, PatchProposal, ProposalOrigin};

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::constants::EDITS_ARTIFACT;
use crate::errors::{FixerError, FixerResult};

/// Result of a successful apply
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    pub checkpoint: Checkpoint,
    pub diff: String,
    pub files: Vec<String>,
}

/// Entry of the edits artifact, readable by editor integrations
#[derive(Debug, Serialize)]
struct EditArtifact<'a> {
    path: &'a str,
    #[serde(rename = "newText")]
    new_text: &'a str,
}

pub struct Patcher {
    guard: PatchGuard,
    /// Directory for the edits artifact; `None` disables it
    state_dir: Option<PathBuf>,
}

impl Patcher {
    pub fn new(root: impl Into<PathBuf>, subtree: impl Into<PathBuf>, limits: GuardLimits) -> Self {
        Self {
            guard: PatchGuard::new(root, subtree, limits),
            state_dir: None,
        }
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn guard(&self) -> &PatchGuard {
        &self.guard
    }

    /// Run the guard only
    pub fn validate(&self, proposal: &PatchProposal) -> GuardResult {
        match self.guard.validate(proposal) {
            Ok(_) => GuardResult::Accepted,
            Err(r) => r.into(),
        }
    }

    /// Validate and write the proposal. On rejection nothing is touched.
    pub fn apply(&self, proposal: &PatchProposal) -> FixerResult<AppliedPatch> {
        let files = self.guard.validate(proposal)?;

        let mut checkpoint = Checkpoint::new();
        for file in &files {
            checkpoint.capture(&file.abs_path, file.original.clone());
        }

        let mut diff = String::new();
        let mut written: Vec<(String, String)> = Vec::with_capacity(files.len());
        for file in &files {
            let patched = splice(&file.text, &file.replacements);
            if let Err(e) = fs::write(&file.abs_path, patched.as_bytes()) {
                // Leave the workspace as it was before this call
                if let Err(restore_err) = checkpoint.restore() {
                    warn!(error = %restore_err, "restore after failed write also failed");
                }
                return Err(FixerError::WorkspaceWrite {
                    path: file.abs_path.clone(),
                    reason: e.to_string(),
                });
            }
            diff.push_str(&render_file_diff(
                &file.rel_path,
                &file.text,
                &file.replacements,
            ));
            written.push((file.rel_path.clone(), patched));
        }

        if let Some(dir) = &self.state_dir {
            if let Err(e) = write_edits_artifact(dir, &written) {
                warn!(error = %e, "failed to write edits artifact");
            }
        }

        let files: Vec<String> = written.into_iter().map(|(path, _)| path).collect();
        info!(
            checkpoint = %checkpoint.id,
            files = ?files,
            origin = %proposal.origin,
            "patch applied"
        );
        Ok(AppliedPatch {
            checkpoint,
            diff,
            files,
        })
    }

    /// Restore the checkpoint. Idempotent.
    pub fn rollback(&self, checkpoint: &Checkpoint) -> FixerResult<()> {
        checkpoint.restore()?;
        info!(checkpoint = %checkpoint.id, "patch rolled back");
        Ok(())
    }
}

/// Apply sorted, disjoint replacements to `text`, keeping its line-ending style
/// and whether it ends with a newline.
pub fn splice(text: &str, replacements: &[LineReplacement]) -> String {
    let eol = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing_newline = text.is_empty() || text.ends_with('\n');
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();

    // Bottom-up so earlier indices stay valid
    for r in replacements.iter().rev() {
        let end = r.end.min(lines.len());
        let start = r.start.min(end);
        lines.splice(start..end, r.lines.iter().cloned());
    }

    let mut out = lines.join(eol);
    if trailing_newline && !lines.is_empty() {
        out.push_str(eol);
    }
    out
}

fn write_edits_artifact(dir: &Path, written: &[(String, String)]) -> anyhow::Result<()> {
    use anyhow::Context;

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    let entries: Vec<EditArtifact<'_>> = written
        .iter()
        .map(|(path, text)| EditArtifact {
            path,
            new_text: text,
        })
        .collect();
    let json = serde_json::to_string_pretty(&entries).context("Failed to serialize edits")?;
    let path = dir.join(EDITS_ARTIFACT);
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{SignatureKind, SignaturePattern};
    use crate::store::FixTemplate;
    use tempfile::TempDir;

    const MAIN: &str = "def inc(x):\n    return x - 1\n";

    fn setup() -> (TempDir, Patcher) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/main.py"), MAIN).unwrap();
        let patcher = Patcher::new(
            dir.path(),
            "app",
            GuardLimits {
                max_files: 5,
                max_changed_lines: 50,
            },
        )
        .with_state_dir(dir.path().join(".selfevolve"));
        (dir, patcher)
    }

    fn proposal(path: &str, r: LineReplacement) -> PatchProposal {
        PatchProposal {
            edits: vec![FileEdit {
                path: path.into(),
                replacements: vec![r],
            }],
            origin: ProposalOrigin::None,
            learn_as: SignaturePattern::of_kind(SignatureKind::OffByOne),
            template: FixTemplate::line_rewrite("x - 1", "x + 1"),
            rationale: String::new(),
        }
    }

    // ── splice ──

    #[test]
    fn test_splice_preserves_crlf_and_missing_final_newline() {
        let text = "a\r\nb\r\nc";
        let out = splice(text, &[LineReplacement::replace_line(1, "B")]);
        assert_eq!(out, "a\r\nB\r\nc");
    }

    #[test]
    fn test_splice_insert_and_replace_bottom_up() {
        let out = splice(
            "a\nb\nc\n",
            &[
                LineReplacement::insert_before(0, vec!["z".into()]),
                LineReplacement::replace_line(2, "C"),
            ],
        );
        assert_eq!(out, "z\na\nb\nC\n");
    }

    // ── apply / rollback ──

    #[test]
    fn test_apply_then_rollback_is_byte_identical() {
        let (dir, patcher) = setup();
        let applied = patcher
            .apply(&proposal(
                "app/main.py",
                LineReplacement::replace_line(1, "    return x + 1"),
            ))
            .unwrap();

        let patched = fs::read_to_string(dir.path().join("app/main.py")).unwrap();
        assert_eq!(patched, "def inc(x):\n    return x + 1\n");
        assert!(applied.diff.contains("+    return x + 1"));
        assert_eq!(applied.files, vec!["app/main.py".to_string()]);
        assert_eq!(applied.checkpoint.len(), 1);

        patcher.rollback(&applied.checkpoint).unwrap();
        assert_eq!(fs::read(dir.path().join("app/main.py")).unwrap(), MAIN.as_bytes());
        patcher.rollback(&applied.checkpoint).unwrap();
        assert_eq!(fs::read(dir.path().join("app/main.py")).unwrap(), MAIN.as_bytes());
    }

    #[test]
    fn test_rejected_patch_touches_nothing() {
        let (dir, patcher) = setup();
        fs::write(dir.path().join("README.md"), "readme\n").unwrap();

        let err = patcher
            .apply(&proposal("README.md", LineReplacement::replace_line(0, "pwned")))
            .unwrap_err();
        assert!(matches!(
            err,
            FixerError::PatchGuardRejected {
                reason: GuardRejection::OutsideSubtree,
                ..
            }
        ));
        assert_eq!(fs::read_to_string(dir.path().join("README.md")).unwrap(), "readme\n");
        assert!(!dir.path().join(".selfevolve").join(EDITS_ARTIFACT).exists());
    }

    #[test]
    fn test_edits_artifact_written() {
        let (dir, patcher) = setup();
        patcher
            .apply(&proposal(
                "app/main.py",
                LineReplacement::replace_line(1, "    return x + 1"),
            ))
            .unwrap();
        let raw = fs::read_to_string(dir.path().join(".selfevolve").join(EDITS_ARTIFACT)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["path"], "app/main.py");
        assert_eq!(json[0]["newText"], "def inc(x):\n    return x + 1\n");
    }

    #[test]
    fn test_validate_reports_reason() {
        let (_dir, patcher) = setup();
        let result = patcher.validate(&proposal(
            "app/../../x.py",
            LineReplacement::replace_line(0, "x"),
        ));
        assert!(matches!(
            result,
            GuardResult::Rejected {
                reason: GuardRejection::PathTraversal,
                ..
            }
        ));
    }
}
