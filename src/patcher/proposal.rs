// Patch proposals - concrete, line-addressed edits produced by the planner

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::signature::SignaturePattern;
use crate::store::FixTemplate;

/// Replace lines `[start, end)` (0-based) with `lines`. `start == end` inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReplacement {
    pub start: usize,
    pub end: usize,
    pub lines: Vec<String>,
}

impl LineReplacement {
    pub fn replace_line(index: usize, line: impl Into<String>) -> Self {
        Self {
            start: index,
            end: index + 1,
            lines: vec![line.into()],
        }
    }

    pub fn insert_before(index: usize, lines: Vec<String>) -> Self {
        Self {
            start: index,
            end: index,
            lines,
        }
    }
}

/// All replacements for one file, path relative to the workspace root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub replacements: Vec<LineReplacement>,
}

/// Where a proposal came from; decides how the reflector learns from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalOrigin {
    Heuristic { id: String },
    WebAssisted,
    None,
}

impl ProposalOrigin {
    pub fn heuristic_id(&self) -> Option<&str> {
        match self {
            ProposalOrigin::Heuristic { id } => Some(id),
            _ => Option::None,
        }
    }
}

impl fmt::Display for ProposalOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalOrigin::Heuristic { id } => write!(f, "heuristic:{}", id),
            ProposalOrigin::WebAssisted => f.write_str("web-assisted"),
            ProposalOrigin::None => f.write_str("none"),
        }
    }
}

/// A candidate patch. Lives for one iteration at most.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchProposal {
    pub edits: Vec<FileEdit>,
    pub origin: ProposalOrigin,
    /// Pattern a new heuristic is keyed by if this synthesized proposal passes
    pub learn_as: SignaturePattern,
    /// Template that produced the edits
    pub template: FixTemplate,
    pub rationale: String,
}

impl PatchProposal {
    /// Stable identity of the edits, independent of origin
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for edit in &self.edits {
            hasher.update(edit.path.as_bytes());
            hasher.update([0u8]);
            for r in &edit.replacements {
                hasher.update(r.start.to_le_bytes());
                hasher.update(r.end.to_le_bytes());
                for line in &r.lines {
                    hasher.update(line.as_bytes());
                    hasher.update([b'\n']);
                }
                hasher.update([0u8]);
            }
        }
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Distinct target paths
    pub fn files(&self) -> BTreeSet<&str> {
        self.edits.iter().map(|e| e.path.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.iter().all(|e| e.replacements.is_empty())
    }
}
