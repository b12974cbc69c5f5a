use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patcher::{GuardRejection, GuardResult, PatchProposal, ProposalOrigin};
use crate::reflect::HeuristicDelta;
use crate::runner::TestOutcome;
use crate::signature::BugSignature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationVerdict {
    Passed,
    Failed,
    /// Environment failure; the iteration still counts against the budget
    Inconclusive,
    /// Nothing left to try
    NoCandidate,
}

/// Identifying fields of a proposal, small enough to log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSummary {
    pub fingerprint: String,
    pub origin: ProposalOrigin,
    pub files: Vec<String>,
    pub learn_as: String,
    pub rationale: String,
}

impl From<&PatchProposal> for ProposalSummary {
    fn from(p: &PatchProposal) -> Self {
        Self {
            fingerprint: p.fingerprint(),
            origin: p.origin.clone(),
            files: p.files().into_iter().map(str::to_string).collect(),
            learn_as: p.learn_as.key(),
            rationale: p.rationale.clone(),
        }
    }
}

/// Candidate the guard refused during an iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub proposal: ProposalSummary,
    pub reason: GuardRejection,
    pub detail: String,
}

/// Everything that happened in one iteration. Appended to the run log, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based; 0 is the baseline probe
    pub index: u32,
    pub started_at: DateTime<Utc>,
    pub signature_in: BugSignature,
    #[serde(default)]
    pub rejected: Vec<RejectedCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<ProposalSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_result: Option<GuardResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TestOutcome>,
    #[serde(default)]
    pub rolled_back: bool,
    #[serde(default)]
    pub deltas: Vec<HeuristicDelta>,
    pub verdict: IterationVerdict,
}

impl IterationRecord {
    pub fn new(index: u32, signature_in: BugSignature) -> Self {
        Self {
            index,
            started_at: Utc::now(),
            signature_in,
            rejected: Vec::new(),
            applied: None,
            guard_result: None,
            diff: None,
            outcome: None,
            rolled_back: false,
            deltas: Vec::new(),
            verdict: IterationVerdict::NoCandidate,
        }
    }

    pub fn reject(&mut self, proposal: &PatchProposal, reason: GuardRejection, detail: String) {
        self.rejected.push(RejectedCandidate {
            proposal: proposal.into(),
            reason,
            detail: detail.clone(),
        });
        self.guard_result = Some(GuardResult::Rejected { reason, detail });
    }
}
