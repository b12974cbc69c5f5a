// Run result types

use serde::Serialize;
use std::fmt;

use crate::audit::IterationRecord;
use crate::runner::TestOutcome;

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Tests pass; the last applied patch stays in place
    Success,
    /// Iteration budget spent without a passing patch
    Exhausted,
    /// No untried candidate was left to apply
    NoCandidate,
}

impl StopReason {
    /// Process exit code reported by the CLI
    pub fn exit_code(&self) -> u8 {
        match self {
            StopReason::Success => 0,
            StopReason::Exhausted => 2,
            StopReason::NoCandidate => 3,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Success => "success",
            StopReason::Exhausted => "exhausted",
            StopReason::NoCandidate => "no-candidate",
        };
        f.write_str(s)
    }
}

/// Everything a caller needs after a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stop_reason: StopReason,
    /// Iterations started (baseline probe excluded)
    pub iterations: u32,
    pub records: Vec<IterationRecord>,
    /// Most recent test outcome, baseline included
    pub final_outcome: Option<TestOutcome>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.stop_reason == StopReason::Success
    }

    /// Number of heuristics created during the run
    pub fn heuristics_created(&self) -> usize {
        self.records
            .iter()
            .flat_map(|r| r.deltas.iter())
            .filter(|d| d.kind == crate::reflect::DeltaKind::Created)
            .count()
    }
}
