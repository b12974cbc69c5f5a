// Reflector - turns a test outcome into heuristic store updates
//
// Heuristic-backed patches are reinforced or penalized. Synthesized patches that
// pass become new heuristics. Inconclusive runs change nothing.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LearningConfig;
use crate::patcher::{PatchProposal, ProposalOrigin};
use crate::runner::TestOutcome;
use crate::store::{Heuristic, HeuristicStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Reinforced,
    Penalized,
    Created,
}

/// One change to the store, recorded in the iteration log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicDelta {
    pub key: String,
    pub heuristic_id: String,
    pub kind: DeltaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_before: Option<f64>,
    pub confidence_after: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reflection {
    pub deltas: Vec<HeuristicDelta>,
    /// Environment failure: no verdict, nothing learned
    pub inconclusive: bool,
}

impl Reflection {
    pub fn changed_store(&self) -> bool {
        !self.deltas.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Reflector {
    step: f64,
    seed: f64,
}

impl Default for Reflector {
    fn default() -> Self {
        Self::from_config(&LearningConfig::default())
    }
}

impl Reflector {
    pub fn new(step: f64, seed: f64) -> Self {
        Self { step, seed }
    }

    pub fn from_config(config: &LearningConfig) -> Self {
        Self::new(config.confidence_step, config.seed_confidence)
    }

    /// Update `store` from the outcome of testing `proposal`
    pub fn reflect(
        &self,
        store: &mut HeuristicStore,
        proposal: &PatchProposal,
        outcome: &TestOutcome,
    ) -> Reflection {
        if outcome.is_inconclusive() {
            debug!("inconclusive outcome, store untouched");
            return Reflection {
                deltas: Vec::new(),
                inconclusive: true,
            };
        }

        let delta = match &proposal.origin {
            ProposalOrigin::Heuristic { id } => self.score_existing(store, id, outcome.passed),
            ProposalOrigin::WebAssisted | ProposalOrigin::None if outcome.passed => {
                Some(self.learn(store, proposal))
            }
            ProposalOrigin::WebAssisted | ProposalOrigin::None => None,
        };

        Reflection {
            deltas: delta.into_iter().collect(),
            inconclusive: false,
        }
    }

    fn score_existing(
        &self,
        store: &mut HeuristicStore,
        id: &str,
        passed: bool,
    ) -> Option<HeuristicDelta> {
        let Some(heuristic) = store.find_by_id_mut(id) else {
            warn!(heuristic = id, "applied heuristic no longer in store");
            return None;
        };
        let before = heuristic.confidence;
        let kind = if passed {
            heuristic.record_success(self.step);
            DeltaKind::Reinforced
        } else {
            heuristic.record_failure(self.step);
            DeltaKind::Penalized
        };
        info!(
            key = %heuristic.key(),
            before,
            after = heuristic.confidence,
            ?kind,
            "heuristic updated"
        );
        Some(HeuristicDelta {
            key: heuristic.key(),
            heuristic_id: heuristic.id.clone(),
            kind,
            confidence_before: Some(before),
            confidence_after: heuristic.confidence,
        })
    }

    /// A synthesized fix passed: reinforce the heuristic with its key when it
    /// carries the same template, otherwise store the passing template under that key
    fn learn(&self, store: &mut HeuristicStore, proposal: &PatchProposal) -> HeuristicDelta {
        let key = proposal.learn_as.key();
        let mut displaced = None;
        if let Some(existing) = store.get(&key) {
            if existing.template == proposal.template {
                let id = existing.id.clone();
                if let Some(delta) = self.score_existing(store, &id, true) {
                    return delta;
                }
            } else {
                displaced = Some((existing.id.clone(), existing.confidence));
            }
        }

        let mut heuristic = Heuristic::new(
            proposal.learn_as.clone(),
            proposal.template.clone(),
            self.seed,
            proposal.rationale.clone(),
        );
        heuristic.times_applied = 1;
        heuristic.times_succeeded = 1;
        let delta = HeuristicDelta {
            key: heuristic.key(),
            heuristic_id: heuristic.id.clone(),
            kind: DeltaKind::Created,
            confidence_before: displaced.as_ref().map(|(_, confidence)| *confidence),
            confidence_after: heuristic.confidence,
        };
        match &displaced {
            Some((old_id, _)) => info!(
                key = %delta.key,
                replaced = %old_id,
                confidence = delta.confidence_after,
                "heuristic template replaced"
            ),
            None => info!(key = %delta.key, confidence = delta.confidence_after, "heuristic learned"),
        }
        store.insert(heuristic);
        delta
    }
}
