// Planner - turns a failure signature into an ordered list of patch proposals
//
// Stored heuristics come first, ranked by the store. Only when none of them
// yields an untried proposal does the planner consult the knowledge source and
// synthesize one best-effort candidate from the remedy catalog.

mod remedies;

pub use remedies::{remedies_for, Remedy};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::constants::DEFAULT_KNOWLEDGE_TIMEOUT_SECS;
use crate::context::WorkspaceSnapshot;
use crate::knowledge::{KnowledgeSource, NoKnowledge, ReferenceQuery};
use crate::patcher::{PatchProposal, ProposalOrigin};
use crate::signature::{BugSignature, SignaturePattern};
use crate::store::HeuristicStore;

/// Ordered candidates for one iteration
#[derive(Debug, Clone)]
pub struct Plan {
    pub signature: BugSignature,
    candidates: VecDeque<PatchProposal>,
    /// Reference text returned by the knowledge lookup, if one was made
    pub reference: Option<String>,
}

impl Plan {
    /// Take the next candidate, best first
    pub fn next_candidate(&mut self) -> Option<PatchProposal> {
        self.candidates.pop_front()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &PatchProposal> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

pub struct Planner {
    knowledge: Arc<dyn KnowledgeSource>,
    lookup_timeout: Duration,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(Arc::new(NoKnowledge))
    }
}

impl Planner {
    pub fn new(knowledge: Arc<dyn KnowledgeSource>) -> Self {
        Self {
            knowledge,
            lookup_timeout: Duration::from_secs(DEFAULT_KNOWLEDGE_TIMEOUT_SECS),
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Build the plan. Proposals whose fingerprint is in `tried` are dropped.
    pub async fn plan(
        &self,
        signature: &BugSignature,
        store: &HeuristicStore,
        snapshot: &WorkspaceSnapshot,
        tried: &HashSet<String>,
    ) -> Plan {
        let candidates = self.heuristic_candidates(signature, store, snapshot, tried);
        if !candidates.is_empty() {
            info!(
                candidates = candidates.len(),
                signature = %signature,
                "planned from stored heuristics"
            );
            return Plan {
                signature: signature.clone(),
                candidates,
                reference: None,
            };
        }

        if !self.knowledge.is_configured() {
            info!(signature = %signature, "no stored heuristic applies and no knowledge source configured");
            return Plan {
                signature: signature.clone(),
                candidates: VecDeque::new(),
                reference: None,
            };
        }

        let reference = self.lookup(signature).await;
        let candidates: VecDeque<PatchProposal> = self
            .synthesize(signature, snapshot, tried, reference.is_some())
            .into_iter()
            .collect();
        info!(
            candidates = candidates.len(),
            reference = reference.is_some(),
            source = self.knowledge.name(),
            "planned from remedy catalog"
        );
        Plan {
            signature: signature.clone(),
            candidates,
            reference,
        }
    }

    /// Proposals from stored heuristics, ranked, deduplicated and filtered
    pub fn heuristic_candidates(
        &self,
        signature: &BugSignature,
        store: &HeuristicStore,
        snapshot: &WorkspaceSnapshot,
        tried: &HashSet<String>,
    ) -> VecDeque<PatchProposal> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates = VecDeque::new();

        for heuristic in store.ranked_matches(signature) {
            let edits = heuristic.template.instantiate(snapshot, signature);
            if edits.is_empty() {
                debug!(key = %heuristic.key(), "heuristic template found no site");
                continue;
            }
            let proposal = PatchProposal {
                edits,
                origin: ProposalOrigin::Heuristic {
                    id: heuristic.id.clone(),
                },
                learn_as: heuristic.pattern.clone(),
                template: heuristic.template.clone(),
                rationale: format!(
                    "heuristic {} (confidence {:.2}): {}",
                    heuristic.key(),
                    heuristic.confidence,
                    heuristic.description
                ),
            };
            let fingerprint = proposal.fingerprint();
            if tried.contains(&fingerprint) || !seen.insert(fingerprint) {
                debug!(key = %heuristic.key(), "dropping duplicate or already tried proposal");
                continue;
            }
            candidates.push_back(proposal);
        }
        candidates
    }

    async fn lookup(&self, signature: &BugSignature) -> Option<String> {
        let query = ReferenceQuery::for_signature(signature);
        match tokio::time::timeout(self.lookup_timeout, self.knowledge.fetch_reference(&query)).await
        {
            Ok(reference) => reference,
            Err(_) => {
                warn!(
                    timeout_secs = self.lookup_timeout.as_secs_f64(),
                    "reference lookup timed out"
                );
                None
            }
        }
    }

    /// One best-effort proposal from the remedy catalog
    fn synthesize(
        &self,
        signature: &BugSignature,
        snapshot: &WorkspaceSnapshot,
        tried: &HashSet<String>,
        has_reference: bool,
    ) -> Option<PatchProposal> {
        let origin = if has_reference {
            ProposalOrigin::WebAssisted
        } else {
            ProposalOrigin::None
        };

        remedies_for(signature.kind).into_iter().find_map(|remedy| {
            let edits = remedy.template.instantiate(snapshot, signature);
            if edits.is_empty() {
                return None;
            }
            let learn_as = if signature.kind.is_learnable() {
                SignaturePattern::learned_from(signature)
            } else {
                SignaturePattern::of_kind(remedy.kind)
            };
            let proposal = PatchProposal {
                edits,
                origin: origin.clone(),
                learn_as,
                template: remedy.template,
                rationale: format!("built-in remedy: {}", remedy.description),
            };
            if tried.contains(&proposal.fingerprint()) {
                return None;
            }
            Some(proposal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureKind;
    use crate::store::{FixTemplate, Heuristic};
    use async_trait::async_trait;

    struct StaticKnowledge(Option<&'static str>);

    #[async_trait]
    impl KnowledgeSource for StaticKnowledge {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_reference(&self, _query: &ReferenceQuery) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    struct SlowKnowledge;

    #[async_trait]
    impl KnowledgeSource for SlowKnowledge {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch_reference(&self, _query: &ReferenceQuery) -> Option<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Some("too late".into())
        }
    }

    fn snapshot() -> WorkspaceSnapshot {
        WorkspaceSnapshot::from_files([(
            "app/main.py".to_string(),
            "def inc(x):\n    return x - 1\n\ndef top(xs):\n    s = xs.sort()\n    return s[0]\n"
                .to_string(),
        )])
    }

    fn off_by_one_heuristic(confidence: f64) -> Heuristic {
        Heuristic::new(
            SignaturePattern::of_kind(SignatureKind::OffByOne),
            FixTemplate::line_rewrite(
                r"^(?P<indent>\s*)return\s+(?P<var>\w+)\s*-\s*\d+\s*$",
                "${indent}return ${var} + 1",
            ),
            confidence,
            "off-by-one",
        )
    }

    fn off_by_one_sig() -> BugSignature {
        BugSignature::new(SignatureKind::OffByOne, "assert # == #")
    }

    #[tokio::test]
    async fn test_heuristic_candidates_ranked() {
        let mut store = HeuristicStore::default();
        store.insert(off_by_one_heuristic(0.9));
        // Same edit under a broader key: deduplicated
        let mut generic = off_by_one_heuristic(0.4);
        generic.pattern = SignaturePattern::of_kind(SignatureKind::Assertion);
        store.insert(generic);

        let mut plan = Planner::default()
            .plan(&off_by_one_sig(), &store, &snapshot(), &HashSet::new())
            .await;
        assert_eq!(plan.len(), 1);
        let top = plan.next_candidate().unwrap();
        assert_eq!(
            top.origin.heuristic_id(),
            Some(store.get("off-by-one").unwrap().id.as_str())
        );
        assert_eq!(top.edits[0].replacements[0].lines, vec!["    return x + 1"]);
    }

    #[tokio::test]
    async fn test_tried_proposals_are_dropped() {
        let mut store = HeuristicStore::default();
        store.insert(off_by_one_heuristic(0.9));
        let planner = Planner::default();
        let first = planner
            .plan(&off_by_one_sig(), &store, &snapshot(), &HashSet::new())
            .await;
        let tried: HashSet<String> = first.candidates().map(|p| p.fingerprint()).collect();

        let second = planner.plan(&off_by_one_sig(), &store, &snapshot(), &tried).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_no_heuristic_no_knowledge_is_empty() {
        let plan = Planner::default()
            .plan(
                &off_by_one_sig(),
                &HeuristicStore::default(),
                &snapshot(),
                &HashSet::new(),
            )
            .await;
        assert!(plan.is_empty());
        assert!(plan.reference.is_none());
    }

    #[tokio::test]
    async fn test_synthesized_origin_follows_reference() {
        let sig = BugSignature::new(SignatureKind::NoneDereference, "typeerror")
            .with_location("app/main.py", Some(6));

        let planner = Planner::new(Arc::new(StaticKnowledge(Some("docs"))));
        let mut plan = planner
            .plan(&sig, &HeuristicStore::default(), &snapshot(), &HashSet::new())
            .await;
        assert_eq!(plan.reference.as_deref(), Some("docs"));
        let p = plan.next_candidate().unwrap();
        assert_eq!(p.origin, ProposalOrigin::WebAssisted);
        assert_eq!(p.learn_as.key(), "none-dereference|file=app/main.py");
        assert_eq!(p.edits[0].replacements[0].lines, vec!["    s = sorted(xs)"]);

        let planner = Planner::new(Arc::new(StaticKnowledge(None)));
        let mut plan = planner
            .plan(&sig, &HeuristicStore::default(), &snapshot(), &HashSet::new())
            .await;
        assert_eq!(plan.next_candidate().unwrap().origin, ProposalOrigin::None);
    }

    #[tokio::test]
    async fn test_unknown_signature_learns_remedy_kind() {
        let planner = Planner::new(Arc::new(StaticKnowledge(None)));
        let mut plan = planner
            .plan(
                &BugSignature::unknown(),
                &HeuristicStore::default(),
                &snapshot(),
                &HashSet::new(),
            )
            .await;
        let p = plan.next_candidate().unwrap();
        assert_eq!(p.learn_as, SignaturePattern::of_kind(SignatureKind::OffByOne));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_times_out() {
        let planner = Planner::new(Arc::new(SlowKnowledge)).with_lookup_timeout(Duration::from_secs(1));
        let sig = BugSignature::new(SignatureKind::OffByOne, "");
        let mut plan = planner
            .plan(&sig, &HeuristicStore::default(), &snapshot(), &HashSet::new())
            .await;
        assert!(plan.reference.is_none());
        assert_eq!(plan.next_candidate().unwrap().origin, ProposalOrigin::None);
    }

    #[tokio::test]
    async fn test_ranking_is_stable() {
        let mut store = HeuristicStore::default();
        store.insert(off_by_one_heuristic(0.5));
        let planner = Planner::default();
        let a: Vec<String> = planner
            .plan(&off_by_one_sig(), &store, &snapshot(), &HashSet::new())
            .await
            .candidates()
            .map(|p| p.fingerprint())
            .collect();
        let b: Vec<String> = planner
            .plan(&off_by_one_sig(), &store, &snapshot(), &HashSet::new())
            .await
            .candidates()
            .map(|p| p.fingerprint())
            .collect();
        assert_eq!(a, b);
    }
}
