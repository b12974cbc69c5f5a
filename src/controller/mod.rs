// Iteration controller - drives plan → patch → test → reflect as a state machine
//
// One iteration is one applied-and-tested candidate. Guard rejections stay
// inside the iteration and move on to the next candidate. Every failed or
// inconclusive patch is rolled back before the next attempt, and the store is
// persisted after any reflect that changed it.

mod lock;
mod types;

pub use lock::RunLock;
pub use types::{RunReport, StopReason};

use anyhow::Context;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::audit::{self, AuditSink, IterationRecord, IterationVerdict, RunLog};
use crate::config::RunConfig;
use crate::context::{ContextReader, WorkspaceSnapshot};
use crate::errors::{FixerError, FixerResult};
use crate::knowledge::{self, KnowledgeSource};
use crate::patcher::{AppliedPatch, GuardLimits, GuardResult, PatchProposal, Patcher};
use crate::planner::{Plan, Planner};
use crate::reflect::Reflector;
use crate::runner::{CommandTestRunner, TestOutcome, TestRunner};
use crate::signature::BugSignature;
use crate::store::HeuristicStore;

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Start,
    Read,
    Plan,
    Apply,
    Validate,
    Reflect,
    StopSuccess,
    StopExhausted,
    StopNoCandidate,
}

impl LoopState {
    fn stop_reason(&self) -> Option<StopReason> {
        match self {
            LoopState::StopSuccess => Some(StopReason::Success),
            LoopState::StopExhausted => Some(StopReason::Exhausted),
            LoopState::StopNoCandidate => Some(StopReason::NoCandidate),
            _ => None,
        }
    }
}

/// Mutable state carried between transitions of one run
struct RunState {
    iteration: u32,
    signature: BugSignature,
    store: HeuristicStore,
    snapshot: WorkspaceSnapshot,
    tried: HashSet<String>,
    plan: Option<Plan>,
    record: Option<IterationRecord>,
    applied: Option<(PatchProposal, AppliedPatch)>,
    outcome: Option<TestOutcome>,
    last_outcome: Option<TestOutcome>,
    log: RunLog,
}

impl RunState {
    fn new() -> Self {
        Self {
            iteration: 0,
            signature: BugSignature::unknown(),
            store: HeuristicStore::default(),
            snapshot: WorkspaceSnapshot::default(),
            tried: HashSet::new(),
            plan: None,
            record: None,
            applied: None,
            outcome: None,
            last_outcome: None,
            log: RunLog::new(),
        }
    }
}

pub struct Controller {
    config: RunConfig,
    reader: ContextReader,
    planner: Planner,
    patcher: Patcher,
    runner: Arc<dyn TestRunner>,
    reflector: Reflector,
    sink: Arc<dyn AuditSink>,
}

impl Controller {
    /// Wire a controller from explicit collaborators
    pub fn new(
        config: RunConfig,
        runner: Arc<dyn TestRunner>,
        knowledge: Arc<dyn KnowledgeSource>,
        sink: Arc<dyn AuditSink>,
    ) -> FixerResult<Self> {
        config.validate()?;
        let reader = ContextReader::from_config(&config);
        let planner = Planner::new(knowledge)
            .with_lookup_timeout(Duration::from_secs(config.knowledge.timeout_secs));
        let patcher = Patcher::new(
            &config.workspace,
            &config.subtree,
            GuardLimits {
                max_files: config.max_files_per_patch,
                max_changed_lines: config.max_changed_lines,
            },
        )
        .with_state_dir(config.state_dir());
        let reflector = Reflector::from_config(&config.learning);
        Ok(Self {
            config,
            reader,
            planner,
            patcher,
            runner,
            reflector,
            sink,
        })
    }

    /// Wire the default collaborators selected by configuration
    pub fn from_config(config: RunConfig) -> anyhow::Result<Self> {
        let runner = Arc::new(CommandTestRunner::from_config(&config));
        let knowledge =
            knowledge::from_config(&config.knowledge).context("Failed to set up knowledge source")?;
        let sink = audit::from_config(&config).context("Failed to set up run log")?;
        Ok(Self::new(config, runner, knowledge, sink)?)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run until success, budget exhaustion or no candidate.
    ///
    /// Only an unreadable or busy workspace and store persistence failures
    /// surface as errors; everything else ends in a terminal state.
    pub async fn run(&self) -> FixerResult<RunReport> {
        let _lock = RunLock::acquire(&self.config.lock_path())?;
        if let Err(e) = self
            .sink
            .run_started(&self.config.workspace, self.config.max_iterations)
        {
            warn!(error = %e, "run log unavailable");
        }

        let mut run = RunState::new();
        let mut state = LoopState::Start;
        let stop_reason = loop {
            if let Some(reason) = state.stop_reason() {
                break reason;
            }
            state = match self.step(state, &mut run).await {
                Ok(next) => next,
                Err(e) => {
                    self.abandon(&mut run);
                    return Err(e);
                }
            };
        };

        let report = RunReport {
            stop_reason,
            iterations: run.iteration,
            records: run.log.into_records(),
            final_outcome: run.last_outcome,
        };
        info!(
            stop_reason = %report.stop_reason,
            iterations = report.iterations,
            "run finished"
        );
        if let Err(e) = self.sink.run_finished(&report) {
            warn!(error = %e, "failed to record run end");
        }
        Ok(report)
    }

    /// One state transition
    #[instrument(level = "debug", skip(self, run), fields(iteration = run.iteration))]
    async fn step(&self, state: LoopState, run: &mut RunState) -> FixerResult<LoopState> {
        match state {
            LoopState::Start => self.start(run).await,
            LoopState::Read => self.read(run),
            LoopState::Plan => self.plan(run).await,
            LoopState::Apply => self.apply(run),
            LoopState::Validate => self.validate(run).await,
            LoopState::Reflect => self.reflect(run),
            terminal => Ok(terminal),
        }
    }

    async fn start(&self, run: &mut RunState) -> FixerResult<LoopState> {
        self.reader.check_workspace()?;
        run.store = self.reader.load_store()?;
        info!(
            workspace = %self.config.workspace.display(),
            heuristics = run.store.len(),
            max_iterations = self.config.max_iterations,
            "run started"
        );

        if self.config.baseline_probe {
            let outcome = self.runner.run_tests(&self.config.workspace).await;
            run.last_outcome = Some(outcome.clone());
            if outcome.passed {
                info!("baseline already green");
                return Ok(LoopState::StopSuccess);
            }
            if let Some(sig) = outcome.signature.filter(|s| !s.is_environment_failure()) {
                debug!(signature = %sig, "baseline signature");
                run.signature = sig;
            }
        }
        Ok(LoopState::Read)
    }

    fn read(&self, run: &mut RunState) -> FixerResult<LoopState> {
        run.iteration += 1;
        run.snapshot = self.reader.snapshot()?;
        run.record = Some(IterationRecord::new(run.iteration, run.signature.clone()));
        debug!(
            iteration = run.iteration,
            files = run.snapshot.len(),
            signature = %run.signature,
            "iteration started"
        );
        Ok(LoopState::Plan)
    }

    async fn plan(&self, run: &mut RunState) -> FixerResult<LoopState> {
        let plan = self
            .planner
            .plan(&run.signature, &run.store, &run.snapshot, &run.tried)
            .await;
        run.plan = Some(plan);
        Ok(LoopState::Apply)
    }

    /// Try candidates in order until one is accepted
    fn apply(&self, run: &mut RunState) -> FixerResult<LoopState> {
        loop {
            let Some(proposal) = run.plan.as_mut().and_then(Plan::next_candidate) else {
                info!(iteration = run.iteration, "no untried candidate left");
                self.finish_iteration(run, IterationVerdict::NoCandidate);
                return Ok(LoopState::StopNoCandidate);
            };
            run.tried.insert(proposal.fingerprint());

            match self.patcher.apply(&proposal) {
                Ok(applied) => {
                    if let Some(record) = run.record.as_mut() {
                        record.applied = Some((&proposal).into());
                        record.guard_result = Some(GuardResult::Accepted);
                        record.diff = Some(applied.diff.clone());
                    }
                    run.applied = Some((proposal, applied));
                    return Ok(LoopState::Validate);
                }
                Err(FixerError::PatchGuardRejected { reason, detail }) => {
                    if let Some(record) = run.record.as_mut() {
                        record.reject(&proposal, reason, detail);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn validate(&self, run: &mut RunState) -> FixerResult<LoopState> {
        let outcome = self.runner.run_tests(&self.config.workspace).await;
        run.last_outcome = Some(outcome.clone());
        run.outcome = Some(outcome);
        Ok(LoopState::Reflect)
    }

    fn reflect(&self, run: &mut RunState) -> FixerResult<LoopState> {
        let (Some((proposal, applied)), Some(outcome)) = (run.applied.take(), run.outcome.take())
        else {
            return Ok(LoopState::Read);
        };

        let reflection = self.reflector.reflect(&mut run.store, &proposal, &outcome);
        let verdict = if outcome.passed {
            IterationVerdict::Passed
        } else if reflection.inconclusive {
            IterationVerdict::Inconclusive
        } else {
            IterationVerdict::Failed
        };

        let mut rolled_back = false;
        if !outcome.passed {
            self.patcher.rollback(&applied.checkpoint)?;
            rolled_back = true;
            if !outcome.is_inconclusive() {
                if let Some(sig) = outcome.signature.clone() {
                    run.signature = sig;
                }
            }
        }

        if let Some(record) = run.record.as_mut() {
            record.outcome = Some(outcome);
            record.rolled_back = rolled_back;
            record.deltas = reflection.deltas.clone();
        }

        if reflection.changed_store() {
            run.store.save(self.reader.store_path())?;
        }

        self.finish_iteration(run, verdict);

        if verdict == IterationVerdict::Passed {
            return Ok(LoopState::StopSuccess);
        }
        if run.iteration >= self.config.max_iterations {
            return Ok(LoopState::StopExhausted);
        }
        Ok(LoopState::Read)
    }

    /// Close the current record and report it
    fn finish_iteration(&self, run: &mut RunState, verdict: IterationVerdict) {
        let Some(mut record) = run.record.take() else {
            return;
        };
        record.verdict = verdict;
        info!(
            iteration = record.index,
            ?verdict,
            rejected = record.rejected.len(),
            rolled_back = record.rolled_back,
            "iteration finished"
        );
        if let Err(e) = self.sink.record(&record) {
            warn!(error = %e, "failed to record iteration");
        }
        run.log.push(record);
        run.plan = None;
    }

    /// Leave the workspace as it was when a fatal error interrupts an iteration
    fn abandon(&self, run: &mut RunState) {
        if let Some((_, applied)) = run.applied.take() {
            if let Err(e) = self.patcher.rollback(&applied.checkpoint) {
                warn!(error = %e, "rollback after fatal error failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stop_states_end_the_loop() {
        let running = [
            LoopState::Start,
            LoopState::Read,
            LoopState::Plan,
            LoopState::Apply,
            LoopState::Validate,
            LoopState::Reflect,
        ];
        assert!(running.iter().all(|s| s.stop_reason().is_none()));
        assert_eq!(LoopState::StopSuccess.stop_reason(), Some(StopReason::Success));
        assert_eq!(LoopState::StopExhausted.stop_reason(), Some(StopReason::Exhausted));
        assert_eq!(
            LoopState::StopNoCandidate.stop_reason(),
            Some(StopReason::NoCandidate)
        );
    }
}
