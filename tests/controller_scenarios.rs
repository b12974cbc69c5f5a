// End-to-end runs of the repair loop against a temporary workspace.
//
// The test suite is simulated by runners that inspect the workspace files, so
// no Python interpreter is needed.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use selfevolve::audit::{IterationVerdict, NoopSink};
use selfevolve::config::RunConfig;
use selfevolve::controller::{Controller, RunLock, StopReason};
use selfevolve::errors::FixerError;
use selfevolve::knowledge::{KnowledgeSource, NoKnowledge, ReferenceQuery};
use selfevolve::patcher::{GuardRejection, GuardResult, ProposalOrigin};
use selfevolve::reflect::DeltaKind;
use selfevolve::runner::{TestOutcome, TestRunner};
use selfevolve::signature::{BugSignature, SignatureKind, SignaturePattern};
use selfevolve::store::{FixTemplate, Heuristic, HeuristicStore};

const BUGGY: &str = "def inc(x):\n    return x - 1\n";
const FIXED: &str = "def inc(x):\n    return x + 1\n";

/// Passes once `app/calc.py` holds the correct increment
struct CalcSuite {
    calls: AtomicUsize,
    /// Whether failures point at the application file
    located: bool,
}

impl CalcSuite {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            located: true,
        })
    }

    /// Failures only name the test, as a bare assertion traceback does
    fn unlocated() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            located: false,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn off_by_one_failure(located: bool) -> TestOutcome {
    let sig = BugSignature::new(SignatureKind::OffByOne, "assert # == #")
        .with_test("tests/test_calc.py::test_inc");
    if located {
        TestOutcome::fail(sig.with_location("app/calc.py", Some(2)))
    } else {
        TestOutcome::fail(sig)
    }
}

#[async_trait]
impl TestRunner for CalcSuite {
    async fn run_tests(&self, workspace: &Path) -> TestOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match fs::read_to_string(workspace.join("app/calc.py")) {
            Ok(text) if text.contains("return x + 1") => TestOutcome::pass(),
            Ok(_) => off_by_one_failure(self.located),
            Err(e) => TestOutcome::environment_failure(&e.to_string()),
        }
    }
}

/// Never produces a verdict
struct BrokenSuite;

#[async_trait]
impl TestRunner for BrokenSuite {
    async fn run_tests(&self, _workspace: &Path) -> TestOutcome {
        TestOutcome::environment_failure("timed out after 1s")
    }
}

/// Always returns the same reference text
struct StaticKnowledge;

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_reference(&self, _query: &ReferenceQuery) -> Option<String> {
        Some("Source: https://docs.python.org/3/tutorial/\n\nArithmetic.".to_string())
    }
}

fn workspace(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, text) in files {
        let abs = dir.path().join(path);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(abs, text).unwrap();
    }
    dir
}

fn read(dir: &TempDir, path: &str) -> String {
    fs::read_to_string(dir.path().join(path)).unwrap()
}

fn rewrite(to: &str) -> FixTemplate {
    FixTemplate::line_rewrite(
        r"^(?P<indent>\s*)return\s+x\s*-\s*1\s*$",
        format!("${{indent}}return {}", to),
    )
}

fn seed_store(config: &RunConfig, heuristics: Vec<Heuristic>) {
    let mut store = HeuristicStore::default();
    for h in heuristics {
        store.insert(h);
    }
    store.save(&config.store_path()).unwrap();
}

fn load_store(config: &RunConfig) -> HeuristicStore {
    HeuristicStore::load(&config.store_path()).unwrap()
}

fn controller(
    config: RunConfig,
    runner: Arc<dyn TestRunner>,
    knowledge: Arc<dyn KnowledgeSource>,
) -> Controller {
    Controller::new(config, runner, knowledge, Arc::new(NoopSink)).unwrap()
}

#[tokio::test]
async fn test_seeded_heuristic_fixes_off_by_one_first_iteration() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let config = RunConfig::for_workspace(dir.path());
    seed_store(
        &config,
        vec![Heuristic::new(
            SignaturePattern::of_kind(SignatureKind::OffByOne),
            rewrite("x + 1"),
            0.9,
            "return x - 1 -> return x + 1",
        )],
    );

    let suite = CalcSuite::new();
    let report = controller(config.clone(), suite.clone(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Success);
    assert_eq!(report.iterations, 1);
    assert_eq!(suite.calls(), 1);
    assert_eq!(read(&dir, "app/calc.py"), FIXED);

    let record = &report.records[0];
    assert_eq!(record.verdict, IterationVerdict::Passed);
    assert_eq!(record.guard_result, Some(GuardResult::Accepted));
    assert!(!record.rolled_back);
    assert!(record.diff.as_deref().unwrap().contains("+    return x + 1"));
    let applied = record.applied.as_ref().unwrap();
    assert!(matches!(applied.origin, ProposalOrigin::Heuristic { .. }));
    assert_eq!(record.deltas[0].kind, DeltaKind::Reinforced);

    let store = load_store(&config);
    let h = store.get("off-by-one").unwrap();
    assert!(h.confidence > 0.9 && h.confidence <= 1.0);
    assert_eq!((h.times_applied, h.times_succeeded), (1, 1));

    assert!(dir.path().join(".selfevolve/edits.json").exists());
}

#[tokio::test]
async fn test_dotted_subtree_still_admits_app_files() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let mut config = RunConfig::for_workspace(dir.path());
    config.subtree = "./app".into();
    seed_store(
        &config,
        vec![Heuristic::new(
            SignaturePattern::of_kind(SignatureKind::OffByOne),
            rewrite("x + 1"),
            0.9,
            "",
        )],
    );

    let report = controller(config, CalcSuite::new(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();
    assert_eq!(report.stop_reason, StopReason::Success);
    assert!(report.records[0].rejected.is_empty());
    assert_eq!(read(&dir, "app/calc.py"), FIXED);
}

#[tokio::test]
async fn test_no_heuristic_no_knowledge_stops_without_candidate() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let config = RunConfig::for_workspace(dir.path());

    let suite = CalcSuite::new();
    let report = controller(config.clone(), suite.clone(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::NoCandidate);
    assert_eq!(report.stop_reason.exit_code(), 3);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].verdict, IterationVerdict::NoCandidate);
    assert_eq!(suite.calls(), 0);
    assert_eq!(read(&dir, "app/calc.py"), BUGGY);
    assert!(!config.store_path().exists());
}

#[tokio::test]
async fn test_oversized_candidate_rejected_next_tried_same_iteration() {
    let mut files: Vec<(String, &str)> = (1..=5)
        .map(|i| (format!("app/mod{}.py", i), BUGGY))
        .collect();
    files.push(("app/calc.py".to_string(), BUGGY));
    let refs: Vec<(&str, &str)> = files.iter().map(|(p, t)| (p.as_str(), *t)).collect();
    let dir = workspace(&refs);

    let mut config = RunConfig::for_workspace(dir.path());
    config.max_files_per_patch = 5;
    seed_store(
        &config,
        vec![
            Heuristic::new(
                SignaturePattern::of_kind(SignatureKind::OffByOne),
                rewrite("x + 1").with_target("app/*.py"),
                0.95,
                "every module",
            ),
            Heuristic::new(
                SignaturePattern::of_kind(SignatureKind::OffByOne).with_file("app/calc.py"),
                rewrite("x + 1"),
                0.6,
                "calc only",
            ),
        ],
    );

    let report = controller(config.clone(), CalcSuite::new(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Success);
    assert_eq!(report.iterations, 1);
    let record = &report.records[0];
    assert_eq!(record.rejected.len(), 1);
    assert_eq!(record.rejected[0].reason, GuardRejection::FileCountExceeded);
    assert_eq!(record.rejected[0].proposal.files.len(), 6);
    assert_eq!(record.applied.as_ref().unwrap().files, vec!["app/calc.py"]);

    for i in 1..=5 {
        assert_eq!(read(&dir, &format!("app/mod{}.py", i)), BUGGY);
    }
    assert_eq!(read(&dir, "app/calc.py"), FIXED);

    // A rejected proposal never reached the tests, so it is not scored
    let store = load_store(&config);
    let wide = store.get("off-by-one").unwrap();
    assert!((wide.confidence - 0.95).abs() < 1e-9);
    assert_eq!(wide.times_applied, 0);
}

#[tokio::test]
async fn test_every_candidate_fails_until_budget_exhausted() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let mut config = RunConfig::for_workspace(dir.path());
    config.max_iterations = 3;
    seed_store(
        &config,
        vec![
            Heuristic::new(
                SignaturePattern::of_kind(SignatureKind::OffByOne),
                rewrite("x + 2"),
                0.8,
                "plus two",
            ),
            Heuristic::new(
                SignaturePattern::of_kind(SignatureKind::OffByOne).with_file("app/calc.py"),
                rewrite("x + 3"),
                0.7,
                "plus three",
            ),
            Heuristic::new(
                SignaturePattern::of_kind(SignatureKind::Assertion),
                rewrite("x * 1"),
                0.6,
                "identity",
            ),
        ],
    );

    let suite = CalcSuite::new();
    let report = controller(config.clone(), suite.clone(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(report.stop_reason.exit_code(), 2);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.records.len(), 3);
    assert_eq!(suite.calls(), 3);
    for record in &report.records {
        assert_eq!(record.verdict, IterationVerdict::Failed);
        assert!(record.rolled_back);
        assert_eq!(record.deltas[0].kind, DeltaKind::Penalized);
    }
    // Each iteration tried a different candidate
    let fingerprints: std::collections::HashSet<&str> = report
        .records
        .iter()
        .map(|r| r.applied.as_ref().unwrap().fingerprint.as_str())
        .collect();
    assert_eq!(fingerprints.len(), 3);
    assert_eq!(read(&dir, "app/calc.py"), BUGGY);
    assert!(!report.final_outcome.as_ref().unwrap().passed);

    let store = load_store(&config);
    for h in store.iter() {
        assert_eq!(h.times_applied, 1);
        assert_eq!(h.times_succeeded, 0);
    }
    assert!((store.get("off-by-one").unwrap().confidence - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_learned_heuristic_converges_no_later_on_rerun() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let mut config = RunConfig::for_workspace(dir.path());
    config.baseline_probe = true;

    let first = controller(config.clone(), CalcSuite::new(), Arc::new(StaticKnowledge))
        .run()
        .await
        .unwrap();
    assert_eq!(first.stop_reason, StopReason::Success);
    assert_eq!(first.heuristics_created(), 1);
    let applied = first.records[0].applied.as_ref().unwrap();
    assert_eq!(applied.origin, ProposalOrigin::WebAssisted);
    assert_eq!(applied.learn_as, "off-by-one|file=app/calc.py");
    assert_eq!(read(&dir, "app/calc.py"), FIXED);

    let store = load_store(&config);
    assert_eq!(store.len(), 1);
    let learned = store.get("off-by-one|file=app/calc.py").unwrap();
    assert_eq!((learned.times_applied, learned.times_succeeded), (1, 1));

    // Same bug again, this time without any knowledge source
    fs::write(dir.path().join("app/calc.py"), BUGGY).unwrap();
    let second = controller(config.clone(), CalcSuite::new(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();
    assert_eq!(second.stop_reason, StopReason::Success);
    assert!(second.iterations <= first.iterations);
    assert!(matches!(
        second.records[0].applied.as_ref().unwrap().origin,
        ProposalOrigin::Heuristic { .. }
    ));
    assert_eq!(second.heuristics_created(), 0);

    // Nothing left to fix
    let third = controller(config.clone(), CalcSuite::new(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();
    assert_eq!(third.stop_reason, StopReason::Success);
    assert_eq!(third.iterations, 0);
    assert!(third.records.is_empty());
}

#[tokio::test]
async fn test_passing_remedy_replaces_failed_template_under_same_key() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let config = RunConfig::for_workspace(dir.path());
    seed_store(
        &config,
        vec![Heuristic::new(
            SignaturePattern::of_kind(SignatureKind::OffByOne),
            rewrite("x + 2"),
            0.9,
            "plus two",
        )],
    );

    let first = controller(config.clone(), CalcSuite::unlocated(), Arc::new(StaticKnowledge))
        .run()
        .await
        .unwrap();
    assert_eq!(first.stop_reason, StopReason::Success);
    assert_eq!(first.iterations, 2);
    assert_eq!(first.records[0].deltas[0].kind, DeltaKind::Penalized);
    let learned = &first.records[1].deltas[0];
    assert_eq!(learned.kind, DeltaKind::Created);
    assert_eq!(learned.key, "off-by-one");
    assert_eq!(first.heuristics_created(), 1);
    assert_eq!(read(&dir, "app/calc.py"), FIXED);

    let store = load_store(&config);
    assert_eq!(store.len(), 1);
    let h = store.get("off-by-one").unwrap();
    assert_ne!(h.template, rewrite("x + 2"));
    assert_eq!((h.times_applied, h.times_succeeded), (1, 1));

    // The stored template is the one that worked
    fs::write(dir.path().join("app/calc.py"), BUGGY).unwrap();
    let second = controller(config.clone(), CalcSuite::unlocated(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();
    assert_eq!(second.stop_reason, StopReason::Success);
    assert_eq!(second.iterations, 1);
    assert_eq!(second.records[0].deltas[0].kind, DeltaKind::Reinforced);
    assert_eq!(read(&dir, "app/calc.py"), FIXED);
}

#[tokio::test]
async fn test_environment_failure_is_inconclusive_and_rolled_back() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let mut config = RunConfig::for_workspace(dir.path());
    config.max_iterations = 1;
    seed_store(
        &config,
        vec![Heuristic::new(
            SignaturePattern::of_kind(SignatureKind::OffByOne),
            rewrite("x + 1"),
            0.9,
            "",
        )],
    );

    let report = controller(config.clone(), Arc::new(BrokenSuite), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    let record = &report.records[0];
    assert_eq!(record.verdict, IterationVerdict::Inconclusive);
    assert!(record.rolled_back);
    assert!(record.deltas.is_empty());
    assert_eq!(read(&dir, "app/calc.py"), BUGGY);

    let h = load_store(&config).get("off-by-one").cloned().unwrap();
    assert!((h.confidence - 0.9).abs() < 1e-9);
    assert_eq!(h.times_applied, 0);
}

#[tokio::test]
async fn test_busy_workspace_fails_fast() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let config = RunConfig::for_workspace(dir.path());
    let _held = RunLock::acquire(&config.lock_path()).unwrap();

    let err = controller(config, CalcSuite::new(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, FixerError::WorkspaceBusy(_)));
    assert_eq!(read(&dir, "app/calc.py"), BUGGY);
}

#[tokio::test]
async fn test_missing_subtree_is_unreadable() {
    let dir = workspace(&[("lib/calc.py", BUGGY)]);
    let config = RunConfig::for_workspace(dir.path());

    let err = controller(config, CalcSuite::new(), Arc::new(NoKnowledge))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, FixerError::WorkspaceUnreadable { .. }));
}

#[test]
fn test_invalid_config_is_refused() {
    let dir = workspace(&[("app/calc.py", BUGGY)]);
    let mut config = RunConfig::for_workspace(dir.path());
    config.max_iterations = 0;

    let result = Controller::new(
        config,
        CalcSuite::new(),
        Arc::new(NoKnowledge),
        Arc::new(NoopSink),
    );
    assert!(matches!(result, Err(FixerError::Config(_))));
}
