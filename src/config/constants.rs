// Project-wide constants
//
// Centralised here so file names and default limits have one source of truth.
// Import via `use crate::config::constants::*;`.

/// Per-workspace state directory (store, run lock, artifacts, run logs)
pub const STATE_DIR: &str = ".selfevolve";

/// Heuristic store file inside the state directory
pub const STORE_FILE: &str = "heuristics.json";

/// Optional config file inside the state directory
pub const CONFIG_FILE: &str = "config.toml";

/// Latest applied edits, readable by editor integrations
pub const EDITS_ARTIFACT: &str = "edits.json";

/// Advisory lock held for the duration of a run
pub const RUN_LOCK_FILE: &str = "run.lock";

/// Daily JSONL run logs
pub const RUNS_DIR: &str = "runs";

/// Only files under this subtree may be patched
pub const DEFAULT_SUBTREE: &str = "app";

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
pub const DEFAULT_MAX_FILES_PER_PATCH: usize = 3;
pub const DEFAULT_MAX_CHANGED_LINES: usize = 300;

pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 120;

/// Confidence change applied per reinforcement or penalty
pub const DEFAULT_CONFIDENCE_STEP: f64 = 0.1;

/// Confidence given to a heuristic learned from a synthesized fix
pub const DEFAULT_SEED_CONFIDENCE: f64 = 0.5;

/// Snapshot skips files larger than this
pub const DEFAULT_MAX_FILE_BYTES: u64 = 256 * 1024;

pub const DEFAULT_FIRECRAWL_URL: &str = "https://api.firecrawl.dev";
pub const DEFAULT_KNOWLEDGE_TIMEOUT_SECS: u64 = 20;

/// Reference snippets are clipped to this many characters
pub const REFERENCE_SNIPPET_CHARS: usize = 1500;

/// Lines of test output kept in outcomes and printed by the CLI
pub const LOG_TAIL_LINES: usize = 60;
