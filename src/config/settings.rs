// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::*;
use crate::errors::{FixerError, FixerResult};
use crate::patcher::normalize_lexically;

/// Test-suite invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestsConfig {
    /// Program and fixed leading arguments
    pub command: Vec<String>,

    /// Extra arguments appended after `command` (replaced by `PYTEST_ARGS`)
    pub args: Vec<String>,

    pub timeout_secs: u64,

    /// Exit codes that mean "tests ran and some failed"; anything else non-zero
    /// is an environment failure
    pub failure_exit_codes: Vec<i32>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".into(), "-m".into(), "pytest".into()],
            args: vec!["-q".into()],
            timeout_secs: DEFAULT_TEST_TIMEOUT_SECS,
            failure_exit_codes: vec![1],
        }
    }
}

/// Reflector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub confidence_step: f64,
    pub seed_confidence: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            confidence_step: DEFAULT_CONFIDENCE_STEP,
            seed_confidence: DEFAULT_SEED_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeProvider {
    #[default]
    None,
    Firecrawl,
}

/// External reference lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub provider: KnowledgeProvider,

    /// Never written back to disk
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            provider: KnowledgeProvider::None,
            api_key: None,
            base_url: DEFAULT_FIRECRAWL_URL.to_string(),
            timeout_secs: DEFAULT_KNOWLEDGE_TIMEOUT_SECS,
        }
    }
}

/// Run log sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    /// Write iteration records to `.selfevolve/runs/run_YYYY-MM-DD.jsonl`
    pub jsonl: bool,

    /// Override the log directory
    pub dir: Option<PathBuf>,
}

/// Parameters for one repair run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Workspace root; set by the loader, not read from the file
    #[serde(skip)]
    pub workspace: PathBuf,

    /// Only files under this subtree may be patched
    pub subtree: String,

    pub max_iterations: u32,
    pub max_files_per_patch: usize,
    pub max_changed_lines: usize,

    /// Snapshot skips files above this size
    pub max_file_bytes: u64,

    /// Run the suite once before planning; a green baseline ends the run
    pub baseline_probe: bool,

    /// Override the heuristic store location
    pub store_path: Option<PathBuf>,

    pub tests: TestsConfig,
    pub learning: LearningConfig,
    pub knowledge: KnowledgeConfig,
    pub audit: AuditConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            subtree: DEFAULT_SUBTREE.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_files_per_patch: DEFAULT_MAX_FILES_PER_PATCH,
            max_changed_lines: DEFAULT_MAX_CHANGED_LINES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            baseline_probe: false,
            store_path: None,
            tests: TestsConfig::default(),
            learning: LearningConfig::default(),
            knowledge: KnowledgeConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            ..Self::default()
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.workspace.join(STATE_DIR)
    }

    pub fn store_path(&self) -> PathBuf {
        match &self.store_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.workspace.join(p),
            None => self.state_dir().join(STORE_FILE),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(RUN_LOCK_FILE)
    }

    pub fn runs_dir(&self) -> PathBuf {
        match &self.audit.dir {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.workspace.join(p),
            None => self.state_dir().join(RUNS_DIR),
        }
    }

    pub fn subtree_path(&self) -> &Path {
        Path::new(&self.subtree)
    }

    /// Full test command line: `command` followed by `args`
    pub fn test_command(&self) -> Vec<String> {
        self.tests
            .command
            .iter()
            .chain(self.tests.args.iter())
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> FixerResult<()> {
        if self.max_iterations == 0 {
            return Err(FixerError::Config("max_iterations must be at least 1".into()));
        }
        if self.max_files_per_patch == 0 {
            return Err(FixerError::Config(
                "max_files_per_patch must be at least 1".into(),
            ));
        }
        if self.max_changed_lines == 0 {
            return Err(FixerError::Config(
                "max_changed_lines must be at least 1".into(),
            ));
        }
        if self.tests.command.is_empty() || self.tests.command[0].trim().is_empty() {
            return Err(FixerError::Config("test command is empty".into()));
        }
        if self.tests.timeout_secs == 0 {
            return Err(FixerError::Config("tests.timeout_secs must be at least 1".into()));
        }
        let subtree = Path::new(&self.subtree);
        let inside = !subtree.is_absolute()
            && !subtree
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
            && normalize_lexically(subtree).is_some_and(|p| !p.as_os_str().is_empty());
        if !inside {
            return Err(FixerError::Config(format!(
                "subtree must be a relative path inside the workspace, got {:?}",
                self.subtree
            )));
        }
        let step = self.learning.confidence_step;
        if !(0.0..=1.0).contains(&step) {
            return Err(FixerError::Config(format!(
                "learning.confidence_step must be within [0, 1], got {}",
                step
            )));
        }
        let seed = self.learning.seed_confidence;
        if !(0.0..=1.0).contains(&seed) {
            return Err(FixerError::Config(format!(
                "learning.seed_confidence must be within [0, 1], got {}",
                seed
            )));
        }
        if self.knowledge.provider == KnowledgeProvider::Firecrawl
            && self.knowledge.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(FixerError::Config(
                "knowledge provider firecrawl requires FIRECRAWL_API_KEY".into(),
            ));
        }
        Ok(())
    }
}
