// Test runner - executes the project's suite and reports a structured outcome
//
// A run that cannot produce a verdict (timeout, spawn failure, signal, an
// unexpected exit code) is an environment failure, never a test failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::constants::LOG_TAIL_LINES;
use crate::config::RunConfig;
use crate::errors::{FixerError, FixerResult};
use crate::signature::{failing_tests, BugSignature};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    #[serde(default)]
    pub failing_tests: Vec<String>,
    /// First failure; `None` when the suite passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<BugSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub log_tail: String,
}

impl TestOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failing_tests: Vec::new(),
            signature: None,
            exit_code: Some(0),
            duration_ms: 0,
            log_tail: String::new(),
        }
    }

    pub fn fail(signature: BugSignature) -> Self {
        Self {
            passed: false,
            failing_tests: signature.test_name.iter().cloned().collect(),
            signature: Some(signature),
            exit_code: Some(1),
            duration_ms: 0,
            log_tail: String::new(),
        }
    }

    pub fn environment_failure(reason: &str) -> Self {
        Self {
            passed: false,
            failing_tests: Vec::new(),
            signature: Some(BugSignature::environment(reason)),
            exit_code: None,
            duration_ms: 0,
            log_tail: reason.to_string(),
        }
    }

    /// Interpret a finished process. `failure_codes` are the exit codes that
    /// mean the suite ran and reported failures.
    pub fn from_process(exit_code: Option<i32>, log: &str, failure_codes: &[i32]) -> Self {
        let mut outcome = match exit_code {
            Some(0) => Self::pass(),
            Some(code) if failure_codes.contains(&code) => Self {
                passed: false,
                failing_tests: failing_tests(log),
                signature: Some(BugSignature::from_test_log(log)),
                exit_code: Some(code),
                duration_ms: 0,
                log_tail: String::new(),
            },
            Some(code) => {
                let mut o = Self::environment_failure(&format!("test command exited with {}", code));
                o.exit_code = Some(code);
                o
            }
            None => Self::environment_failure("test command terminated by signal"),
        };
        outcome.log_tail = tail(log, LOG_TAIL_LINES);
        outcome
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    /// No verdict: the environment failed, not the code
    pub fn is_inconclusive(&self) -> bool {
        self.signature
            .as_ref()
            .is_some_and(BugSignature::is_environment_failure)
    }
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, workspace: &Path) -> TestOutcome;
}

/// Runs a configured command line in the workspace
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: Vec<String>,
    timeout: Duration,
    failure_exit_codes: Vec<i32>,
}

impl CommandTestRunner {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            failure_exit_codes: vec![1],
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            config.test_command(),
            Duration::from_secs(config.tests.timeout_secs),
        )
        .with_failure_exit_codes(config.tests.failure_exit_codes.clone())
    }

    pub fn with_failure_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.failure_exit_codes = codes;
        self
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Spawn the suite and wait for it, bounded by the timeout.
    /// Returns the exit code (`None` on signal) and combined output.
    async fn spawn_suite(&self, workspace: &Path) -> FixerResult<(Option<i32>, String)> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| FixerError::EnvironmentFailure("empty test command".into()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(FixerError::EnvironmentFailure(format!(
                    "failed to spawn `{}`: {}",
                    self.command_line(),
                    e
                )))
            }
            Err(_) => {
                return Err(FixerError::EnvironmentFailure(format!(
                    "test command timed out after {}s",
                    self.timeout.as_secs_f64()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok((output.status.code(), format!("{}\n{}", stdout, stderr)))
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_tests(&self, workspace: &Path) -> TestOutcome {
        let started = Instant::now();
        debug!(command = %self.command_line(), "running test suite");

        let outcome = match self.spawn_suite(workspace).await {
            Ok((code, log)) => TestOutcome::from_process(code, &log, &self.failure_exit_codes),
            Err(e) => {
                warn!(error = %e, "test run inconclusive");
                TestOutcome::environment_failure(&e.to_string())
            }
        }
        .with_duration(started.elapsed());

        info!(
            passed = outcome.passed,
            exit_code = ?outcome.exit_code,
            failing = outcome.failing_tests.len(),
            duration_ms = outcome.duration_ms,
            "test suite finished"
        );
        outcome
    }
}

/// Last `lines` lines of `log`
pub fn tail(log: &str, lines: usize) -> String {
    let all: Vec<&str> = log.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
