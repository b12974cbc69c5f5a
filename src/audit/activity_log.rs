// Run logger - writes run events to <workspace>/.selfevolve/runs/run_YYYY-MM-DD.jsonl

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{AuditSink, IterationRecord};
use crate::controller::RunReport;

/// An event in the run log
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent<'a> {
    RunStarted {
        workspace: String,
        max_iterations: u32,
    },
    Iteration {
        record: &'a IterationRecord,
    },
    RunFinished {
        stop_reason: String,
        iterations: u32,
        success: bool,
    },
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    ts: String,
    run_id: &'a str,
    #[serde(flatten)]
    event: &'a AuditEvent<'a>,
}

/// Appends every run event to a daily JSONL file
pub struct JsonlSink {
    dir: PathBuf,
    run_id: String,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run log directory {}", dir.display()))?;
        Ok(Self {
            dir,
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Return the path to today's log file
    pub fn today_path(&self) -> PathBuf {
        let date = Local::now().format("%Y-%m-%d").to_string();
        self.dir.join(format!("run_{}.jsonl", date))
    }

    fn log(&self, event: &AuditEvent<'_>) -> Result<()> {
        let path = self.today_path();
        let entry = LogEntry {
            ts: Utc::now().to_rfc3339(),
            run_id: &self.run_id,
            event,
        };
        let json = serde_json::to_string(&entry).context("Failed to serialize run event")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open run log: {}", path.display()))?;

        writeln!(file, "{}", json).context("Failed to write run event")?;
        Ok(())
    }
}

impl AuditSink for JsonlSink {
    fn run_started(&self, workspace: &Path, max_iterations: u32) -> Result<()> {
        self.log(&AuditEvent::RunStarted {
            workspace: workspace.display().to_string(),
            max_iterations,
        })
    }

    fn record(&self, record: &IterationRecord) -> Result<()> {
        self.log(&AuditEvent::Iteration { record })
    }

    fn run_finished(&self, report: &RunReport) -> Result<()> {
        self.log(&AuditEvent::RunFinished {
            stop_reason: report.stop_reason.to_string(),
            iterations: report.iterations,
            success: report.is_success(),
        })
    }
}
