// Run audit - iteration records and the sinks they are reported to
//
// Sink failures are logged by the caller and never abort a run.

mod activity_log;
mod record;

pub use activity_log::{AuditEvent, JsonlSink};
pub use record::{IterationRecord, IterationVerdict, ProposalSummary, RejectedCandidate};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::controller::RunReport;

pub trait AuditSink: Send + Sync {
    fn run_started(&self, _workspace: &Path, _max_iterations: u32) -> Result<()> {
        Ok(())
    }

    fn record(&self, record: &IterationRecord) -> Result<()>;

    fn run_finished(&self, _report: &RunReport) -> Result<()> {
        Ok(())
    }
}

/// Default sink: discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl AuditSink for NoopSink {
    fn record(&self, _record: &IterationRecord) -> Result<()> {
        Ok(())
    }
}

/// Build the sink selected by configuration
pub fn from_config(config: &RunConfig) -> Result<Arc<dyn AuditSink>> {
    if config.audit.jsonl {
        Ok(Arc::new(JsonlSink::new(config.runs_dir())?))
    } else {
        Ok(Arc::new(NoopSink))
    }
}

/// Append-only log of a run's iteration records
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    records: Vec<IterationRecord>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<IterationRecord> {
        self.records
    }
}
