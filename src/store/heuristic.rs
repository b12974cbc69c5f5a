use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FixTemplate;
use crate::signature::SignaturePattern;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_confidence() -> f64 {
    0.5
}

/// A learned repair: signature pattern, fix template and usage statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heuristic {
    #[serde(default = "new_id")]
    pub id: String,
    pub pattern: SignaturePattern,
    pub template: FixTemplate,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub times_applied: u64,
    #[serde(default)]
    pub times_succeeded: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Heuristic {
    pub fn new(
        pattern: SignaturePattern,
        template: FixTemplate,
        confidence: f64,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            pattern,
            template,
            confidence: clamp_confidence(confidence),
            times_applied: 0,
            times_succeeded: 0,
            description: description.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Store key (canonical pattern string)
    pub fn key(&self) -> String {
        self.pattern.key()
    }

    pub fn record_success(&mut self, step: f64) {
        self.times_applied += 1;
        self.times_succeeded += 1;
        self.confidence = clamp_confidence(self.confidence + step);
        self.updated_at = Utc::now();
    }

    pub fn record_failure(&mut self, step: f64) {
        self.times_applied += 1;
        self.confidence = clamp_confidence(self.confidence - step);
        self.updated_at = Utc::now();
    }

    pub fn success_rate(&self) -> f64 {
        if self.times_applied == 0 {
            0.0
        } else {
            self.times_succeeded as f64 / self.times_applied as f64
        }
    }

    /// Repair values a hand-edited file may carry
    pub(crate) fn sanitize(&mut self) {
        self.confidence = clamp_confidence(self.confidence);
        self.times_succeeded = self.times_succeeded.min(self.times_applied);
    }
}

/// Clamp to [0, 1]; NaN falls back to the neutral seed
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        default_confidence()
    } else {
        value.clamp(0.0, 1.0)
    }
}
