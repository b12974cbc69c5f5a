// Bug signatures - normalized descriptions of a test failure
//
// A signature is captured once per iteration from the most recent test outcome
// and never mutated afterwards.

mod classify;
mod pattern;

pub use classify::{failing_tests, fingerprint};
pub use pattern::SignaturePattern;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure shape, used both to describe a signature and to key heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureKind {
    OffByOne,
    NoneDereference,
    IndexOutOfBounds,
    MissingKey,
    ImportMissing,
    TypeMismatch,
    NameUndefined,
    /// Assertion failure without an arithmetic shape
    Assertion,
    /// Timeout, crash or unusable runner; carries no learning signal
    EnvironmentFailure,
    /// No test has run yet, or the log could not be classified
    Unknown,
}

impl SignatureKind {
    pub const ALL: [SignatureKind; 10] = [
        SignatureKind::OffByOne,
        SignatureKind::NoneDereference,
        SignatureKind::IndexOutOfBounds,
        SignatureKind::MissingKey,
        SignatureKind::ImportMissing,
        SignatureKind::TypeMismatch,
        SignatureKind::NameUndefined,
        SignatureKind::Assertion,
        SignatureKind::EnvironmentFailure,
        SignatureKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureKind::OffByOne => "off-by-one",
            SignatureKind::NoneDereference => "none-dereference",
            SignatureKind::IndexOutOfBounds => "index-out-of-bounds",
            SignatureKind::MissingKey => "missing-key",
            SignatureKind::ImportMissing => "import-missing",
            SignatureKind::TypeMismatch => "type-mismatch",
            SignatureKind::NameUndefined => "name-undefined",
            SignatureKind::Assertion => "assertion",
            SignatureKind::EnvironmentFailure => "environment-failure",
            SignatureKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let needle = s.trim().to_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|k| k.as_str() == needle)
    }

    /// Whether a heuristic may be keyed by this kind
    pub fn is_learnable(&self) -> bool {
        !matches!(
            self,
            SignatureKind::EnvironmentFailure | SignatureKind::Unknown
        )
    }

    /// Explicit match predicate: which observed kinds a pattern of this kind covers.
    ///
    /// Off-by-one fixes also address index-bound failures, and a generic
    /// assertion fix may address an arithmetic one. Everything else is exact.
    pub fn admits(&self, observed: SignatureKind) -> bool {
        match (self, observed) {
            (SignatureKind::OffByOne, SignatureKind::IndexOutOfBounds) => true,
            (SignatureKind::Assertion, SignatureKind::OffByOne) => true,
            (SignatureKind::EnvironmentFailure, _) | (SignatureKind::Unknown, _) => false,
            (pattern, observed) => *pattern == observed,
        }
    }
}

impl fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized failure: test name, exception kind, location and message fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugSignature {
    pub kind: SignatureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub fingerprint: String,
}

impl BugSignature {
    pub fn new(kind: SignatureKind, fingerprint: impl Into<String>) -> Self {
        Self {
            kind,
            test_name: None,
            file: None,
            line: None,
            fingerprint: fingerprint.into(),
        }
    }

    /// Signature used before any test has run
    pub fn unknown() -> Self {
        Self::new(SignatureKind::Unknown, "")
    }

    pub fn environment(reason: &str) -> Self {
        Self::new(SignatureKind::EnvironmentFailure, fingerprint(reason))
    }

    /// Derive a signature from raw test-runner output
    pub fn from_test_log(log: &str) -> Self {
        classify::classify(log)
    }

    pub fn with_test(mut self, test_name: impl Into<String>) -> Self {
        self.test_name = Some(test_name.into());
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == SignatureKind::Unknown
    }

    pub fn is_environment_failure(&self) -> bool {
        self.kind == SignatureKind::EnvironmentFailure
    }

    /// Short query string for the knowledge lookup
    pub fn reference_query(&self) -> String {
        if self.fingerprint.is_empty() {
            format!("python {}", self.kind)
        } else {
            format!("python {}: {}", self.kind, self.fingerprint)
        }
    }
}

impl fmt::Display for BugSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(test) = &self.test_name {
            write!(f, " in {}", test)?;
        }
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " at {}:{}", file, line)?,
            (Some(file), None) => write!(f, " at {}", file)?,
            _ => {}
        }
        if !self.fingerprint.is_empty() {
            write!(f, " [{}]", self.fingerprint)?;
        }
        Ok(())
    }
}
