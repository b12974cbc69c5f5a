use serde::{Deserialize, Serialize};
use std::fmt;

use super::{BugSignature, SignatureKind};

/// Signature pattern a heuristic is keyed by. Absent fields are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignaturePattern {
    pub kind: SignatureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    /// Substring the signature fingerprint must contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl SignaturePattern {
    pub fn of_kind(kind: SignatureKind) -> Self {
        Self {
            kind,
            file: None,
            test_name: None,
            fingerprint: None,
        }
    }

    /// Pattern learned from a signature: its kind and offending file.
    /// Test name and fingerprint are left open so the heuristic generalizes.
    pub fn learned_from(signature: &BugSignature) -> Self {
        Self {
            kind: signature.kind,
            file: signature.file.clone(),
            test_name: None,
            fingerprint: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Canonical store key
    pub fn key(&self) -> String {
        let mut key = self.kind.as_str().to_string();
        if let Some(file) = &self.file {
            key.push_str("|file=");
            key.push_str(file);
        }
        if let Some(test) = &self.test_name {
            key.push_str("|test=");
            key.push_str(test);
        }
        if let Some(fp) = &self.fingerprint {
            key.push_str("|fp=");
            key.push_str(fp);
        }
        key
    }

    /// Whether a heuristic keyed by this pattern applies to `signature`.
    ///
    /// An unknown signature (nothing has run yet) admits every pattern; an
    /// environment failure admits none.
    pub fn matches(&self, signature: &BugSignature) -> bool {
        match signature.kind {
            SignatureKind::EnvironmentFailure => return false,
            SignatureKind::Unknown => return true,
            _ => {}
        }
        if !self.kind.admits(signature.kind) {
            return false;
        }
        if let Some(file) = &self.file {
            if signature.file.as_deref() != Some(file.as_str()) {
                return false;
            }
        }
        if let Some(test) = &self.test_name {
            if signature.test_name.as_deref() != Some(test.as_str()) {
                return false;
            }
        }
        match &self.fingerprint {
            Some(fp) => signature.fingerprint.contains(fp.as_str()),
            None => true,
        }
    }
}

impl fmt::Display for SignaturePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
