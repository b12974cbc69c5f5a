// Fix templates - parameterized transforms that turn a snapshot into line edits

use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::WorkspaceSnapshot;
use crate::patcher::{FileEdit, LineReplacement};
use crate::signature::BugSignature;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FixTemplate {
    /// Rewrite the first line matching `pattern`; `$name` refers to captures
    LineRewrite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        pattern: String,
        replacement: String,
    },
    /// Insert `lines` before the first line matching `anchor`, at its indentation
    InsertBefore {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        anchor: String,
        lines: Vec<String>,
    },
}

impl FixTemplate {
    pub fn line_rewrite(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        FixTemplate::LineRewrite {
            target: None,
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    pub fn insert_before(anchor: impl Into<String>, lines: Vec<String>) -> Self {
        FixTemplate::InsertBefore {
            target: None,
            anchor: anchor.into(),
            lines,
        }
    }

    /// Restrict the template to files matching a workspace-relative glob
    pub fn with_target(mut self, glob: impl Into<String>) -> Self {
        match &mut self {
            FixTemplate::LineRewrite { target, .. } | FixTemplate::InsertBefore { target, .. } => {
                *target = Some(glob.into())
            }
        }
        self
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            FixTemplate::LineRewrite { target, .. } | FixTemplate::InsertBefore { target, .. } => {
                target.as_deref()
            }
        }
    }

    fn regex_source(&self) -> &str {
        match self {
            FixTemplate::LineRewrite { pattern, .. } => pattern,
            FixTemplate::InsertBefore { anchor, .. } => anchor,
        }
    }

    /// Check that the regex and target glob compile
    pub fn validate(&self) -> Result<(), String> {
        Regex::new(self.regex_source()).map_err(|e| e.to_string())?;
        if let Some(target) = self.target() {
            Pattern::new(target).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Edits for one file's text, or `None` when the template finds no site
    pub fn apply_to(&self, text: &str) -> Option<Vec<LineReplacement>> {
        let regex = match Regex::new(self.regex_source()) {
            Ok(r) => r,
            Err(e) => {
                warn!(pattern = self.regex_source(), error = %e, "invalid template regex");
                return None;
            }
        };
        let lines: Vec<&str> = text.lines().collect();

        match self {
            FixTemplate::LineRewrite { replacement, .. } => {
                lines.iter().enumerate().find_map(|(i, line)| {
                    if !regex.is_match(line) {
                        return None;
                    }
                    let rewritten = regex.replace(line, replacement.as_str());
                    if rewritten == *line {
                        return None;
                    }
                    Some(vec![LineReplacement::replace_line(i, rewritten.into_owned())])
                })
            }
            FixTemplate::InsertBefore {
                lines: inserted, ..
            } => {
                let index = lines.iter().position(|line| regex.is_match(line))?;
                let indent: String = lines[index]
                    .chars()
                    .take_while(|c| c.is_whitespace())
                    .collect();
                let block: Vec<String> = inserted
                    .iter()
                    .map(|l| {
                        if l.trim().is_empty() {
                            String::new()
                        } else {
                            format!("{}{}", indent, l)
                        }
                    })
                    .collect();
                // Already present directly above the anchor
                if index >= block.len() && lines[index - block.len()..index] == block[..] {
                    return None;
                }
                Some(vec![LineReplacement::insert_before(index, block)])
            }
        }
    }

    /// Resolve target files and build edits against the snapshot.
    ///
    /// With a glob target every matching file is edited. Without one, the
    /// signature's offending file is preferred and the first snapshot file
    /// where the template applies is the fallback.
    pub fn instantiate(
        &self,
        snapshot: &WorkspaceSnapshot,
        signature: &BugSignature,
    ) -> Vec<FileEdit> {
        if let Some(target) = self.target() {
            let glob = match Pattern::new(target) {
                Ok(g) => g,
                Err(e) => {
                    warn!(target, error = %e, "invalid template target glob");
                    return Vec::new();
                }
            };
            let options = MatchOptions {
                require_literal_separator: true,
                ..MatchOptions::default()
            };
            return snapshot
                .iter()
                .filter(|(path, _)| glob.matches_with(path, options))
                .filter_map(|(path, text)| self.edit_for(path, text))
                .collect();
        }

        if let Some(file) = signature.file.as_deref() {
            if let Some(edit) = snapshot.get(file).and_then(|text| self.edit_for(file, text)) {
                return vec![edit];
            }
        }

        snapshot
            .iter()
            .find_map(|(path, text)| self.edit_for(path, text))
            .into_iter()
            .collect()
    }

    fn edit_for(&self, path: &str, text: &str) -> Option<FileEdit> {
        self.apply_to(text).map(|replacements| FileEdit {
            path: path.to_string(),
            replacements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureKind;

    fn snapshot(files: &[(&str, &str)]) -> WorkspaceSnapshot {
        WorkspaceSnapshot::from_files(
            files
                .iter()
                .map(|(p, t)| (p.to_string(), t.to_string())),
        )
    }

    fn off_by_one() -> FixTemplate {
        FixTemplate::line_rewrite(
            r"^(?P<indent>\s*)return\s+(?P<var>\w+)\s*-\s*\d+\s*$",
            "${indent}return ${var} + 1",
        )
    }

    #[test]
    fn test_line_rewrite_first_match_only() {
        let text = "def a(x):\n    return x - 1\n\ndef b(y):\n    return y - 3\n";
        let edits = off_by_one().apply_to(text).unwrap();
        assert_eq!(edits, vec![LineReplacement::replace_line(1, "    return x + 1")]);
    }

    #[test]
    fn test_no_site_is_none() {
        assert_eq!(off_by_one().apply_to("def a(x):\n    return x + 1\n"), None);
    }

    #[test]
    fn test_insert_before_indents_and_is_idempotent() {
        let template = FixTemplate::insert_before(
            r"^\s*return\s+s\[0\]",
            vec!["if s is None:".into(), "    return None".into()],
        );
        let text = "def top(s):\n    return s[0]\n";
        let edits = template.apply_to(text).unwrap();
        assert_eq!(
            edits,
            vec![LineReplacement::insert_before(
                1,
                vec!["    if s is None:".into(), "        return None".into()]
            )]
        );

        let patched = "def top(s):\n    if s is None:\n        return None\n    return s[0]\n";
        assert_eq!(template.apply_to(patched), None);
    }

    #[test]
    fn test_instantiate_prefers_signature_file() {
        let snap = snapshot(&[
            ("app/a.py", "def f(x):\n    return x - 1\n"),
            ("app/b.py", "def g(x):\n    return x - 2\n"),
        ]);
        let sig = BugSignature::new(SignatureKind::OffByOne, "").with_location("app/b.py", Some(2));
        let edits = off_by_one().instantiate(&snap, &sig);
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].path, "app/b.py");

        let edits = off_by_one().instantiate(&snap, &BugSignature::unknown());
        assert_eq!(edits[0].path, "app/a.py");
    }

    #[test]
    fn test_instantiate_with_glob_target() {
        let snap = snapshot(&[
            ("app/a.py", "return x - 1\n"),
            ("app/pkg/b.py", "return y - 1\n"),
            ("app/pkg/c.txt", "return z - 1\n"),
        ]);
        let edits = off_by_one()
            .with_target("app/**/*.py")
            .instantiate(&snap, &BugSignature::unknown());
        let paths: Vec<&str> = edits.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["app/a.py", "app/pkg/b.py"]);

        let edits = off_by_one()
            .with_target("app/*.py")
            .instantiate(&snap, &BugSignature::unknown());
        assert_eq!(edits.len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        assert!(FixTemplate::line_rewrite("(", "x").validate().is_err());
        assert!(off_by_one().validate().is_ok());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(off_by_one().with_target("app/*.py")).unwrap();
        assert_eq!(json["type"], "line_rewrite");
        assert_eq!(json["target"], "app/*.py");
    }
}
