// Failure-log classification
//
// A fixed, ordered regex table applied to the first failure report only. The
// first row that matches decides the kind; assertion failures are then split
// into off-by-one and generic assertions by looking at the compared integers.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{BugSignature, SignatureKind};

const FINGERPRINT_MAX_CHARS: usize = 80;

/// Largest distance between compared integers still treated as off-by-one
const OFF_BY_ONE_SPAN: i64 = 2;

struct Rule {
    kind: SignatureKind,
    regex: Regex,
}

fn rule(kind: SignatureKind, pattern: &str) -> Rule {
    Rule {
        kind,
        // Patterns are compile-time constants covered by the tests below
        regex: Regex::new(pattern).unwrap_or_else(|e| panic!("bad classifier regex: {e}")),
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            SignatureKind::ImportMissing,
            r"(?m)^E?\s*(?:ModuleNotFoundError|ImportError):\s*No module named\s+'?[\w.]+'?",
        ),
        rule(
            SignatureKind::NameUndefined,
            r"(?m)^E?\s*NameError:\s*name\s+'?\w+'?\s+is not defined",
        ),
        rule(SignatureKind::NoneDereference, r"(?m)^E?\s*TypeError:.*NoneType"),
        rule(
            SignatureKind::TypeMismatch,
            r"(?m)^E?\s*TypeError:.*(?:unsupported operand type|expected .* got .*|can only concatenate)",
        ),
        rule(
            SignatureKind::IndexOutOfBounds,
            r"(?m)^E?\s*IndexError:.*out of range",
        ),
        rule(SignatureKind::MissingKey, r"(?m)^E?\s*KeyError:\s*.+"),
        rule(
            SignatureKind::Assertion,
            r"(?m)^E\s+(?:AssertionError\b|assert\s)|AssertionError",
        ),
    ]
});

static SUMMARY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:FAILED|ERROR)\s+(\S+?)(?:\s+-\s+(.*))?\s*$")
        .unwrap_or_else(|e| panic!("bad summary regex: {e}"))
});

static LOCATION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([\w./\\-]+\.py):(\d+):")
        .unwrap_or_else(|e| panic!("bad location regex: {e}"))
});

static INT_COMPARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^E\s+assert\s+(-?\d+)\s*==\s*(-?\d+)\s*$")
        .unwrap_or_else(|e| panic!("bad compare regex: {e}"))
});

/// pytest report header: `____ test_name ____`
static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^_{3,} (\S.*?) _{3,}[ \t]*$")
        .unwrap_or_else(|e| panic!("bad section regex: {e}"))
});

static BANNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^={3,}").unwrap_or_else(|e| panic!("bad banner regex: {e}")));

static DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").unwrap_or_else(|e| panic!("bad digits regex: {e}")));

/// Classify raw test output into the signature of its first failure
pub(super) fn classify(log: &str) -> BugSignature {
    let (report, header) = first_failure(log);
    let test = first_test(log, header);

    let Some(rule) = RULES.iter().find(|r| r.regex.is_match(report)) else {
        let mut sig = BugSignature::unknown();
        if let Some(test) = test {
            sig = sig.with_test(test);
        }
        return sig;
    };

    let kind = match rule.kind {
        SignatureKind::Assertion if is_small_integer_gap(report) => SignatureKind::OffByOne,
        other => other,
    };

    let message = rule
        .regex
        .find(report)
        .map(|m| error_line(report, m.start()))
        .unwrap_or_default();

    let mut sig = BugSignature::new(kind, fingerprint(&message));
    if let Some(test) = test {
        sig = sig.with_test(test);
    }
    if let Some((file, line)) = offending_location(report) {
        sig = sig.with_location(file, Some(line));
    }
    sig
}

/// Body of the first `____ name ____` report and its name. Logs without
/// report headers are treated as a single report.
fn first_failure(log: &str) -> (&str, Option<&str>) {
    let Some(caps) = SECTION_HEADER.captures(log) else {
        return (log, None);
    };
    let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
        return (log, None);
    };
    let rest = &log[whole.end()..];
    let end = [SECTION_HEADER.find(rest), BANNER.find(rest)]
        .into_iter()
        .flatten()
        .map(|m| m.start())
        .min()
        .unwrap_or(rest.len());
    (&rest[..end], Some(name.as_str()))
}

/// Summary id of the reported failure, falling back to the first summary line
fn first_test(log: &str, header: Option<&str>) -> Option<String> {
    let tests = failing_tests(log);
    let named = header.and_then(|name| {
        tests
            .iter()
            .find(|id| id.replace("::", ".").ends_with(name))
            .cloned()
    });
    named.or_else(|| tests.into_iter().next())
}

/// Test ids from the pytest short summary, in report order
pub fn failing_tests(log: &str) -> Vec<String> {
    let mut tests: Vec<String> = Vec::new();
    for caps in SUMMARY_LINE.captures_iter(log) {
        let id = caps[1].to_string();
        if !tests.contains(&id) {
            tests.push(id);
        }
    }
    tests
}

/// Normalized message: lowercase, digit runs collapsed to `#`, single spaces
pub fn fingerprint(message: &str) -> String {
    let lowered = message.trim().to_lowercase();
    let masked = DIGITS.replace_all(&lowered, "#");
    let collapsed = masked.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(FINGERPRINT_MAX_CHARS).collect()
}

fn is_small_integer_gap(log: &str) -> bool {
    INT_COMPARE.captures_iter(log).any(|caps| {
        match (caps[1].parse::<i64>(), caps[2].parse::<i64>()) {
            (Ok(left), Ok(right)) => {
                let gap = left.abs_diff(right);
                gap > 0 && gap <= OFF_BY_ONE_SPAN as u64
            }
            _ => false,
        }
    })
}

/// The full line containing `offset`, without the pytest `E` gutter
fn error_line(log: &str, offset: usize) -> String {
    let start = log[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = log[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(log.len());
    let line = log[start..end].trim();
    line.strip_prefix('E').map(str::trim).unwrap_or(line).to_string()
}

/// First traceback location outside the test files, if any
fn offending_location(log: &str) -> Option<(String, u32)> {
    LOCATION_LINE
        .captures_iter(log)
        .filter_map(|caps| {
            let file = caps[1].replace('\\', "/");
            let line = caps[2].parse::<u32>().ok()?;
            Some((file, line))
        })
        .find(|(file, _)| !is_test_file(file))
}

fn is_test_file(path: &str) -> bool {
    path.split('/').any(|part| {
        part == "tests" || part == "test" || part.starts_with("test_") || part.ends_with("_test.py")
    })
}
