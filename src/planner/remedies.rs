// Built-in remedy catalog used to synthesize a proposal when no stored heuristic applies

use crate::signature::SignatureKind;
use crate::store::FixTemplate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remedy {
    /// Kind a heuristic learned from this remedy is keyed by
    pub kind: SignatureKind,
    pub template: FixTemplate,
    pub description: &'static str,
}

fn off_by_one() -> Vec<Remedy> {
    vec![Remedy {
        kind: SignatureKind::OffByOne,
        template: FixTemplate::line_rewrite(
            r"^(?P<indent>\s*)return\s+(?P<var>\w+)\s*-\s*\d+\s*$",
            "${indent}return ${var} + 1",
        ),
        description: "return <var> - N  ->  return <var> + 1",
    }]
}

fn none_dereference() -> Vec<Remedy> {
    vec![
        Remedy {
            kind: SignatureKind::NoneDereference,
            template: FixTemplate::line_rewrite(
                r"^(?P<lhs>\s*\w+\s*)=\s*(?P<arr>\w+)\.sort\(\s*\)\s*(?:#.*)?$",
                "${lhs}= sorted(${arr})",
            ),
            description: "<lhs> = xs.sort()  ->  <lhs> = sorted(xs)",
        },
        Remedy {
            kind: SignatureKind::NoneDereference,
            template: FixTemplate::line_rewrite(
                r"^(?P<lhs>\s*\w+\s*)=\s*(?P<arr>\w+)\.sort\(\s*(?P<args>[^)\s][^)]*?)\s*\)\s*(?:#.*)?$",
                "${lhs}= sorted(${arr}, ${args})",
            ),
            description: "<lhs> = xs.sort(args)  ->  <lhs> = sorted(xs, args)",
        },
        Remedy {
            kind: SignatureKind::NoneDereference,
            template: FixTemplate::line_rewrite(
                r"^(?P<indent>\s*)return\s+(?P<arr>\w+)\.sort\(\)\s*(?P<rest>.*)$",
                "${indent}return sorted(${arr})${rest}",
            ),
            description: "return xs.sort()<rest>  ->  return sorted(xs)<rest>",
        },
    ]
}

fn index_out_of_bounds() -> Vec<Remedy> {
    vec![Remedy {
        kind: SignatureKind::IndexOutOfBounds,
        template: FixTemplate::line_rewrite(
            r"range\(\s*len\((?P<xs>[\w.]+)\)\s*\+\s*1\s*\)",
            "range(len(${xs}))",
        ),
        description: "range(len(xs) + 1)  ->  range(len(xs))",
    }]
}

fn missing_key() -> Vec<Remedy> {
    vec![Remedy {
        kind: SignatureKind::MissingKey,
        template: FixTemplate::line_rewrite(
            r"^(?P<indent>\s*)return\s+(?P<d>\w+)\[(?P<key>[^\]]+)\]\s*$",
            "${indent}return ${d}.get(${key})",
        ),
        description: "return d[key]  ->  return d.get(key)",
    }]
}

/// Remedies for a signature kind, in the order they should be tried
pub fn remedies_for(kind: SignatureKind) -> Vec<Remedy> {
    match kind {
        SignatureKind::OffByOne => off_by_one(),
        SignatureKind::NoneDereference => none_dereference(),
        SignatureKind::IndexOutOfBounds => index_out_of_bounds(),
        SignatureKind::MissingKey => missing_key(),
        SignatureKind::Unknown => {
            let mut all = off_by_one();
            all.extend(none_dereference());
            all.extend(index_out_of_bounds());
            all.extend(missing_key());
            all
        }
        _ => Vec::new(),
    }
}
