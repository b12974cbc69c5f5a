// Unified diff rendering
//
// Hunks are built straight from the known replacements rather than by diffing
// before/after text, so the diff always shows exactly what was applied.

use super::proposal::LineReplacement;

const CONTEXT: usize = 3;

/// Render one file's replacements as a unified diff. `replacements` must be sorted and disjoint.
pub fn render_file_diff(path: &str, original: &str, replacements: &[LineReplacement]) -> String {
    if replacements.is_empty() {
        return String::new();
    }
    let old: Vec<&str> = original.lines().collect();
    let mut out = format!("--- a/{}\n+++ b/{}\n", path, path);

    // Group replacements whose context windows touch
    let mut groups: Vec<&[LineReplacement]> = Vec::new();
    let mut group_start = 0;
    for i in 1..replacements.len() {
        if replacements[i].start > replacements[i - 1].end + 2 * CONTEXT {
            groups.push(&replacements[group_start..i]);
            group_start = i;
        }
    }
    groups.push(&replacements[group_start..]);

    let mut delta: isize = 0;
    for group in groups {
        let first = &group[0];
        let last = &group[group.len() - 1];
        let old_from = first.start.saturating_sub(CONTEXT);
        let old_to = (last.end + CONTEXT).min(old.len());

        let mut body = Vec::new();
        let mut cursor = old_from;
        let mut group_delta: isize = 0;
        for r in group {
            for line in &old[cursor..r.start.min(old.len())] {
                body.push(format!(" {}", line));
            }
            for line in &old[r.start.min(old.len())..r.end.min(old.len())] {
                body.push(format!("-{}", line));
            }
            for line in &r.lines {
                body.push(format!("+{}", line));
            }
            group_delta += r.lines.len() as isize - (r.end - r.start) as isize;
            cursor = r.end;
        }
        for line in &old[cursor.min(old_to)..old_to] {
            body.push(format!(" {}", line));
        }

        let old_len = old_to - old_from;
        let new_len = (old_len as isize + group_delta).max(0) as usize;
        let new_from = (old_from as isize + delta).max(0) as usize;
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            range_header(old_from, old_len),
            range_header(new_from, new_len)
        ));
        for line in body {
            out.push_str(&line);
            out.push('\n');
        }
        delta += group_delta;
    }
    out
}

fn range_header(from: usize, len: usize) -> String {
    if len == 0 {
        format!("{},0", from)
    } else {
        format!("{},{}", from + 1, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_rewrite() {
        let original = "def inc(x):\n    return x - 1\n";
        let diff = render_file_diff(
            "app/main.py",
            original,
            &[LineReplacement::replace_line(1, "    return x + 1")],
        );
        assert_eq!(
            diff,
            "--- a/app/main.py\n+++ b/app/main.py\n@@ -1,2 +1,2 @@\n def inc(x):\n-    return x - 1\n+    return x + 1\n"
        );
    }

    #[test]
    fn test_insertion_shifts_new_range() {
        let original = (1..=20).map(|i| format!("l{}", i)).collect::<Vec<_>>().join("\n");
        let diff = render_file_diff(
            "app/a.py",
            &original,
            &[
                LineReplacement::insert_before(0, vec!["new".into()]),
                LineReplacement::replace_line(15, "L16"),
            ],
        );
        assert!(diff.contains("@@ -1,3 +1,4 @@\n+new\n l1\n l2\n l3\n"));
        assert!(diff.contains("@@ -13,7 +14,7 @@\n l13\n l14\n l15\n-l16\n+L16\n l17\n"));
    }

    #[test]
    fn test_empty_replacements_render_nothing() {
        assert_eq!(render_file_diff("a", "x\n", &[]), "");
    }
}
