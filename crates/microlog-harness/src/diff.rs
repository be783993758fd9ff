//! Line diff for mismatched captures.

use std::fmt::Write;

/// Render a line-by-line diff between expected and actual text.
///
/// Lines present on only one side are reported as pure additions/removals.
#[must_use]
pub fn render_diff(expected: &str, actual: &str) -> String {
    if expected == actual {
        return String::from("[identical]");
    }

    let expected: Vec<&str> = expected.lines().collect();
    let actual: Vec<&str> = actual.lines().collect();
    let mut out = String::new();
    out.push_str("--- expected\n");
    out.push_str("+++ actual\n");
    for i in 0..expected.len().max(actual.len()) {
        match (expected.get(i), actual.get(i)) {
            (Some(e), Some(a)) if e == a => {}
            (e, a) => {
                let _ = writeln!(out, "@@ line {} @@", i + 1);
                if let Some(e) = e {
                    let _ = writeln!(out, "-{e}");
                }
                if let Some(a) = a {
                    let _ = writeln!(out, "+{a}");
                }
            }
        }
    }
    out
}
