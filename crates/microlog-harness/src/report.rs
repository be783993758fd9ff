//! Report generation for suite results.

use std::fmt::Write as _;

use microlog_capture::ServerStats;
use serde::Serialize;

use crate::verify::VerificationSummary;

/// A suite report: verdicts plus the run's identifying facts.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub title: String,
    /// Producer flavor exercised.
    pub flavor: String,
    /// Producer binary path as launched.
    pub binary: String,
    /// Timestamp (UTC).
    pub timestamp: String,
    pub summary: VerificationSummary,
    /// Capture server counters, when the network transport was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerStats>,
}

impl SuiteReport {
    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}\n", self.title);
        let _ = writeln!(out, "- Flavor: {}", self.flavor);
        let _ = writeln!(out, "- Binary: `{}`", self.binary);
        let _ = writeln!(out, "- Timestamp: {}", self.timestamp);
        let _ = writeln!(out, "- Total: {}", self.summary.total);
        let _ = writeln!(out, "- Passed: {}", self.summary.passed);
        let _ = writeln!(out, "- Failed: {}", self.summary.failed);
        if let Some(stats) = &self.server {
            let _ = writeln!(
                out,
                "- Network: {} connections, {} handler errors, {} accept errors",
                stats.connections, stats.handler_errors, stats.accept_errors
            );
        }
        out.push('\n');

        out.push_str("| Case | Transport | Status | Records | ms |\n");
        out.push_str("|------|-----------|--------|---------|----|\n");
        for r in &self.summary.results {
            let status = if r.passed { "PASS" } else { "FAIL" };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                r.case_name,
                r.transport.as_deref().unwrap_or("-"),
                status,
                r.record_count,
                r.duration_ms
            );
        }

        let failures: Vec<_> = self.summary.failures().collect();
        if !failures.is_empty() {
            out.push_str("\n## Failures\n");
            for r in failures {
                let _ = writeln!(
                    out,
                    "\n### {} ({})\n",
                    r.case_name,
                    r.error_kind.as_deref().unwrap_or("unknown")
                );
                if let Some(message) = &r.message {
                    let _ = writeln!(out, "{message}\n");
                }
                if let Some(diff) = &r.diff {
                    let _ = writeln!(out, "```diff\n{diff}```");
                }
            }
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}
