//! Verdicts for individual checks and their aggregate.

use serde::{Deserialize, Serialize};

/// Result of one scenario, benchmark, or invocation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// `<flavor>::<scenario>::<transport>` or `<flavor>::<check>`.
    pub case_name: String,
    pub transport: Option<String>,
    pub passed: bool,
    /// Expected output, one rendered record per line.
    pub expected: String,
    /// Captured output, one record per line.
    pub actual: String,
    pub diff: Option<String>,
    /// Stable failure tag, set when `passed` is false.
    pub error_kind: Option<String>,
    pub message: Option<String>,
    pub pid: Option<String>,
    pub record_count: usize,
    pub duration_ms: u64,
}

impl VerificationResult {
    #[must_use]
    pub fn pass(case_name: impl Into<String>, expected: String, actual: String) -> Self {
        Self {
            case_name: case_name.into(),
            transport: None,
            passed: true,
            expected,
            actual,
            diff: None,
            error_kind: None,
            message: None,
            pid: None,
            record_count: 0,
            duration_ms: 0,
        }
    }

    #[must_use]
    pub fn fail(
        case_name: impl Into<String>,
        error_kind: impl Into<String>,
        expected: String,
        actual: String,
        diff: Option<String>,
    ) -> Self {
        Self {
            case_name: case_name.into(),
            transport: None,
            passed: false,
            expected,
            actual,
            diff,
            error_kind: Some(error_kind.into()),
            message: None,
            pid: None,
            record_count: 0,
            duration_ms: 0,
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach what the producer run itself reported.
    #[must_use]
    pub fn with_run(mut self, pid: Option<String>, record_count: usize, duration_ms: u64) -> Self {
        self.pid = pid;
        self.record_count = record_count;
        self.duration_ms = duration_ms;
        self
    }
}

/// Aggregate verification summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<VerificationResult>,
}

impl VerificationSummary {
    #[must_use]
    pub fn from_results(results: Vec<VerificationResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let failed = total - passed;
        Self {
            total,
            passed,
            failed,
            results,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Failed results only.
    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_outcomes() {
        let summary = VerificationSummary::from_results(vec![
            VerificationResult::pass("cpp::null::stdout", "a".into(), "a".into()),
            VerificationResult::fail("cpp::null::file", "missing_file", "a".into(), String::new(), None),
        ]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_passed());
        assert_eq!(summary.failures().count(), 1);
    }

    #[test]
    fn empty_summary_passes() {
        assert!(VerificationSummary::from_results(Vec::new()).all_passed());
    }
}
