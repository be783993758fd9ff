//! Suite execution: scenarios × transports, misuse checks, benchmark.
//!
//! Every check becomes one [`VerificationResult`] and one event in the
//! structured log. A failing check never stops the suite.

use std::io::Write;

use microlog_capture::LogRecord;
use serde_json::json;

use crate::diff::render_diff;
use crate::error::VerifyError;
use crate::scenario::{InvocationCheck, ProducerFlavor, ScenarioKind, TransportKind, invocation_checks};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::verifier::{ScenarioFailure, ScenarioOutcome, ScenarioVerifier};
use crate::verify::{VerificationResult, VerificationSummary};

/// Runs a suite against one producer and collects verification results.
pub struct TestRunner {
    /// Name of the campaign, used as the log's run id.
    pub campaign: String,
    pub flavor: ProducerFlavor,
    scenarios: Vec<ScenarioKind>,
    transports: Vec<TransportKind>,
    invocations: bool,
    benchmark: bool,
}

impl TestRunner {
    /// Every scenario of `flavor` over every transport it supports, plus
    /// the misuse checks. The benchmark is off by default.
    #[must_use]
    pub fn new(campaign: impl Into<String>, flavor: ProducerFlavor) -> Self {
        Self {
            campaign: campaign.into(),
            flavor,
            scenarios: flavor.scenarios().to_vec(),
            transports: flavor.transports(),
            invocations: true,
            benchmark: false,
        }
    }

    /// Restrict to `scenarios`; ones the flavor lacks are dropped.
    #[must_use]
    pub fn with_scenarios(mut self, scenarios: &[ScenarioKind]) -> Self {
        let available = self.flavor.scenarios();
        self.scenarios = scenarios
            .iter()
            .copied()
            .filter(|s| available.contains(s))
            .collect();
        self
    }

    /// Restrict to `transports`; ones the flavor lacks are dropped.
    #[must_use]
    pub fn with_transports(mut self, transports: &[TransportKind]) -> Self {
        let flavor = self.flavor;
        self.transports = transports
            .iter()
            .copied()
            .filter(|t| flavor.supports(*t))
            .collect();
        self
    }

    #[must_use]
    pub fn with_invocation_checks(mut self, enabled: bool) -> Self {
        self.invocations = enabled;
        self
    }

    #[must_use]
    pub fn with_benchmark(mut self, enabled: bool) -> Self {
        self.benchmark = enabled;
        self
    }

    /// `(scenario, transport)` pairs in execution order.
    #[must_use]
    pub fn plan(&self) -> Vec<(ScenarioKind, TransportKind)> {
        self.scenarios
            .iter()
            .flat_map(|s| self.transports.iter().map(move |t| (*s, *t)))
            .collect()
    }

    /// Run the suite. Only a failure to write the event log is an error.
    pub fn run<W: Write>(
        &self,
        verifier: &mut ScenarioVerifier,
        log: &mut LogEmitter<W>,
    ) -> std::io::Result<Vec<VerificationResult>> {
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "suite_start")
                .with_flavor(self.flavor)
                .with_details(json!({
                    "binary": verifier.launcher().binary().display().to_string(),
                    "cases": self.plan().len(),
                })),
        )?;

        let mut results = Vec::new();
        for (scenario, transport) in self.plan() {
            let result = match verifier.run(scenario, transport) {
                Ok(outcome) => outcome_result(self.flavor, &outcome),
                Err(failure) => failure_result(self.flavor, scenario, transport, &failure),
            };
            log.emit_entry(
                result_entry(&result, self.flavor)
                    .with_scenario(scenario.name())
                    .with_transport(transport),
            )?;
            results.push(result);
        }

        if self.invocations {
            for check in invocation_checks(self.flavor) {
                let result = invocation_result(self.flavor, &check, verifier);
                log.emit_entry(result_entry(&result, self.flavor).with_scenario("invocation"))?;
                results.push(result);
            }
        }

        if self.benchmark {
            for result in benchmark_results(self.flavor, verifier) {
                log.emit_entry(result_entry(&result, self.flavor).with_scenario("benchmark"))?;
                results.push(result);
            }
        }

        let summary = VerificationSummary::from_results(results);
        let level = if summary.all_passed() {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        log.emit_entry(
            LogEntry::new("", level, "suite_end")
                .with_flavor(self.flavor)
                .with_outcome(if summary.all_passed() {
                    Outcome::Pass
                } else {
                    Outcome::Fail
                })
                .with_details(json!({
                    "total": summary.total,
                    "passed": summary.passed,
                    "failed": summary.failed,
                })),
        )?;
        log.flush()?;
        Ok(summary.results)
    }
}

fn case_name(flavor: ProducerFlavor, scenario: &str, sub: &str) -> String {
    format!("{flavor}::{scenario}::{sub}")
}

fn signatures(records: &[LogRecord]) -> String {
    records
        .iter()
        .map(|r| r.signature().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Verdict for a scenario that passed every check.
#[must_use]
pub fn outcome_result(flavor: ProducerFlavor, outcome: &ScenarioOutcome) -> VerificationResult {
    let actual = signatures(&outcome.records);
    VerificationResult::pass(
        case_name(flavor, outcome.scenario.name(), outcome.transport.as_str()),
        actual.clone(),
        actual,
    )
    .with_transport(outcome.transport.as_str())
    .with_run(
        Some(outcome.pid.clone()),
        outcome.records.len(),
        outcome.duration_ms,
    )
}

/// Verdict for a failed scenario, diffing whatever was captured.
#[must_use]
pub fn failure_result(
    flavor: ProducerFlavor,
    scenario: ScenarioKind,
    transport: TransportKind,
    failure: &ScenarioFailure,
) -> VerificationResult {
    let actual = signatures(&failure.records);
    let diff = (failure.expected != actual).then(|| render_diff(&failure.expected, &actual));
    VerificationResult::fail(
        case_name(flavor, scenario.name(), transport.as_str()),
        failure.error.kind(),
        failure.expected.clone(),
        actual,
        diff,
    )
    .with_transport(transport.as_str())
    .with_message(failure.error.to_string())
    .with_run(
        failure.pid.clone(),
        failure.records.len(),
        failure.duration_ms,
    )
}

fn invocation_result(
    flavor: ProducerFlavor,
    check: &InvocationCheck,
    verifier: &ScenarioVerifier,
) -> VerificationResult {
    let name = case_name(flavor, "invocation", &check.name);
    match verifier.run_invocation(check) {
        Ok(output) => VerificationResult::pass(name, check.stderr_contains.clone(), output.stderr)
            .with_run(Some(format!("{:08}", output.pid)), 0, 0),
        Err(err) => {
            let actual = match &err {
                VerifyError::StderrMismatch { stderr, .. } => stderr.clone(),
                _ => String::new(),
            };
            VerificationResult::fail(name, err.kind(), check.stderr_contains.clone(), actual, None)
                .with_message(err.to_string())
        }
    }
}

fn benchmark_results(flavor: ProducerFlavor, verifier: &ScenarioVerifier) -> Vec<VerificationResult> {
    match verifier.run_benchmark() {
        Ok(comparisons) => comparisons
            .into_iter()
            .map(|cmp| {
                let name = case_name(flavor, "benchmark", cmp.reference.mode.as_str());
                let expected = cmp.reference.to_string();
                let actual = cmp.measured.to_string();
                match cmp.check() {
                    Ok(()) => VerificationResult::pass(name, expected, actual),
                    Err(err) => {
                        let diff = render_diff(&expected, &actual);
                        VerificationResult::fail(name, err.kind(), expected, actual, Some(diff))
                            .with_message(err.to_string())
                    }
                }
            })
            .collect(),
        Err(err) => vec![
            VerificationResult::fail(
                format!("{flavor}::benchmark"),
                err.kind(),
                String::new(),
                String::new(),
                None,
            )
            .with_message(err.to_string()),
        ],
    }
}

/// Event-log outcome for a failure tag.
fn outcome_for(kind: Option<&str>) -> Outcome {
    match kind {
        None => Outcome::Pass,
        Some("transport_timeout") => Outcome::Timeout,
        Some("io" | "environment_preparation") => Outcome::Error,
        Some(_) => Outcome::Fail,
    }
}

fn result_entry(result: &VerificationResult, flavor: ProducerFlavor) -> LogEntry {
    let level = if result.passed {
        LogLevel::Info
    } else {
        LogLevel::Error
    };
    let mut entry = LogEntry::new("", level, "case_result")
        .with_flavor(flavor)
        .with_outcome(outcome_for(result.error_kind.as_deref()))
        .with_record_count(result.record_count)
        .with_duration_ms(result.duration_ms)
        .with_details(json!({
            "case": result.case_name,
            "error_kind": result.error_kind,
            "message": result.message,
        }));
    if let Some(pid) = &result.pid {
        entry = entry.with_pid(pid.clone());
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use microlog_capture::parse_line;

    fn trace_record(line: &str, message: &str) -> LogRecord {
        parse_line(
            &format!(
                "[16/10/26 10:00:00.000][TRACE][pid:00000042][tid:0000000000000001][demo.cpp:{line}::msg_trace][{message}]"
            ),
            1,
        )
        .unwrap()
    }

    #[test]
    fn plan_crosses_scenarios_with_supported_transports() {
        let cpp = TestRunner::new("t", ProducerFlavor::Cpp);
        assert_eq!(cpp.plan().len(), 6 * 3);

        let c = TestRunner::new("t", ProducerFlavor::C);
        assert_eq!(c.plan().len(), 5 * 2);
        assert!(c.plan().iter().all(|(_, t)| *t != TransportKind::File));
    }

    #[test]
    fn filters_drop_unavailable_entries() {
        let runner = TestRunner::new("t", ProducerFlavor::C)
            .with_scenarios(&[ScenarioKind::Singleton, ScenarioKind::Null])
            .with_transports(&[TransportKind::File, TransportKind::Stdout]);
        assert_eq!(runner.plan(), [(ScenarioKind::Null, TransportKind::Stdout)]);
    }

    #[test]
    fn failure_result_carries_kind_message_and_diff() {
        let failure = ScenarioFailure {
            error: VerifyError::CountMismatch {
                expected: 2,
                actual: 1,
            },
            expected: "[TRACE][demo.cpp:061::msg_trace][--ENTER--]\n[TRACE][demo.cpp:062::msg_trace][--EXIT--]"
                .into(),
            records: vec![trace_record("061", "--ENTER--")],
            pid: Some("00000042".into()),
            duration_ms: 7,
        };
        let result = failure_result(
            ProducerFlavor::Cpp,
            ScenarioKind::Trace,
            TransportKind::Network,
            &failure,
        );
        assert!(!result.passed);
        assert_eq!(result.case_name, "cpp::trace::network");
        assert_eq!(result.error_kind.as_deref(), Some("count_mismatch"));
        assert_eq!(result.record_count, 1);
        assert_eq!(result.pid.as_deref(), Some("00000042"));
        let diff = result.diff.unwrap();
        assert!(diff.contains("-[TRACE][demo.cpp:062::msg_trace][--EXIT--]"));
        assert!(result.message.unwrap().contains("expected 2 records"));
    }

    #[test]
    fn timeouts_are_logged_as_timeouts() {
        assert_eq!(outcome_for(Some("transport_timeout")), Outcome::Timeout);
        assert_eq!(outcome_for(Some("comparison_mismatch")), Outcome::Fail);
        assert_eq!(outcome_for(Some("io")), Outcome::Error);
        assert_eq!(outcome_for(None), Outcome::Pass);
    }
}
