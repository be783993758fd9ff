//! End-to-end execution of one scenario over one transport.
//!
//! Command line = transport flags + scenario flag. The verifier launches the
//! producer, records its pid, collects the transport's output, parses it, and
//! checks it against the scenario's expectation. Any failure ends the
//! scenario; nothing is retried.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use microlog_capture::benchmark::parse_benchmark_lines;
use microlog_capture::record::parse_lines;
use microlog_capture::{
    BenchmarkMeasurement, CaptureError, FileCapture, LogRecord, MeasurementField,
    NetworkCaptureServer, ProducerLauncher, ProducerOutput, ServerOptions, ServerStats,
    Tolerances,
};
use serde::Serialize;

use crate::config::HarnessConfig;
use crate::error::VerifyError;
use crate::scenario::{
    Expectation, ExpectedRecords, InvocationCheck, ProducerFlavor, ScenarioKind, ThreadRole,
    Transport, TransportKind,
};

const CAPTURE_FILE_NAME: &str = "capture.log";

/// What a passing scenario observed.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: ScenarioKind,
    pub transport: TransportKind,
    pub pid: String,
    pub records: Vec<LogRecord>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// A failed scenario, with whatever was captured before the failure.
#[derive(Debug)]
pub struct ScenarioFailure {
    pub error: VerifyError,
    pub expected: String,
    pub records: Vec<LogRecord>,
    pub pid: Option<String>,
    pub duration_ms: u64,
}

/// One benchmark line next to its reference.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkComparison {
    pub index: usize,
    pub reference: BenchmarkMeasurement,
    pub measured: BenchmarkMeasurement,
    pub deviations: Vec<MeasurementField>,
}

impl BenchmarkComparison {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.deviations.is_empty() && self.reference.mode == self.measured.mode
    }

    pub fn check(&self) -> Result<(), VerifyError> {
        if self.passed() {
            return Ok(());
        }
        Err(VerifyError::BenchmarkMismatch {
            index: self.index,
            expected: self.reference.to_string(),
            actual: self.measured.to_string(),
        })
    }
}

pub struct ScenarioVerifier {
    launcher: ProducerLauncher,
    flavor: ProducerFlavor,
    endpoint: String,
    drain_timeout: Duration,
    file_capture: FileCapture,
    server_options: ServerOptions,
    server: Option<NetworkCaptureServer>,
    tolerances: Tolerances,
    benchmark_references: Vec<BenchmarkMeasurement>,
}

impl ScenarioVerifier {
    #[must_use]
    pub fn new(launcher: ProducerLauncher, config: &HarnessConfig) -> Self {
        Self {
            launcher,
            flavor: config.flavor,
            endpoint: config.endpoint.clone(),
            drain_timeout: config.drain_timeout(),
            file_capture: FileCapture::new(config.file_grace()),
            server_options: ServerOptions {
                recv_timeout: config.recv_timeout(),
            },
            server: None,
            tolerances: config.tolerances,
            benchmark_references: config.benchmark_references.clone(),
        }
    }

    #[must_use]
    pub fn flavor(&self) -> ProducerFlavor {
        self.flavor
    }

    #[must_use]
    pub fn launcher(&self) -> &ProducerLauncher {
        &self.launcher
    }

    /// Stop the capture server, if one was started.
    pub fn shutdown(mut self) -> Option<ServerStats> {
        self.server.take().map(NetworkCaptureServer::shutdown)
    }

    fn server(&mut self) -> Result<&NetworkCaptureServer, VerifyError> {
        let server = match self.server.take() {
            Some(server) => server,
            None => NetworkCaptureServer::bind(self.endpoint.as_str(), self.server_options)?,
        };
        Ok(self.server.insert(server))
    }

    /// Run `scenario` over `transport` and check the captured records.
    pub fn run(
        &mut self,
        scenario: ScenarioKind,
        transport: TransportKind,
    ) -> Result<ScenarioOutcome, ScenarioFailure> {
        let started = Instant::now();
        let mut state = RunState::default();
        match self.run_inner(scenario, transport, &mut state) {
            Ok(outcome) => Ok(outcome),
            Err(error) => Err(ScenarioFailure {
                error,
                expected: state.expected,
                records: state.records,
                pid: state.pid,
                duration_ms: elapsed_ms(started),
            }),
        }
    }

    fn run_inner(
        &mut self,
        scenario: ScenarioKind,
        kind: TransportKind,
        state: &mut RunState,
    ) -> Result<ScenarioOutcome, VerifyError> {
        let started = Instant::now();
        let unsupported = || VerifyError::UnsupportedScenario {
            scenario: scenario.name().to_string(),
            flavor: self.flavor.to_string(),
            transport: kind.to_string(),
        };
        if !self.flavor.supports(kind) {
            return Err(unsupported());
        }
        let expectation = scenario.expectation(self.flavor).ok_or_else(unsupported)?;
        let flag = scenario.flag(self.flavor).ok_or_else(unsupported)?;
        state.expected = expectation.render(&[]);

        // Held until the scenario is done with the capture file.
        let mut _scratch = None;
        let transport = match kind {
            TransportKind::Stdout => Transport::Stdout,
            TransportKind::File => {
                let dir = tempfile::Builder::new()
                    .prefix("microlog-capture-")
                    .tempdir()
                    .map_err(CaptureError::from)?;
                let path = dir.path().join(CAPTURE_FILE_NAME);
                _scratch = Some(dir);
                Transport::File(path)
            }
            TransportKind::Network => {
                let server = self.server()?;
                // Leftovers from an earlier producer must not leak into this run.
                let _ = server.drain_raw_or_empty(Duration::ZERO);
                Transport::Network(server.local_addr().to_string())
            }
        };

        let mut args = transport.flags();
        args.push(flag.to_string());
        let mut running = self.launcher.spawn(&args)?;
        let expectation = expectation.with_pid(running.pid_token());
        state.pid = expectation.pid.clone();

        let (records, output) = match &transport {
            Transport::Stdout => {
                let text = running.read_stdout_to_end()?;
                let output = running.finish()?;
                (parse_lines(&text)?, output)
            }
            Transport::File(path) => {
                let output = running.finish()?;
                (self.file_capture.read_records(path)?, output)
            }
            Transport::Network(_) => {
                let output = running.finish()?;
                let timeout = self.drain_timeout;
                let wanted = expectation.records.len();
                let records = drain_until(self.server()?, wanted, timeout)?;
                if records.is_empty() {
                    return Err(VerifyError::TransportTimeout {
                        transport: kind.to_string(),
                        waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                (records, output)
            }
        };
        state.records.clone_from(&records);
        state.expected = expectation.render(&records);

        check_records(&expectation, &records)?;

        Ok(ScenarioOutcome {
            scenario,
            transport: kind,
            pid: expectation.pid.unwrap_or_default(),
            records,
            exit_code: output.exit_code(),
            duration_ms: elapsed_ms(started),
        })
    }

    /// Run the producer's benchmark mode and compare each line to its reference.
    pub fn run_benchmark(&self) -> Result<Vec<BenchmarkComparison>, VerifyError> {
        let output = self.launcher.run(["--benchmark"])?;
        let measured = parse_benchmark_lines(&output.stdout)?;
        if measured.len() != self.benchmark_references.len() {
            return Err(VerifyError::CountMismatch {
                expected: self.benchmark_references.len(),
                actual: measured.len(),
            });
        }
        Ok(self
            .benchmark_references
            .iter()
            .zip(measured)
            .enumerate()
            .map(|(index, (reference, measured))| BenchmarkComparison {
                index,
                reference: *reference,
                deviations: measured.deviations(reference, &self.tolerances),
                measured,
            })
            .collect())
    }

    /// Run a misuse invocation and require its marker on stderr.
    pub fn run_invocation(&self, check: &InvocationCheck) -> Result<ProducerOutput, VerifyError> {
        let output = self.launcher.run(&check.args)?;
        if output.stderr.contains(&check.stderr_contains) {
            Ok(output)
        } else {
            Err(VerifyError::StderrMismatch {
                args: check.args.join(" "),
                needle: check.stderr_contains.clone(),
                stderr: output.stderr,
            })
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    expected: String,
    records: Vec<LogRecord>,
    pid: Option<String>,
}

/// Drain until `wanted` records are in hand, the server goes quiet, or
/// `timeout` runs out. Handlers may still be reading the tail of a closed
/// connection when the first drain returns.
fn drain_until(
    server: &NetworkCaptureServer,
    wanted: usize,
    timeout: Duration,
) -> Result<Vec<LogRecord>, CaptureError> {
    let deadline = Instant::now() + timeout;
    let mut records = server.drain_or_empty(timeout)?;
    while !records.is_empty() && records.len() < wanted {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        let more = server.drain_or_empty(left)?;
        if more.is_empty() {
            break;
        }
        records.extend(more);
    }
    Ok(records)
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Check captured records against an expectation: count, content, then
/// pid/tid correlation.
pub fn check_records(expectation: &Expectation, records: &[LogRecord]) -> Result<(), VerifyError> {
    if records.len() != expectation.records.len() {
        return Err(VerifyError::CountMismatch {
            expected: expectation.records.len(),
            actual: records.len(),
        });
    }

    match &expectation.records {
        ExpectedRecords::Ordered(signatures) => {
            for (index, (expected, record)) in signatures.iter().zip(records).enumerate() {
                if record.signature() != *expected {
                    return Err(VerifyError::ComparisonMismatch {
                        index,
                        expected: expected.to_string(),
                        actual: record.to_string(),
                    });
                }
            }
        }
        ExpectedRecords::PerThread(templates) => {
            let mut seen = HashSet::new();
            for (index, record) in records.iter().enumerate() {
                let unknown = || VerifyError::UnknownRole {
                    level: record.level,
                    record: record.to_string(),
                };
                let role = ThreadRole::classify(record.level).ok_or_else(unknown)?;
                let template = templates
                    .iter()
                    .find(|t| t.role == role)
                    .ok_or_else(unknown)?;
                let expected = template.complete(&record.tid);
                if record.signature() != expected {
                    return Err(VerifyError::ComparisonMismatch {
                        index,
                        expected: expected.to_string(),
                        actual: record.to_string(),
                    });
                }
                seen.insert(role);
            }
            if let Some((index, missing)) = templates
                .iter()
                .enumerate()
                .find(|(_, t)| !seen.contains(&t.role))
            {
                return Err(VerifyError::ComparisonMismatch {
                    index,
                    expected: missing.signature.to_string(),
                    actual: String::from("<no record for this thread role>"),
                });
            }
            check_distinct_tids(records)?;
        }
    }

    check_pid_correlation(expectation.pid.as_deref(), records)
}

/// All records of one run carry the same pid, and it is the spawned process's.
fn check_pid_correlation(spawned: Option<&str>, records: &[LogRecord]) -> Result<(), VerifyError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    if let Some(other) = records.iter().find(|r| r.pid != first.pid) {
        return Err(VerifyError::PidDivergence {
            first: first.pid.clone(),
            other: other.pid.clone(),
        });
    }
    match spawned {
        Some(pid) if pid != first.pid => Err(VerifyError::PidDivergence {
            first: pid.to_string(),
            other: first.pid.clone(),
        }),
        _ => Ok(()),
    }
}

fn check_distinct_tids(records: &[LogRecord]) -> Result<(), VerifyError> {
    let mut tids = HashSet::new();
    for record in records {
        if !tids.insert(record.tid.as_str()) {
            return Err(VerifyError::TidCollision {
                tid: record.tid.clone(),
            });
        }
    }
    Ok(())
}
