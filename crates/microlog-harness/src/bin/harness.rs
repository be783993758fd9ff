//! CLI entrypoint for the micro_logger verification harness.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use microlog_capture::benchmark::parse_benchmark_lines;
use microlog_capture::{NetworkCaptureServer, ProducerLauncher, ServerOptions, parse_lines};
use microlog_harness::structured_log::{
    ArtifactIndex, LogEmitter, LogEntry, LogLevel, now_utc, validate_log_file,
};
use microlog_harness::{
    HarnessConfig, ProducerFlavor, ScenarioKind, ScenarioVerifier, SuiteReport, TestRunner,
    TransportKind, VerificationResult, VerificationSummary,
};

/// Verification tooling for micro_logger producers.
#[derive(Debug, Parser)]
#[command(name = "microlog-harness")]
#[command(about = "Scenario verification harness for micro_logger demo producers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scenario suite against a producer binary.
    Run {
        /// Harness configuration JSON.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Producer binary (overrides the config).
        #[arg(long)]
        binary: Option<PathBuf>,
        /// Producer flavor: `cpp` or `c` (overrides the config).
        #[arg(long)]
        flavor: Option<String>,
        /// Only run these scenarios (repeatable).
        #[arg(long)]
        scenario: Vec<String>,
        /// Only use these transports (repeatable).
        #[arg(long)]
        transport: Vec<String>,
        /// Also run the benchmark comparison.
        #[arg(long)]
        benchmark: bool,
        /// Skip the usage and crash checks.
        #[arg(long)]
        skip_invocations: bool,
        /// Output report path (markdown; JSON is written alongside).
        #[arg(long)]
        report: Option<PathBuf>,
        /// JSONL event log path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Run only the benchmark comparison.
    Bench {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        binary: Option<PathBuf>,
    },
    /// Parse captured producer output and print it as JSON.
    Parse {
        /// File holding log records (or benchmark lines with --benchmark).
        input: PathBuf,
        #[arg(long)]
        benchmark: bool,
    },
    /// Capture network traffic once and print the parsed records.
    Listen {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Bind address (overrides the config).
        #[arg(long)]
        endpoint: Option<String>,
        /// How long to wait for the first line.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Report whether the producer needs a sanitizer runtime preloaded.
    ProbeEnv {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        binary: Option<PathBuf>,
    },
    /// Validate a JSONL event log written by `run`.
    ValidateLog {
        /// JSONL file to check.
        path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            binary,
            flavor,
            scenario,
            transport,
            benchmark,
            skip_invocations,
            report,
            log,
        } => {
            let config = load_config(config.as_deref(), binary, flavor.as_deref())?;
            let mut runner = TestRunner::new(run_id(), config.flavor)
                .with_invocation_checks(!skip_invocations)
                .with_benchmark(benchmark);
            if !scenario.is_empty() {
                let kinds = scenario
                    .iter()
                    .map(|s| {
                        ScenarioKind::from_str_loose(s).ok_or_else(|| format!("unknown scenario '{s}'"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                runner = runner.with_scenarios(&kinds);
            }
            if !transport.is_empty() {
                let kinds = transport
                    .iter()
                    .map(|t| {
                        TransportKind::from_str_loose(t).ok_or_else(|| format!("unknown transport '{t}'"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                runner = runner.with_transports(&kinds);
            }

            let summary = match &log {
                Some(path) => {
                    let mut emitter = LogEmitter::to_file(path, &runner.campaign)?;
                    run_suite(&config, &runner, &mut emitter, report.as_deref())?
                }
                None => {
                    let mut emitter = LogEmitter::to_buffer(&runner.campaign);
                    run_suite(&config, &runner, &mut emitter, report.as_deref())?
                }
            };

            if let Some(report_path) = &report {
                let mut index = ArtifactIndex::new(runner.campaign.clone());
                index.add_file(report_path, "report_md")?;
                index.add_file(&report_path.with_extension("json"), "report_json")?;
                if let Some(log_path) = &log {
                    index.add_file(log_path, "event_log")?;
                }
                let index_path = report_path.with_extension("artifacts.json");
                std::fs::write(&index_path, index.to_json()?)?;
                eprintln!("Artifact index written to {}", index_path.display());
            }

            eprintln!(
                "Results: {} passed, {} failed, {} total",
                summary.passed, summary.failed, summary.total
            );
            for failure in summary.failures() {
                eprintln!(
                    "  FAIL {}: {}",
                    failure.case_name,
                    failure.message.as_deref().unwrap_or("no detail")
                );
            }
            if !summary.all_passed() {
                return Err(format!("{} of {} checks failed", summary.failed, summary.total).into());
            }
        }
        Command::Bench { config, binary } => {
            let config = load_config(config.as_deref(), binary, None)?;
            let verifier = ScenarioVerifier::new(launcher_for(&config)?, &config);
            let comparisons = verifier.run_benchmark()?;
            let mut failed = 0usize;
            for cmp in &comparisons {
                let status = if cmp.passed() { "PASS" } else { "FAIL" };
                println!("{status} {} (reference {})", cmp.measured, cmp.reference);
                if !cmp.passed() {
                    failed += 1;
                }
            }
            if failed > 0 {
                return Err(format!("{failed} benchmark lines outside tolerance").into());
            }
        }
        Command::Parse { input, benchmark } => {
            let text = std::fs::read_to_string(&input)?;
            let json = if benchmark {
                serde_json::to_string_pretty(&parse_benchmark_lines(&text)?)?
            } else {
                serde_json::to_string_pretty(&parse_lines(&text)?)?
            };
            println!("{json}");
        }
        Command::Listen {
            config,
            endpoint,
            timeout_ms,
        } => {
            let config = load_config(config.as_deref(), None, None)?;
            let endpoint = endpoint.unwrap_or_else(|| config.endpoint.clone());
            let server = NetworkCaptureServer::bind(
                endpoint.as_str(),
                ServerOptions {
                    recv_timeout: config.recv_timeout(),
                },
            )?;
            eprintln!("Listening on {}", server.local_addr());
            let drained = server.drain_or_empty(Duration::from_millis(timeout_ms));
            let stats = server.shutdown();
            eprintln!(
                "Served {} connections ({} handler errors)",
                stats.connections, stats.handler_errors
            );
            let records = drained?;
            if records.is_empty() {
                return Err(format!("no records arrived within {timeout_ms} ms").into());
            }
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::ProbeEnv { config, binary } => {
            let config = load_config(config.as_deref(), binary, None)?;
            let binary = config.require_binary()?;
            let prepared = config.preload.prepare(binary)?;
            println!("{}", serde_json::to_string_pretty(&prepared.preload)?);
        }
        Command::ValidateLog { path } => {
            let (lines, errors) = validate_log_file(&path)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(format!("{} of {lines} log lines invalid", errors.len()).into());
            }
            eprintln!("{lines} log lines valid");
        }
    }

    Ok(())
}

fn load_config(
    path: Option<&Path>,
    binary: Option<PathBuf>,
    flavor: Option<&str>,
) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    }
    .with_env_overrides();
    if let Some(binary) = binary {
        config.binary = Some(binary);
    }
    if let Some(flavor) = flavor {
        config.flavor =
            ProducerFlavor::from_str_loose(flavor).ok_or_else(|| format!("unknown flavor '{flavor}'"))?;
    }
    config.validate()?;
    Ok(config)
}

fn launcher_for(config: &HarnessConfig) -> Result<ProducerLauncher, Box<dyn std::error::Error>> {
    let binary = config.require_binary()?;
    let prepared = config.preload.prepare(binary)?;
    Ok(ProducerLauncher::new(binary, prepared.vars))
}

fn run_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!("microlog-{secs}")
}

fn run_suite<W: Write>(
    config: &HarnessConfig,
    runner: &TestRunner,
    emitter: &mut LogEmitter<W>,
    report: Option<&Path>,
) -> Result<VerificationSummary, Box<dyn std::error::Error>> {
    let binary = config.require_binary()?;
    eprintln!(
        "Verifying {} ({} flavor), {} scenario runs",
        binary.display(),
        config.flavor,
        runner.plan().len()
    );

    let prepared = match config.preload.prepare(binary) {
        Ok(prepared) => prepared,
        Err(err) => {
            emitter.emit_entry(
                LogEntry::new("", LogLevel::Fatal, "environment_preparation_failed")
                    .with_flavor(config.flavor)
                    .with_details(serde_json::json!({ "error": err.to_string() })),
            )?;
            emitter.flush()?;
            return Err(err.into());
        }
    };
    emitter.emit_entry(
        LogEntry::new("", LogLevel::Info, "environment_prepared")
            .with_flavor(config.flavor)
            .with_details(serde_json::to_value(&prepared.preload)?),
    )?;

    let mut verifier =
        ScenarioVerifier::new(ProducerLauncher::new(binary, prepared.vars), config);
    let results: Vec<VerificationResult> = runner.run(&mut verifier, emitter)?;
    let server = verifier.shutdown();
    let summary = VerificationSummary::from_results(results);

    if let Some(report_path) = report {
        let doc = SuiteReport {
            title: String::from("micro_logger Verification Report"),
            flavor: config.flavor.to_string(),
            binary: binary.display().to_string(),
            timestamp: now_utc(),
            summary: summary.clone(),
            server,
        };
        std::fs::write(report_path, doc.to_markdown())?;
        std::fs::write(report_path.with_extension("json"), doc.to_json())?;
        eprintln!("Report written to {}", report_path.display());
    }
    Ok(summary)
}
