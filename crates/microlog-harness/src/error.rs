//! Verification and configuration failures.
//!
//! Every variant aborts the scenario it occurs in. Nothing is retried.

use microlog_capture::{CaptureError, Level};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    /// The drain timed out with nothing captured.
    #[error("no records arrived over {transport} within {waited_ms} ms")]
    TransportTimeout { transport: String, waited_ms: u64 },
    #[error("record {index} mismatch: expected {expected}, got {actual}")]
    ComparisonMismatch {
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("expected {expected} records, captured {actual}")]
    CountMismatch { expected: usize, actual: usize },
    /// A per-thread record whose level maps to no known role.
    #[error("record with level {level} has no thread role: {record}")]
    UnknownRole { level: Level, record: String },
    #[error("pid token diverged within one run: {first} vs {other}")]
    PidDivergence { first: String, other: String },
    #[error("thread roles share tid {tid}")]
    TidCollision { tid: String },
    #[error("benchmark line {index} outside tolerance: expected {expected}, got {actual}")]
    BenchmarkMismatch {
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("stderr of `{args}` lacks {needle:?}; stderr was {stderr:?}")]
    StderrMismatch {
        args: String,
        needle: String,
        stderr: String,
    },
    #[error("{scenario} is not available for the {flavor} producer over {transport}")]
    UnsupportedScenario {
        scenario: String,
        flavor: String,
        transport: String,
    },
}

impl VerifyError {
    /// Short stable tag used in reports and event logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Capture(CaptureError::MalformedRecord { .. }) => "malformed_record",
            Self::Capture(CaptureError::MalformedBenchmark { .. }) => "malformed_benchmark",
            Self::Capture(CaptureError::MissingFile { .. }) => "missing_file",
            Self::Capture(CaptureError::EnvironmentPreparation { .. }) => {
                "environment_preparation"
            }
            Self::Capture(CaptureError::Spawn { .. } | CaptureError::Io(_)) => "io",
            Self::TransportTimeout { .. } => "transport_timeout",
            Self::ComparisonMismatch { .. } => "comparison_mismatch",
            Self::CountMismatch { .. } => "count_mismatch",
            Self::UnknownRole { .. } => "unknown_role",
            Self::PidDivergence { .. } => "pid_divergence",
            Self::TidCollision { .. } => "tid_collision",
            Self::BenchmarkMismatch { .. } => "benchmark_mismatch",
            Self::StderrMismatch { .. } => "stderr_mismatch",
            Self::UnsupportedScenario { .. } => "unsupported_scenario",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
