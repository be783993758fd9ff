//! Benchmark-mode output lines.
//!
//! In benchmark mode the producer prints one line per thread configuration:
//!
//! ```text
//! singlethread took: 402ms, size: 45350000, bandwidth: 108.31 MB/s
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::tolerance::{Tolerances, within_tolerance};

const BENCHMARK_PATTERN: &str = r"^(?P<mode>single|multi)thread took: (?P<time>[0-9]+)ms, size: (?P<size>[0-9]+), bandwidth: (?P<bandwidth>[0-9.]+) MB/s";

fn benchmark_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(BENCHMARK_PATTERN).expect("benchmark grammar is a valid regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadMode {
    Single,
    Multi,
}

impl ThreadMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
        }
    }
}

/// One `(elapsed, size, bandwidth)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMeasurement {
    pub mode: ThreadMode,
    pub elapsed_ms: u64,
    pub size: u64,
    pub bandwidth_mb_s: f64,
}

/// A field of a measurement that fell outside its tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementField {
    Elapsed,
    Size,
    Bandwidth,
}

impl BenchmarkMeasurement {
    #[must_use]
    pub fn new(mode: ThreadMode, elapsed_ms: u64, size: u64, bandwidth_mb_s: f64) -> Self {
        Self {
            mode,
            elapsed_ms,
            size,
            bandwidth_mb_s,
        }
    }

    /// Fields of `self` (the measured value) that miss `reference`.
    ///
    /// The thread mode is not compared; callers pair lines by position.
    #[must_use]
    pub fn deviations(&self, reference: &Self, tol: &Tolerances) -> Vec<MeasurementField> {
        let mut out = Vec::new();
        if !within_tolerance(reference.elapsed_ms as f64, self.elapsed_ms as f64, tol.time) {
            out.push(MeasurementField::Elapsed);
        }
        if !within_tolerance(reference.size as f64, self.size as f64, tol.size) {
            out.push(MeasurementField::Size);
        }
        if !within_tolerance(reference.bandwidth_mb_s, self.bandwidth_mb_s, tol.bandwidth) {
            out.push(MeasurementField::Bandwidth);
        }
        out
    }

    #[must_use]
    pub fn matches(&self, reference: &Self, tol: &Tolerances) -> bool {
        self.deviations(reference, tol).is_empty()
    }
}

impl fmt::Display for BenchmarkMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}thread took: {}ms, size: {}, bandwidth: {:.2} MB/s",
            self.mode.as_str(),
            self.elapsed_ms,
            self.size,
            self.bandwidth_mb_s
        )
    }
}

pub fn parse_benchmark_line(text: &str) -> Result<BenchmarkMeasurement, CaptureError> {
    let malformed = || CaptureError::MalformedBenchmark {
        text: text.to_string(),
    };
    let caps = benchmark_regex().captures(text).ok_or_else(malformed)?;
    let mode = match caps.name("mode").map(|m| m.as_str()) {
        Some("single") => ThreadMode::Single,
        Some("multi") => ThreadMode::Multi,
        _ => return Err(malformed()),
    };
    let elapsed_ms = caps["time"].parse().map_err(|_| malformed())?;
    let size = caps["size"].parse().map_err(|_| malformed())?;
    // `[0-9.]+` admits strings like "1.2.3"; the float parse is the final gate.
    let bandwidth_mb_s = caps["bandwidth"].parse().map_err(|_| malformed())?;
    Ok(BenchmarkMeasurement {
        mode,
        elapsed_ms,
        size,
        bandwidth_mb_s,
    })
}

/// Parse every newline-terminated benchmark line in `text`.
pub fn parse_benchmark_lines(text: &str) -> Result<Vec<BenchmarkMeasurement>, CaptureError> {
    text.split_terminator('\n').map(parse_benchmark_line).collect()
}
