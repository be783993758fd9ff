//! Harness configuration.
//!
//! Loaded from JSON (every field optional), then overridden by environment:
//! - `MICROLOG_DRAIN_TIMEOUT_MS`: network drain wait
//! - `MICROLOG_FILE_GRACE_MS`: delay before reading the file transport
//! - `MICROLOG_ENDPOINT`: `host:port` the capture server binds and the producer targets
//!
//! Malformed override values are ignored and the loaded value is kept.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use microlog_capture::network::DEFAULT_ENDPOINT;
use microlog_capture::{BenchmarkMeasurement, PreloadProbe, ThreadMode, Tolerances};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scenario::ProducerFlavor;

pub const ENV_DRAIN_TIMEOUT_MS: &str = "MICROLOG_DRAIN_TIMEOUT_MS";
pub const ENV_FILE_GRACE_MS: &str = "MICROLOG_FILE_GRACE_MS";
pub const ENV_ENDPOINT: &str = "MICROLOG_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Producer binary. Required before anything is launched.
    pub binary: Option<PathBuf>,
    pub flavor: ProducerFlavor,
    pub endpoint: String,
    pub drain_timeout_ms: u64,
    pub file_grace_ms: u64,
    /// Per-connection socket receive timeout; 0 disables it.
    pub recv_timeout_ms: u64,
    pub preload: PreloadProbe,
    /// Reference benchmark lines, in emission order (single, then multi).
    pub benchmark_references: Vec<BenchmarkMeasurement>,
    pub tolerances: Tolerances,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary: None,
            flavor: ProducerFlavor::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            drain_timeout_ms: 1000,
            file_grace_ms: 100,
            recv_timeout_ms: 5000,
            preload: PreloadProbe::default(),
            benchmark_references: default_benchmark_references(),
            tolerances: Tolerances::default(),
        }
    }
}

/// Reference throughput measured for the C demo's `--benchmark` run.
#[must_use]
pub fn default_benchmark_references() -> Vec<BenchmarkMeasurement> {
    vec![
        BenchmarkMeasurement::new(ThreadMode::Single, 402, 45_350_000, 108.31),
        BenchmarkMeasurement::new(ThreadMode::Multi, 305, 90_700_000, 273.89),
    ]
}

impl HarnessConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Apply `MICROLOG_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let vars: BTreeMap<String, String> = [ENV_DRAIN_TIMEOUT_MS, ENV_FILE_GRACE_MS, ENV_ENDPOINT]
            .into_iter()
            .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
            .collect();
        self.with_overrides(&vars)
    }

    /// Apply overrides from an explicit map (same keys as the environment).
    #[must_use]
    pub fn with_overrides(mut self, vars: &BTreeMap<String, String>) -> Self {
        if let Some(ms) = vars.get(ENV_DRAIN_TIMEOUT_MS).and_then(|v| parse_millis_loose(v)) {
            self.drain_timeout_ms = ms;
        }
        if let Some(ms) = vars.get(ENV_FILE_GRACE_MS).and_then(|v| parse_millis_loose(v)) {
            self.file_grace_ms = ms;
        }
        if let Some(endpoint) = vars.get(ENV_ENDPOINT).map(|v| v.trim())
            && is_endpoint(endpoint)
        {
            self.endpoint = endpoint.to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_endpoint(&self.endpoint) {
            return Err(ConfigError::Invalid(format!(
                "endpoint must be host:port, got '{}'",
                self.endpoint
            )));
        }
        if self.drain_timeout_ms == 0 {
            return Err(ConfigError::Invalid("drain_timeout_ms must be positive".into()));
        }
        for (name, tol) in [
            ("time", self.tolerances.time),
            ("size", self.tolerances.size),
            ("bandwidth", self.tolerances.bandwidth),
        ] {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} tolerance must be a non-negative number"
                )));
            }
        }
        Ok(())
    }

    /// The configured binary, or an error naming the missing setting.
    pub fn require_binary(&self) -> Result<&Path, ConfigError> {
        self.binary
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("no producer binary configured".into()))
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    #[must_use]
    pub fn file_grace(&self) -> Duration {
        Duration::from_millis(self.file_grace_ms)
    }

    #[must_use]
    pub fn recv_timeout(&self) -> Option<Duration> {
        (self.recv_timeout_ms > 0).then(|| Duration::from_millis(self.recv_timeout_ms))
    }
}

/// Accepts plain integers and an optional `ms` suffix (`250`, `250ms`).
fn parse_millis_loose(raw: &str) -> Option<u64> {
    let trimmed = raw.trim().to_ascii_lowercase();
    trimmed.strip_suffix("ms").unwrap_or(&trimmed).trim().parse().ok()
}

fn is_endpoint(s: &str) -> bool {
    match s.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
