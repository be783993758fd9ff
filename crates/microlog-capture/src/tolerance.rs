//! Approximate equality for benchmark measurements.

/// Relative tolerance applied to elapsed time.
pub const TIME_TOLERANCE: f64 = 0.11;
/// Payload size is deterministic and must match exactly.
pub const SIZE_TOLERANCE: f64 = 0.0;
/// Relative tolerance applied to bandwidth.
pub const BANDWIDTH_TOLERANCE: f64 = 0.11;

/// Compare `candidate` against `reference` with a relative `tolerance`.
///
/// Exact equality always matches. A zero reference cannot anchor a relative
/// bound, so the tolerance is then used as an absolute ceiling on the
/// candidate. Otherwise the match holds iff `|reference - candidate| / reference < tolerance`.
#[must_use]
pub fn within_tolerance(reference: f64, candidate: f64, tolerance: f64) -> bool {
    if reference == candidate {
        return true;
    }
    if reference == 0.0 {
        return candidate < tolerance;
    }
    (reference - candidate).abs() / reference < tolerance
}

/// Per-field tolerances for a benchmark comparison.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub time: f64,
    pub size: f64,
    pub bandwidth: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            time: TIME_TOLERANCE,
            size: SIZE_TOLERANCE,
            bandwidth: BANDWIDTH_TOLERANCE,
        }
    }
}
