//! Failure taxonomy for the capture layer.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Captured text does not follow the record grammar.
    #[error("malformed record at line {line}: {text:?}")]
    MalformedRecord { line: usize, text: String },
    #[error("malformed benchmark line: {text:?}")]
    MalformedBenchmark { text: String },
    #[error("capture file not found: {}", path.display())]
    MissingFile { path: PathBuf },
    /// The preload probe detected a required runtime library it could not resolve.
    #[error("environment preparation failed: {reason}")]
    EnvironmentPreparation { reason: String },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// True for failures that indicate a producer-side protocol regression.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. } | Self::MalformedBenchmark { .. }
        )
    }
}
