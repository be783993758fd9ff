//! Capture layer for the micro_logger verification harness.
//!
//! This crate provides:
//! - Record grammar: one producer line to a [`LogRecord`] or a hard failure
//! - Benchmark grammar and tolerance comparison for throughput lines
//! - Producer launching with ASan preload detection
//! - File capture with a flush grace period
//! - A concurrent TCP capture server with a bounded drain

#![forbid(unsafe_code)]

pub mod benchmark;
pub mod error;
pub mod file_channel;
pub mod launcher;
pub mod network;
pub mod record;
pub mod tolerance;

pub use benchmark::{BenchmarkMeasurement, MeasurementField, ThreadMode};
pub use error::CaptureError;
pub use file_channel::FileCapture;
pub use launcher::{
    EnvMap, PreloadDecision, PreloadProbe, PreparedEnvironment, ProducerLauncher, ProducerOutput,
    RunningProducer,
};
pub use network::{CaptureBuffer, NetworkCaptureServer, ServerOptions, ServerStats};
pub use record::{Level, LogRecord, RecordSignature, parse_line, parse_lines};
pub use tolerance::{Tolerances, within_tolerance};
