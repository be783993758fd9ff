//! Verification harness for micro_logger demo producers.
//!
//! This crate provides:
//! - Scenario tables: flags and expected records per producer flavor
//! - Scenario verification: launch, capture over one transport, compare
//! - Misuse checks (usage without a writer, sanitizer crash) and benchmark comparison
//! - Suite runner with a JSONL event log and artifact index
//! - Report generation: markdown + JSON

#![forbid(unsafe_code)]

pub mod config;
pub mod diff;
pub mod error;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod structured_log;
pub mod verifier;
pub mod verify;

pub use config::HarnessConfig;
pub use error::{ConfigError, VerifyError};
pub use report::SuiteReport;
pub use runner::TestRunner;
pub use scenario::{ProducerFlavor, ScenarioKind, TransportKind};
pub use verifier::ScenarioVerifier;
pub use verify::{VerificationResult, VerificationSummary};
