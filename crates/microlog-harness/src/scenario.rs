//! Scenario tables: which flags to pass, and what the producer must emit.
//!
//! Expectations are templates over (level, file, line, function, message).
//! The pid is filled in after spawn; per-thread messages get their tid
//! appended once the record's role is known.

use std::fmt;
use std::path::PathBuf;

use microlog_capture::network::DEFAULT_ENDPOINT;
use microlog_capture::{Level, LogRecord, RecordSignature};
use serde::{Deserialize, Serialize};

/// Which demo program the producer binary is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerFlavor {
    #[default]
    Cpp,
    C,
}

impl ProducerFlavor {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpp" | "c++" | "cxx" | "demo_cpp" => Some(Self::Cpp),
            "c" | "demo_c" => Some(Self::C),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpp => "cpp",
            Self::C => "c",
        }
    }

    /// Source file name the producer reports in every record.
    #[must_use]
    pub const fn source_file(self) -> &'static str {
        match self {
            Self::Cpp => "demo.cpp",
            Self::C => "demo.c",
        }
    }

    #[must_use]
    pub fn scenarios(self) -> &'static [ScenarioKind] {
        match self {
            Self::Cpp => &ScenarioKind::ALL,
            Self::C => &[
                ScenarioKind::HelloWorld,
                ScenarioKind::Null,
                ScenarioKind::Trace,
                ScenarioKind::Critical,
                ScenarioKind::Threads,
            ],
        }
    }

    #[must_use]
    pub const fn supports(self, transport: TransportKind) -> bool {
        !matches!((self, transport), (Self::C, TransportKind::File))
    }

    #[must_use]
    pub fn transports(self) -> Vec<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .filter(|t| self.supports(*t))
            .collect()
    }
}

impl fmt::Display for ProducerFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport without its parameters, for tables and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdout,
    File,
    Network,
}

impl TransportKind {
    pub const ALL: [TransportKind; 3] = [Self::Stdout, Self::File, Self::Network];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::File => "file",
            Self::Network => "network",
        }
    }

    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" | "stdo" | "o" => Some(Self::Stdout),
            "file" | "f" => Some(Self::File),
            "network" | "net" | "n" | "tcp" => Some(Self::Network),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transport together with what the producer needs to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Stdout,
    File(PathBuf),
    /// `host:port` the producer connects to.
    Network(String),
}

impl Transport {
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Stdout => TransportKind::Stdout,
            Self::File(_) => TransportKind::File,
            Self::Network(_) => TransportKind::Network,
        }
    }

    /// Writer-selection flags. Optional arguments are attached, never separate.
    #[must_use]
    pub fn flags(&self) -> Vec<String> {
        match self {
            Self::Stdout => vec!["-o".to_string()],
            Self::File(path) => vec![format!("-f{}", path.display())],
            Self::Network(endpoint) if endpoint == DEFAULT_ENDPOINT => vec!["-n".to_string()],
            Self::Network(endpoint) => vec![format!("-n{endpoint}")],
        }
    }
}

/// Predefined message scenarios the demo producers implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    HelloWorld,
    Null,
    Trace,
    Critical,
    Threads,
    Singleton,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 6] = [
        Self::HelloWorld,
        Self::Null,
        Self::Trace,
        Self::Critical,
        Self::Threads,
        Self::Singleton,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::HelloWorld => "hello_world",
            Self::Null => "null",
            Self::Trace => "trace",
            Self::Critical => "critical",
            Self::Threads => "threads",
            Self::Singleton => "singleton",
        }
    }

    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let wanted = s
            .trim_start_matches("--")
            .trim_start_matches("msg_")
            .replace('_', "")
            .to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.name().replace('_', "") == wanted)
    }

    /// Message-scenario flag, or `None` when the flavor lacks the scenario.
    #[must_use]
    pub const fn flag(self, flavor: ProducerFlavor) -> Option<&'static str> {
        match (self, flavor) {
            (Self::HelloWorld, _) => Some("--msg_hello_world"),
            (Self::Null, _) => Some("--msg_null"),
            (Self::Trace, _) => Some("--msg_trace"),
            (Self::Critical, _) => Some("--msg_critical"),
            (Self::Threads, ProducerFlavor::Cpp) => Some("--msg_threads"),
            (Self::Threads, ProducerFlavor::C) => Some("--threads"),
            (Self::Singleton, ProducerFlavor::Cpp) => Some("--msg_singleton"),
            (Self::Singleton, ProducerFlavor::C) => None,
        }
    }

    /// Expected output for `flavor`, or `None` when the flavor lacks the scenario.
    #[must_use]
    pub fn expectation(self, flavor: ProducerFlavor) -> Option<Expectation> {
        let file = flavor.source_file();
        let site = |level, line: &str, function: &str, message: &str| {
            RecordSignature::new(level, file, line, function, message)
        };
        let records = match (self, flavor) {
            (Self::HelloWorld, ProducerFlavor::Cpp) => ExpectedRecords::Ordered(vec![site(
                Level::Debug,
                "056",
                "msg_hello_world",
                "hello world",
            )]),
            (Self::HelloWorld, ProducerFlavor::C) => {
                ExpectedRecords::Ordered(vec![site(Level::Debug, "197", "main", "hello world")])
            }
            (Self::Null, ProducerFlavor::Cpp) => {
                ExpectedRecords::Ordered(vec![site(Level::Error, "058", "msg_null", "(null)")])
            }
            (Self::Null, ProducerFlavor::C) => {
                ExpectedRecords::Ordered(vec![site(Level::Error, "200", "main", "(null)")])
            }
            (Self::Trace, ProducerFlavor::Cpp) => ExpectedRecords::Ordered(vec![
                site(Level::Trace, "061", "msg_trace", "--ENTER--"),
                site(Level::Trace, "062", "msg_trace", "--EXIT--"),
            ]),
            (Self::Trace, ProducerFlavor::C) => ExpectedRecords::Ordered(vec![
                site(Level::Trace, "203", "main", "--ENTER--"),
                site(Level::Trace, "204", "main", "--EXIT--"),
            ]),
            (Self::Critical, ProducerFlavor::Cpp) => ExpectedRecords::Ordered(vec![site(
                Level::Critical,
                "066",
                "msg_critical",
                "run out of chocolate for 1 time!",
            )]),
            (Self::Critical, ProducerFlavor::C) => ExpectedRecords::Ordered(vec![site(
                Level::Critical,
                "207",
                "main",
                "run out of chocolate for 1 time!",
            )]),
            (Self::Threads, ProducerFlavor::Cpp) => ExpectedRecords::PerThread(vec![
                RoleTemplate::new(ThreadRole::Hello, site(Level::Info, "049", "operator()", "hello ")),
                RoleTemplate::new(ThreadRole::World, site(Level::Warn, "044", "worker_warn", "world ")),
            ]),
            (Self::Threads, ProducerFlavor::C) => ExpectedRecords::PerThread(vec![
                RoleTemplate::new(ThreadRole::Hello, site(Level::Info, "040", "worker_info", "hello ")),
                RoleTemplate::new(ThreadRole::World, site(Level::Warn, "045", "worker_warn", "world ")),
            ]),
            (Self::Singleton, ProducerFlavor::Cpp) => ExpectedRecords::Ordered(vec![
                site(Level::Trace, "076", "~SampleSingletonClass", "--ENTER--"),
                site(Level::Trace, "077", "~SampleSingletonClass", "--EXIT--"),
            ]),
            (Self::Singleton, ProducerFlavor::C) => return None,
        };
        Some(Expectation {
            scenario: self,
            records,
            pid: None,
        })
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tag for a record emitted by one of the worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadRole {
    Hello,
    World,
}

impl ThreadRole {
    /// Role implied by a record's level; any other level is not a worker record.
    #[must_use]
    pub const fn classify(level: Level) -> Option<Self> {
        match level {
            Level::Info => Some(Self::Hello),
            Level::Warn => Some(Self::World),
            _ => None,
        }
    }
}

/// Expected record for one role. The message is a prefix; the emitting
/// thread's tid completes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTemplate {
    pub role: ThreadRole,
    pub signature: RecordSignature,
}

impl RoleTemplate {
    #[must_use]
    pub const fn new(role: ThreadRole, signature: RecordSignature) -> Self {
        Self { role, signature }
    }

    /// The exact signature expected from the thread with `tid`.
    #[must_use]
    pub fn complete(&self, tid: &str) -> RecordSignature {
        let mut sig = self.signature.clone();
        sig.message.push_str(tid);
        sig
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedRecords {
    /// Records must arrive exactly in this order.
    Ordered(Vec<RecordSignature>),
    /// One record per role, in any order.
    PerThread(Vec<RoleTemplate>),
}

impl ExpectedRecords {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Ordered(sigs) => sigs.len(),
            Self::PerThread(roles) => roles.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub scenario: ScenarioKind,
    pub records: ExpectedRecords,
    /// Pid token of the spawned producer, once known.
    pub pid: Option<String>,
}

impl Expectation {
    #[must_use]
    pub fn with_pid(mut self, pid: impl Into<String>) -> Self {
        self.pid = Some(pid.into());
        self
    }

    /// Rendered expected lines for diffs. Per-thread messages use the tids
    /// actually observed when a matching record exists.
    #[must_use]
    pub fn render(&self, observed: &[LogRecord]) -> String {
        let lines: Vec<String> = match &self.records {
            ExpectedRecords::Ordered(sigs) => sigs.iter().map(ToString::to_string).collect(),
            ExpectedRecords::PerThread(roles) => roles
                .iter()
                .map(|template| {
                    observed
                        .iter()
                        .find(|r| ThreadRole::classify(r.level) == Some(template.role))
                        .map_or_else(
                            || template.signature.to_string(),
                            |r| template.complete(&r.tid).to_string(),
                        )
                })
                .collect(),
        };
        lines.join("\n")
    }
}

/// Argument vector and stderr fragment for a misuse check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationCheck {
    pub name: String,
    pub args: Vec<String>,
    pub stderr_contains: String,
}

/// Printed by the demos when a message flag comes before any writer flag.
pub const USAGE_MARKER: &str = "Usage:";
/// Printed by an ASan build when the deliberate crash fires.
pub const CRASH_MARKER: &str = "AddressSanitizer:DEADLYSIGNAL";

/// Misuse checks: every message flag without a writer must print usage, and
/// `--crash` must trip the sanitizer.
#[must_use]
pub fn invocation_checks(flavor: ProducerFlavor) -> Vec<InvocationCheck> {
    let mut checks: Vec<InvocationCheck> = flavor
        .scenarios()
        .iter()
        .filter_map(|kind| {
            kind.flag(flavor).map(|flag| InvocationCheck {
                name: format!("usage_without_writer::{}", kind.name()),
                args: vec![flag.to_string()],
                stderr_contains: USAGE_MARKER.to_string(),
            })
        })
        .collect();
    checks.push(InvocationCheck {
        name: "crash".to_string(),
        args: vec!["--crash".to_string()],
        stderr_contains: CRASH_MARKER.to_string(),
    });
    checks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_flag_is_bare_for_default_endpoint() {
        assert_eq!(Transport::Network(DEFAULT_ENDPOINT.into()).flags(), ["-n"]);
        assert_eq!(
            Transport::Network("127.0.0.1:7000".into()).flags(),
            ["-n127.0.0.1:7000"]
        );
    }

    #[test]
    fn file_flag_attaches_path() {
        let t = Transport::File(PathBuf::from("/tmp/x.log"));
        assert_eq!(t.flags(), ["-f/tmp/x.log"]);
        assert_eq!(t.kind(), TransportKind::File);
    }

    #[test]
    fn c_flavor_lacks_singleton_and_file() {
        assert!(ScenarioKind::Singleton.expectation(ProducerFlavor::C).is_none());
        assert!(ScenarioKind::Singleton.flag(ProducerFlavor::C).is_none());
        assert!(!ProducerFlavor::C.supports(TransportKind::File));
        assert_eq!(
            ProducerFlavor::C.transports(),
            [TransportKind::Stdout, TransportKind::Network]
        );
        assert_eq!(ScenarioKind::Threads.flag(ProducerFlavor::C), Some("--threads"));
    }

    #[test]
    fn every_cpp_scenario_has_expectation() {
        for kind in ProducerFlavor::Cpp.scenarios() {
            let exp = kind.expectation(ProducerFlavor::Cpp).unwrap();
            assert!(!exp.records.is_empty(), "{kind}");
            assert!(kind.flag(ProducerFlavor::Cpp).is_some());
        }
    }

    #[test]
    fn roles_follow_levels() {
        assert_eq!(ThreadRole::classify(Level::Info), Some(ThreadRole::Hello));
        assert_eq!(ThreadRole::classify(Level::Warn), Some(ThreadRole::World));
        for level in [Level::Trace, Level::Debug, Level::Error, Level::Critical] {
            assert_eq!(ThreadRole::classify(level), None);
        }
    }

    #[test]
    fn role_template_appends_tid() {
        let ExpectedRecords::PerThread(roles) = ScenarioKind::Threads
            .expectation(ProducerFlavor::Cpp)
            .unwrap()
            .records
        else {
            panic!("threads is per-thread");
        };
        let sig = roles[0].complete("0000000000000042");
        assert_eq!(sig.message, "hello 0000000000000042");
        assert_eq!(sig.function, "operator()");
    }

    #[test]
    fn scenario_names_parse_loosely() {
        let parse = ScenarioKind::from_str_loose;
        assert_eq!(parse("--msg_hello_world"), Some(ScenarioKind::HelloWorld));
        assert_eq!(parse("HelloWorld"), Some(ScenarioKind::HelloWorld));
        assert_eq!(parse("--threads"), Some(ScenarioKind::Threads));
        assert_eq!(parse("singleton"), Some(ScenarioKind::Singleton));
        assert_eq!(parse("bogus"), None);
    }

    #[test]
    fn invocation_checks_cover_every_flag_and_crash() {
        let checks = invocation_checks(ProducerFlavor::Cpp);
        assert_eq!(checks.len(), ScenarioKind::ALL.len() + 1);
        assert!(checks.iter().any(|c| c.args == ["--crash"] && c.stderr_contains == CRASH_MARKER));
        assert!(checks
            .iter()
            .filter(|c| c.stderr_contains == USAGE_MARKER)
            .all(|c| c.args.len() == 1));
    }
}
