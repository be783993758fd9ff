//! Stand-in for the micro_logger demo programs.
//!
//! Accepts the demos' command line and emits byte-compatible records so the
//! harness can be exercised without a C/C++ toolchain. Behaviour knobs:
//! - `MOCK_PRODUCER_FLAVOR`: `cpp` (default) or `c`
//! - `MOCK_PRODUCER_FAULT`: `drop_last`, `wrong_message`, `shared_tid`,
//!   `no_usage`, `slow_benchmark`, `silent`

use std::fs::File;
use std::io::Write;
use std::net::TcpStream;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};

use microlog_capture::Level;
use microlog_capture::network::DEFAULT_ENDPOINT;
use microlog_harness::config::default_benchmark_references;
use microlog_harness::scenario::{CRASH_MARKER, ProducerFlavor, ScenarioKind};
use microlog_harness::structured_log::now_utc;
use parking_lot::Mutex;

const ENV_FLAVOR: &str = "MOCK_PRODUCER_FLAVOR";
const ENV_FAULT: &str = "MOCK_PRODUCER_FAULT";

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TID: u64 = (u64::from(std::process::id()) << 8) + NEXT_TID.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    DropLast,
    WrongMessage,
    SharedTid,
    NoUsage,
    SlowBenchmark,
    /// Open every writer but emit nothing.
    Silent,
}

impl Fault {
    fn from_env() -> Option<Self> {
        match std::env::var(ENV_FAULT).ok()?.as_str() {
            "drop_last" => Some(Self::DropLast),
            "wrong_message" => Some(Self::WrongMessage),
            "shared_tid" => Some(Self::SharedTid),
            "no_usage" => Some(Self::NoUsage),
            "slow_benchmark" => Some(Self::SlowBenchmark),
            "silent" => Some(Self::Silent),
            _ => None,
        }
    }
}

enum Sink {
    Stdout,
    File(File),
    Socket(TcpStream),
}

impl Sink {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(line.as_bytes())?;
                out.flush()
            }
            Self::File(file) => file.write_all(line.as_bytes()),
            Self::Socket(stream) => stream.write_all(line.as_bytes()),
        }
    }
}

struct Logger {
    flavor: ProducerFlavor,
    fault: Option<Fault>,
    sinks: Mutex<Vec<Sink>>,
}

impl Logger {
    fn log(&self, level: Level, line: &str, function: &str, message: &str) {
        self.log_as(current_tid(), level, line, function, message);
    }

    fn log_as(&self, tid: u64, level: Level, line: &str, function: &str, message: &str) {
        if self.fault == Some(Fault::Silent) {
            return;
        }
        let now = now_utc();
        // now_utc: YYYY-MM-DDTHH:MM:SS.mmmZ
        let record = format!(
            "[{}/{}/{} {}][{}][pid:{:08}][tid:{:016}][{}:{}::{}][{}]\n",
            &now[8..10],
            &now[5..7],
            &now[2..4],
            &now[11..23],
            level.token(),
            std::process::id(),
            tid,
            self.flavor.source_file(),
            line,
            function,
            message
        );
        let mut sinks = self.sinks.lock();
        for sink in sinks.iter_mut() {
            if let Err(err) = sink.write_line(&record) {
                eprintln!("log write failed: {err}");
            }
        }
    }
}

fn current_tid() -> u64 {
    TID.with(|tid| *tid)
}

fn usage(program: &str, flavor: ProducerFlavor) -> String {
    let mut out = format!("Usage: {program} <writers> <message>\n  writers:\n    -o\n");
    if flavor == ProducerFlavor::Cpp {
        out.push_str("    -f<path>\n");
    }
    out.push_str("    -n[<host:port>]\n  messages:\n");
    for kind in flavor.scenarios() {
        if let Some(flag) = kind.flag(flavor) {
            out.push_str(&format!("    {flag}\n"));
        }
    }
    out.push_str("    --benchmark\n    --crash\n");
    out
}

fn main() -> ExitCode {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "demo".to_string());
    let args: Vec<String> = args.collect();
    let flavor = std::env::var(ENV_FLAVOR)
        .ok()
        .and_then(|v| ProducerFlavor::from_str_loose(&v))
        .unwrap_or_default();
    let fault = Fault::from_env();
    let logger = Logger {
        flavor,
        fault,
        sinks: Mutex::new(Vec::new()),
    };

    if args.is_empty() {
        eprint!("{}", usage(&program, flavor));
        return ExitCode::from(2);
    }

    for arg in &args {
        match arg.as_str() {
            "--help" => {
                eprint!("{}", usage(&program, flavor));
                return ExitCode::SUCCESS;
            }
            "--crash" => {
                eprintln!("{CRASH_MARKER}");
                eprintln!("==1==ERROR: AddressSanitizer: SEGV on unknown address 0x000000000000");
                return ExitCode::from(1);
            }
            "--benchmark" => {
                for reference in default_benchmark_references() {
                    let mut measured = reference;
                    if fault == Some(Fault::SlowBenchmark) {
                        measured.elapsed_ms *= 2;
                        measured.bandwidth_mb_s /= 2.0;
                    }
                    println!("{measured}");
                }
                return ExitCode::SUCCESS;
            }
            "-o" => logger.sinks.lock().push(Sink::Stdout),
            path if path.starts_with("-f") && flavor == ProducerFlavor::Cpp => {
                match File::create(&path[2..]) {
                    Ok(file) => logger.sinks.lock().push(Sink::File(file)),
                    Err(err) => {
                        eprintln!("cannot open {}: {err}", &path[2..]);
                        return ExitCode::from(1);
                    }
                }
            }
            endpoint if endpoint.starts_with("-n") => {
                let target = match &endpoint[2..] {
                    "" => DEFAULT_ENDPOINT,
                    addr => addr,
                };
                match TcpStream::connect(target) {
                    Ok(stream) => logger.sinks.lock().push(Sink::Socket(stream)),
                    Err(err) => {
                        eprintln!("cannot connect to {target}: {err}");
                        return ExitCode::from(1);
                    }
                }
            }
            flag => {
                let Some(kind) = flavor
                    .scenarios()
                    .iter()
                    .copied()
                    .find(|k| k.flag(flavor) == Some(flag))
                else {
                    eprint!("{}", usage(&program, flavor));
                    return ExitCode::from(2);
                };
                if logger.sinks.lock().is_empty() {
                    if fault == Some(Fault::NoUsage) {
                        return ExitCode::SUCCESS;
                    }
                    eprint!("{}", usage(&program, flavor));
                    return ExitCode::from(2);
                }
                emit(&logger, kind);
            }
        }
    }
    ExitCode::SUCCESS
}

fn emit(logger: &Logger, kind: ScenarioKind) {
    let cpp = logger.flavor == ProducerFlavor::Cpp;
    let mut sites: Vec<(Level, &str, &str, String)> = match kind {
        ScenarioKind::HelloWorld if cpp => {
            vec![(Level::Debug, "056", "msg_hello_world", "hello world".into())]
        }
        ScenarioKind::HelloWorld => vec![(Level::Debug, "197", "main", "hello world".into())],
        ScenarioKind::Null if cpp => vec![(Level::Error, "058", "msg_null", "(null)".into())],
        ScenarioKind::Null => vec![(Level::Error, "200", "main", "(null)".into())],
        ScenarioKind::Trace if cpp => vec![
            (Level::Trace, "061", "msg_trace", "--ENTER--".into()),
            (Level::Trace, "062", "msg_trace", "--EXIT--".into()),
        ],
        ScenarioKind::Trace => vec![
            (Level::Trace, "203", "main", "--ENTER--".into()),
            (Level::Trace, "204", "main", "--EXIT--".into()),
        ],
        ScenarioKind::Critical => {
            let (line, function) = if cpp { ("066", "msg_critical") } else { ("207", "main") };
            vec![(
                Level::Critical,
                line,
                function,
                format!("run out of chocolate for {} time!", 1),
            )]
        }
        ScenarioKind::Singleton => vec![
            (Level::Trace, "076", "~SampleSingletonClass", "--ENTER--".into()),
            (Level::Trace, "077", "~SampleSingletonClass", "--EXIT--".into()),
        ],
        ScenarioKind::Threads => {
            emit_threads(logger);
            return;
        }
    };
    if logger.fault == Some(Fault::DropLast) {
        sites.pop();
    }
    if logger.fault == Some(Fault::WrongMessage)
        && let Some(first) = sites.first_mut()
    {
        first.3 = String::from("goodbye");
    }
    for (level, line, function, message) in sites {
        logger.log(level, line, function, &message);
    }
}

fn emit_threads(logger: &Logger) {
    let cpp = logger.flavor == ProducerFlavor::Cpp;
    let shared = (logger.fault == Some(Fault::SharedTid)).then(current_tid);
    let drop_world = logger.fault == Some(Fault::DropLast);
    std::thread::scope(|s| {
        s.spawn(|| {
            let tid = shared.unwrap_or_else(current_tid);
            let (line, function) = if cpp { ("049", "operator()") } else { ("040", "worker_info") };
            logger.log_as(tid, Level::Info, line, function, &format!("hello {tid:016}"));
        });
        if !drop_world {
            s.spawn(|| {
                let tid = shared.unwrap_or_else(current_tid);
                let line = if cpp { "044" } else { "045" };
                logger.log_as(tid, Level::Warn, line, "worker_warn", &format!("world {tid:016}"));
            });
        }
    });
}
