//! Record grammar for one line of producer output.
//!
//! Every transport (stdout, file, socket) carries the same fixed-width line:
//!
//! ```text
//! [DD/MM/YY HH:MM:SS.mmm][LEVEL][pid:dddddddd][tid:dddddddddddddddd][file:line::function][message]
//! ```
//!
//! A line either parses into a fully populated [`LogRecord`] or fails with
//! [`CaptureError::MalformedRecord`]; there is no partial record.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Width of the pid token inside `[pid:…]`.
pub const PID_WIDTH: usize = 8;
/// Width of the tid token inside `[tid:…]`.
pub const TID_WIDTH: usize = 16;

const RECORD_PATTERN: &str = concat!(
    r"^\[(?P<date>[0-9]{2}/[0-9]{2}/[0-9]{2}) (?P<time>[0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]{3})\]",
    r"\[(?P<level>TRACE|DEBUG|INFO |WARN |ERROR|CRITI)\]",
    r"\[pid:(?P<pid>[0-9]{8})\]\[tid:(?P<tid>[0-9]{16})\]",
    r"\[(?P<file>[a-zA-Z0-9_-]+\.[cp]{1,3}):(?P<line>[0-9]{1,4})::(?P<function>.*?)\]",
    r"\[(?P<message>.*?)\]",
);

fn record_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(RECORD_PATTERN).expect("record grammar is a valid regex"))
}

/// Severity token. The wire form is always five characters wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Critical,
    ];

    /// Fixed-width token as it appears between brackets on the wire.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warn => "WARN ",
            Self::Error => "ERROR",
            Self::Critical => "CRITI",
        }
    }

    /// Inverse of [`Level::token`]. Unpadded `INFO`/`WARN` are rejected.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.token() == token)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One parsed line of producer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub date: String,
    pub time: String,
    pub level: Level,
    pub pid: String,
    pub tid: String,
    pub file: String,
    /// Source line exactly as emitted (the producer zero-pads, e.g. `056`).
    pub line: String,
    pub function: String,
    pub message: String,
}

impl LogRecord {
    /// The fields that take part in verification equality.
    ///
    /// Date, time, pid and tid differ on every run and are left out.
    #[must_use]
    pub fn signature(&self) -> RecordSignature {
        RecordSignature {
            level: self.level,
            file: self.file.clone(),
            line: self.line.clone(),
            function: self.function.clone(),
            message: self.message.clone(),
        }
    }

    #[must_use]
    pub fn line_number(&self) -> u32 {
        // The grammar guarantees 1-4 ASCII digits.
        self.line.parse().unwrap_or(0)
    }
}

/// Renders the record back into its wire form (without the trailing newline).
impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}][{}][pid:{}][tid:{}][{}:{}::{}][{}]",
            self.date,
            self.time,
            self.level.token(),
            self.pid,
            self.tid,
            self.file,
            self.line,
            self.function,
            self.message
        )
    }
}

/// Verification identity of a record: `(level, file, line, function, message)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordSignature {
    pub level: Level,
    pub file: String,
    pub line: String,
    pub function: String,
    pub message: String,
}

impl RecordSignature {
    #[must_use]
    pub fn new(
        level: Level,
        file: impl Into<String>,
        line: impl Into<String>,
        function: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            file: file.into(),
            line: line.into(),
            function: function.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RecordSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}][{}:{}::{}][{}]",
            self.level.token(),
            self.file,
            self.line,
            self.function,
            self.message
        )
    }
}

/// Parse a single line. `line_number` is only used for error reporting.
pub fn parse_line(text: &str, line_number: usize) -> Result<LogRecord, CaptureError> {
    let malformed = || CaptureError::MalformedRecord {
        line: line_number,
        text: text.to_string(),
    };
    let caps = record_regex().captures(text).ok_or_else(malformed)?;
    let field = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

    let level = caps
        .name("level")
        .and_then(|m| Level::from_token(m.as_str()))
        .ok_or_else(malformed)?;

    Ok(LogRecord {
        date: field("date").ok_or_else(malformed)?,
        time: field("time").ok_or_else(malformed)?,
        level,
        pid: field("pid").ok_or_else(malformed)?,
        tid: field("tid").ok_or_else(malformed)?,
        file: field("file").ok_or_else(malformed)?,
        line: field("line").ok_or_else(malformed)?,
        function: field("function").ok_or_else(malformed)?,
        message: field("message").ok_or_else(malformed)?,
    })
}

/// Parse newline-separated text. A single trailing newline is allowed; any
/// other empty line is malformed, like any line that breaks the grammar.
pub fn parse_lines(text: &str) -> Result<Vec<LogRecord>, CaptureError> {
    text.split_terminator('\n')
        .enumerate()
        .map(|(idx, line)| parse_line(line, idx + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "[16/10/26 12:34:56.789][DEBUG][pid:00006699][tid:0000139804000365][demo.cpp:056::msg_hello_world][hello world]";

    #[test]
    fn parses_every_field() {
        let rec = parse_line(HELLO, 1).unwrap();
        assert_eq!(rec.date, "16/10/26");
        assert_eq!(rec.time, "12:34:56.789");
        assert_eq!(rec.level, Level::Debug);
        assert_eq!(rec.pid, "00006699");
        assert_eq!(rec.tid, "0000139804000365");
        assert_eq!(rec.file, "demo.cpp");
        assert_eq!(rec.line, "056");
        assert_eq!(rec.line_number(), 56);
        assert_eq!(rec.function, "msg_hello_world");
        assert_eq!(rec.message, "hello world");
    }

    #[test]
    fn parsing_is_deterministic() {
        assert_eq!(parse_line(HELLO, 1).unwrap(), parse_line(HELLO, 1).unwrap());
    }

    #[test]
    fn display_renders_wire_form() {
        let rec = parse_line(HELLO, 1).unwrap();
        assert_eq!(rec.to_string(), HELLO);
    }

    #[test]
    fn padded_levels_are_required() {
        let info = HELLO.replace("[DEBUG]", "[INFO ]");
        assert_eq!(parse_line(&info, 1).unwrap().level, Level::Info);

        let unpadded = HELLO.replace("[DEBUG]", "[INFO]");
        assert!(parse_line(&unpadded, 1).is_err());
    }

    #[test]
    fn unknown_level_is_rejected() {
        let bad = HELLO.replace("[DEBUG]", "[FATAL]");
        let err = parse_line(&bad, 7).unwrap_err();
        assert!(matches!(err, CaptureError::MalformedRecord { line: 7, .. }));
    }

    #[test]
    fn wrong_widths_are_rejected() {
        assert!(parse_line(&HELLO.replace("pid:00006699", "pid:6699"), 1).is_err());
        assert!(parse_line(&HELLO.replace("pid:00006699", "pid:000006699"), 1).is_err());
        assert!(parse_line(&HELLO.replace("tid:0000139804000365", "tid:1398"), 1).is_err());
        assert!(parse_line(&HELLO.replace(":056::", ":00056::"), 1).is_err());
    }

    #[test]
    fn hex_ids_are_rejected() {
        let hex = "[16/10/26 12:34:56.789][DEBUG][pid:0000abcd][tid:deadbeefcafef00d][demo.cpp:056::msg_hello_world][hello world]";
        let err = parse_line(hex, 3).unwrap_err();
        assert!(matches!(err, CaptureError::MalformedRecord { line: 3, .. }));

        let bad_tid = HELLO.replace("tid:0000139804000365", "tid:000013980400036f");
        assert!(parse_line(&bad_tid, 1).is_err());
        let bad_pid = HELLO.replace("pid:00006699", "pid:0000669A");
        assert!(parse_line(&bad_pid, 1).is_err());
    }

    #[test]
    fn missing_delimiter_is_rejected() {
        let bad = HELLO.replace("][hello world]", "][hello world");
        assert!(parse_line(&bad, 1).is_err());
        let bad = HELLO.replace("::msg_hello_world", ":msg_hello_world");
        assert!(parse_line(&bad, 1).is_err());
    }

    #[test]
    fn file_needs_c_like_extension() {
        assert!(parse_line(&HELLO.replace("demo.cpp", "demo.c"), 1).is_ok());
        assert!(parse_line(&HELLO.replace("demo.cpp", "demo.rs"), 1).is_err());
    }

    #[test]
    fn message_stops_at_first_closing_bracket() {
        let rec = parse_line(&format!("{HELLO} trailing]"), 1).unwrap();
        assert_eq!(rec.message, "hello world");
    }

    #[test]
    fn function_may_contain_punctuation() {
        let line = HELLO.replace("msg_hello_world", "~SampleSingletonClass");
        assert_eq!(parse_line(&line, 1).unwrap().function, "~SampleSingletonClass");
        let line = HELLO.replace("msg_hello_world", "operator()");
        assert_eq!(parse_line(&line, 1).unwrap().function, "operator()");
    }

    #[test]
    fn parse_lines_accepts_single_trailing_newline() {
        let text = format!("{HELLO}\n{HELLO}\n");
        assert_eq!(parse_lines(&text).unwrap().len(), 2);
        assert!(parse_lines("").unwrap().is_empty());
    }

    #[test]
    fn parse_lines_rejects_blank_interior_line() {
        let text = format!("{HELLO}\n\n{HELLO}\n");
        let err = parse_lines(&text).unwrap_err();
        assert!(matches!(err, CaptureError::MalformedRecord { line: 2, .. }));
    }

    #[test]
    fn signature_ignores_run_specific_fields() {
        let a = parse_line(HELLO, 1).unwrap();
        let b = parse_line(
            &HELLO
                .replace("12:34:56.789", "01:02:03.004")
                .replace("00006699", "00007777")
                .replace("0000139804000365", "0000000000000001"),
            1,
        )
        .unwrap();
        assert_ne!(a, b);
        assert_eq!(a.signature(), b.signature());
        assert_eq!(
            a.signature(),
            RecordSignature::new(Level::Debug, "demo.cpp", "056", "msg_hello_world", "hello world")
        );
    }

    #[test]
    fn level_tokens_roundtrip() {
        for level in Level::ALL {
            assert_eq!(level.token().len(), 5);
            assert_eq!(Level::from_token(level.token()), Some(level));
        }
    }
}
