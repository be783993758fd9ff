//! File-backed transport capture.

use std::path::Path;
use std::time::Duration;

use crate::error::CaptureError;
use crate::record::{LogRecord, parse_lines};

/// Default wait before reading, enough for the reference producer to flush.
pub const DEFAULT_FILE_GRACE: Duration = Duration::from_millis(100);

/// Reads a log file once after a fixed grace period. There is no polling:
/// a producer slower than the grace period shows up as missing or short output.
#[derive(Debug, Clone, Copy)]
pub struct FileCapture {
    grace: Duration,
}

impl Default for FileCapture {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_GRACE)
    }
}

impl FileCapture {
    #[must_use]
    pub const fn new(grace: Duration) -> Self {
        Self { grace }
    }

    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Wait out the grace period and return the file's full contents.
    pub fn read_text(&self, path: &Path) -> Result<String, CaptureError> {
        std::thread::sleep(self.grace);
        if !path.exists() {
            return Err(CaptureError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Wait out the grace period, then parse every line of the file.
    pub fn read_records(&self, path: &Path) -> Result<Vec<LogRecord>, CaptureError> {
        parse_lines(&self.read_text(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;

    const TRACE_ENTER: &str = "[16/10/26 08:00:00.001][TRACE][pid:00004321][tid:0000000000000001][demo.cpp:061::msg_trace][--ENTER--]";
    const TRACE_EXIT: &str = "[16/10/26 08:00:00.002][TRACE][pid:00004321][tid:0000000000000001][demo.cpp:062::msg_trace][--EXIT--]";

    #[test]
    fn reads_all_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, format!("{TRACE_ENTER}\n{TRACE_EXIT}\n")).unwrap();

        let records = FileCapture::new(Duration::ZERO).read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, Level::Trace);
        assert_eq!(records[0].message, "--ENTER--");
        assert_eq!(records[1].message, "--EXIT--");
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written.txt");
        let err = FileCapture::new(Duration::ZERO).read_records(&path).unwrap_err();
        assert!(matches!(err, CaptureError::MissingFile { .. }));
    }

    #[test]
    fn one_bad_line_fails_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, format!("{TRACE_ENTER}\ngarbage\n{TRACE_EXIT}\n")).unwrap();
        let err = FileCapture::new(Duration::ZERO).read_records(&path).unwrap_err();
        assert!(matches!(err, CaptureError::MalformedRecord { line: 2, .. }));
    }

    #[test]
    fn grace_period_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "").unwrap();
        let grace = Duration::from_millis(30);
        let start = std::time::Instant::now();
        assert!(FileCapture::new(grace).read_records(&path).unwrap().is_empty());
        assert!(start.elapsed() >= grace);
    }
}
