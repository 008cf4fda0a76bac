//! Tailing the tool's structured log while a phase runs.
//!
//! A [`LogTailer`] follows one JSON-lines file, waiting for it to appear,
//! and writes the most interesting message into the suite's status row.
//! Warnings and errors are shown at once; ordinary progress is throttled so
//! the display does not flicker.

pub mod extract;

pub use extract::{Extracted, LogEntry, Severity, extract, is_noise, parse_line, tally};

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::status::{StatusHandle, lock};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Follows one structured log file and feeds a status row.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    status: StatusHandle,
    throttle: Duration,
    poll_interval: Duration,
    last_visible: Option<Instant>,
    entries: Vec<LogEntry>,
}

impl LogTailer {
    /// Creates a tailer for `path` that updates `status`.
    pub fn new(path: impl Into<PathBuf>, status: StatusHandle, throttle: Duration) -> Self {
        Self {
            path: path.into(),
            status,
            throttle,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_visible: None,
            entries: Vec::new(),
        }
    }

    /// Sets how long to sleep between reads at end of file.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Processes one complete line observed at `now`.
    ///
    /// Malformed lines are ignored. Counters are updated for every parsed
    /// entry; the visible message only for entries that survive filtering.
    pub fn handle_line(&mut self, line: &str, now: Instant) {
        let Some(entry) = parse_line(line) else {
            return;
        };

        let mut status = lock(&self.status);
        tally(&mut status.counts, &entry);

        if is_noise(&entry) {
            return;
        }
        if entry.is_problem() {
            self.entries.push(entry.clone());
        }
        let Some(message) = extract(&entry) else {
            return;
        };
        if matches!(message, Extracted::Warning(_)) {
            status.warnings = true;
        }

        if !message.is_urgent()
            && let Some(last) = self.last_visible
            && now.saturating_duration_since(last) < self.throttle
        {
            return;
        }

        status.last_log = message.text().to_string();
        self.last_visible = Some(now);
    }

    /// Warning and error entries seen so far.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Follows the file until `cancel` fires, then drains what is left.
    ///
    /// Returns the warning and error entries that were seen.
    pub async fn run(mut self, cancel: CancellationToken) -> Vec<LogEntry> {
        let file = loop {
            match tokio::fs::File::open(&self.path).await {
                Ok(file) => break file,
                Err(_) if cancel.is_cancelled() => {
                    debug!("Log {} never appeared", self.path.display());
                    return self.entries;
                }
                Err(_) => self.pause(&cancel).await,
            }
        };

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        loop {
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) if cancel.is_cancelled() => break,
                Ok(0) => self.pause(&cancel).await,
                Ok(_) if buf.ends_with(b"\n") => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    self.handle_line(&line, Instant::now());
                    buf.clear();
                }
                // A partial line; keep it until the newline arrives.
                Ok(_) => {}
                Err(e) => {
                    debug!("Stopped reading {}: {}", self.path.display(), e);
                    break;
                }
            }
        }

        if !buf.is_empty() {
            let line = String::from_utf8_lossy(&buf).into_owned();
            self.handle_line(&line, Instant::now());
        }
        self.entries
    }

    async fn pause(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TestStatus;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn handle() -> StatusHandle {
        Arc::new(Mutex::new(TestStatus::new("suite")))
    }

    fn line(level: &str, message: &str) -> String {
        serde_json::json!({ "@level": level, "@message": message }).to_string()
    }

    #[test]
    fn test_debug_line_never_updates() {
        let status = handle();
        let mut tailer = LogTailer::new("unused", status.clone(), Duration::ZERO);
        tailer.handle_line(&line("debug", "aws_vpc.main: Creating..."), Instant::now());
        assert_eq!(lock(&status).last_log, "");
    }

    #[test]
    fn test_error_bypasses_throttle() {
        let status = handle();
        let mut tailer = LogTailer::new("unused", status.clone(), Duration::from_secs(60));
        let t0 = Instant::now();

        tailer.handle_line(&line("info", "aws_vpc.main: Creating..."), t0);
        assert_eq!(lock(&status).last_log, "Creating aws_vpc.main");

        tailer.handle_line(
            &line("info", "aws_vpc.main: Creation complete after 1s"),
            t0 + Duration::from_millis(10),
        );
        assert_eq!(lock(&status).last_log, "Creating aws_vpc.main");

        tailer.handle_line(&line("error", "quota exceeded"), t0 + Duration::from_millis(20));
        assert_eq!(lock(&status).last_log, "quota exceeded");
        assert_eq!(tailer.entries().len(), 1);
    }

    #[test]
    fn test_throttle_window_expires() {
        let status = handle();
        let mut tailer = LogTailer::new("unused", status.clone(), Duration::from_millis(500));
        let t0 = Instant::now();

        tailer.handle_line(&line("info", "first"), t0);
        tailer.handle_line(&line("info", "second"), t0 + Duration::from_millis(600));
        assert_eq!(lock(&status).last_log, "second");
    }

    #[test]
    fn test_warning_sets_flag_and_counters_ignore_filter() {
        let status = handle();
        let mut tailer = LogTailer::new("unused", status.clone(), Duration::ZERO);
        tailer.handle_line(&line("trace", "CallFunction parse_url"), Instant::now());
        tailer.handle_line(&line("warn", "Deprecated argument"), Instant::now());
        tailer.handle_line("{broken", Instant::now());

        let s = lock(&status);
        assert_eq!(s.counts.functions, 1);
        assert!(s.warnings);
        assert_eq!(s.last_log, "Deprecated argument");
    }

    #[tokio::test]
    async fn test_run_drains_file_after_cancel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apply.json.log");
        let content = format!(
            "{}\n{}\nnot json\n{}",
            line("info", "random_pet.a: Creating..."),
            line("error", "boom"),
            line("info", "tail without newline"),
        );
        std::fs::write(&path, content).unwrap();

        let status = handle();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let entries = LogTailer::new(&path, status.clone(), Duration::ZERO)
            .with_poll_interval(Duration::from_millis(5))
            .run(cancel)
            .await;

        assert_eq!(entries.len(), 1);
        assert_eq!(lock(&status).last_log, "tail without newline");
    }

    #[tokio::test]
    async fn test_run_follows_growing_file() {
        use std::io::Write;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("destroy.json.log");

        let status = handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            LogTailer::new(&path, status.clone(), Duration::ZERO)
                .with_poll_interval(Duration::from_millis(5))
                .run(cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", line("info", "random_pet.a: Destroying...")).unwrap();
        file.flush().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lock(&status).last_log, "Destroying random_pet.a");

        cancel.cancel();
        assert!(task.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_missing_file_returns_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let entries = LogTailer::new(dir.path().join("never"), handle(), Duration::ZERO)
            .run(cancel)
            .await;
        assert!(entries.is_empty());
    }
}
