//! Result aggregation and reporting.
//!
//! Reporters receive events as the run progresses and the final
//! [`RunSummary`] when it ends. Several can be combined with
//! [`MultiReporter`].

pub mod junit;

pub use junit::JUnitReporter;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, Serializer};

use crate::discovery::TestSuite;
use crate::status::{Phase, TestOutcome, TestResult};
use crate::tool::tail_lines;

/// Exit code when dependency preparation fails.
pub const EXIT_FATAL: i32 = 3;

/// Exit code when the user interrupts the run.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Number of stderr lines shown for a failed suite.
const FAILURE_TAIL_LINES: usize = 20;

/// Aggregated results of an entire run.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Every suite passed or was skipped |
/// | 1 | At least one suite failed or errored |
/// | 3 | Dependency preparation failed ([`EXIT_FATAL`]) |
/// | 130 | Interrupted ([`EXIT_INTERRUPTED`]) |
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Number of suites run.
    pub total: usize,

    /// Suites that reached PASS.
    pub passed: usize,

    /// Suites that reached FAIL.
    pub failed: usize,

    /// Suites that reached ERROR.
    pub errored: usize,

    /// Suites that were SKIPPED.
    pub skipped: usize,

    /// Wall-clock duration of the run.
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,

    /// Per-suite results, in discovery order.
    pub results: Vec<TestResult>,
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl RunSummary {
    /// Tallies `results`.
    pub fn from_results(results: Vec<TestResult>, duration: Duration) -> Self {
        let count = |outcome: TestOutcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            total: results.len(),
            passed: count(TestOutcome::Passed),
            failed: count(TestOutcome::Failed),
            errored: count(TestOutcome::Error),
            skipped: count(TestOutcome::Skipped),
            duration,
            results,
        }
    }

    /// Returns `true` if no suite failed or errored.
    ///
    /// # Example
    ///
    /// ```
    /// use infratest::report::RunSummary;
    /// use std::time::Duration;
    ///
    /// let summary = RunSummary::from_results(Vec::new(), Duration::ZERO);
    /// assert!(summary.success());
    /// assert_eq!(summary.exit_code(), 0);
    /// ```
    pub fn success(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    /// Returns the process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    /// Results that failed or errored.
    pub fn problems(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.outcome.is_success())
    }
}

/// Receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once discovery and filtering are done.
    async fn on_discovery_complete(&self, suites: &[TestSuite]);

    /// Called whenever a suite enters a new phase.
    async fn on_phase_change(&self, suite: &str, phase: Phase);

    /// Called once per suite with its final result.
    async fn on_suite_complete(&self, result: &TestResult);

    /// Called once with the aggregated results.
    async fn on_run_complete(&self, summary: &RunSummary);
}

/// A reporter that does nothing.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_discovery_complete(&self, _suites: &[TestSuite]) {}
    async fn on_phase_change(&self, _suite: &str, _phase: Phase) {}
    async fn on_suite_complete(&self, _result: &TestResult) {}
    async fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// A reporter that forwards every event to several reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    /// Creates an empty multi-reporter.
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Adds a reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    /// Number of reporters.
    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    /// Returns `true` if no reporter was added.
    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_discovery_complete(&self, suites: &[TestSuite]) {
        for reporter in &self.reporters {
            reporter.on_discovery_complete(suites).await;
        }
    }

    async fn on_phase_change(&self, suite: &str, phase: Phase) {
        for reporter in &self.reporters {
            reporter.on_phase_change(suite, phase).await;
        }
    }

    async fn on_suite_complete(&self, result: &TestResult) {
        for reporter in &self.reporters {
            reporter.on_suite_complete(result).await;
        }
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        for reporter in &self.reporters {
            reporter.on_run_complete(summary).await;
        }
    }
}

/// Human-readable terminal output: failure detail and a summary panel.
///
/// While the live display owns the terminal nothing is printed per suite;
/// without it (`live = false`) each completed suite gets one line.
pub struct ConsoleReporter {
    verbose: bool,
    live: bool,
}

impl ConsoleReporter {
    /// Creates a console reporter for a run shown in the live display.
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            live: true,
        }
    }

    /// Prints one line per completed suite instead of relying on the live
    /// display.
    pub fn without_live_display(mut self) -> Self {
        self.live = false;
        self
    }
}

fn outcome_label(outcome: TestOutcome) -> console::StyledObject<&'static str> {
    match outcome {
        TestOutcome::Passed => console::style("PASS").green(),
        TestOutcome::Failed => console::style("FAIL").red(),
        TestOutcome::Skipped => console::style("SKIP").yellow(),
        TestOutcome::Error => console::style("ERR ").red().bold(),
    }
}

/// Renders the failure detail of one suite.
pub fn failure_detail(result: &TestResult) -> Vec<String> {
    let mut lines = vec![format!("{} {}", outcome_label(result.outcome), result.name)];
    if let Some(message) = &result.error_message {
        lines.push(format!("    {}", console::style(message).dim()));
    }

    if let Some(log) = result.failure_log() {
        lines.push(format!(
            "    {} {}",
            console::style("stderr:").dim(),
            log.paths.stderr.display()
        ));
        for line in tail_lines(&log.paths.stderr, FAILURE_TAIL_LINES) {
            lines.push(format!("      {}", line));
        }
        lines.push(format!(
            "    {} {}",
            console::style("log:").dim(),
            log.paths.structured.display()
        ));
    }

    if !result.entries.is_empty() {
        lines.push(format!("    {}", console::style("diagnostics:").dim()));
        for entry in &result.entries {
            let text = entry
                .diagnostic
                .as_ref()
                .map(|d| d.summary.clone())
                .filter(|s| !s.is_empty())
                .or_else(|| entry.error_text())
                .unwrap_or_else(|| entry.message.clone());
            lines.push(format!("      [{}] {}", entry.level, text));
        }
    }
    lines
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_discovery_complete(&self, suites: &[TestSuite]) {
        println!("Discovered {} suites", suites.len());
        if self.verbose {
            for suite in suites {
                println!("  {}", suite.name);
            }
        }
    }

    async fn on_phase_change(&self, suite: &str, phase: Phase) {
        if self.verbose && !self.live {
            println!("{:<10} {}", phase.label(), suite);
        }
    }

    async fn on_suite_complete(&self, result: &TestResult) {
        if !self.live {
            println!(
                "{} {} ({:.1}s)",
                outcome_label(result.outcome),
                result.name,
                result.duration().as_secs_f64()
            );
        }
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        let problems: Vec<&TestResult> = summary.problems().collect();
        if !problems.is_empty() {
            println!();
            println!("{}", console::style("Failures:").red().bold());
            for result in problems {
                println!();
                for line in failure_detail(result) {
                    println!("{}", line);
                }
            }
        }

        println!();
        println!("Results:");
        println!("  Total:   {}", summary.total);
        println!("  Passed:  {}", console::style(summary.passed).green());
        println!("  Failed:  {}", console::style(summary.failed).red());
        if summary.errored > 0 {
            println!("  Errors:  {}", console::style(summary.errored).red().bold());
        }
        println!("  Skipped: {}", console::style(summary.skipped).yellow());
        println!("  Duration: {:.1}s", summary.duration.as_secs_f64());

        println!();
        if summary.success() {
            println!("{}", console::style("All suites passed!").green().bold());
        } else {
            println!("{}", console::style("Some suites failed.").red().bold());
        }
    }
}

/// Prints the run summary as one JSON document on stdout.
pub struct JsonReporter {
    pretty: bool,
}

impl JsonReporter {
    /// Creates a JSON reporter.
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Serialises `summary`.
    pub fn render(&self, summary: &RunSummary) -> serde_json::Result<String> {
        if self.pretty {
            serde_json::to_string_pretty(summary)
        } else {
            serde_json::to_string(summary)
        }
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn on_discovery_complete(&self, _suites: &[TestSuite]) {}
    async fn on_phase_change(&self, _suite: &str, _phase: Phase) {}
    async fn on_suite_complete(&self, _result: &TestResult) {}

    async fn on_run_complete(&self, summary: &RunSummary) {
        match self.render(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("Failed to serialise results: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{PhaseLog, ResourceCounts};
    use crate::tool::LogPaths;
    use std::path::PathBuf;

    pub(crate) fn result(name: &str, outcome: TestOutcome) -> TestResult {
        TestResult {
            name: name.to_string(),
            path: PathBuf::from("/suites").join(name),
            outcome,
            started_at: None,
            finished_at: None,
            logs: Vec::new(),
            failed_log: None,
            entries: Vec::new(),
            counts: ResourceCounts::default(),
            warnings: false,
            error_message: None,
        }
    }

    #[test]
    fn test_summary_counts_and_exit_code() {
        let summary = RunSummary::from_results(
            vec![
                result("a", TestOutcome::Passed),
                result("b", TestOutcome::Failed),
                result("c", TestOutcome::Skipped),
            ],
            Duration::from_secs(3),
        );
        assert_eq!(
            (summary.total, summary.passed, summary.failed, summary.skipped),
            (3, 1, 1, 1)
        );
        assert!(!summary.success());
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(summary.problems().count(), 1);
    }

    #[test]
    fn test_skipped_only_run_succeeds() {
        let summary = RunSummary::from_results(
            vec![result("a", TestOutcome::Skipped)],
            Duration::ZERO,
        );
        assert!(summary.success());

        let summary = RunSummary::from_results(vec![result("a", TestOutcome::Error)], Duration::ZERO);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_json_render() {
        let summary = RunSummary::from_results(
            vec![result("a", TestOutcome::Passed)],
            Duration::from_millis(1500),
        );
        let json: serde_json::Value =
            serde_json::from_str(&JsonReporter::new(false).render(&summary).unwrap()).unwrap();
        assert_eq!(json["passed"], 1);
        assert_eq!(json["duration_secs"], 1.5);
        assert_eq!(json["results"][0]["outcome"], "passed");
    }

    #[test]
    fn test_failure_detail_includes_stderr_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = LogPaths::new(dir.path(), "stamp", "apply");
        let stderr: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(&paths.stderr, stderr).unwrap();

        let mut failed = result("net", TestOutcome::Failed);
        failed.error_message = Some("apply exited with code 1".to_string());
        failed.logs.push(PhaseLog {
            operation: "apply".to_string(),
            exit_code: Some(1),
            paths,
        });
        failed.failed_log = Some(0);

        let lines = failure_detail(&failed);
        assert!(lines.iter().any(|l| l.contains("apply exited with code 1")));
        assert!(lines.iter().any(|l| l.ends_with("line 30")));
        assert!(lines.iter().any(|l| l.ends_with("line 11")));
        assert!(!lines.iter().any(|l| l.ends_with("line 10")));
    }

    #[test]
    fn test_multi_reporter_forwards() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting(Arc<AtomicUsize>);

        #[async_trait]
        impl Reporter for Counting {
            async fn on_discovery_complete(&self, _suites: &[TestSuite]) {}
            async fn on_phase_change(&self, _suite: &str, _phase: Phase) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            async fn on_suite_complete(&self, _result: &TestResult) {}
            async fn on_run_complete(&self, _summary: &RunSummary) {}
        }

        let count = Arc::new(AtomicUsize::new(0));
        let multi = MultiReporter::new()
            .with_reporter(Counting(count.clone()))
            .with_reporter(NullReporter)
            .with_reporter(Counting(count.clone()));
        assert_eq!(multi.len(), 3);

        tokio_test::block_on(multi.on_phase_change("a", Phase::Init));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
