//! JUnit XML report generation.
//!
//! Each suite becomes one `<testcase>`. The class name is the suite's
//! parent path with `/` turned into `.`, so CI dashboards group suites by
//! directory.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="0" skipped="1" time="42.000">
//!   <testsuite name="infratest" tests="3" failures="1" errors="0" skipped="1" time="42.000">
//!     <testcase classname="examples" name="examples/vpc" time="30.512"/>
//!     <testcase classname="examples" name="examples/dns" time="11.004">
//!       <failure message="apply exited with code 1" type="apply">...</failure>
//!       <system-err>...</system-err>
//!     </testcase>
//!     <testcase classname="examples" name="examples/docs" time="0.000">
//!       <skipped/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::{FAILURE_TAIL_LINES, Reporter, RunSummary};
use crate::discovery::TestSuite;
use crate::status::{Phase, TestOutcome, TestResult};
use crate::tool::tail_lines;

/// Writes a JUnit XML file when the run completes.
///
/// Parent directories are created if missing.
///
/// # Example
///
/// ```
/// use infratest::report::JUnitReporter;
///
/// let reporter = JUnitReporter::new("build/infratest.xml".into())
///     .with_testsuite_name("network-modules");
/// ```
pub struct JUnitReporter {
    output_path: PathBuf,
    testsuite_name: String,
}

impl JUnitReporter {
    /// Creates a reporter writing to `output_path`.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "infratest".to_string(),
        }
    }

    /// Sets the `<testsuite name>` attribute.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    /// Renders the XML document for `summary`.
    pub fn generate_xml(&self, summary: &RunSummary) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let tests = summary.total.to_string();
        let failures = summary.failed.to_string();
        let errors = summary.errored.to_string();
        let skipped = summary.skipped.to_string();
        let time = format!("{:.3}", summary.duration.as_secs_f64());

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.as_str()));
        testsuites.push_attribute(("failures", failures.as_str()));
        testsuites.push_attribute(("errors", errors.as_str()));
        testsuites.push_attribute(("skipped", skipped.as_str()));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", self.testsuite_name.as_str()));
        testsuite.push_attribute(("tests", tests.as_str()));
        testsuite.push_attribute(("failures", failures.as_str()));
        testsuite.push_attribute(("errors", errors.as_str()));
        testsuite.push_attribute(("skipped", skipped.as_str()));
        testsuite.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuite))?;

        for result in &summary.results {
            write_testcase(&mut writer, result)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        Ok(String::from_utf8(writer.into_inner())?)
    }
}

fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    result: &TestResult,
) -> anyhow::Result<()> {
    let classname = classname(&result.name);
    let time = format!("{:.3}", result.duration().as_secs_f64());

    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", classname.as_str()));
    testcase.push_attribute(("name", result.name.as_str()));
    testcase.push_attribute(("time", time.as_str()));

    let (element, kind) = match result.outcome {
        TestOutcome::Passed => {
            writer.write_event(Event::Empty(testcase))?;
            return Ok(());
        }
        TestOutcome::Skipped => {
            writer.write_event(Event::Start(testcase))?;
            writer.write_event(Event::Empty(BytesStart::new("skipped")))?;
            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
            return Ok(());
        }
        TestOutcome::Failed => (
            "failure",
            result
                .failure_log()
                .map_or("tool", |log| log.operation.as_str()),
        ),
        TestOutcome::Error => ("error", "internal"),
    };

    writer.write_event(Event::Start(testcase))?;

    let message = result.error_message.as_deref().unwrap_or("");
    let mut problem = BytesStart::new(element);
    problem.push_attribute(("message", strip_invalid(message).as_str()));
    problem.push_attribute(("type", kind));
    writer.write_event(Event::Start(problem))?;
    let diagnostics: Vec<String> = result
        .entries
        .iter()
        .map(|e| format!("[{}] {}", e.level, e.message))
        .collect();
    if !diagnostics.is_empty() {
        writer.write_event(Event::Text(BytesText::new(&strip_invalid(
            &diagnostics.join("\n"),
        ))))?;
    }
    writer.write_event(Event::End(BytesEnd::new(element)))?;

    if let Some(log) = result.failure_log() {
        let stderr = tail_lines(&log.paths.stderr, FAILURE_TAIL_LINES).join("\n");
        if !stderr.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("system-err")))?;
            writer.write_event(Event::Text(BytesText::new(&strip_invalid(&stderr))))?;
            writer.write_event(Event::End(BytesEnd::new("system-err")))?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_discovery_complete(&self, _suites: &[TestSuite]) {}

    async fn on_phase_change(&self, _suite: &str, _phase: Phase) {}

    async fn on_suite_complete(&self, _result: &TestResult) {}

    async fn on_run_complete(&self, summary: &RunSummary) {
        let xml = match self.generate_xml(summary) {
            Ok(xml) => xml,
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
                return;
            }
        };

        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::error!("Failed to create output directory: {}", e);
            return;
        }

        if let Err(e) = std::fs::write(&self.output_path, xml) {
            tracing::error!("Failed to write JUnit XML: {}", e);
        } else {
            tracing::info!("JUnit XML written to: {}", self.output_path.display());
        }
    }
}

/// Parent path of a suite name in dotted form.
fn classname(name: &str) -> String {
    match name.rsplit_once('/') {
        Some((parent, _)) => parent.replace('/', "."),
        None => "infratest".to_string(),
    }
}

/// Drops characters XML 1.0 cannot carry. Escaping is left to the writer.
fn strip_invalid(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::result;
    use crate::status::PhaseLog;
    use crate::tail::LogEntry;
    use crate::tool::LogPaths;
    use std::time::Duration;

    #[test]
    fn test_classname() {
        assert_eq!(classname("examples/resources/bucket"), "examples.resources");
        assert_eq!(classname("vpc"), "infratest");
    }

    #[test]
    fn test_strip_invalid() {
        assert_eq!(strip_invalid("ok\u{1b}[31m"), "ok[31m");
        assert_eq!(strip_invalid("a & <b>"), "a & <b>");
    }

    #[test]
    fn test_generate_xml() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = LogPaths::new(dir.path(), "stamp", "apply");
        std::fs::write(&paths.stderr, "Error: quota <exceeded>\n").unwrap();

        let mut failed = result("examples/dns", TestOutcome::Failed);
        failed.error_message = Some("apply exited with code 1".to_string());
        failed.logs.push(PhaseLog {
            operation: "apply".to_string(),
            exit_code: Some(1),
            paths,
        });
        failed.failed_log = Some(0);
        failed.entries.push(LogEntry {
            level: "error".to_string(),
            message: "quota & limits".to_string(),
            ..Default::default()
        });

        let summary = RunSummary::from_results(
            vec![
                result("examples/vpc", TestOutcome::Passed),
                failed,
                result("examples/docs", TestOutcome::Skipped),
            ],
            Duration::from_secs(2),
        );

        let xml = JUnitReporter::new("unused.xml".into())
            .generate_xml(&summary)
            .unwrap();

        assert!(xml.contains(r#"<testsuites tests="3" failures="1" errors="0" skipped="1" time="2.000">"#));
        assert!(xml.contains(r#"<testcase classname="examples" name="examples/vpc" time="0.000"/>"#));
        assert!(xml.contains(r#"<failure message="apply exited with code 1" type="apply">"#));
        assert!(xml.contains("[error] quota &amp; limits"));
        assert!(xml.contains("Error: quota &lt;exceeded&gt;"));
        assert!(xml.contains("<skipped/>"));
    }

    #[tokio::test]
    async fn test_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("junit.xml");
        let reporter = JUnitReporter::new(path.clone());
        reporter
            .on_run_complete(&RunSummary::from_results(Vec::new(), Duration::ZERO))
            .await;
        assert!(std::fs::read_to_string(path).unwrap().contains("<testsuites"));
    }
}
