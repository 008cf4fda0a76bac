//! Parsing and summarising structured log lines.
//!
//! The tool writes one JSON object per line. Only a handful of fields are
//! read; everything else is ignored.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::status::ResourceCounts;

/// Message substrings that only describe the tool's internal plumbing.
const NOISE: &[&str] = &[
    "CLI args:",
    "CLI command args:",
    "Go runtime version",
    "Attempting to open CLI config file",
    "Loading CLI configuration",
    "checking for provisioner in",
    "backend/local:",
    "waiting for RPC",
    "plugin process exited",
    "plugin started",
    "starting plugin",
    "using github.com/",
    "ReferenceTransformer",
    "GRPCProvider",
    "Building and walking",
    "statemgr.Filesystem",
    "schema for provider",
];

/// Prefixes of `@module` values that belong to the plugin channel.
const PLUGIN_MODULES: &[&str] = &["provider", "plugin"];

/// Severity of a log entry, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Parses an `@level` value. Unknown levels are treated as info.
    pub fn parse(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "trace" => Severity::Trace,
            "debug" => Severity::Debug,
            "warn" | "warning" => Severity::Warn,
            "error" | "fatal" => Severity::Error,
            _ => Severity::Info,
        }
    }
}

/// Diagnostic attached to a warning or error entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub detail: String,
}

/// One parsed line of the structured log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "@level", default)]
    pub level: String,

    #[serde(rename = "@message", default)]
    pub message: String,

    #[serde(rename = "@module", default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    #[serde(rename = "@timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Error value; a string in practice, but kept loose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

impl LogEntry {
    /// Severity of this entry.
    pub fn severity(&self) -> Severity {
        Severity::parse(&self.level)
    }

    /// The `error` field rendered as text.
    pub fn error_text(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Returns `true` for warnings and errors.
    pub fn is_problem(&self) -> bool {
        self.severity() >= Severity::Warn
    }
}

/// Parses one log line. Blank and malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<LogEntry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Returns `true` if the entry should never reach the display.
pub fn is_noise(entry: &LogEntry) -> bool {
    if entry.severity() <= Severity::Debug {
        return true;
    }
    if NOISE.iter().any(|n| entry.message.contains(n)) {
        return true;
    }
    entry
        .module
        .as_deref()
        .is_some_and(|m| PLUGIN_MODULES.iter().any(|p| m.starts_with(p)))
}

/// A human-readable message extracted from a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// Ordinary progress; subject to throttling.
    Status(String),
    /// A warning; shown immediately.
    Warning(String),
    /// An error; shown immediately.
    Error(String),
}

impl Extracted {
    /// Returns `true` if the message bypasses the throttle.
    pub fn is_urgent(&self) -> bool {
        !matches!(self, Extracted::Status(_))
    }

    /// The message text.
    pub fn text(&self) -> &str {
        match self {
            Extracted::Status(s) | Extracted::Warning(s) | Extracted::Error(s) => s,
        }
    }
}

struct Patterns {
    resource: Regex,
    install: Regex,
    apply_complete: Regex,
    destroy_complete: Regex,
    function_call: Regex,
    ephemeral: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("static pattern is valid");
        Patterns {
            resource: compile(
                r"(?P<addr>(?:module\.[\w-]+(?:\[[^\]]*\])?\.)*(?:data\.)?[A-Za-z0-9-]+_[\w-]+\.[\w-]+(?:\[[^\]]*\])?):\s*(?P<verb>Creating|Creation complete|Reading|Read complete|Modifying|Modifications complete|Destroying|Destruction complete)",
            ),
            install: compile(
                r"(?:Installing|Installed)\s+(?P<source>[\w.-]+/[\w.-]+(?:/[\w.-]+)?)\s+v?(?P<version>\d+(?:\.\d+)*(?:[-+]\w+(?:\.\w+)*)?)",
            ),
            apply_complete: compile(
                r"Apply complete! Resources: (?P<added>\d+) added, (?P<changed>\d+) changed, (?P<destroyed>\d+) destroyed",
            ),
            destroy_complete: compile(r"Destroy complete! Resources: (?P<destroyed>\d+) destroyed"),
            function_call: compile(r"(?i)call(?:ing)?\s*function|CallFunction"),
            ephemeral: compile(r"(?i)OpenEphemeralResource|ephemeral.*open"),
        }
    })
}

fn canonical_verb(verb: &str) -> &'static str {
    match verb {
        "Creating" => "Creating",
        "Creation complete" => "Created",
        "Reading" => "Reading",
        "Read complete" => "Read",
        "Modifying" => "Updating",
        "Modifications complete" => "Updated",
        "Destroying" => "Destroying",
        _ => "Destroyed",
    }
}

/// Extracts the human-readable message from an entry that survived
/// [`is_noise`].
///
/// # Example
///
/// ```
/// use infratest::tail::{Extracted, LogEntry, extract};
///
/// let entry = LogEntry {
///     level: "info".to_string(),
///     message: "aws_s3_bucket.logs: Creation complete after 2s [id=logs]".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(
///     extract(&entry),
///     Some(Extracted::Status("Created aws_s3_bucket.logs".to_string()))
/// );
/// ```
pub fn extract(entry: &LogEntry) -> Option<Extracted> {
    match entry.severity() {
        Severity::Error => return Some(Extracted::Error(problem_text(entry))),
        Severity::Warn => return Some(Extracted::Warning(problem_text(entry))),
        _ => {}
    }

    let p = patterns();
    let message = entry.message.as_str();

    if let Some(caps) = p.resource.captures(message) {
        return Some(Extracted::Status(format!(
            "{} {}",
            canonical_verb(&caps["verb"]),
            &caps["addr"]
        )));
    }
    if let Some(caps) = p.install.captures(message) {
        return Some(Extracted::Status(format!(
            "Installing {} v{}",
            &caps["source"], &caps["version"]
        )));
    }
    if let Some(caps) = p.apply_complete.captures(message) {
        return Some(Extracted::Status(format!(
            "Apply complete: {} added, {} changed, {} destroyed",
            &caps["added"], &caps["changed"], &caps["destroyed"]
        )));
    }
    if let Some(caps) = p.destroy_complete.captures(message) {
        return Some(Extracted::Status(format!(
            "Destroy complete: {} destroyed",
            &caps["destroyed"]
        )));
    }

    first_line(message).map(Extracted::Status)
}

fn problem_text(entry: &LogEntry) -> String {
    entry
        .diagnostic
        .as_ref()
        .map(|d| d.summary.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| entry.error_text())
        .or_else(|| first_line(&entry.message))
        .unwrap_or_else(|| entry.level.clone())
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Updates the log-derived counters for one parsed entry.
///
/// Called for every entry, including ones later dropped as noise.
pub fn tally(counts: &mut ResourceCounts, entry: &LogEntry) {
    let p = patterns();
    if p.function_call.is_match(&entry.message) {
        counts.functions += 1;
    }
    if p.ephemeral.is_match(&entry.message) {
        counts.ephemeral_functions += 1;
    }
}
