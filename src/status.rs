//! Per-suite status records and the shared status table.
//!
//! Every suite owns exactly one [`TestStatus`] row. The row is written only
//! by the suite's own unit of work (its lifecycle and its log tailer) and
//! read by the live display, so the mutex around each row is never
//! contended by two writers.
//!
//! # Phases
//!
//! ```text
//! PENDING ─► CLEANING ─► INIT ─► APPLYING ─► ANALYZING ─► DESTROYING ─► PASS
//!    │                    │          │                        ▲   └────► FAIL
//!    │                    └─► FAIL   └────────────────────────┘
//!    └─► SKIPPED                  (any non-terminal) ─► ERROR
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::tail::LogEntry;
use crate::tool::LogPaths;

/// Name of the transient row shown while the dependency cache is populated.
pub const PREPARE_ROW: &str = "dependency preparation";

/// A state in a suite's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Waiting for a concurrency slot.
    Pending,
    /// Removing artifacts of a previous run.
    Cleaning,
    /// Running the tool's initialize command.
    Init,
    /// Running the tool's apply command.
    Applying,
    /// Reading the structured state snapshot.
    Analyzing,
    /// Running the tool's destroy command.
    Destroying,
    /// Terminal: apply succeeded.
    Pass,
    /// Terminal: a tool command exited non-zero.
    Fail,
    /// Terminal: no configuration files to run.
    Skipped,
    /// Terminal: the orchestrator itself failed.
    Error,
}

impl Phase {
    /// Returns `true` for PASS, FAIL, SKIPPED and ERROR.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Pass | Phase::Fail | Phase::Skipped | Phase::Error)
    }

    /// Returns `true` for phases that hold a concurrency slot.
    pub fn is_active(self) -> bool {
        self != Phase::Pending && !self.is_terminal()
    }

    /// Returns `true` if the state machine allows `self -> next`.
    ///
    /// # Example
    ///
    /// ```
    /// use infratest::status::Phase;
    ///
    /// assert!(Phase::Applying.can_transition_to(Phase::Destroying));
    /// assert!(!Phase::Init.can_transition_to(Phase::Destroying));
    /// assert!(!Phase::Pass.can_transition_to(Phase::Error));
    /// ```
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (Pending, Cleaning | Skipped) => true,
            (Cleaning, Init) => true,
            (Init, Applying | Fail) => true,
            (Applying, Analyzing | Destroying) => true,
            (Analyzing, Destroying) => true,
            (Destroying, Pass | Fail) => true,
            _ => false,
        }
    }

    /// Upper-case label for display.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Pending => "PENDING",
            Phase::Cleaning => "CLEANING",
            Phase::Init => "INIT",
            Phase::Applying => "APPLYING",
            Phase::Analyzing => "ANALYZING",
            Phase::Destroying => "DESTROYING",
            Phase::Pass => "PASS",
            Phase::Fail => "FAIL",
            Phase::Skipped => "SKIPPED",
            Phase::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors raised by illegal status updates.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// The state machine does not allow this transition.
    #[error("Illegal phase transition for {suite}: {from} -> {to}")]
    IllegalTransition { suite: String, from: Phase, to: Phase },
}

/// Counts reported for a suite.
///
/// Providers, resources, data sources and outputs come from the state
/// snapshot; function and ephemeral counts are tallied from the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    pub providers: usize,
    pub resources: usize,
    pub data_sources: usize,
    pub functions: usize,
    pub ephemeral_functions: usize,
    pub outputs: usize,
}

impl ResourceCounts {
    /// Copies the snapshot-derived counts from `snapshot`, keeping the
    /// log-derived counters.
    pub fn merge_snapshot(&mut self, snapshot: ResourceCounts) {
        self.providers = snapshot.providers;
        self.resources = snapshot.resources;
        self.data_sources = snapshot.data_sources;
        self.outputs = snapshot.outputs;
    }
}

/// Mutable status of one suite.
#[derive(Debug, Clone, Serialize)]
pub struct TestStatus {
    /// Row key: the suite name.
    pub name: String,
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Holding a concurrency slot.
    pub active: bool,
    /// Reached PASS.
    pub success: bool,
    /// Reached SKIPPED.
    pub skipped: bool,
    /// When the suite left PENDING.
    pub started_at: Option<DateTime<Local>>,
    /// When the suite reached a terminal phase.
    pub finished_at: Option<DateTime<Local>>,
    /// Most recent human-readable log message.
    pub last_log: String,
    /// Resource, provider and output counts.
    pub counts: ResourceCounts,
    /// A warning was seen in the structured log.
    pub warnings: bool,
}

impl TestStatus {
    /// Creates a PENDING status row.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: Phase::Pending,
            active: false,
            success: false,
            skipped: false,
            started_at: None,
            finished_at: None,
            last_log: String::new(),
            counts: ResourceCounts::default(),
            warnings: false,
        }
    }

    /// Moves to `next`, updating flags and timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::IllegalTransition`] if the state machine
    /// forbids the move; the status is left unchanged.
    pub fn transition(&mut self, next: Phase) -> Result<(), StatusError> {
        if !self.phase.can_transition_to(next) {
            return Err(StatusError::IllegalTransition {
                suite: self.name.clone(),
                from: self.phase,
                to: next,
            });
        }

        let now = Local::now();
        if self.phase == Phase::Pending && next.is_active() {
            self.started_at = Some(now);
        }
        self.phase = next;
        self.active = next.is_active();
        if next.is_terminal() {
            self.finished_at = Some(now);
            self.success = next == Phase::Pass;
            self.skipped = next == Phase::Skipped;
        }
        Ok(())
    }

    /// Time spent since leaving PENDING, up to now or to completion.
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Local::now);
        (end - start).to_std().ok()
    }
}

/// Shared handle to one status row.
pub type StatusHandle = Arc<Mutex<TestStatus>>;

/// Locks a status row, recovering the data if a writer panicked.
pub fn lock(handle: &StatusHandle) -> MutexGuard<'_, TestStatus> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The table of all status rows, keyed by suite name.
///
/// # Example
///
/// ```
/// use infratest::status::{Phase, StatusTable, lock};
///
/// let table = StatusTable::new();
/// let row = table.insert("examples/vpc");
/// lock(&row).transition(Phase::Cleaning).unwrap();
/// assert_eq!(table.active_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct StatusTable {
    rows: RwLock<BTreeMap<String, StatusHandle>>,
}

impl StatusTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the row for `name`, creating a PENDING row if absent.
    pub fn insert(&self, name: &str) -> StatusHandle {
        let mut rows = self.rows.write().unwrap_or_else(|p| p.into_inner());
        rows.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TestStatus::new(name))))
            .clone()
    }

    /// Returns the row for `name`.
    pub fn get(&self, name: &str) -> Option<StatusHandle> {
        let rows = self.rows.read().unwrap_or_else(|p| p.into_inner());
        rows.get(name).cloned()
    }

    /// Removes the row for `name`.
    pub fn remove(&self, name: &str) -> Option<StatusHandle> {
        let mut rows = self.rows.write().unwrap_or_else(|p| p.into_inner());
        rows.remove(name)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every row in display order: the preparation row first, then
    /// suites alphabetically.
    pub fn snapshot(&self) -> Vec<TestStatus> {
        let rows = self.rows.read().unwrap_or_else(|p| p.into_inner());
        let mut out: Vec<TestStatus> = Vec::with_capacity(rows.len());
        if let Some(prep) = rows.get(PREPARE_ROW) {
            out.push(lock(prep).clone());
        }
        out.extend(
            rows.iter()
                .filter(|(name, _)| name.as_str() != PREPARE_ROW)
                .map(|(_, row)| lock(row).clone()),
        );
        out
    }

    /// Number of suite rows currently holding a concurrency slot.
    pub fn active_count(&self) -> usize {
        let rows = self.rows.read().unwrap_or_else(|p| p.into_inner());
        rows.iter()
            .filter(|(name, _)| name.as_str() != PREPARE_ROW)
            .filter(|(_, row)| lock(row).phase.is_active())
            .count()
    }
}

/// Terminal category of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    /// Apply succeeded.
    Passed,
    /// A tool command exited non-zero.
    Failed,
    /// No configuration files.
    Skipped,
    /// The orchestrator failed unexpectedly.
    Error,
}

impl TestOutcome {
    /// Maps a terminal phase to its outcome.
    pub fn from_phase(phase: Phase) -> Option<Self> {
        match phase {
            Phase::Pass => Some(TestOutcome::Passed),
            Phase::Fail => Some(TestOutcome::Failed),
            Phase::Skipped => Some(TestOutcome::Skipped),
            Phase::Error => Some(TestOutcome::Error),
            _ => None,
        }
    }

    /// Returns `true` for outcomes that do not fail the run.
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed | TestOutcome::Skipped)
    }
}

/// Logs captured for one tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseLog {
    /// Operation label (`init`, `apply`, `show`, `destroy`).
    pub operation: String,
    /// Exit code, `None` if the process never produced one.
    pub exit_code: Option<i32>,
    /// Files holding the output.
    pub paths: LogPaths,
}

/// Final, immutable result of one suite.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Suite name.
    pub name: String,
    /// Suite directory.
    pub path: PathBuf,
    /// Terminal category.
    pub outcome: TestOutcome,
    /// When the suite left PENDING.
    pub started_at: Option<DateTime<Local>>,
    /// When the suite reached its terminal phase.
    pub finished_at: Option<DateTime<Local>>,
    /// Logs of every invocation, in order.
    pub logs: Vec<PhaseLog>,
    /// Index into `logs` of the invocation that decided a failure.
    pub failed_log: Option<usize>,
    /// Warning and error entries from the structured logs.
    pub entries: Vec<LogEntry>,
    /// Resource, provider and output counts.
    pub counts: ResourceCounts,
    /// A warning was seen.
    pub warnings: bool,
    /// Short failure description.
    pub error_message: Option<String>,
}

impl TestResult {
    /// Returns `true` if the suite passed.
    pub fn success(&self) -> bool {
        self.outcome == TestOutcome::Passed
    }

    /// Returns `true` if the suite was skipped.
    pub fn skipped(&self) -> bool {
        self.outcome == TestOutcome::Skipped
    }

    /// Wall-clock time between start and finish.
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// Log of the invocation that decided a failure.
    pub fn failure_log(&self) -> Option<&PhaseLog> {
        self.failed_log.and_then(|i| self.logs.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut status = TestStatus::new("vpc");
        for phase in [
            Phase::Cleaning,
            Phase::Init,
            Phase::Applying,
            Phase::Analyzing,
            Phase::Destroying,
            Phase::Pass,
        ] {
            status.transition(phase).unwrap();
        }
        assert!(status.success);
        assert!(!status.active);
        assert!(status.started_at.is_some());
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn test_apply_failure_path_reaches_destroy() {
        let mut status = TestStatus::new("vpc");
        status.transition(Phase::Cleaning).unwrap();
        status.transition(Phase::Init).unwrap();
        status.transition(Phase::Applying).unwrap();
        status.transition(Phase::Destroying).unwrap();
        status.transition(Phase::Fail).unwrap();
        assert!(!status.success);
    }

    #[test]
    fn test_terminal_phases_are_final() {
        let mut status = TestStatus::new("vpc");
        status.transition(Phase::Skipped).unwrap();
        assert!(status.skipped);
        assert!(status.transition(Phase::Error).is_err());
        assert!(status.transition(Phase::Cleaning).is_err());
        assert_eq!(status.phase, Phase::Skipped);
    }

    #[test]
    fn test_no_skipping_ahead() {
        let mut status = TestStatus::new("vpc");
        assert!(status.transition(Phase::Applying).is_err());
        status.transition(Phase::Cleaning).unwrap();
        status.transition(Phase::Init).unwrap();
        assert!(status.transition(Phase::Destroying).is_err());
        assert!(status.transition(Phase::Error).is_ok());
    }

    #[test]
    fn test_snapshot_order_pins_preparation_row() {
        let table = StatusTable::new();
        table.insert("zeta");
        table.insert("alpha");
        table.insert(PREPARE_ROW);
        table.insert("alpha");

        let names: Vec<String> = table.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec![PREPARE_ROW, "alpha", "zeta"]);

        table.remove(PREPARE_ROW);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_active_count_ignores_pending_terminal_and_preparation() {
        let table = StatusTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        table.insert("c");
        let prep = table.insert(PREPARE_ROW);
        lock(&prep).transition(Phase::Cleaning).unwrap();

        lock(&a).transition(Phase::Cleaning).unwrap();
        lock(&b).transition(Phase::Skipped).unwrap();
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn test_merge_snapshot_keeps_log_counters() {
        let mut counts = ResourceCounts {
            functions: 3,
            ..Default::default()
        };
        counts.merge_snapshot(ResourceCounts {
            resources: 2,
            functions: 0,
            ..Default::default()
        });
        assert_eq!(counts.resources, 2);
        assert_eq!(counts.functions, 3);
    }
}
