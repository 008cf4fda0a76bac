//! One suite's walk through the lifecycle state machine.
//!
//! ```text
//! clean ─► init ──fail──────────────────────────────► FAIL
//!            │
//!            └─► apply ──ok──► analyze ─► destroy ─► PASS
//!                  └────fail────────────► destroy ─► FAIL
//! ```
//!
//! Anything unexpected along the way ends in ERROR, after a best-effort
//! destroy if apply was already entered.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use anyhow::Context;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::analyze::count_resources;
use crate::config::RuntimeConfig;
use crate::discovery::TestSuite;
use crate::report::Reporter;
use crate::status::{Phase, PhaseLog, StatusError, StatusHandle, TestOutcome, TestResult, lock};
use crate::tail::{LogEntry, LogTailer, is_noise, parse_line};
use crate::tool::{Invocation, LogPaths, Operation, ToolError, ToolOutput, ToolRunner};

/// Files and directories a previous run may have left in a suite.
pub const RUN_ARTIFACTS: &[&str] = &[
    ".terraform",
    ".terraform.lock.hcl",
    ".terraform.tfstate.lock.info",
    "terraform.tfstate",
    "terraform.tfstate.backup",
];

/// Read-only inputs shared by every suite of a run.
#[derive(Clone, Copy)]
pub(crate) struct RunContext<'a> {
    pub runtime: &'a RuntimeConfig,
    pub tool: &'a dyn ToolRunner,
    pub reporter: &'a dyn Reporter,
    pub stamp: &'a str,
}

/// State of one suite while it runs.
pub(crate) struct SuiteRun<'a> {
    ctx: RunContext<'a>,
    suite: &'a TestSuite,
    status: StatusHandle,
    log_dir: PathBuf,
    data_dir: PathBuf,
    logs: Vec<PhaseLog>,
    entries: Vec<LogEntry>,
    failed_log: Option<usize>,
    error_message: Option<String>,
    provisioned: bool,
    destroyed: bool,
}

impl<'a> SuiteRun<'a> {
    pub fn new(ctx: RunContext<'a>, suite: &'a TestSuite, status: StatusHandle, slug: &str) -> Self {
        Self {
            log_dir: ctx.runtime.log_dir.join(slug),
            data_dir: ctx.runtime.work_dir.join(slug),
            ctx,
            suite,
            status,
            logs: Vec::new(),
            entries: Vec::new(),
            failed_log: None,
            error_message: None,
            provisioned: false,
            destroyed: false,
        }
    }

    /// Runs the suite to a terminal phase, waiting for a slot first.
    pub async fn execute(mut self, slots: &Semaphore) -> TestResult {
        if self.suite.config_files().is_empty() {
            debug!("{} has no configuration files, skipping", self.suite.name);
            if let Err(e) = self.enter(Phase::Skipped).await {
                self.abort(e.into()).await;
            }
            return self.finish().await;
        }

        let permit = match slots.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                self.abort(anyhow::anyhow!("Concurrency limiter closed: {}", e))
                    .await;
                return self.finish().await;
            }
        };

        // The permit is held until the suite is terminal, panics included.
        let driven = AssertUnwindSafe(self.drive()).catch_unwind().await;
        match driven {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.abort(e).await,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Suite {} panicked: {}", self.suite.name, message);
                self.abort(anyhow::anyhow!("Internal panic: {}", message))
                    .await;
            }
        }
        drop(permit);
        self.finish().await
    }

    /// Finishes a suite that panicked outside its guarded lifecycle, cleaning
    /// up what it can.
    pub async fn recover(mut self, slots: &Semaphore, message: String) -> TestResult {
        let _permit = slots.acquire().await.ok();
        let phase = lock(&self.status).phase;
        self.provisioned = matches!(
            phase,
            Phase::Applying | Phase::Analyzing | Phase::Destroying
        );
        self.abort(anyhow::anyhow!("Internal panic: {}", message)).await;
        self.finish().await
    }

    async fn drive(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::Cleaning).await?;
        self.clean()
            .with_context(|| format!("Failed to clean {}", self.suite.path.display()))?;

        self.enter(Phase::Init).await?;
        let upgrade = self.ctx.runtime.force_upgrade;
        let (index, init) = self.invoke(Operation::Init { upgrade }, false).await?;
        if !init.success() {
            self.record_failure(index, &init);
            self.enter(Phase::Fail).await?;
            return Ok(());
        }

        self.enter(Phase::Applying).await?;
        self.provisioned = true;
        let (index, apply) = self.invoke(Operation::Apply, true).await?;
        let passed = apply.success();
        if passed {
            self.enter(Phase::Analyzing).await?;
            self.analyze().await;
        } else {
            self.record_failure(index, &apply);
        }

        self.enter(Phase::Destroying).await?;
        self.destroy().await;

        self.enter(if passed { Phase::Pass } else { Phase::Fail })
            .await?;
        Ok(())
    }

    async fn enter(&self, phase: Phase) -> Result<(), StatusError> {
        lock(&self.status).transition(phase)?;
        self.ctx
            .reporter
            .on_phase_change(&self.suite.name, phase)
            .await;
        Ok(())
    }

    fn clean(&self) -> std::io::Result<()> {
        for name in RUN_ARTIFACTS {
            remove_path(&self.suite.path.join(name))?;
        }
        remove_path(&self.data_dir)
    }

    async fn invoke(
        &mut self,
        operation: Operation,
        tail: bool,
    ) -> Result<(usize, ToolOutput), ToolError> {
        let invocation = Invocation {
            operation,
            working_dir: self.suite.path.clone(),
            data_dir: self.data_dir.clone(),
            cache_dir: self.ctx.runtime.cache_dir.clone(),
            logs: LogPaths::new(&self.log_dir, self.ctx.stamp, operation.label()),
            timeout: self.ctx.runtime.phase_timeout,
        };

        let tool = self.ctx.tool;
        let result = if tail {
            let stop = CancellationToken::new();
            let tailer = LogTailer::new(
                &invocation.logs.structured,
                self.status.clone(),
                self.ctx.runtime.throttle,
            );
            let (result, entries) = tokio::join!(
                async {
                    let result = tool.run(&invocation).await;
                    stop.cancel();
                    result
                },
                tailer.run(stop.clone()),
            );
            self.entries.extend(entries);
            result
        } else {
            let result = tool.run(&invocation).await;
            self.entries
                .extend(read_problems(&invocation.logs.structured).await);
            result
        };

        let exit_code = result
            .as_ref()
            .ok()
            .filter(|output| !output.timed_out)
            .map(|output| output.exit_code);
        self.logs.push(PhaseLog {
            operation: operation.label().to_string(),
            exit_code,
            paths: invocation.logs,
        });
        let index = self.logs.len() - 1;
        result.map(|output| (index, output))
    }

    async fn analyze(&mut self) {
        let (index, output) = match self.invoke(Operation::Show, false).await {
            Ok(invoked) => invoked,
            Err(e) => {
                warn!("Could not inspect {}: {}", self.suite.name, e);
                return;
            }
        };
        if !output.success() {
            warn!(
                "Inspecting {} exited with code {}, reporting zero counts",
                self.suite.name, output.exit_code
            );
            return;
        }

        let snapshot = &self.logs[index].paths.stdout;
        let text = match tokio::fs::read_to_string(snapshot).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not read {}: {}", snapshot.display(), e);
                return;
            }
        };
        match count_resources(&text) {
            Ok(counts) => lock(&self.status).counts.merge_snapshot(counts),
            Err(e) => warn!("Unparseable state snapshot for {}: {}", self.suite.name, e),
        }
    }

    async fn destroy(&mut self) {
        self.destroyed = true;
        match self.invoke(Operation::Destroy, true).await {
            Ok((_, output)) if output.success() => {
                debug!("Destroyed {}", self.suite.name);
            }
            Ok((_, output)) => warn!(
                "Destroy of {} exited with code {}, resources may remain",
                self.suite.name, output.exit_code
            ),
            Err(e) => warn!("Destroy of {} could not run: {}", self.suite.name, e),
        }
    }

    fn record_failure(&mut self, index: usize, output: &ToolOutput) {
        let operation = &self.logs[index].operation;
        self.error_message = Some(if output.timed_out {
            format!("{} timed out after {:.0?}", operation, output.duration)
        } else {
            format!("{} exited with code {}", operation, output.exit_code)
        });
        self.failed_log = Some(index);
    }

    async fn abort(&mut self, err: anyhow::Error) {
        let message = describe(&err);
        error!("Internal error in {}: {}", self.suite.name, message);
        self.error_message = Some(message);

        if self.provisioned && !self.destroyed {
            if lock(&self.status).phase != Phase::Destroying {
                let _ = self.enter(Phase::Destroying).await;
            }
            self.destroy().await;
        }
        if let Err(e) = self.enter(Phase::Error).await {
            debug!("{}", e);
        }
    }

    async fn finish(self) -> TestResult {
        let reporter = self.ctx.reporter;
        let status = lock(&self.status).clone();
        let result = TestResult {
            name: self.suite.name.clone(),
            path: self.suite.path.clone(),
            outcome: TestOutcome::from_phase(status.phase).unwrap_or(TestOutcome::Error),
            started_at: status.started_at,
            finished_at: status.finished_at,
            logs: self.logs,
            failed_log: self.failed_log,
            entries: self.entries,
            counts: status.counts,
            warnings: status.warnings,
            error_message: self.error_message,
        };
        reporter.on_suite_complete(&result).await;
        result
    }
}

/// Removes a file or directory tree; a missing path is not an error.
fn remove_path(path: &Path) -> std::io::Result<()> {
    let removed = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match removed {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Joins an error chain into one line.
///
/// A cause whose text is already the tail of the message so far is skipped,
/// since error types that print their source would otherwise show it twice.
fn describe(err: &anyhow::Error) -> String {
    let mut message = String::new();
    for cause in err.chain() {
        let text = cause.to_string();
        if message.ends_with(&text) {
            continue;
        }
        if !message.is_empty() {
            message.push_str(": ");
        }
        message.push_str(&text);
    }
    message
}

/// Warning and error entries of a finished structured log.
async fn read_problems(path: &Path) -> Vec<LogEntry> {
    let Ok(text) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    text.lines()
        .filter_map(parse_line)
        .filter(|e| e.is_problem() && !is_noise(e))
        .collect()
}
