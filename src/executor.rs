//! Running every suite through its lifecycle under bounded concurrency.
//!
//! # Architecture
//!
//! ```text
//!   DependencyPreparer ──mark_ready()──► LifecycleExecutor
//!                                              │
//!                                              │ one future per suite
//!                                              ▼
//!                              ┌──── Semaphore (max_parallel) ────┐
//!                              │                                  │
//!                          SuiteRun                           SuiteRun
//!                   clean/init/apply/show/destroy               ...
//!                     │          │                                │
//!                 ToolRunner   LogTailer ──► StatusTable row ◄── display
//!                              │
//!                              ▼
//!                          Reporter ──► RunSummary
//! ```
//!
//! Suites never talk to each other. They share only the read-only runtime
//! configuration, the already-populated dependency cache, and the status
//! table, where each suite writes only its own row.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use infratest::config::{Config, RuntimeConfig};
//! use infratest::deps::DependencyPreparer;
//! use infratest::executor::LifecycleExecutor;
//! use infratest::report::ConsoleReporter;
//! use infratest::status::StatusTable;
//! use infratest::tool::TofuCli;
//!
//! # async fn example(suites: Vec<infratest::discovery::TestSuite>) -> anyhow::Result<()> {
//! let runtime = RuntimeConfig::from_config(&Config::default(), std::path::Path::new("."))?;
//! let tool = TofuCli::new(&runtime.tool).unwrap();
//! let table = Arc::new(StatusTable::new());
//!
//! let preparation = DependencyPreparer::new(&runtime, &tool, &table)
//!     .prepare(&suites)
//!     .await?;
//!
//! let mut executor = LifecycleExecutor::new(runtime, tool, ConsoleReporter::new(false), table);
//! executor.mark_ready(preparation);
//! let summary = executor.run(&suites).await?;
//! std::process::exit(summary.exit_code());
//! # }
//! ```

pub mod analyze;
pub mod lifecycle;

pub use analyze::count_resources;
pub use lifecycle::RUN_ARTIFACTS;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::config::RuntimeConfig;
use crate::deps::Preparation;
use crate::discovery::TestSuite;
use crate::report::{Reporter, RunSummary};
use crate::status::StatusTable;
use crate::tool::{ToolRunner, run_stamp};
use lifecycle::{RunContext, SuiteRun, panic_message};

/// Errors that stop the executor from running at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// [`LifecycleExecutor::run`] was called before dependency preparation
    /// finished.
    #[error("Suites cannot start before dependency preparation has completed")]
    NotReady,
}

/// Drives suites through the lifecycle with at most `max_parallel` of them
/// active at once.
pub struct LifecycleExecutor<T, R> {
    runtime: RuntimeConfig,
    tool: T,
    reporter: R,
    table: Arc<StatusTable>,
    stamp: String,
    preparation: Option<Preparation>,
}

impl<T: ToolRunner, R: Reporter> LifecycleExecutor<T, R> {
    /// Creates an executor. It refuses to run until [`mark_ready`] is called.
    ///
    /// [`mark_ready`]: Self::mark_ready
    pub fn new(runtime: RuntimeConfig, tool: T, reporter: R, table: Arc<StatusTable>) -> Self {
        Self {
            runtime,
            tool,
            reporter,
            table,
            stamp: run_stamp(),
            preparation: None,
        }
    }

    /// Uses `stamp` for log file names instead of the current time.
    pub fn with_stamp(mut self, stamp: impl Into<String>) -> Self {
        self.stamp = stamp.into();
        self
    }

    /// Records that dependency preparation has completed.
    pub fn mark_ready(&mut self, preparation: Preparation) {
        self.preparation = Some(preparation);
    }

    /// Outcome of dependency preparation, once ready.
    pub fn preparation(&self) -> Option<&Preparation> {
        self.preparation.as_ref()
    }

    /// The reporter receiving lifecycle events.
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// The shared status table.
    pub fn table(&self) -> &Arc<StatusTable> {
        &self.table
    }

    /// Runs every suite to a terminal phase and summarises the results.
    ///
    /// Suite failures never abort siblings. `on_run_complete` is left to the
    /// caller so it can stop the live display first.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::NotReady`] if [`mark_ready`](Self::mark_ready)
    /// was never called.
    pub async fn run(&self, suites: &[TestSuite]) -> Result<RunSummary, ExecutorError> {
        let Some(preparation) = &self.preparation else {
            return Err(ExecutorError::NotReady);
        };
        debug!(
            "Running {} suites, {} at a time ({:?})",
            suites.len(),
            self.runtime.max_parallel,
            preparation
        );

        let start = Instant::now();
        let ctx = RunContext {
            runtime: &self.runtime,
            tool: &self.tool,
            reporter: &self.reporter,
            stamp: &self.stamp,
        };
        let slots = Semaphore::new(self.runtime.max_parallel);

        let runs = suites.iter().map(|suite| {
            let status = self.table.insert(&suite.name);
            let slug = suite_slug(suite);
            let slots = &slots;
            async move {
                let run = SuiteRun::new(ctx, suite, status.clone(), &slug);
                match AssertUnwindSafe(run.execute(slots)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!("Suite {} panicked: {}", suite.name, message);
                        SuiteRun::new(ctx, suite, status, &slug)
                            .recover(slots, message)
                            .await
                    }
                }
            }
        });
        let results = join_all(runs).await;

        Ok(RunSummary::from_results(results, start.elapsed()))
    }
}

/// Directory name for a suite's logs and working data.
///
/// The readable part comes from the suite name; the hash suffix keeps
/// suites with similar names apart.
///
/// # Example
///
/// ```
/// use infratest::discovery::TestSuite;
/// use infratest::executor::suite_slug;
/// use std::path::Path;
///
/// let suite = TestSuite::load(Path::new("/repo/examples/vpc peering"), Path::new("/repo"));
/// let slug = suite_slug(&suite);
/// assert!(slug.starts_with("examples-vpc-peering-"));
/// assert_eq!(slug.len(), "examples-vpc-peering-".len() + 8);
/// ```
pub fn suite_slug(suite: &TestSuite) -> String {
    let readable: String = suite
        .name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let digest = Sha256::digest(suite.path.to_string_lossy().as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();

    format!("{}-{}", readable.trim_matches('-'), hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn suite(path: &str, name: &str) -> TestSuite {
        TestSuite {
            path: PathBuf::from(path),
            name: name.to_string(),
            tags: Default::default(),
            types: Default::default(),
        }
    }

    #[test]
    fn test_slug_differs_for_colliding_names() {
        let a = suite_slug(&suite("/a/x/y", "x/y"));
        let b = suite_slug(&suite("/a/x-y", "x-y"));
        assert!(a.starts_with("x-y-"));
        assert!(b.starts_with("x-y-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_panic_message() {
        use std::any::Any;

        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
