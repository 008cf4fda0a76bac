//! Populating the shared dependency cache before any suite runs.
//!
//! Suites running concurrently against one empty cache race each other to
//! download the same plugins. The preparer avoids that by scanning every
//! suite for declared dependencies, collapsing them to one entry per source,
//! and initializing a synthetic configuration once, serially, with the cache
//! enabled. After it returns the cache is only read.

pub mod extract;

pub use extract::{
    DependencyRequirement, deduplicate, extract_requirements, is_concrete_version,
    synthesize_config,
};

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::discovery::TestSuite;
use crate::status::{PREPARE_ROW, Phase, StatusTable, lock};
use crate::tail::LogTailer;
use crate::tool::{Invocation, LogPaths, Operation, ToolError, ToolRunner, run_stamp};

/// Log subdirectory used by the preparation step.
const PREPARE_LOG_DIR: &str = "_prepare";

/// Errors that make the whole run impossible.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// The cache directory could not be created.
    #[error("Failed to create dependency cache {}: {source}", .path.display())]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scratch configuration could not be written.
    #[error("Failed to prepare scratch configuration: {0}")]
    Scratch(#[source] std::io::Error),

    /// The tool could not be started.
    #[error("Dependency initialization could not run: {0}")]
    Tool(#[from] ToolError),

    /// The tool ran and reported failure.
    #[error("Dependency initialization exited with code {exit_code}, see {}", .log.display())]
    InitFailed { exit_code: i32, log: PathBuf },

    /// The tool was killed by the phase timeout.
    #[error("Dependency initialization timed out, see {}", .log.display())]
    TimedOut { log: PathBuf },
}

/// What the preparation step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preparation {
    /// Caching is disabled; every suite downloads on its own.
    Disabled,
    /// No suite declares any dependency.
    NoDependencies,
    /// The cache now holds these dependencies.
    Populated {
        dependencies: Vec<DependencyRequirement>,
    },
}

/// Collects and deduplicates the dependencies of every suite.
pub fn collect_requirements(suites: &[TestSuite]) -> Vec<DependencyRequirement> {
    let all = suites
        .iter()
        .flat_map(|suite| suite.config_files())
        .filter_map(|file| match std::fs::read_to_string(&file) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("Skipping unreadable {}: {}", file.display(), e);
                None
            }
        })
        .flat_map(|text| extract_requirements(&text));
    deduplicate(all)
}

/// Runs the one-off cache population.
///
/// # Example
///
/// ```no_run
/// use infratest::config::{Config, RuntimeConfig};
/// use infratest::deps::DependencyPreparer;
/// use infratest::status::StatusTable;
/// use infratest::tool::TofuCli;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let runtime = RuntimeConfig::from_config(&Config::default(), Path::new("."))?;
/// let tool = TofuCli::new(&runtime.tool).unwrap();
/// let table = StatusTable::new();
/// let outcome = DependencyPreparer::new(&runtime, &tool, &table)
///     .prepare(&[])
///     .await?;
/// println!("{:?}", outcome);
/// # Ok(())
/// # }
/// ```
pub struct DependencyPreparer<'a, T: ToolRunner> {
    runtime: &'a RuntimeConfig,
    tool: &'a T,
    table: &'a StatusTable,
    stamp: String,
}

impl<'a, T: ToolRunner> DependencyPreparer<'a, T> {
    /// Creates a preparer that reports progress into `table`.
    pub fn new(runtime: &'a RuntimeConfig, tool: &'a T, table: &'a StatusTable) -> Self {
        Self {
            runtime,
            tool,
            table,
            stamp: run_stamp(),
        }
    }

    /// Uses `stamp` for log file names instead of the current time.
    pub fn with_stamp(mut self, stamp: impl Into<String>) -> Self {
        self.stamp = stamp.into();
        self
    }

    /// Populates the cache with every dependency declared by `suites`.
    ///
    /// There is no retry: any failure is returned and must abort the run.
    ///
    /// # Errors
    ///
    /// Returns a [`PrepareError`] if the cache or scratch directory cannot
    /// be created, or if the tool fails to start, exits non-zero, or times
    /// out.
    pub async fn prepare(&self, suites: &[TestSuite]) -> Result<Preparation, PrepareError> {
        let Some(cache_dir) = &self.runtime.cache_dir else {
            debug!("Dependency cache disabled, skipping preparation");
            return Ok(Preparation::Disabled);
        };

        let dependencies = collect_requirements(suites);
        if dependencies.is_empty() {
            debug!("No declared dependencies, skipping preparation");
            return Ok(Preparation::NoDependencies);
        }

        std::fs::create_dir_all(cache_dir).map_err(|source| PrepareError::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;

        let scratch = tempfile::Builder::new()
            .prefix("infratest-prepare-")
            .tempdir()
            .map_err(PrepareError::Scratch)?;
        std::fs::write(scratch.path().join("main.tf"), synthesize_config(&dependencies))
            .map_err(PrepareError::Scratch)?;

        info!(
            "Caching {} dependencies in {}",
            dependencies.len(),
            cache_dir.display()
        );

        let invocation = Invocation {
            operation: Operation::Init {
                upgrade: self.runtime.force_upgrade,
            },
            working_dir: scratch.path().to_path_buf(),
            data_dir: scratch.path().join(".data"),
            cache_dir: Some(cache_dir.clone()),
            logs: LogPaths::new(
                &self.runtime.log_dir.join(PREPARE_LOG_DIR),
                &self.stamp,
                "init",
            ),
            timeout: self.runtime.phase_timeout,
        };

        let row = self.table.insert(PREPARE_ROW);
        {
            let mut status = lock(&row);
            let _ = status.transition(Phase::Cleaning);
            let _ = status.transition(Phase::Init);
            status.last_log = format!("Caching {} dependencies", dependencies.len());
        }

        let stop = CancellationToken::new();
        let tailer = LogTailer::new(&invocation.logs.structured, row, self.runtime.throttle);
        let (result, _) = tokio::join!(
            async {
                let result = self.tool.run(&invocation).await;
                stop.cancel();
                result
            },
            tailer.run(stop.clone()),
        );
        self.table.remove(PREPARE_ROW);

        let output = result?;
        if output.timed_out {
            return Err(PrepareError::TimedOut {
                log: invocation.logs.stderr,
            });
        }
        if !output.success() {
            return Err(PrepareError::InitFailed {
                exit_code: output.exit_code,
                log: invocation.logs.stderr,
            });
        }

        info!("Dependency cache ready after {:?}", output.duration);
        Ok(Preparation::Populated { dependencies })
    }
}
