//! infratest: a concurrent lifecycle runner for infrastructure-configuration
//! test suites.
//!
//! A suite is a directory of `.tf`/`.tofu` files. infratest finds suites,
//! narrows them with filters, populates a shared plugin cache once, and then
//! drives every suite through `init`, `apply`, `show` and `destroy` with a
//! bounded number running at a time, showing live status as it goes.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Discovery**: Find suite directories and their tags/types ([`discovery`])
//! - **Deps**: Pre-populate the shared dependency cache ([`deps`])
//! - **Executor**: The per-suite state machine under a semaphore ([`executor`])
//! - **Tool**: The provisioning tool's subprocess contract ([`tool`])
//! - **Tail**: Structured-log tailing and summarising ([`tail`])
//! - **Status/Display**: Shared status rows and the live table ([`status`], [`display`])
//! - **Report**: Console, JSON and JUnit output ([`report`])
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use infratest::config::load_config_or_default;
//! use infratest::discovery::{Discovery, TestFilter};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = load_config_or_default(None, Path::new("."))?;
//!     let suites = Discovery::new(&config.discovery)?.discover(Path::new("."))?;
//!     let suites = TestFilter::new(&config.filter)?.filter(suites);
//!     println!("{} suites selected", suites.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod deps;
pub mod discovery;
pub mod display;
pub mod executor;
pub mod report;
pub mod status;
pub mod tail;
pub mod tool;

// Re-export commonly used types
pub use config::{Config, RuntimeConfig, load_config};
pub use deps::{DependencyPreparer, Preparation, PrepareError};
pub use discovery::{Discovery, TestFilter, TestSuite};
pub use executor::{ExecutorError, LifecycleExecutor};
pub use report::{Reporter, RunSummary};
pub use status::{Phase, StatusTable, TestOutcome, TestResult, TestStatus};
pub use tool::{TofuCli, ToolRunner};
