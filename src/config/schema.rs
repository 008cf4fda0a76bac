//! Configuration schema definitions for infratest.
//!
//! This module defines all configuration types that can be deserialized from
//! an `infratest.toml` file. Every field has a default, so an empty file (or
//! no file at all) is a valid configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RunConfig         - Parallelism, timeouts, cache, log and work dirs
//! ├── DiscoveryConfig   - Glob patterns, recursion, exclusions
//! ├── FilterConfig      - Path / tag / type / regex filters
//! ├── DisplayConfig     - Live table refresh and message throttling
//! └── ReportConfig      - JUnit output
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure for infratest.
///
/// # TOML Structure
///
/// ```toml
/// [run]
/// max_parallel = 8
/// tool = "tofu"
///
/// [discovery]
/// recursive = true
/// exclude = ["**/legacy/**"]
///
/// [filter]
/// tags = ["network", "!slow"]
///
/// [display]
/// refresh_ms = 250
///
/// [report]
/// junit = true
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Core execution settings.
    #[serde(default)]
    pub run: RunConfig,

    /// Test suite discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Filters narrowing the discovered suites.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Live status display settings.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Report generation settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_parallel` | 4 |
/// | `phase_timeout_secs` | 3600 |
/// | `force_upgrade` | false |
/// | `use_cache` | true |
/// | `tool` | `"tofu"` |
/// | `cache_dir` | `.infratest/plugin-cache` |
/// | `log_dir` | `.infratest/logs` |
/// | `work_dir` | `.infratest/work` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Maximum number of suites in an active phase at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for a single tool invocation in seconds. `0` disables it.
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_secs: u64,

    /// Pass the upgrade flag to every initialize call.
    #[serde(default)]
    pub force_upgrade: bool,

    /// Populate and use the shared dependency cache.
    ///
    /// When disabled every suite downloads its own dependencies and the
    /// preparation step is a no-op.
    #[serde(default = "default_true")]
    pub use_cache: bool,

    /// Provisioning tool command line, split with shell quoting rules.
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Shared dependency cache directory. `~` and `$VARS` are expanded.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Directory collecting per-suite stdout, stderr and structured logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Root of the private per-suite working-data directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            phase_timeout_secs: default_phase_timeout(),
            force_upgrade: false,
            use_cache: true,
            tool: default_tool(),
            cache_dir: default_cache_dir(),
            log_dir: default_log_dir(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

fn default_phase_timeout() -> u64 {
    3600 // 1 hour
}

fn default_true() -> bool {
    true
}

fn default_tool() -> String {
    "tofu".to_string()
}

fn default_cache_dir() -> String {
    ".infratest/plugin-cache".to_string()
}

fn default_log_dir() -> String {
    ".infratest/logs".to_string()
}

fn default_work_dir() -> String {
    ".infratest/work".to_string()
}

/// Test suite discovery settings.
///
/// # Example
///
/// ```toml
/// [discovery]
/// patterns = ["*.tf", "*.tofu", "*.tftest.hcl"]
/// recursive = true
/// max_depth = 6
/// exclude = ["**/vendor/**"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// File-name glob patterns; a directory holding a match is a suite.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,

    /// Walk the whole tree instead of the base and its direct children.
    #[serde(default)]
    pub recursive: bool,

    /// Maximum recursion depth below the base directory.
    pub max_depth: Option<usize>,

    /// Path globs (relative to the base directory) that are never suites.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            recursive: false,
            max_depth: None,
            exclude: Vec::new(),
        }
    }
}

fn default_patterns() -> Vec<String> {
    vec!["*.tf".to_string(), "*.tofu".to_string()]
}

/// Filters narrowing the discovered suites.
///
/// Each list accepts plain entries (include) and `!`-prefixed entries
/// (exclude). A suite must satisfy every non-empty list.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Path globs matched against the suite path relative to the base.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Component types (`resource`, `data-source`, `function`, ...).
    #[serde(default)]
    pub types: Vec<String>,

    /// Regular expressions matched against the relative suite path.
    #[serde(default)]
    pub regex: Vec<String>,
}

impl FilterConfig {
    /// Returns `true` if no filter dimension has any entry.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.tags.is_empty() && self.types.is_empty() && self.regex.is_empty()
    }
}

/// Live status display settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Interval between redraws of the live table.
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    /// Minimum interval between informational status-line updates per suite.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

fn default_refresh_ms() -> u64 {
    250
}

fn default_throttle_ms() -> u64 {
    500
}

/// Report generation settings.
///
/// # Example
///
/// ```toml
/// [report]
/// junit = true
/// junit_file = "build/infratest.xml"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Whether to write a JUnit XML report.
    #[serde(default)]
    pub junit: bool,

    /// Output path for the JUnit XML report.
    #[serde(default = "default_junit_file")]
    pub junit_file: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            junit: false,
            junit_file: default_junit_file(),
        }
    }
}

fn default_junit_file() -> PathBuf {
    PathBuf::from("infratest-results/junit.xml")
}

/// Immutable runtime settings shared by the preparer and the executor.
///
/// Constructed once from a [`Config`] after CLI overrides are applied and
/// then only read.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Shared dependency cache, or `None` when caching is disabled.
    pub cache_dir: Option<PathBuf>,

    /// Upper bound on concurrently active suites (always at least 1).
    pub max_parallel: usize,

    /// Pass the upgrade flag to initialize.
    pub force_upgrade: bool,

    /// Per-invocation timeout, `None` for unbounded.
    pub phase_timeout: Option<Duration>,

    /// Program and leading arguments of the provisioning tool.
    pub tool: Vec<String>,

    /// Directory collecting per-suite logs.
    pub log_dir: PathBuf,

    /// Root of private per-suite working-data directories.
    pub work_dir: PathBuf,

    /// Minimum interval between informational status updates per suite.
    pub throttle: Duration,
}

impl RuntimeConfig {
    /// Builds the runtime view of `config`, resolving relative paths
    /// against `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool command line cannot be split or is
    /// empty, or if a path references an undefined environment variable.
    pub fn from_config(config: &Config, root: &Path) -> anyhow::Result<Self> {
        let tool = shell_words::split(&config.run.tool)
            .map_err(|e| anyhow::anyhow!("Invalid tool command '{}': {}", config.run.tool, e))?;
        if tool.is_empty() {
            anyhow::bail!("Tool command must not be empty");
        }

        let cache_dir = if config.run.use_cache {
            Some(resolve_path(&config.run.cache_dir, root)?)
        } else {
            None
        };

        Ok(Self {
            cache_dir,
            max_parallel: config.run.max_parallel.max(1),
            force_upgrade: config.run.force_upgrade,
            phase_timeout: match config.run.phase_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            tool,
            log_dir: resolve_path(&config.run.log_dir, root)?,
            work_dir: resolve_path(&config.run.work_dir, root)?,
            throttle: Duration::from_millis(config.display.throttle_ms),
        })
    }
}

/// Expands `~` and environment variables, then anchors relative paths at
/// `root`.
///
/// The result is always absolute: these paths are handed to tool processes
/// whose working directory is the suite, not ours.
fn resolve_path(raw: &str, root: &Path) -> anyhow::Result<PathBuf> {
    let expanded = shellexpand::full(raw)
        .map_err(|e| anyhow::anyhow!("Failed to expand path '{}': {}", raw, e))?;
    let path = root.join(expanded.as_ref());
    std::path::absolute(&path)
        .map_err(|e| anyhow::anyhow!("Failed to resolve path '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.run.max_parallel, 4);
        assert_eq!(config.run.tool, "tofu");
        assert!(config.run.use_cache);
        assert_eq!(config.discovery.patterns, vec!["*.tf", "*.tofu"]);
        assert!(config.filter.is_empty());
        assert_eq!(config.display.throttle_ms, 500);
        assert!(!config.report.junit);
    }

    #[test]
    fn test_runtime_config_resolves_relative_paths() {
        let config: Config = toml::from_str(
            r#"
            [run]
            max_parallel = 0
            phase_timeout_secs = 0
            tool = "terraform -chdir=."
            cache_dir = "cache"
            "#,
        )
        .unwrap();

        let runtime = RuntimeConfig::from_config(&config, Path::new("/repo")).unwrap();
        assert_eq!(runtime.max_parallel, 1);
        assert!(runtime.phase_timeout.is_none());
        assert_eq!(runtime.tool, vec!["terraform", "-chdir=."]);
        assert_eq!(runtime.cache_dir, Some(PathBuf::from("/repo/cache")));
        assert_eq!(runtime.log_dir, PathBuf::from("/repo/.infratest/logs"));
    }

    #[test]
    fn test_runtime_config_paths_are_absolute_for_relative_root() {
        let runtime = RuntimeConfig::from_config(&Config::default(), Path::new("suites")).unwrap();
        let cwd = std::env::current_dir().unwrap();

        let cache_dir = runtime.cache_dir.unwrap();
        assert!(cache_dir.is_absolute());
        assert!(runtime.log_dir.is_absolute());
        assert!(runtime.work_dir.is_absolute());
        assert_eq!(runtime.log_dir, cwd.join("suites/.infratest/logs"));
        assert_eq!(cache_dir, cwd.join("suites/.infratest/plugin-cache"));
    }

    #[test]
    fn test_runtime_config_without_cache() {
        let mut config = Config::default();
        config.run.use_cache = false;
        let runtime = RuntimeConfig::from_config(&config, Path::new("/repo")).unwrap();
        assert!(runtime.cache_dir.is_none());
    }

    #[test]
    fn test_runtime_config_rejects_empty_tool() {
        let mut config = Config::default();
        config.run.tool = "   ".to_string();
        assert!(RuntimeConfig::from_config(&config, Path::new("/repo")).is_err());
    }
}
