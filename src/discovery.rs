//! Test suite discovery and filtering.
//!
//! A suite is a directory holding one self-contained infrastructure
//! configuration. Discovery finds suite directories below a base path, and
//! [`TestFilter`] narrows the result.
//!
//! # Modes
//!
//! - **Flat** (default): the base directory, its direct children, and the
//!   children of well-known container directories such as `examples/`.
//! - **Recursive**: a depth-first walk that stops descending as soon as a
//!   directory qualifies, optionally bounded by a maximum depth.
//!
//! In both modes the result is sorted and no returned directory lies below
//! another returned directory.
//!
//! ```text
//! base/
//! ├── main.tf            -> base itself is a suite (children are dropped)
//! ├── examples/
//! │   ├── vpc/main.tf    -> suite "examples/vpc"
//! │   └── dns/main.tf    -> suite "examples/dns"
//! └── .terraform/        -> always ignored
//! ```

pub mod detector;
pub mod filter;
pub mod metadata;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DiscoveryConfig;

pub use detector::{MARKER_FILES, MarkerDetector, TestDetector};
pub use filter::TestFilter;

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur during discovery and filtering.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The base path does not exist or is not a directory.
    #[error("Base path is not a directory: {}", .0.display())]
    BaseNotFound(PathBuf),

    /// A glob or regular expression failed to compile.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// I/O error reading the tree.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directory names that never hold suites and are never walked into.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".terraform",
    ".infratest",
    ".venv",
    "venv",
    "node_modules",
    "target",
    "build",
    "dist",
    "__pycache__",
    ".tox",
    ".pytest_cache",
    ".mypy_cache",
];

/// Hidden directories that are still searched.
pub const ALLOWED_HIDDEN_DIRS: &[&str] = &[".examples", ".tests"];

/// Directories whose children are also candidates in flat mode.
pub const CONTAINER_DIRS: &[&str] = &["examples", "tests", "test", "e2e", ".examples", ".tests"];

/// A discovered test suite.
///
/// Identity is the directory path; `name` is the path relative to the
/// discovery base and is used as the display and log key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuite {
    /// Absolute (or base-joined) directory path.
    pub path: PathBuf,

    /// Path relative to the discovery base, `/`-separated.
    pub name: String,

    /// Tags used for filtering.
    pub tags: BTreeSet<String>,

    /// Component types used for filtering.
    pub types: BTreeSet<String>,
}

impl TestSuite {
    /// Builds a suite for `path`, reading its tags and types from disk.
    pub fn load(path: &Path, base: &Path) -> Self {
        let relative = path.strip_prefix(base).unwrap_or(path);
        let mut name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if name.is_empty() {
            name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_string());
        }

        let (tags, types) = metadata::classify(path, relative);

        Self {
            path: path.to_path_buf(),
            name,
            tags,
            types,
        }
    }

    /// Returns the suite's `.tf`/`.tofu` files.
    pub fn config_files(&self) -> Vec<PathBuf> {
        metadata::config_files(&self.path)
    }
}

/// Finds suite directories below a base path.
///
/// # Example
///
/// ```no_run
/// use infratest::config::DiscoveryConfig;
/// use infratest::discovery::Discovery;
/// use std::path::Path;
///
/// let discovery = Discovery::new(&DiscoveryConfig::default())?;
/// for suite in discovery.discover(Path::new("."))? {
///     println!("{}", suite.name);
/// }
/// # Ok::<(), infratest::discovery::DiscoveryError>(())
/// ```
pub struct Discovery<D = MarkerDetector> {
    detector: D,
    recursive: bool,
    max_depth: Option<usize>,
    exclude: Vec<glob::Pattern>,
}

impl Discovery<MarkerDetector> {
    /// Creates a discovery using marker files and the configured patterns.
    pub fn new(config: &DiscoveryConfig) -> DiscoveryResult<Self> {
        let detector = MarkerDetector::new(&config.patterns)?;
        Self::with_detector(config, detector)
    }
}

impl<D: TestDetector> Discovery<D> {
    /// Creates a discovery using a custom detection strategy.
    pub fn with_detector(config: &DiscoveryConfig, detector: D) -> DiscoveryResult<Self> {
        let exclude = config
            .exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| DiscoveryError::InvalidPattern(format!("{}: {}", p, e)))
            })
            .collect::<DiscoveryResult<Vec<_>>>()?;

        Ok(Self {
            detector,
            recursive: config.recursive,
            max_depth: config.max_depth,
            exclude,
        })
    }

    /// Returns the sorted, non-overlapping suite directories below `base`.
    pub fn discover_paths(&self, base: &Path) -> DiscoveryResult<Vec<PathBuf>> {
        if !base.is_dir() {
            return Err(DiscoveryError::BaseNotFound(base.to_path_buf()));
        }

        let found = if self.recursive {
            self.discover_recursive(base)
        } else {
            self.discover_flat(base)?
        };

        let suites = remove_nested(found);
        debug!(
            "Discovered {} suites below {} using {} detector",
            suites.len(),
            base.display(),
            self.detector.name()
        );
        Ok(suites)
    }

    /// Discovers suites and loads their tags and types.
    ///
    /// Suite paths are absolute even when `base` is relative, since tool
    /// processes run with the suite as their working directory.
    pub fn discover(&self, base: &Path) -> DiscoveryResult<Vec<TestSuite>> {
        let base = std::path::absolute(base)?;
        Ok(self
            .discover_paths(&base)?
            .iter()
            .map(|path| TestSuite::load(path, &base))
            .collect())
    }

    fn discover_flat(&self, base: &Path) -> DiscoveryResult<Vec<PathBuf>> {
        let mut candidates = vec![base.to_path_buf()];

        for child in self.child_dirs(base, base)? {
            let is_container = child
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| CONTAINER_DIRS.contains(&n));
            if is_container {
                candidates.extend(self.child_dirs(&child, base)?);
            }
            candidates.push(child);
        }

        Ok(candidates
            .into_iter()
            .filter(|dir| self.detector.is_test_dir(dir))
            .collect())
    }

    fn discover_recursive(&self, base: &Path) -> Vec<PathBuf> {
        let mut walker = WalkDir::new(base).follow_links(false).sort_by_file_name();
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut found = Vec::new();
        let mut entries = walker.into_iter().filter_entry(|e| {
            e.file_type().is_dir() && (e.depth() == 0 || !self.is_excluded(e.path(), base))
        });

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path during discovery: {}", e);
                    continue;
                }
            };

            if self.detector.is_test_dir(entry.path()) {
                found.push(entry.path().to_path_buf());
                entries.skip_current_dir();
            }
        }

        found
    }

    /// Lists non-excluded subdirectories of `dir`.
    fn child_dirs(&self, dir: &Path, base: &Path) -> DiscoveryResult<Vec<PathBuf>> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| !self.is_excluded(p, base))
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    fn is_excluded(&self, path: &Path, base: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return true;
        };

        if IGNORED_DIRS.contains(&name) {
            return true;
        }
        if name.starts_with('.') && !ALLOWED_HIDDEN_DIRS.contains(&name) {
            return true;
        }

        let relative = path.strip_prefix(base).unwrap_or(path);
        self.exclude
            .iter()
            .any(|p| p.matches_path(relative) || p.matches(name))
    }
}

/// Sorts and deduplicates `paths`, dropping any path below another one.
pub fn remove_nested(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths.dedup();

    let mut kept: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for path in paths {
        if !kept.iter().any(|ancestor| path.starts_with(ancestor)) {
            kept.push(path);
        }
    }
    kept
}
