//! Strategies deciding whether a directory is a test suite.

use std::path::Path;

use super::{DiscoveryError, DiscoveryResult};

/// File names whose presence marks a directory as a suite.
pub const MARKER_FILES: &[&str] = &["main.tf", "main.tofu", "versions.tf", "suite.toml"];

/// Decides whether a directory holds a test suite.
///
/// Discovery walks the tree and asks the detector about each candidate
/// directory; it never looks at file contents itself.
pub trait TestDetector: Send + Sync {
    /// Returns a short name for logging.
    fn name(&self) -> &'static str;

    /// Returns `true` if `dir` is a test suite.
    fn is_test_dir(&self, dir: &Path) -> bool;
}

/// Detects suites by marker file names or file-name glob patterns.
///
/// # Example
///
/// ```
/// use infratest::discovery::{MarkerDetector, TestDetector};
///
/// let detector = MarkerDetector::new(&["*.tf".to_string()]).unwrap();
/// assert_eq!(detector.name(), "marker");
/// ```
#[derive(Debug, Clone)]
pub struct MarkerDetector {
    markers: Vec<String>,
    patterns: Vec<glob::Pattern>,
}

impl MarkerDetector {
    /// Creates a detector using [`MARKER_FILES`] and the given patterns.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidPattern`] if a pattern does not compile.
    pub fn new(patterns: &[String]) -> DiscoveryResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| DiscoveryError::InvalidPattern(format!("{}: {}", p, e)))
            })
            .collect::<DiscoveryResult<Vec<_>>>()?;

        Ok(Self {
            markers: MARKER_FILES.iter().map(|m| m.to_string()).collect(),
            patterns,
        })
    }

    /// Replaces the marker file set.
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers = markers.into_iter().map(Into::into).collect();
        self
    }
}

impl TestDetector for MarkerDetector {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn is_test_dir(&self, dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };

        entries.filter_map(Result::ok).any(|entry| {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                return false;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            self.markers.iter().any(|m| m.as_str() == name)
                || self.patterns.iter().any(|p| p.matches(&name))
        })
    }
}
