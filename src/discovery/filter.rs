//! Narrowing a discovered suite set by path, tag, type and regex.
//!
//! Every dimension accepts plain entries and `!`-negated entries. A suite
//! passes a dimension if it matches no negated entry and, when the
//! dimension has plain entries, at least one of them. A suite is kept only
//! if it passes every dimension.

use regex::Regex;

use super::{DiscoveryError, DiscoveryResult, TestSuite};
use crate::config::FilterConfig;

/// One filter dimension split into include and exclude entries.
#[derive(Debug, Clone)]
struct Dimension<T> {
    include: Vec<T>,
    exclude: Vec<T>,
}

impl<T> Dimension<T> {
    fn parse<F>(entries: &[String], mut compile: F) -> DiscoveryResult<Self>
    where
        F: FnMut(&str) -> DiscoveryResult<T>,
    {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for entry in entries {
            match entry.strip_prefix('!') {
                Some(negated) => exclude.push(compile(negated)?),
                None => include.push(compile(entry)?),
            }
        }
        Ok(Self { include, exclude })
    }

    fn accepts(&self, matches: impl Fn(&T) -> bool) -> bool {
        if self.exclude.iter().any(&matches) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(&matches)
    }
}

/// Filters a set of suites.
///
/// # Example
///
/// ```
/// use infratest::config::FilterConfig;
/// use infratest::discovery::TestFilter;
///
/// let filter = TestFilter::new(&FilterConfig {
///     tags: vec!["!slow".to_string()],
///     ..Default::default()
/// })
/// .unwrap();
/// assert!(filter.filter(Vec::new()).is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct TestFilter {
    paths: Dimension<glob::Pattern>,
    tags: Dimension<String>,
    types: Dimension<String>,
    regex: Dimension<Regex>,
}

impl TestFilter {
    /// Compiles the filter.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidPattern`] for a bad glob or regex.
    pub fn new(config: &FilterConfig) -> DiscoveryResult<Self> {
        Ok(Self {
            paths: Dimension::parse(&config.paths, |p| {
                glob::Pattern::new(p)
                    .map_err(|e| DiscoveryError::InvalidPattern(format!("{}: {}", p, e)))
            })?,
            tags: Dimension::parse(&config.tags, |t| Ok(t.to_lowercase()))?,
            types: Dimension::parse(&config.types, |t| Ok(t.to_lowercase()))?,
            regex: Dimension::parse(&config.regex, |r| {
                Regex::new(r).map_err(|e| DiscoveryError::InvalidPattern(format!("{}: {}", r, e)))
            })?,
        })
    }

    /// Returns `true` if `suite` satisfies every dimension.
    pub fn matches(&self, suite: &TestSuite) -> bool {
        let relative = suite.name.as_str();
        self.paths.accepts(|p| p.matches(relative))
            && self.tags.accepts(|t| suite.tags.contains(t))
            && self.types.accepts(|t| suite.types.contains(t))
            && self.regex.accepts(|r| r.is_match(relative))
    }

    /// Returns the suites that satisfy every dimension, preserving order.
    pub fn filter(&self, suites: Vec<TestSuite>) -> Vec<TestSuite> {
        let before = suites.len();
        let kept: Vec<TestSuite> = suites.into_iter().filter(|s| self.matches(s)).collect();
        tracing::debug!("Filter kept {} of {} suites", kept.len(), before);
        kept
    }
}
