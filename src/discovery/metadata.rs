//! Tags and component types attached to a suite.
//!
//! Tags come from three places: words in the directory name, the optional
//! `suite.toml` metadata file, and a `# tags:` comment on the first line of
//! the suite's primary configuration file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Optional per-suite metadata file.
pub const METADATA_FILE: &str = "suite.toml";

/// Configuration file extensions the provisioning tool reads.
pub const CONFIG_EXTENSIONS: &[&str] = &["tf", "tofu"];

const PRIMARY_CONFIG: &[&str] = &["main.tf", "main.tofu"];

/// Substrings that only say "this is a test" and carry no meaning.
/// Longer indicators come first so `tests` is not left as `s`.
const INDICATORS: &[&str] = &["examples", "example", "tests", "test", "e2e"];

/// Ancestor directory names that imply a component type.
const TYPE_DIRS: &[(&str, &str)] = &[
    ("resources", "resource"),
    ("data-sources", "data-source"),
    ("functions", "function"),
    ("ephemeral-resources", "ephemeral-resource"),
    ("provider", "provider"),
];

const DEFAULT_TYPE: &str = "example";

/// Contents of a `suite.toml` file.
#[derive(Debug, Default, Deserialize)]
pub struct SuiteMetadata {
    /// Explicit tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Explicit component type.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl SuiteMetadata {
    /// Reads `suite.toml` from `dir`. A missing or malformed file yields
    /// empty metadata.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(METADATA_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Returns the suite's configuration files, sorted by name.
pub fn config_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| CONFIG_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();
    files
}

/// Returns `main.tf`/`main.tofu` if present, otherwise the first config file.
pub fn primary_config(dir: &Path) -> Option<PathBuf> {
    PRIMARY_CONFIG
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
        .or_else(|| config_files(dir).into_iter().next())
}

/// Splits a directory name into tag words after removing test-indicator
/// substrings, so `vpctest` and `vpc-test` both yield `vpc`.
pub fn name_tags(dir_name: &str) -> BTreeSet<String> {
    let stripped = INDICATORS
        .iter()
        .fold(dir_name.to_lowercase(), |name, indicator| name.replace(indicator, ""));
    stripped
        .split(['-', '_', '.', ' '])
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `# tags: a, b` or `// tags: a b` from the first line of `text`.
pub fn comment_tags(text: &str) -> Vec<String> {
    let Some(first) = text.lines().next() else {
        return Vec::new();
    };
    let line = first.trim();
    let body = line
        .strip_prefix('#')
        .or_else(|| line.strip_prefix("//"))
        .map(str::trim_start);
    let Some(rest) = body.and_then(|b| b.strip_prefix("tags:")) else {
        return Vec::new();
    };

    rest.split([',', ' ', '\t'])
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Infers the component type from the nearest typed ancestor directory.
pub fn infer_type(relative: &Path) -> String {
    relative
        .components()
        .rev()
        .skip(1)
        .filter_map(|c| c.as_os_str().to_str())
        .find_map(|name| {
            TYPE_DIRS
                .iter()
                .find(|(dir, _)| *dir == name)
                .map(|(_, kind)| kind.to_string())
        })
        .unwrap_or_else(|| DEFAULT_TYPE.to_string())
}

/// Collects all tags and types for the suite at `dir`.
///
/// `relative` is the suite path relative to the discovery base.
pub fn classify(dir: &Path, relative: &Path) -> (BTreeSet<String>, BTreeSet<String>) {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tags = name_tags(&dir_name);

    let meta = SuiteMetadata::load(dir);
    tags.extend(meta.tags.iter().map(|t| t.to_lowercase()));

    if let Some(primary) = primary_config(dir)
        && let Ok(text) = std::fs::read_to_string(&primary)
    {
        tags.extend(comment_tags(&text));
    }

    let kind = meta
        .kind
        .map(|k| k.to_lowercase())
        .unwrap_or_else(|| infer_type(relative));

    (tags, BTreeSet::from([kind]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_name_tags_strip_indicators() {
        let tags = name_tags("test-vpc_peering-example");
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["peering".to_string(), "vpc".to_string()]
        );
    }

    #[test]
    fn test_name_tags_strip_embedded_indicators() {
        let tags = name_tags("vpctest");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["vpc".to_string()]);

        let tags = name_tags("dns_e2e-tests");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["dns".to_string()]);

        assert!(name_tags("examples").is_empty());
    }

    #[test]
    fn test_comment_tags() {
        assert_eq!(comment_tags("# tags: slow, network\nresource {}"), vec!["slow", "network"]);
        assert_eq!(comment_tags("// tags: a b"), vec!["a", "b"]);
        assert!(comment_tags("resource \"x\" \"y\" {}\n# tags: late").is_empty());
        assert!(comment_tags("").is_empty());
    }

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type(Path::new("examples/resources/bucket")), "resource");
        assert_eq!(infer_type(Path::new("data-sources/ami")), "data-source");
        assert_eq!(infer_type(Path::new("resources")), "example");
        assert_eq!(infer_type(Path::new("misc/thing")), "example");
    }

    #[test]
    fn test_classify_merges_sources() {
        let base = TempDir::new().unwrap();
        let dir = base.path().join("functions").join("test-parse_url");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.tf"), "# tags: fast\noutput \"x\" {}\n").unwrap();
        std::fs::write(dir.join(METADATA_FILE), "tags = [\"Smoke\"]\n").unwrap();

        let (tags, types) = classify(&dir, Path::new("functions/test-parse_url"));
        assert!(tags.contains("parse"));
        assert!(tags.contains("url"));
        assert!(tags.contains("smoke"));
        assert!(tags.contains("fast"));
        assert!(types.contains("function"));
    }

    #[test]
    fn test_metadata_type_overrides_inference() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "type = \"Provider\"\n").unwrap();

        let (_, types) = classify(dir.path(), Path::new("resources/x"));
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec!["provider".to_string()]);
    }

    #[test]
    fn test_primary_config_fallback() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.tf"), "").unwrap();
        std::fs::write(dir.path().join("a.tofu"), "").unwrap();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();

        assert_eq!(config_files(dir.path()).len(), 2);
        assert_eq!(primary_config(dir.path()), Some(dir.path().join("a.tofu")));
    }
}
