//! Best-effort scraping of dependency declarations from configuration text.
//!
//! This is a heuristic over unparsed text, not a configuration parser. It
//! understands the two common shapes of a `required_providers` block:
//!
//! ```hcl
//! terraform {
//!   required_providers {
//!     aws = { source = "hashicorp/aws", version = "5.31.0" }   # block form
//!     random = "~> 3.0"                                        # legacy form
//!   }
//! }
//! ```
//!
//! The legacy form is only consulted when a file has no block declarations.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Namespace assumed for dependencies declared without an explicit source.
const DEFAULT_NAMESPACE: &str = "hashicorp";

/// A dependency declared by a suite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyRequirement {
    /// Local name used inside the configuration.
    pub name: String,
    /// Source address, e.g. `hashicorp/aws`.
    pub source: String,
    /// Version constraint, if any.
    pub version: Option<String>,
}

impl DependencyRequirement {
    /// Creates a requirement.
    pub fn new(name: &str, source: &str, version: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            version: version.map(str::to_string),
        }
    }

    fn rank(&self) -> u8 {
        match self.version.as_deref() {
            Some(v) if is_concrete_version(v) => 2,
            Some(_) => 1,
            None => 0,
        }
    }
}

struct Patterns {
    block: Regex,
    source: Regex,
    version: Regex,
    legacy: Regex,
    concrete: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("static pattern is valid");
        Patterns {
            block: compile(r"(?P<name>[A-Za-z][\w-]*)\s*=\s*\{(?P<body>[^{}]*)\}"),
            source: compile(r#"source\s*=\s*"(?P<v>[^"]+)""#),
            version: compile(r#"version\s*=\s*"(?P<v>[^"]*)""#),
            legacy: compile(r#"(?m)^\s*(?P<name>[A-Za-z][\w-]*)\s*=\s*"(?P<v>[^"]*)""#),
            concrete: compile(r"^=?\s*v?\d+(?:\.\d+)*(?:-[\w.]+)?(?:\+[\w.]+)?$"),
        }
    })
}

/// Returns `true` for an exact version such as `1.2.3` or `= 1.2.3`, and
/// `false` for ranges such as `>= 1.0` or `~> 3.0`.
pub fn is_concrete_version(version: &str) -> bool {
    patterns().concrete.is_match(version.trim())
}

/// Extracts every dependency declared in `text`.
///
/// # Example
///
/// ```
/// use infratest::deps::extract_requirements;
///
/// let reqs = extract_requirements(r#"
///     terraform {
///       required_providers {
///         random = { source = "hashicorp/random", version = "3.6.0" }
///       }
///     }
/// "#);
/// assert_eq!(reqs[0].source, "hashicorp/random");
/// assert_eq!(reqs[0].version.as_deref(), Some("3.6.0"));
/// ```
pub fn extract_requirements(text: &str) -> Vec<DependencyRequirement> {
    let p = patterns();
    let text = strip_comments(text);
    let bodies = required_provider_bodies(&text);

    let mut found = Vec::new();
    for body in &bodies {
        for caps in p.block.captures_iter(body) {
            let name = &caps["name"];
            let inner = &caps["body"];
            let source = p.source.captures(inner).map(|c| c["v"].to_string());
            let version = p.version.captures(inner).map(|c| c["v"].trim().to_string());
            if source.is_none() && version.is_none() {
                continue;
            }
            let source = source.unwrap_or_else(|| default_source(name));
            found.push(DependencyRequirement {
                name: name.to_string(),
                source,
                version: version.filter(|v| !v.is_empty()),
            });
        }
    }

    if found.is_empty() {
        for body in &bodies {
            for caps in p.legacy.captures_iter(body) {
                let name = &caps["name"];
                let version = caps["v"].trim();
                found.push(DependencyRequirement {
                    name: name.to_string(),
                    source: default_source(name),
                    version: (!version.is_empty()).then(|| version.to_string()),
                });
            }
        }
    }
    found
}

fn default_source(name: &str) -> String {
    format!("{}/{}", DEFAULT_NAMESPACE, name)
}

fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|l| {
            let t = l.trim_start();
            !t.starts_with('#') && !t.starts_with("//")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns the contents of every `required_providers { .. }` block.
fn required_provider_bodies(text: &str) -> Vec<&str> {
    const KEYWORD: &str = "required_providers";

    let mut bodies = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(KEYWORD) {
        let after = &rest[pos + KEYWORD.len()..];
        let Some(open) = after.find('{') else {
            break;
        };
        if !after[..open].trim().is_empty() {
            rest = after;
            continue;
        }

        let body_start = open + 1;
        let mut depth = 1usize;
        let mut end = None;
        for (i, c) in after[body_start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else {
            break;
        };
        bodies.push(&after[body_start..end]);
        rest = &after[end..];
    }
    bodies
}

/// Collapses requirements to one per source (case-insensitive).
///
/// A concrete version beats an open constraint, which beats no version.
/// Between equals the first one seen wins. The result is sorted by source.
pub fn deduplicate<I>(requirements: I) -> Vec<DependencyRequirement>
where
    I: IntoIterator<Item = DependencyRequirement>,
{
    let mut by_source: BTreeMap<String, DependencyRequirement> = BTreeMap::new();
    for req in requirements {
        let key = req.source.to_lowercase();
        match by_source.get(&key) {
            Some(existing) if existing.rank() >= req.rank() => {}
            _ => {
                by_source.insert(key, req);
            }
        }
    }
    by_source.into_values().collect()
}

/// Renders a minimal configuration declaring exactly `requirements`.
///
/// Local names that collide are disambiguated with a numeric suffix.
pub fn synthesize_config(requirements: &[DependencyRequirement]) -> String {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = String::from("terraform {\n  required_providers {\n");

    for req in requirements {
        let count = seen.entry(req.name.clone()).or_insert(0);
        *count += 1;
        let alias = if *count == 1 {
            req.name.clone()
        } else {
            format!("{}_{}", req.name, count)
        };

        let _ = writeln!(out, "    {} = {{", alias);
        let _ = writeln!(out, "      source  = \"{}\"", req.source);
        if let Some(version) = &req.version {
            let _ = writeln!(out, "      version = \"{}\"", version);
        }
        out.push_str("    }\n");
    }

    out.push_str("  }\n}\n");
    out
}
