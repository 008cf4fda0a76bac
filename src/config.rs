//! Configuration loading and schema definitions for infratest.
//!
//! Configuration comes from an optional `infratest.toml` file. Command-line
//! flags are applied on top of it by the binary, and the merged result is
//! frozen into a [`RuntimeConfig`] before any work starts.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Default configuration file name, looked up in the target directory.
pub const CONFIG_FILE_NAME: &str = "infratest.toml";

/// Loads infratest configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use infratest::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("infratest.toml"))?;
/// println!("Max parallel: {}", config.run.max_parallel);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads infratest configuration from a TOML string.
///
/// # Example
///
/// ```
/// use infratest::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [run]
///     max_parallel = 2
/// "#)?;
///
/// assert_eq!(config.run.max_parallel, 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads `path` if given, otherwise `infratest.toml` in `dir` if present,
/// otherwise the defaults.
pub fn load_config_or_default(path: Option<&Path>, dir: &Path) -> Result<Config> {
    if let Some(path) = path {
        return load_config(path);
    }

    let candidate = dir.join(CONFIG_FILE_NAME);
    if candidate.is_file() {
        tracing::debug!("Using configuration from {}", candidate.display());
        load_config(&candidate)
    } else {
        Ok(Config::default())
    }
}
