//! Subprocess contract of the provisioning tool.
//!
//! The tool is a black box reached only through its command line, its exit
//! code, its stdout/stderr, and a JSON-lines log file whose path is passed
//! in the environment. Every invocation writes three files:
//!
//! ```text
//! <log_dir>/<suite>/<stamp>-<operation>.stdout.log
//! <log_dir>/<suite>/<stamp>-<operation>.stderr.log
//! <log_dir>/<suite>/<stamp>-<operation>.json.log
//! ```
//!
//! # Environment
//!
//! | Variable | Value |
//! |----------|-------|
//! | `TF_LOG` | `json` |
//! | `TF_LOG_PATH` | structured log file |
//! | `TF_DATA_DIR` | private per-suite working-data directory |
//! | `TF_PLUGIN_CACHE_DIR` | shared dependency cache (when enabled) |
//! | `TF_IN_AUTOMATION` | `1` |

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

/// Environment variable selecting the structured log file.
pub const ENV_LOG_PATH: &str = "TF_LOG_PATH";
/// Environment variable selecting the log format.
pub const ENV_LOG: &str = "TF_LOG";
/// Environment variable selecting the private working-data directory.
pub const ENV_DATA_DIR: &str = "TF_DATA_DIR";
/// Environment variable selecting the shared dependency cache.
pub const ENV_PLUGIN_CACHE_DIR: &str = "TF_PLUGIN_CACHE_DIR";

/// Result type for tool invocations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors that prevent a tool invocation from producing an exit code.
///
/// A command that runs and exits non-zero is NOT an error; it is reported
/// through [`ToolOutput::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The process could not be started.
    #[error("Failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error preparing log files or waiting on the process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The four logical operations of the provisioning tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Download dependencies and prepare the working directory.
    Init {
        /// Ignore the lock file and pick the newest allowed versions.
        upgrade: bool,
    },
    /// Create the described infrastructure.
    Apply,
    /// Print a JSON snapshot of the current state.
    Show,
    /// Tear the infrastructure down.
    Destroy,
}

impl Operation {
    /// Short name used in file names and messages.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Init { .. } => "init",
            Operation::Apply => "apply",
            Operation::Show => "show",
            Operation::Destroy => "destroy",
        }
    }

    /// Command-line arguments for this operation.
    ///
    /// # Example
    ///
    /// ```
    /// use infratest::tool::Operation;
    ///
    /// assert_eq!(
    ///     Operation::Apply.args(),
    ///     vec!["apply", "-input=false", "-no-color", "-auto-approve"]
    /// );
    /// ```
    pub fn args(&self) -> Vec<&'static str> {
        match self {
            Operation::Init { upgrade } => {
                let mut args = vec!["init", "-input=false", "-no-color"];
                if *upgrade {
                    args.push("-upgrade");
                }
                args
            }
            Operation::Apply => vec!["apply", "-input=false", "-no-color", "-auto-approve"],
            Operation::Show => vec!["show", "-json", "-no-color"],
            Operation::Destroy => vec!["destroy", "-input=false", "-no-color", "-auto-approve"],
        }
    }
}

/// Files capturing one invocation's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogPaths {
    /// Captured standard output.
    pub stdout: PathBuf,
    /// Captured standard error.
    pub stderr: PathBuf,
    /// Structured JSON-lines log written by the tool.
    pub structured: PathBuf,
}

impl LogPaths {
    /// Builds the three paths for `label` inside `dir`.
    pub fn new(dir: &Path, stamp: &str, label: &str) -> Self {
        let file = |kind: &str| dir.join(format!("{}-{}.{}.log", stamp, label, kind));
        Self {
            stdout: file("stdout"),
            stderr: file("stderr"),
            structured: file("json"),
        }
    }
}

/// A fully described tool invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// What to run.
    pub operation: Operation,
    /// Directory holding the configuration; the process runs here.
    pub working_dir: PathBuf,
    /// Private working-data directory.
    pub data_dir: PathBuf,
    /// Shared dependency cache, if enabled.
    pub cache_dir: Option<PathBuf>,
    /// Output capture files.
    pub logs: LogPaths,
    /// Kill the process after this long.
    pub timeout: Option<Duration>,
}

/// Outcome of a tool invocation that ran to completion or timed out.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit code, `-1` if killed by a signal or timeout.
    pub exit_code: i32,
    /// Whether the invocation was killed by its timeout.
    pub timed_out: bool,
    /// Wall-clock time of the invocation.
    pub duration: Duration,
}

impl ToolOutput {
    /// Returns `true` if the tool exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Runs provisioning-tool invocations.
///
/// The production implementation is [`TofuCli`]; tests substitute scripts
/// or in-memory fakes.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs `invocation` and waits for it to exit.
    async fn run(&self, invocation: &Invocation) -> ToolResult<ToolOutput>;
}

/// A command to execute, built with a fluent API.
///
/// # Example
///
/// ```
/// use infratest::tool::Command;
///
/// let cmd = Command::new("tofu")
///     .arg("apply")
///     .arg("-auto-approve")
///     .env("TF_LOG", "json");
/// assert_eq!(cmd.to_shell_string(), "tofu apply -auto-approve");
/// ```
#[derive(Debug, Clone)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for command execution.
    pub working_dir: Option<PathBuf>,

    /// Environment variables added to the inherited environment.
    pub env: Vec<(String, String)>,
}

impl Command {
    /// Creates a new command with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Adds a single argument to the command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments to the command.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory for command execution.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable for this command.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Renders the command line with shell quoting, for logging.
    pub fn to_shell_string(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

/// Runs the provisioning tool as a local child process.
///
/// # Example
///
/// ```
/// use infratest::tool::TofuCli;
///
/// let cli = TofuCli::new(&["terraform".to_string()]).unwrap();
/// assert_eq!(cli.program(), "terraform");
/// ```
#[derive(Debug, Clone)]
pub struct TofuCli {
    program: String,
    base_args: Vec<String>,
}

impl TofuCli {
    /// Creates a runner from a split command line (program + leading args).
    ///
    /// Returns `None` for an empty command line.
    pub fn new(command_line: &[String]) -> Option<Self> {
        let (program, rest) = command_line.split_first()?;
        Some(Self {
            program: program.clone(),
            base_args: rest.to_vec(),
        })
    }

    /// The program that is executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Builds the [`Command`] for an invocation.
    pub fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.program)
            .args(self.base_args.iter().cloned())
            .args(invocation.operation.args())
            .working_dir(&invocation.working_dir)
            .env(ENV_LOG, "json")
            .env(
                ENV_LOG_PATH,
                invocation.logs.structured.to_string_lossy().into_owned(),
            )
            .env(
                ENV_DATA_DIR,
                invocation.data_dir.to_string_lossy().into_owned(),
            )
            .env("TF_IN_AUTOMATION", "1");

        if let Some(cache) = &invocation.cache_dir {
            cmd = cmd.env(ENV_PLUGIN_CACHE_DIR, cache.to_string_lossy().into_owned());
        }
        cmd
    }
}

#[async_trait]
impl ToolRunner for TofuCli {
    async fn run(&self, invocation: &Invocation) -> ToolResult<ToolOutput> {
        let start = Instant::now();
        let cmd = self.command(invocation);

        if let Some(parent) = invocation.logs.stdout.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(&invocation.data_dir).await?;

        let stdout = std::fs::File::create(&invocation.logs.stdout)?;
        let stderr = std::fs::File::create(&invocation.logs.stderr)?;

        debug!(
            "Running `{}` in {}",
            cmd.to_shell_string(),
            invocation.working_dir.display()
        );

        let mut process = tokio::process::Command::new(&cmd.program);
        process.args(&cmd.args);
        if let Some(dir) = &cmd.working_dir {
            process.current_dir(dir);
        }
        for (key, value) in &cmd.env {
            process.env(key, value);
        }
        process
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let mut child = process.spawn().map_err(|source| ToolError::SpawnFailed {
            program: cmd.program.clone(),
            source,
        })?;

        let waited = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let output = match waited {
            Some(status) => ToolOutput {
                exit_code: status?.code().unwrap_or(-1),
                timed_out: false,
                duration: start.elapsed(),
            },
            None => {
                warn!(
                    "{} in {} timed out, killing it",
                    invocation.operation.label(),
                    invocation.working_dir.display()
                );
                child.kill().await?;
                append_line(
                    &invocation.logs.stderr,
                    &format!(
                        "infratest: killed after exceeding the {:?} timeout",
                        invocation.timeout.unwrap_or_default()
                    ),
                )
                .await;
                ToolOutput {
                    exit_code: -1,
                    timed_out: true,
                    duration: start.elapsed(),
                }
            }
        };

        debug!(
            "{} exited with {} after {:?}",
            invocation.operation.label(),
            output.exit_code,
            output.duration
        );
        Ok(output)
    }
}

async fn append_line(path: &Path, line: &str) {
    use tokio::io::AsyncWriteExt;

    let file = tokio::fs::OpenOptions::new().append(true).open(path).await;
    if let Ok(mut file) = file {
        let _ = file.write_all(format!("{}\n", line).as_bytes()).await;
    }
}

/// Timestamp shared by every log file of one run.
pub fn run_stamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Returns the last `n` lines of a text file, or nothing if unreadable.
pub fn tail_lines(path: &Path, n: usize) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    lines[lines.len().saturating_sub(n)..]
        .iter()
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn invocation(dir: &Path, operation: Operation, timeout: Option<Duration>) -> Invocation {
        Invocation {
            operation,
            working_dir: dir.to_path_buf(),
            data_dir: dir.join("data"),
            cache_dir: Some(dir.join("cache")),
            logs: LogPaths::new(&dir.join("logs"), "20240101-000000", operation.label()),
            timeout,
        }
    }

    #[test]
    fn test_init_args() {
        assert_eq!(
            Operation::Init { upgrade: false }.args(),
            vec!["init", "-input=false", "-no-color"]
        );
        assert!(Operation::Init { upgrade: true }.args().contains(&"-upgrade"));
        assert_eq!(Operation::Show.args()[..2], ["show", "-json"]);
    }

    #[test]
    fn test_log_paths() {
        let logs = LogPaths::new(Path::new("/logs/vpc"), "stamp", "apply");
        assert_eq!(logs.stdout, PathBuf::from("/logs/vpc/stamp-apply.stdout.log"));
        assert_eq!(logs.structured, PathBuf::from("/logs/vpc/stamp-apply.json.log"));
    }

    #[test]
    fn test_command_environment() {
        let dir = Path::new("/suite");
        let cli = TofuCli::new(&["tofu".to_string(), "-chdir=.".to_string()]).unwrap();
        let cmd = cli.command(&invocation(dir, Operation::Apply, None));

        assert_eq!(cmd.args[0], "-chdir=.");
        assert_eq!(cmd.args[1], "apply");
        assert!(cmd.env.iter().any(|(k, v)| k == ENV_LOG && v == "json"));
        assert!(
            cmd.env
                .iter()
                .any(|(k, v)| k == ENV_PLUGIN_CACHE_DIR && v == "/suite/cache")
        );
    }

    #[test]
    fn test_empty_command_line() {
        assert!(TofuCli::new(&[]).is_none());
    }

    #[test]
    fn test_tail_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "a\nb\nc\n").unwrap();
        assert_eq!(tail_lines(&path, 2), vec!["b", "c"]);
        assert_eq!(tail_lines(&path, 10).len(), 3);
        assert!(tail_lines(&dir.path().join("missing"), 2).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("tool.sh");
        std::fs::write(
            &script,
            "echo \"out $1\"\necho \"err $TF_LOG\" >&2\necho '{}' > \"$TF_LOG_PATH\"\nexit 3\n",
        )
        .unwrap();

        let cli = TofuCli::new(&["sh".to_string(), script.to_string_lossy().into_owned()]).unwrap();
        let inv = invocation(dir.path(), Operation::Destroy, None);
        let output = cli.run(&inv).await.unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert_eq!(std::fs::read_to_string(&inv.logs.stdout).unwrap(), "out destroy\n");
        assert_eq!(std::fs::read_to_string(&inv.logs.stderr).unwrap(), "err json\n");
        assert!(inv.logs.structured.exists());
        assert!(inv.data_dir.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("tool.sh");
        std::fs::write(&script, "sleep 5\n").unwrap();

        let cli = TofuCli::new(&["sh".to_string(), script.to_string_lossy().into_owned()]).unwrap();
        let inv = invocation(dir.path(), Operation::Apply, Some(Duration::from_millis(100)));
        let output = cli.run(&inv).await.unwrap();

        assert!(output.timed_out);
        assert!(!output.success());
        assert!(output.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let dir = TempDir::new().unwrap();
        let cli = TofuCli::new(&["definitely-not-a-real-tool-binary".to_string()]).unwrap();
        let inv = invocation(dir.path(), Operation::Show, None);
        let result = cli.run(&inv).await;
        assert!(matches!(result, Err(ToolError::SpawnFailed { .. })));
    }
}
