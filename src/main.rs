//! infratest CLI - concurrent lifecycle runner for infrastructure test suites.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use infratest::config::{self, Config, RuntimeConfig};
use infratest::deps::DependencyPreparer;
use infratest::discovery::{Discovery, TestFilter, TestSuite};
use infratest::display::StatusDisplay;
use infratest::executor::LifecycleExecutor;
use infratest::report::{
    ConsoleReporter, EXIT_FATAL, EXIT_INTERRUPTED, JUnitReporter, JsonReporter, MultiReporter,
    Reporter,
};
use infratest::status::StatusTable;
use infratest::tool::TofuCli;

#[derive(Parser)]
#[command(name = "infratest")]
#[command(about = "Concurrent lifecycle runner for infrastructure test suites", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to infratest.toml in the target path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run suites through init, apply, show and destroy
    Run(RunArgs),

    /// Discover and filter suites without running them
    List {
        #[command(flatten)]
        select: SelectArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListFormat {
    Text,
    Json,
}

/// Which suites to consider.
#[derive(Args)]
struct SelectArgs {
    /// Directory to search for suites
    #[arg(default_value = ".")]
    path: PathBuf,

    /// File-name glob marking a suite directory (repeatable)
    #[arg(long = "pattern")]
    patterns: Vec<String>,

    /// Search the whole tree below the path
    #[arg(short, long)]
    recursive: bool,

    /// Maximum recursion depth
    #[arg(long)]
    max_depth: Option<usize>,

    /// Path glob to exclude from discovery (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Path glob filter, `!` prefix excludes (repeatable)
    #[arg(long = "filter-path")]
    paths: Vec<String>,

    /// Tag filter, `!` prefix excludes (repeatable)
    #[arg(short, long = "tag")]
    tags: Vec<String>,

    /// Component type filter, `!` prefix excludes (repeatable)
    #[arg(long = "type")]
    types: Vec<String>,

    /// Regex filter on the relative suite path (repeatable)
    #[arg(long)]
    regex: Vec<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Maximum number of suites running at once
    #[arg(short = 'j', long)]
    parallel: Option<usize>,

    /// Pass the upgrade flag to every init
    #[arg(long)]
    upgrade: bool,

    /// Do not populate or use the shared dependency cache
    #[arg(long)]
    no_cache: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// JUnit XML output path
    #[arg(long)]
    junit: Option<PathBuf>,

    /// Provisioning tool command line (e.g. "terraform")
    #[arg(long)]
    tool: Option<String>,

    /// Per-invocation timeout in seconds, 0 disables it
    #[arg(long)]
    timeout: Option<u64>,

    /// Disable the live status table
    #[arg(long)]
    no_display: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The live table owns stderr, so only warnings get through by default.
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => run_suites(cli.config.as_deref(), args, cli.verbose).await,
        Commands::List { select, format } => list_suites(cli.config.as_deref(), &select, format),
    }
}

/// Loads configuration and applies the selection flags on top of it.
fn load_config(config_path: Option<&Path>, select: &SelectArgs) -> Result<Config> {
    let mut config = config::load_config_or_default(config_path, &select.path)
        .context("Failed to load configuration")?;

    if !select.patterns.is_empty() {
        config.discovery.patterns = select.patterns.clone();
    }
    if select.recursive {
        config.discovery.recursive = true;
    }
    if select.max_depth.is_some() {
        config.discovery.max_depth = select.max_depth;
    }
    config.discovery.exclude.extend(select.exclude.iter().cloned());

    config.filter.paths.extend(select.paths.iter().cloned());
    config.filter.tags.extend(select.tags.iter().cloned());
    config.filter.types.extend(select.types.iter().cloned());
    config.filter.regex.extend(select.regex.iter().cloned());

    Ok(config)
}

fn select_suites(config: &Config, base: &Path) -> Result<Vec<TestSuite>> {
    let discovered = Discovery::new(&config.discovery)?
        .discover(base)
        .with_context(|| format!("Failed to discover suites in {}", base.display()))?;
    let found = discovered.len();
    let suites = TestFilter::new(&config.filter)?.filter(discovered);
    info!("Selected {} of {} discovered suites", suites.len(), found);
    Ok(suites)
}

fn list_suites(config_path: Option<&Path>, select: &SelectArgs, format: ListFormat) -> Result<()> {
    let config = load_config(config_path, select)?;
    let suites = select_suites(&config, &select.path)?;

    match format {
        ListFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&suites)?);
        }
        ListFormat::Text => {
            println!("Discovered {} suites:", suites.len());
            for suite in &suites {
                let join = |set: &std::collections::BTreeSet<String>| {
                    set.iter().cloned().collect::<Vec<_>>().join(", ")
                };
                println!(
                    "  {} [type: {}] [tags: {}]",
                    suite.name,
                    join(&suite.types),
                    join(&suite.tags)
                );
            }
        }
    }
    Ok(())
}

async fn run_suites(config_path: Option<&Path>, args: RunArgs, verbose: bool) -> Result<()> {
    let mut config = load_config(config_path, &args.select)?;

    // Apply overrides
    if let Some(parallel) = args.parallel {
        config.run.max_parallel = parallel;
    }
    if args.upgrade {
        config.run.force_upgrade = true;
    }
    if args.no_cache {
        config.run.use_cache = false;
    }
    if let Some(tool) = &args.tool {
        config.run.tool = tool.clone();
    }
    if let Some(timeout) = args.timeout {
        config.run.phase_timeout_secs = timeout;
    }
    if let Some(junit) = &args.junit {
        config.report.junit = true;
        config.report.junit_file = junit.clone();
    }

    let base = args.select.path.clone();
    let runtime = RuntimeConfig::from_config(&config, &base)?;
    let tool = TofuCli::new(&runtime.tool).context("Tool command must not be empty")?;
    debug!("Using provisioning tool: {}", tool.program());

    let suites = select_suites(&config, &base)?;

    let interactive = !args.no_display && !args.json && console::Term::stderr().is_term();
    let reporter = create_reporter(&config, args.json, interactive, verbose);
    reporter.on_discovery_complete(&suites).await;

    let table = Arc::new(StatusTable::new());
    for suite in &suites {
        table.insert(&suite.name);
    }
    let display = StatusDisplay::new(
        table.clone(),
        Duration::from_millis(config.display.refresh_ms),
        interactive,
    )
    .spawn();

    let preparer = DependencyPreparer::new(&runtime, &tool, &table);
    let preparation = tokio::select! {
        prepared = preparer.prepare(&suites) => prepared,
        _ = tokio::signal::ctrl_c() => {
            display.stop().await;
            eprintln!("Interrupted");
            std::process::exit(EXIT_INTERRUPTED);
        }
    };
    let preparation = match preparation {
        Ok(preparation) => preparation,
        Err(e) => {
            display.stop().await;
            eprintln!("{} {}", console::style("Fatal:").red().bold(), e);
            std::process::exit(EXIT_FATAL);
        }
    };

    let mut executor = LifecycleExecutor::new(runtime, tool, reporter, table);
    executor.mark_ready(preparation);

    let summary = tokio::select! {
        summary = executor.run(&suites) => summary?,
        _ = tokio::signal::ctrl_c() => {
            display.stop().await;
            eprintln!("Interrupted");
            std::process::exit(EXIT_INTERRUPTED);
        }
    };

    display.stop().await;
    executor.reporter().on_run_complete(&summary).await;
    std::process::exit(summary.exit_code());
}

fn create_reporter(config: &Config, json: bool, live: bool, verbose: bool) -> MultiReporter {
    let mut reporter = MultiReporter::new();

    if json {
        reporter = reporter.with_reporter(JsonReporter::new(true));
    } else {
        let console = ConsoleReporter::new(verbose);
        reporter = reporter.with_reporter(if live {
            console
        } else {
            console.without_live_display()
        });
    }

    if config.report.junit {
        reporter = reporter.with_reporter(JUnitReporter::new(config.report.junit_file.clone()));
    }

    reporter
}
