//! fanout CLI - parallel browser-test spec scheduler.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use fanout::config::{self, Config};
use fanout::discovery::{DiscoveryPlan, Discoverer};
use fanout::orchestrator::{ExecutionTask, Orchestrator, Scheduler};
use fanout::report::{ConsoleReporter, JUnitReporter, MultiReporter};
use fanout::worker::{ProcessLauncher, WorkerSpec};

const DEFAULT_CONFIG: &str = "fanout.toml";

#[derive(Parser)]
#[command(name = "fanout")]
#[command(about = "Parallel browser-test spec scheduler", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: fanout.toml, optional]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover, partition and run specs
    Run {
        /// Override the number of parallel streams
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Run only specs matching this glob
        #[arg(short, long)]
        spec: Option<String>,

        /// Browser passed to every worker
        #[arg(short, long)]
        browser: Option<String>,

        /// Capture worker output and print it after the run
        #[arg(long)]
        buffer: bool,

        /// Kill workers running longer than this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,
    },

    /// Show discovered specs and planned tasks without running them
    Collect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate configuration and print the effective settings
    Validate,

    /// Write a starter fanout.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            parallel,
            spec,
            browser,
            buffer,
            timeout,
            junit,
        } => {
            let mut config = load_effective_config(cli.config.as_deref())?;
            if let Some(parallel) = parallel {
                config.fanout.streams = parallel.max(1);
            }
            if let Some(spec) = spec {
                config.discovery.spec_pattern = Some(spec);
            }
            if let Some(browser) = browser {
                config.fanout.browser = browser;
            }
            if buffer {
                config.fanout.buffer_output = true;
            }
            if let Some(timeout) = timeout {
                config.fanout.task_timeout_secs = timeout;
            }

            let code = run_tests(config, junit, cli.verbose).await?;
            std::process::exit(code);
        }
        Commands::Collect { format } => {
            let config = load_effective_config(cli.config.as_deref())?;
            collect_specs(&config, &format)
        }
        Commands::Validate => validate_config(cli.config.as_deref()),
        Commands::Init => init_config(cli.config.as_deref()),
    }
}

/// File (if any), then environment.
fn load_effective_config(path: Option<&Path>) -> Result<Config> {
    let explicit = path.is_some();
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG));

    let mut config = config::load_or_default(path, explicit)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_process_env();

    if path.exists() {
        info!("Loaded configuration from {}", path.display());
    }
    Ok(config)
}

/// Runs to completion or until SIGINT/SIGTERM, returning the exit code.
///
/// On a signal the run future is dropped, which kills in-flight workers
/// and display servers before the process exits.
async fn run_tests(config: Config, junit: Option<PathBuf>, verbose: bool) -> Result<i32> {
    let reporter = create_reporter(&config, junit, verbose);
    let orchestrator = Orchestrator::new(config, ProcessLauncher::new(), reporter)?;

    tokio::select! {
        outcome = orchestrator.run() => Ok(outcome?.exit_code()),
        code = shutdown_signal() => {
            warn!("Received signal, stopping workers and displays");
            Ok(code?)
        }
    }
}

/// Resolves with the conventional exit code for the signal received.
async fn shutdown_signal() -> Result<i32> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => Ok(130),
            _ = term.recv() => Ok(143),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
        Ok(130)
    }
}

fn create_reporter(config: &Config, junit_override: Option<PathBuf>, verbose: bool) -> MultiReporter {
    let root = config.workspace_root();
    let mut multi = MultiReporter::new().with_reporter(
        ConsoleReporter::new(verbose).with_artifacts(
            root.join(&config.report.screenshots_dir),
            root.join(&config.report.reports_dir),
        ),
    );

    let junit_path = junit_override.or_else(|| {
        config
            .report
            .junit
            .then(|| root.join(&config.report.junit_file))
    });
    if let Some(path) = junit_path {
        multi = multi.with_reporter(JUnitReporter::new(path));
    }

    multi
}

#[derive(Serialize)]
struct CollectOutput<'a> {
    workspace_root: PathBuf,
    streams: usize,
    #[serde(flatten)]
    plan: &'a DiscoveryPlan,
    tasks: Vec<ExecutionTask>,
}

fn collect_specs(config: &Config, format: &str) -> Result<()> {
    let root = config.workspace_root();
    let discoverer = Discoverer::new(&root, config.discovery.clone())?;
    let plan = discoverer.plan();
    let scheduler = Scheduler::new(config.streams());
    let mut tasks: Vec<ExecutionTask> = scheduler.pre_setup_task(&plan).into_iter().collect();
    tasks.extend(scheduler.plan_tasks(&plan));

    match format {
        "json" => {
            let output = CollectOutput {
                workspace_root: root,
                streams: scheduler.streams(),
                plan: &plan,
                tasks,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            if !plan.pre_setup.is_empty() {
                println!("Pre-setup ({} file(s)):", plan.pre_setup.len());
                for file in &plan.pre_setup {
                    println!("  {}", file);
                }
            }
            for group in &plan.groups {
                println!("{} ({} file(s)):", group.name, group.files.len());
                for file in &group.files {
                    println!("  {}", file);
                }
            }
            println!();
            println!("Planned {} task(s):", tasks.len());
            for task in &tasks {
                println!("  {} [{}]: {}", task.name, task.domain, task.spec_list());
            }
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let loaded = load_effective_config(path).and_then(|config| {
        WorkerSpec::from_config(&config)?;
        Discoverer::new(config.workspace_root(), config.discovery.clone())?;
        Ok(config)
    });

    match loaded {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Workspace: {}", config.workspace_root().display());
            println!("  Streams: {}", config.streams());
            println!("  Browser: {}", config.fanout.browser);
            println!("  Runner: {}", config.runner.command);
            println!(
                "  Output: {}",
                if config.fanout.buffer_output { "buffered" } else { "live" }
            );
            match config.fanout.task_timeout_secs {
                0 => println!("  Task timeout: none"),
                secs => println!("  Task timeout: {}s", secs),
            }
            println!("  Admission delay: {}ms", config.fanout.admission_delay_ms);
            if config.display.enabled {
                println!(
                    "  Displays: {} from :{}",
                    config.display.command, config.display.base
                );
            } else {
                println!("  Displays: not managed");
            }
            if let Some(pattern) = &config.discovery.spec_pattern {
                println!("  Spec pattern: {}", pattern);
            }
            if let Some(pattern) = &config.discovery.pre_setup_pattern {
                println!("  Pre-setup: {}", pattern);
            }
            println!("  Domains:");
            for domain in &config.discovery.domains {
                println!("    {} ({}): {}", domain.key, domain.name, domain.pattern);
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

const STARTER_CONFIG: &str = r#"# fanout configuration file

[fanout]
streams = 3
browser = "chrome"
buffer_output = false
admission_delay_ms = 1000
task_timeout_secs = 0

[runner]
command = "npx cypress"

[display]
# Normally set from the CI environment variable
enabled = false
command = "Xvfb"
base = 99
screen = "1600x1200x24"

[discovery]
pre_setup_pattern = "cypress/pre-setup/**/*.spec.js"

[[discovery.domains]]
key = "integrationApi"
name = "Integration API Tests"
pattern = "cypress/integration/api/**/*.api.spec.js"

[[discovery.domains]]
key = "integrationUi"
name = "Integration UI Tests"
pattern = "cypress/integration/ui/**/*.ui.spec.js"

[[discovery.domains]]
key = "e2eUi"
name = "E2E UI Tests"
pattern = "cypress/e2e/**/*.ui.spec.js"

[report]
reports_dir = "cypress/reports/mochawesome"
screenshots_dir = "cypress/reports/screenshots"
junit = false
junit_file = "cypress/reports/fanout-junit.xml"
"#;

fn init_config(path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG));
    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  fanout run");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_config_parses_to_defaults() {
        let config = config::load_config_str(STARTER_CONFIG).unwrap();
        let defaults = Config::default();
        assert_eq!(config.fanout.streams, defaults.fanout.streams);
        assert_eq!(config.discovery.domains, defaults.discovery.domains);
        assert_eq!(config.display.args, defaults.display.args);
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "fanout", "--verbose", "run", "--parallel", "4", "--spec", "cypress/e2e/**", "--buffer",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                parallel,
                spec,
                buffer,
                ..
            } => {
                assert_eq!(parallel, Some(4));
                assert_eq!(spec.as_deref(), Some("cypress/e2e/**"));
                assert!(buffer);
            }
            _ => panic!("expected run"),
        }
    }
}
