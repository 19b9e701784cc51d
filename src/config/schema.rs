//! Configuration schema definitions for fanout.
//!
//! This module defines all configuration types that can be deserialized from
//! a `fanout.toml` file. Every section is optional: a missing section (or a
//! missing file) yields the built-in defaults, which describe the standard
//! Cypress project layout.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── FanoutConfig           - Core settings (streams, browser, buffering, timeouts)
//! ├── RunnerConfig           - Test-framework CLI invocation
//! ├── DisplayConfig          - Virtual display servers for headless CI
//! ├── DiscoveryConfig        - Spec patterns, pre-setup pattern, domains
//! │   └── DomainConfig       - One named reporting domain
//! └── ReportConfig           - Artifact directories and JUnit output
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for fanout.
///
/// # TOML Structure
///
/// ```toml
/// [fanout]
/// streams = 4
/// browser = "electron"
///
/// [display]
/// base = 99
///
/// [discovery]
/// pre_setup_pattern = "cypress/pre-setup/**/*.spec.js"
///
/// [[discovery.domains]]
/// key = "integrationApi"
/// name = "Integration API Tests"
/// pattern = "cypress/integration/api/**/*.api.spec.js"
///
/// [report]
/// junit = true
/// ```
///
/// # Example
///
/// ```
/// use fanout::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [fanout]
///     streams = 2
/// "#).unwrap();
/// assert_eq!(config.fanout.streams, 2);
/// assert_eq!(config.discovery.domains.len(), 3);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Core scheduling settings.
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// How worker processes are invoked.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Virtual display provisioning.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Which spec files are found and how they are grouped.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Report and artifact locations.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core scheduling settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `workspace_root` | None (current directory) |
/// | `streams` | 3 |
/// | `browser` | `chrome` |
/// | `buffer_output` | false |
/// | `admission_delay_ms` | 1000 |
/// | `task_timeout_secs` | 0 (no timeout) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FanoutConfig {
    /// Base directory that spec patterns are resolved against.
    pub workspace_root: Option<PathBuf>,

    /// Maximum number of worker processes running at once.
    ///
    /// Also the number of chunks each domain is split into and the size of
    /// the display pool.
    #[serde(default = "default_streams")]
    pub streams: usize,

    /// Browser identifier passed to every worker.
    #[serde(default = "default_browser")]
    pub browser: String,

    /// Capture worker output and print it after the run, in submission order.
    ///
    /// When disabled (default) workers inherit the terminal and their output
    /// interleaves live.
    #[serde(default)]
    pub buffer_output: bool,

    /// Minimum gap between two consecutive worker admissions, in milliseconds.
    ///
    /// Staggers browser start-up so workers don't race for shared resources.
    #[serde(default = "default_admission_delay")]
    pub admission_delay_ms: u64,

    /// Per-task timeout in seconds. A worker running longer is killed and
    /// recorded as timed out. 0 disables the timeout.
    #[serde(default)]
    pub task_timeout_secs: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            streams: default_streams(),
            browser: default_browser(),
            buffer_output: false,
            admission_delay_ms: default_admission_delay(),
            task_timeout_secs: 0,
        }
    }
}

fn default_streams() -> usize {
    3
}

fn default_browser() -> String {
    "chrome".to_string()
}

fn default_admission_delay() -> u64 {
    1000
}

/// Test-framework CLI invocation.
///
/// Workers run `{command} run --spec <files> --browser <browser>`, plus the
/// reporter flags when output is buffered.
///
/// # Example
///
/// ```toml
/// [runner]
/// command = "yarn cypress"
/// reporter = "junit"
/// reporter_options = ["mochaFile=results/[hash].xml"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Program and leading arguments, split with shell quoting rules.
    ///
    /// Default: `npx cypress`
    #[serde(default = "default_runner_command")]
    pub command: String,

    /// Environment variable the child reads a spec pattern from.
    ///
    /// Removed from every worker's environment so the child can only run the
    /// files it was given on the command line.
    ///
    /// Default: `SPEC`
    #[serde(default = "default_spec_env_var")]
    pub spec_env_var: String,

    /// Environment variable carrying the display number.
    ///
    /// Default: `DISPLAY`
    #[serde(default = "default_display_env_var")]
    pub display_env_var: String,

    /// Reporter selected for buffered runs.
    ///
    /// Default: `mochawesome`
    #[serde(default = "default_reporter")]
    pub reporter: String,

    /// Extra reporter options for buffered runs. `reportDir` is always added.
    #[serde(default = "default_reporter_options")]
    pub reporter_options: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            spec_env_var: default_spec_env_var(),
            display_env_var: default_display_env_var(),
            reporter: default_reporter(),
            reporter_options: default_reporter_options(),
        }
    }
}

fn default_runner_command() -> String {
    "npx cypress".to_string()
}

fn default_spec_env_var() -> String {
    "SPEC".to_string()
}

fn default_display_env_var() -> String {
    "DISPLAY".to_string()
}

fn default_reporter() -> String {
    "mochawesome".to_string()
}

fn default_reporter_options() -> Vec<String> {
    vec![
        "overwrite=false".to_string(),
        "html=false".to_string(),
        "json=true".to_string(),
    ]
}

/// Virtual display servers for headful browsers in headless CI.
///
/// One server per stream is started, numbered from `base`. Server arguments
/// are a template: `{display}` is replaced with the display number and
/// `{screen}` with the screen geometry.
///
/// # Example
///
/// ```toml
/// [display]
/// enabled = true
/// command = "Xvfb"
/// base = 99
/// screen = "1920x1080x24"
/// args = [":{display}", "-screen", "0", "{screen}", "-ac"]
/// settle_ms = 3000
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Start display servers. Normally driven by the `CI` variable.
    #[serde(default)]
    pub enabled: bool,

    /// Display server executable.
    #[serde(default = "default_display_command")]
    pub command: String,

    /// First display number; servers use `base..base + streams`.
    #[serde(default = "default_display_base")]
    pub base: u32,

    /// Screen geometry substituted for `{screen}`.
    #[serde(default = "default_screen")]
    pub screen: String,

    /// Server argument template.
    ///
    /// Default: `[":{display}", "-screen", "0", "{screen}", "-nolisten", "tcp"]`
    #[serde(default = "default_display_args")]
    pub args: Vec<String>,

    /// Time allowed for servers to initialize, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_display_command(),
            base: default_display_base(),
            screen: default_screen(),
            args: default_display_args(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_display_command() -> String {
    "Xvfb".to_string()
}

fn default_display_base() -> u32 {
    99
}

fn default_screen() -> String {
    "1600x1200x24".to_string()
}

fn default_display_args() -> Vec<String> {
    [":{display}", "-screen", "0", "{screen}", "-nolisten", "tcp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_settle_ms() -> u64 {
    2000
}

/// Spec discovery settings.
///
/// Without a `spec_pattern`, every domain pattern is discovered and chunked
/// on its own. With one, that single pattern replaces the domain patterns and
/// the domains are only used to group results.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Single glob replacing the domain patterns.
    pub spec_pattern: Option<String>,

    /// Specs that must pass before anything else runs.
    ///
    /// Default: `cypress/pre-setup/**/*.spec.js`
    #[serde(default = "default_pre_setup_pattern")]
    pub pre_setup_pattern: Option<String>,

    /// Named domains, in discovery and reporting order.
    #[serde(default = "default_domains")]
    pub domains: Vec<DomainConfig>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            spec_pattern: None,
            pre_setup_pattern: default_pre_setup_pattern(),
            domains: default_domains(),
        }
    }
}

fn default_pre_setup_pattern() -> Option<String> {
    Some("cypress/pre-setup/**/*.spec.js".to_string())
}

fn default_domains() -> Vec<DomainConfig> {
    vec![
        DomainConfig::new(
            "integrationApi",
            "Integration API Tests",
            "cypress/integration/api/**/*.api.spec.js",
        ),
        DomainConfig::new(
            "integrationUi",
            "Integration UI Tests",
            "cypress/integration/ui/**/*.ui.spec.js",
        ),
        DomainConfig::new("e2eUi", "E2E UI Tests", "cypress/e2e/**/*.ui.spec.js"),
    ]
}

/// A named category of spec files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DomainConfig {
    /// Short identifier used in task names (e.g. `integrationApi`).
    pub key: String,

    /// Human-readable label used in reports.
    pub name: String,

    /// Glob relative to the workspace root.
    pub pattern: String,
}

impl DomainConfig {
    pub fn new(key: impl Into<String>, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Report and artifact settings.
///
/// The screenshot and report directories are owned by the test framework;
/// fanout only points at them in its summary and places per-task reporter
/// output under `reports_dir`.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `reports_dir` | `cypress/reports/mochawesome` |
/// | `screenshots_dir` | `cypress/reports/screenshots` |
/// | `junit` | `false` |
/// | `junit_file` | `cypress/reports/fanout-junit.xml` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,

    /// Write a JUnit XML summary with one test case per task.
    #[serde(default)]
    pub junit: bool,

    #[serde(default = "default_junit_file")]
    pub junit_file: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            reports_dir: default_reports_dir(),
            screenshots_dir: default_screenshots_dir(),
            junit: false,
            junit_file: default_junit_file(),
        }
    }
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("cypress/reports/mochawesome")
}

fn default_screenshots_dir() -> PathBuf {
    PathBuf::from("cypress/reports/screenshots")
}

fn default_junit_file() -> PathBuf {
    PathBuf::from("cypress/reports/fanout-junit.xml")
}
