//! Worker processes that run one chunk of specs each.
//!
//! A worker is a single invocation of the external test-runner CLI bound to
//! one display number. This module splits that into three layers:
//!
//! - [`WorkerCommand`] - what to run (program, args, environment)
//! - [`Launcher`] - how to run it and wait for it
//! - [`Worker`] - turns an [`ExecutionTask`] into an [`ExecutionResult`]
//!
//! ```text
//!   ExecutionTask ──► WorkerSpec::command() ──► WorkerCommand
//!                                                   │
//!                                      Launcher::launch()
//!                                                   │
//!                              Launched { exit, output } / ProviderError
//!                                                   │
//!                                                   ▼
//!                                            ExecutionResult
//! ```
//!
//! [`Worker::execute`] never fails: spawn errors and timeouts become
//! results like any other, so one broken task cannot take down its siblings.
//!
//! # Error Handling
//!
//! Launchers return [`ProviderResult<T>`]. A process that starts and exits
//! non-zero is not an error; only failing to start or to supervise it is.

pub mod process;

pub use process::ProcessLauncher;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::discovery::{DomainTag, SpecFile};
use crate::orchestrator::ExecutionTask;

/// Result type for launcher operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that prevent a worker from running to completion.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The runner command could not be parsed.
    #[error("Invalid runner command '{command}': {reason}")]
    InvalidCommand { command: String, reason: String },

    /// The process could not be started.
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process started but supervising it failed.
    #[error("Failed to wait for worker: {0}")]
    WaitFailed(String),

    /// I/O error while collecting output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A process invocation.
///
/// Built with a fluent API and rendered as a shell string for logs.
///
/// # Example
///
/// ```
/// use fanout::worker::WorkerCommand;
///
/// let cmd = WorkerCommand::new("npx")
///     .args(["cypress", "run"])
///     .arg("--spec")
///     .arg("cypress/e2e/a b.ui.spec.js")
///     .env("DISPLAY", ":99")
///     .env_remove("SPEC")
///     .working_dir("/work");
///
/// assert_eq!(cmd.args.len(), 4);
/// assert_eq!(
///     cmd.to_shell_string(),
///     "npx cypress run --spec 'cypress/e2e/a b.ui.spec.js'"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set for the child, on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Inherited variables removed from the child's environment.
    pub env_remove: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            env_remove: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Value of a variable set on this command, if any.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Program and arguments, shell-escaped. Environment is not included.
    pub fn to_shell_string(&self) -> String {
        let mut parts = vec![shell_escape(&self.program)];
        for arg in &self.args {
            parts.push(shell_escape(arg));
        }
        parts.join(" ")
    }
}

fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ',' | '=' | ':')
        })
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// How a launched process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own. `None` when terminated by a signal.
    Exited(Option<i32>),
    /// Killed after exceeding the timeout.
    TimedOut,
}

/// Outcome of a successful launch.
#[derive(Debug, Clone)]
pub struct Launched {
    pub exit: ProcessExit,
    /// Merged stdout and stderr, when buffering was requested.
    pub output: Option<String>,
}

/// Per-launch settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    /// Capture output instead of inheriting the terminal.
    pub buffered: bool,
    /// Kill the process after this long.
    pub timeout: Option<Duration>,
}

/// Runs a [`WorkerCommand`] to completion.
///
/// The production implementation is [`ProcessLauncher`]. Tests substitute
/// simulated launchers to exercise scheduling without real processes.
///
/// Implementations must not leave the process running if the returned
/// future is dropped.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, cmd: &WorkerCommand, options: LaunchOptions)
    -> ProviderResult<Launched>;
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Passed,
    Failed,
    TimedOut,
    SpawnError,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Passed => "PASSED",
            TaskOutcome::Failed => "FAILED",
            TaskOutcome::TimedOut => "TIMED OUT",
            TaskOutcome::SpawnError => "ERROR",
        }
    }
}

/// Exit code recorded for a task killed by its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// The result of running one task. Produced exactly once per task.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Submission index of the task.
    pub index: usize,
    pub task: String,
    pub domain: DomainTag,
    pub files: Vec<SpecFile>,
    /// Display number the task held while running.
    pub display: u32,
    pub exit_code: i32,
    pub outcome: TaskOutcome,
    pub duration: Duration,
    /// Captured output in buffered mode, or the spawn error text.
    pub output: Option<String>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Static parts of every worker invocation, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub program: String,
    pub base_args: Vec<String>,
    pub browser: String,
    pub working_dir: PathBuf,
    pub buffered: bool,
    pub reporter: String,
    pub reporter_options: Vec<String>,
    pub reports_dir: PathBuf,
    pub spec_env_var: String,
    pub display_env_var: String,
    /// Set `display_env_var` for each worker.
    pub inject_display: bool,
    pub timeout: Option<Duration>,
}

impl WorkerSpec {
    /// Builds the spec from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the runner command is empty or has unbalanced quotes.
    pub fn from_config(config: &Config) -> ProviderResult<Self> {
        let command = &config.runner.command;
        let mut words =
            shell_words::split(command).map_err(|e| ProviderError::InvalidCommand {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        if words.is_empty() {
            return Err(ProviderError::InvalidCommand {
                command: command.clone(),
                reason: "command is empty".to_string(),
            });
        }
        let program = words.remove(0);

        let timeout = match config.fanout.task_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            program,
            base_args: words,
            browser: config.fanout.browser.clone(),
            working_dir: config.workspace_root(),
            buffered: config.fanout.buffer_output,
            reporter: config.runner.reporter.clone(),
            reporter_options: config.runner.reporter_options.clone(),
            reports_dir: config.report.reports_dir.clone(),
            spec_env_var: config.runner.spec_env_var.clone(),
            display_env_var: config.runner.display_env_var.clone(),
            inject_display: config.display.enabled,
            timeout,
        })
    }

    /// The invocation for `task` on display `display`.
    ///
    /// # Example
    ///
    /// ```
    /// use fanout::config::Config;
    /// use fanout::discovery::{DomainTag, SpecFile};
    /// use fanout::orchestrator::ExecutionTask;
    /// use fanout::worker::WorkerSpec;
    ///
    /// let spec = WorkerSpec::from_config(&Config::default())?;
    /// let task = ExecutionTask::new(
    ///     0,
    ///     "e2eUi-stream-1",
    ///     DomainTag::Domain("e2eUi".into()),
    ///     vec![SpecFile::new("cypress/e2e/a.ui.spec.js"), SpecFile::new("cypress/e2e/b.ui.spec.js")],
    /// );
    ///
    /// let cmd = spec.command(&task, 99);
    /// assert_eq!(
    ///     cmd.to_shell_string(),
    ///     "npx cypress run --spec cypress/e2e/a.ui.spec.js,cypress/e2e/b.ui.spec.js --browser chrome"
    /// );
    /// assert_eq!(cmd.env_remove, vec!["SPEC"]);
    /// # Ok::<(), fanout::worker::ProviderError>(())
    /// ```
    pub fn command(&self, task: &ExecutionTask, display: u32) -> WorkerCommand {
        let mut cmd = WorkerCommand::new(&self.program)
            .args(self.base_args.iter().cloned())
            .arg("run")
            .arg("--spec")
            .arg(task.spec_list())
            .arg("--browser")
            .arg(&self.browser)
            .env_remove(&self.spec_env_var)
            .working_dir(&self.working_dir);

        if self.buffered {
            let report_dir = self.reports_dir.join(&task.name);
            let mut options = vec![format!("reportDir={}", report_dir.display())];
            options.extend(self.reporter_options.iter().cloned());
            cmd = cmd
                .arg("--reporter")
                .arg(&self.reporter)
                .arg("--reporter-options")
                .arg(options.join(","));
        }

        if self.inject_display {
            cmd = cmd.env(&self.display_env_var, format!(":{}", display));
        }

        cmd
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            buffered: self.buffered,
            timeout: self.timeout,
        }
    }
}

/// Executes tasks through a [`Launcher`].
pub struct Worker<'a, L> {
    launcher: &'a L,
    spec: &'a WorkerSpec,
}

impl<'a, L: Launcher> Worker<'a, L> {
    pub fn new(launcher: &'a L, spec: &'a WorkerSpec) -> Self {
        Self { launcher, spec }
    }

    /// Runs `task` on display `display` and records how it ended.
    pub async fn execute(&self, task: &ExecutionTask, display: u32) -> ExecutionResult {
        let cmd = self.spec.command(task, display);
        debug!("[{}] {}", task.name, cmd.to_shell_string());

        let start = Instant::now();
        let launched = self.launcher.launch(&cmd, self.spec.launch_options()).await;
        let duration = start.elapsed();

        let (exit_code, outcome, output) = match launched {
            Ok(Launched {
                exit: ProcessExit::Exited(Some(0)),
                output,
            }) => (0, TaskOutcome::Passed, output),
            Ok(Launched {
                exit: ProcessExit::Exited(Some(code)),
                output,
            }) => (code, TaskOutcome::Failed, output),
            Ok(Launched {
                exit: ProcessExit::Exited(None),
                output,
            }) => {
                warn!("[{}] worker terminated by signal", task.name);
                (1, TaskOutcome::Failed, output)
            }
            Ok(Launched {
                exit: ProcessExit::TimedOut,
                output,
            }) => {
                warn!("[{}] worker timed out after {:?}", task.name, duration);
                (TIMEOUT_EXIT_CODE, TaskOutcome::TimedOut, output)
            }
            Err(e) => {
                warn!("[{}] {}", task.name, e);
                (1, TaskOutcome::SpawnError, Some(e.to_string()))
            }
        };

        ExecutionResult {
            index: task.index,
            task: task.name.clone(),
            domain: task.domain.clone(),
            files: task.files.clone(),
            display,
            exit_code,
            outcome,
            duration,
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_str;

    struct FixedLauncher(fn() -> ProviderResult<Launched>);

    #[async_trait]
    impl Launcher for FixedLauncher {
        async fn launch(
            &self,
            _cmd: &WorkerCommand,
            _options: LaunchOptions,
        ) -> ProviderResult<Launched> {
            (self.0)()
        }
    }

    fn task() -> ExecutionTask {
        ExecutionTask::new(
            3,
            "integrationApi-stream-2",
            DomainTag::Domain("integrationApi".to_string()),
            vec![SpecFile::new("cypress/integration/api/a.api.spec.js")],
        )
    }

    fn spec(toml: &str) -> WorkerSpec {
        let mut config = load_config_str(toml).unwrap();
        config.fanout.workspace_root = Some(PathBuf::from("/work"));
        WorkerSpec::from_config(&config).unwrap()
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("simple"), "simple");
        assert_eq!(shell_escape("a,b=c:d"), "a,b=c:d");
        assert_eq!(shell_escape("with space"), "'with space'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_command_live_mode() {
        let cmd = spec("").command(&task(), 100);
        assert_eq!(cmd.program, "npx");
        assert_eq!(
            cmd.args,
            vec![
                "cypress",
                "run",
                "--spec",
                "cypress/integration/api/a.api.spec.js",
                "--browser",
                "chrome",
            ]
        );
        assert_eq!(cmd.env_value("DISPLAY"), None);
        assert_eq!(cmd.env_remove, vec!["SPEC"]);
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/work")));
    }

    #[test]
    fn test_command_injects_display_when_provisioned() {
        let cmd = spec("[display]\nenabled = true").command(&task(), 100);
        assert_eq!(cmd.env_value("DISPLAY"), Some(":100"));
    }

    #[test]
    fn test_command_buffered_adds_reporter() {
        let cmd = spec(
            r#"
            [fanout]
            buffer_output = true
            browser = "electron"
            [runner]
            command = "yarn run cypress"
            reporter_options = ["json=true"]
            "#,
        )
        .command(&task(), 99);

        assert_eq!(cmd.program, "yarn");
        assert_eq!(
            cmd.to_shell_string(),
            "yarn run cypress run --spec cypress/integration/api/a.api.spec.js \
             --browser electron --reporter mochawesome --reporter-options \
             reportDir=cypress/reports/mochawesome/integrationApi-stream-2,json=true"
        );
    }

    #[test]
    fn test_invalid_runner_command() {
        let mut config = Config::default();
        config.runner.command = "npx 'cypress".to_string();
        assert!(matches!(
            WorkerSpec::from_config(&config),
            Err(ProviderError::InvalidCommand { .. })
        ));

        config.runner.command = "   ".to_string();
        assert!(WorkerSpec::from_config(&config).is_err());
    }

    #[test]
    fn test_timeout_option() {
        assert_eq!(spec("").launch_options().timeout, None);
        assert_eq!(
            spec("[fanout]\ntask_timeout_secs = 30").launch_options().timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn test_execute_passed() {
        let launcher = FixedLauncher(|| {
            Ok(Launched {
                exit: ProcessExit::Exited(Some(0)),
                output: Some("ok".to_string()),
            })
        });
        let spec = spec("");
        let result = Worker::new(&launcher, &spec).execute(&task(), 99).await;

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.outcome, TaskOutcome::Passed);
        assert_eq!(result.index, 3);
        assert_eq!(result.display, 99);
        assert_eq!(result.output.as_deref(), Some("ok"));
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_execute_failed_keeps_code() {
        let launcher = FixedLauncher(|| {
            Ok(Launched {
                exit: ProcessExit::Exited(Some(3)),
                output: None,
            })
        });
        let spec = spec("");
        let result = Worker::new(&launcher, &spec).execute(&task(), 99).await;
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.outcome, TaskOutcome::Failed);
    }

    #[tokio::test]
    async fn test_execute_signal_is_code_one() {
        let launcher = FixedLauncher(|| {
            Ok(Launched {
                exit: ProcessExit::Exited(None),
                output: None,
            })
        });
        let spec = spec("");
        let result = Worker::new(&launcher, &spec).execute(&task(), 99).await;
        assert_eq!(result.exit_code, 1);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let launcher = FixedLauncher(|| {
            Ok(Launched {
                exit: ProcessExit::TimedOut,
                output: None,
            })
        });
        let spec = spec("");
        let result = Worker::new(&launcher, &spec).execute(&task(), 99).await;
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.outcome, TaskOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_execute_spawn_error_resolves() {
        let launcher = FixedLauncher(|| {
            Err(ProviderError::SpawnFailed {
                program: "npx".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            })
        });
        let spec = spec("");
        let result = Worker::new(&launcher, &spec).execute(&task(), 99).await;
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.outcome, TaskOutcome::SpawnError);
        assert!(result.output.unwrap().contains("Failed to spawn npx"));
    }
}
