//! Run orchestration.
//!
//! This module ties the pieces of a run together: displays, discovery, the
//! pre-setup gate, partitioning, bounded parallel execution and reporting.
//!
//! # Execution Flow
//!
//! ```text
//!   DisplayProvisioner::start ──► DisplayGuard (owned by the run)
//!            │
//!            ▼
//!   Discoverer::plan ──► DiscoveryPlan
//!            │
//!            ▼
//!   pre-setup task ──(exit != 0)──► Aborted { exit_code }
//!            │ exit 0 / none
//!            ▼
//!   Scheduler::plan_tasks ──► Vec<ExecutionTask>
//!            │
//!            ▼
//!   admission loop (≤ streams in flight, DisplayPool claim/release)
//!            │
//!            ▼
//!   results in submission order ──► RunSummary ──► Reporter
//! ```
//!
//! # Concurrency
//!
//! Everything runs on the caller's task. In-flight workers are futures in a
//! [`FuturesUnordered`]; the loop admits tasks while fewer than `streams` are
//! running and otherwise waits for the next one to settle. Display numbers
//! are claimed on admission and released on settlement, so the pool needs
//! no locking.
//!
//! # Example
//!
//! ```no_run
//! use fanout::config::Config;
//! use fanout::orchestrator::Orchestrator;
//! use fanout::report::ConsoleReporter;
//! use fanout::worker::ProcessLauncher;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.apply_process_env();
//!
//!     let orchestrator = Orchestrator::new(config, ProcessLauncher::new(), ConsoleReporter::new(false))?;
//!     let outcome = orchestrator.run().await?;
//!
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

pub mod phase;
pub mod scheduler;

pub use phase::Phase;
pub use scheduler::{ExecutionTask, PRE_SETUP_TASK, Scheduler};

use std::time::Duration;

use anyhow::Context;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::Discoverer;
use crate::display::{DisplayPool, DisplayProvisioner};
use crate::report::{Reporter, RunInfo, RunSummary};
use crate::worker::{ExecutionResult, Launcher, ProviderResult, Worker, WorkerSpec};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `Parallel` for runs that got past pre-setup, `Aborted` otherwise.
    pub phase: Phase,

    pub pre_setup: Option<ExecutionResult>,

    /// Parallel-phase results in submission order.
    pub results: Vec<ExecutionResult>,

    /// Present when the parallel phase ran.
    pub summary: Option<RunSummary>,

    /// Most displays held at once.
    pub peak_displays: usize,

    /// Displays still held when the run ended. Always 0 for a completed run.
    pub leaked_displays: usize,
}

impl RunOutcome {
    /// Process exit code for this run.
    ///
    /// | Situation | Code |
    /// |-----------|------|
    /// | Pre-setup failed | its own exit code |
    /// | Any parallel task failed or timed out | 1 |
    /// | Otherwise (including nothing to run) | 0 |
    pub fn exit_code(&self) -> i32 {
        match self.phase {
            Phase::Aborted { exit_code } => exit_code,
            _ => self.summary.map(|s| s.exit_code()).unwrap_or(0),
        }
    }

    fn empty(phase: Phase, pre_setup: Option<ExecutionResult>, pool: &DisplayPool) -> Self {
        Self {
            phase,
            pre_setup,
            results: Vec::new(),
            summary: None,
            peak_displays: pool.peak(),
            leaked_displays: pool.active(),
        }
    }
}

/// Coordinates a complete run.
///
/// # Type Parameters
///
/// - `L`: how worker processes are launched
/// - `R`: where events are reported
pub struct Orchestrator<L, R> {
    config: Config,
    spec: WorkerSpec,
    launcher: L,
    reporter: R,
}

impl<L, R> Orchestrator<L, R>
where
    L: Launcher,
    R: Reporter,
{
    /// # Errors
    ///
    /// Fails if the configured runner command cannot be parsed.
    pub fn new(config: Config, launcher: L, reporter: R) -> ProviderResult<Self> {
        let spec = WorkerSpec::from_config(&config)?;
        Ok(Self {
            config,
            spec,
            launcher,
            reporter,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Provisions displays, runs everything, and tears the displays down.
    ///
    /// If the returned future is dropped mid-run, in-flight workers and
    /// display servers are killed as their handles drop.
    ///
    /// # Errors
    ///
    /// Fails on display provisioning errors and invalid domain patterns.
    /// Task failures are not errors; they are reflected in the outcome.
    pub async fn run(&self) -> anyhow::Result<RunOutcome> {
        let streams = self.config.streams();
        let provisioner = DisplayProvisioner::new(self.config.display.clone());
        let mut displays = provisioner
            .start(streams)
            .await
            .context("Failed to provision virtual displays")?;

        let outcome = self
            .run_with_displays(provisioner.base(), displays.numbers())
            .await;

        displays.shutdown().await;
        outcome
    }

    async fn run_with_displays(&self, base: u32, displays: Vec<u32>) -> anyhow::Result<RunOutcome> {
        let streams = self.config.streams();
        let root = self.config.workspace_root();

        self.reporter
            .on_run_start(&RunInfo {
                workspace_root: root.clone(),
                streams,
                browser: self.config.fanout.browser.clone(),
                buffered: self.config.fanout.buffer_output,
                displays,
            })
            .await;

        let discoverer = Discoverer::new(&root, self.config.discovery.clone())?;
        let plan = discoverer.plan();
        self.reporter.on_discovery_complete(&plan).await;

        let mut pool = DisplayPool::new(base, streams);
        let scheduler = Scheduler::new(streams);

        if plan.is_empty() {
            warn!("No test files found. Exiting.");
            return Ok(RunOutcome::empty(Phase::Parallel, None, &pool));
        }

        let pre_setup_task = scheduler.pre_setup_task(&plan);
        let mut phase = Phase::initial(pre_setup_task.is_some());
        debug!("Entering {:?} phase", phase);

        let pre_setup = match pre_setup_task {
            Some(task) => {
                info!("Running {} pre-setup spec(s)", task.files.len());
                let result = self.run_pre_setup(&task, &mut pool).await;
                self.reporter.on_pre_setup_complete(&result).await;
                Some(result)
            }
            None => None,
        };

        phase = Phase::after_pre_setup(pre_setup.as_ref());
        if phase.is_aborted() {
            warn!("Pre-setup failed, skipping parallel execution");
            return Ok(RunOutcome::empty(phase, pre_setup, &pool));
        }

        let tasks = scheduler.plan_tasks(&plan);
        info!(
            "Scheduled {} file(s) into {} task(s)",
            plan.total_files(),
            tasks.len()
        );
        self.reporter.on_tasks_planned(&tasks).await;

        let start = Instant::now();
        let results = self.execute_all(&tasks, &mut pool).await;
        let summary = RunSummary::from_results(&results, start.elapsed());

        self.reporter.on_run_complete(&results, &summary).await;

        Ok(RunOutcome {
            phase,
            pre_setup,
            results,
            summary: Some(summary),
            peak_displays: pool.peak(),
            leaked_displays: pool.active(),
        })
    }

    async fn run_pre_setup(&self, task: &ExecutionTask, pool: &mut DisplayPool) -> ExecutionResult {
        let worker = Worker::new(&self.launcher, &self.spec);
        let number = pool.claim(task.index).unwrap_or(self.config.display.base);
        self.reporter.on_task_start(task, number).await;
        let result = worker.execute(task, number).await;
        pool.release(task.index);
        result
    }

    /// Runs `tasks` with at most `streams` in flight.
    ///
    /// Returns one result per task, in submission order.
    async fn execute_all(
        &self,
        tasks: &[ExecutionTask],
        pool: &mut DisplayPool,
    ) -> Vec<ExecutionResult> {
        let worker = Worker::new(&self.launcher, &self.spec);
        let limit = self.config.streams();
        let delay = Duration::from_millis(self.config.fanout.admission_delay_ms);

        let mut slots: Vec<Option<ExecutionResult>> = (0..tasks.len()).map(|_| None).collect();
        let mut pending = tasks.iter().enumerate().peekable();
        let mut in_flight = FuturesUnordered::new();
        let mut last_start: Option<Instant> = None;

        loop {
            while in_flight.len() < limit {
                let Some((_, task)) = pending.peek() else {
                    break;
                };
                let Some(number) = pool.claim(task.index) else {
                    break;
                };
                let Some((position, task)) = pending.next() else {
                    break;
                };

                let now = Instant::now();
                let start_at = match last_start {
                    Some(last) => (last + delay).max(now),
                    None => now,
                };
                last_start = Some(start_at);

                debug!("Admitted {} on display :{}", task.name, number);
                in_flight.push(self.run_task(&worker, position, task, number, start_at));
            }

            let Some((position, result)) = in_flight.next().await else {
                break;
            };

            pool.release(result.index);
            self.reporter.on_task_complete(&result).await;
            slots[position] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }

    async fn run_task(
        &self,
        worker: &Worker<'_, L>,
        position: usize,
        task: &ExecutionTask,
        number: u32,
        start_at: Instant,
    ) -> (usize, ExecutionResult) {
        tokio::time::sleep_until(start_at).await;
        self.reporter.on_task_start(task, number).await;
        (position, worker.execute(task, number).await)
    }
}
