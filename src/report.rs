//! Run reporting and result aggregation.
//!
//! Reporters receive events as a run progresses and render them. Several
//! reporters can be combined with [`MultiReporter`]:
//!
//! | Reporter | Output |
//! |----------|--------|
//! | [`ConsoleReporter`] | Bordered terminal sections, progress bar, summary |
//! | [`JUnitReporter`] | JUnit XML file with one test case per task |
//! | [`NullReporter`] | Nothing |
//!
//! Results handed to [`Reporter::on_run_complete`] are always in submission
//! order, whatever order the workers finished in.

pub mod console;
pub mod junit;

pub use console::ConsoleReporter;
pub use junit::JUnitReporter;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::discovery::DiscoveryPlan;
use crate::orchestrator::ExecutionTask;
use crate::worker::{ExecutionResult, TaskOutcome};

/// Static facts about a run, known before discovery.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub workspace_root: PathBuf,
    pub streams: usize,
    pub browser: String,
    pub buffered: bool,
    /// Provisioned display numbers; empty when displays are not managed.
    pub displays: Vec<u32>,
}

/// Aggregate statistics for the parallel phase.
///
/// # Example
///
/// ```
/// use fanout::report::RunSummary;
/// use std::time::Duration;
///
/// let summary = RunSummary {
///     total_tasks: 3,
///     failed: 1,
///     timed_out: 0,
///     duration: Duration::from_secs(42),
/// };
/// assert_eq!(summary.exit_code(), 1);
/// assert_eq!(format!("{:.1}", summary.success_rate()), "66.7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub total_tasks: usize,
    /// Tasks with a non-zero exit code, timeouts included.
    pub failed: usize,
    pub timed_out: usize,
    /// Wall clock from the first admission to the last settlement.
    pub duration: Duration,
}

impl RunSummary {
    pub fn from_results(results: &[ExecutionResult], duration: Duration) -> Self {
        Self {
            total_tasks: results.len(),
            failed: results.iter().filter(|r| r.exit_code != 0).count(),
            timed_out: results
                .iter()
                .filter(|r| r.outcome == TaskOutcome::TimedOut)
                .count(),
            duration,
        }
    }

    pub fn passed(&self) -> usize {
        self.total_tasks - self.failed
    }

    /// Percentage of tasks that passed; 100 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 100.0;
        }
        self.passed() as f64 / self.total_tasks as f64 * 100.0
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once, before discovery.
    async fn on_run_start(&self, info: &RunInfo);

    /// Called when spec discovery is complete.
    async fn on_discovery_complete(&self, plan: &DiscoveryPlan);

    /// Called when the pre-setup task has finished, whatever its outcome.
    async fn on_pre_setup_complete(&self, result: &ExecutionResult);

    /// Called with the parallel-phase tasks, in submission order.
    async fn on_tasks_planned(&self, tasks: &[ExecutionTask]);

    /// Called when a task is admitted and bound to a display.
    async fn on_task_start(&self, task: &ExecutionTask, display: u32);

    /// Called when a task's worker has settled.
    async fn on_task_complete(&self, result: &ExecutionResult);

    /// Called after the parallel phase with results in submission order.
    async fn on_run_complete(&self, results: &[ExecutionResult], summary: &RunSummary);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_start(&self, _info: &RunInfo) {}
    async fn on_discovery_complete(&self, _plan: &DiscoveryPlan) {}
    async fn on_pre_setup_complete(&self, _result: &ExecutionResult) {}
    async fn on_tasks_planned(&self, _tasks: &[ExecutionTask]) {}
    async fn on_task_start(&self, _task: &ExecutionTask, _display: u32) {}
    async fn on_task_complete(&self, _result: &ExecutionResult) {}
    async fn on_run_complete(&self, _results: &[ExecutionResult], _summary: &RunSummary) {}
}

/// A reporter that forwards every event to several reporters, in order.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_run_start(&self, info: &RunInfo) {
        for reporter in &self.reporters {
            reporter.on_run_start(info).await;
        }
    }

    async fn on_discovery_complete(&self, plan: &DiscoveryPlan) {
        for reporter in &self.reporters {
            reporter.on_discovery_complete(plan).await;
        }
    }

    async fn on_pre_setup_complete(&self, result: &ExecutionResult) {
        for reporter in &self.reporters {
            reporter.on_pre_setup_complete(result).await;
        }
    }

    async fn on_tasks_planned(&self, tasks: &[ExecutionTask]) {
        for reporter in &self.reporters {
            reporter.on_tasks_planned(tasks).await;
        }
    }

    async fn on_task_start(&self, task: &ExecutionTask, display: u32) {
        for reporter in &self.reporters {
            reporter.on_task_start(task, display).await;
        }
    }

    async fn on_task_complete(&self, result: &ExecutionResult) {
        for reporter in &self.reporters {
            reporter.on_task_complete(result).await;
        }
    }

    async fn on_run_complete(&self, results: &[ExecutionResult], summary: &RunSummary) {
        for reporter in &self.reporters {
            reporter.on_run_complete(results, summary).await;
        }
    }
}
