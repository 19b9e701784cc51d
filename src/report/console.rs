//! Terminal reporter.
//!
//! Prints 80-column bordered sections for each stage of a run. In live mode
//! workers share the terminal, so only start and finish lines are printed
//! between their output. In buffered mode a progress bar tracks completed
//! tasks and each worker's captured output is printed after the run, in
//! submission order.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use super::{Reporter, RunInfo, RunSummary};
use crate::discovery::{DiscoveryMode, DiscoveryPlan};
use crate::orchestrator::ExecutionTask;
use crate::worker::{ExecutionResult, TaskOutcome};

const WIDTH: usize = 80;

fn border() -> String {
    "=".repeat(WIDTH)
}

fn section(title: &str) {
    println!("{}", border());
    println!("{}", style(title).bold());
    println!("{}", border());
}

/// Seconds with two decimals, e.g. `12.34s`.
pub fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

/// `:99-:101`, `:99`, or `none` for an empty set.
pub fn format_displays(displays: &[u32]) -> String {
    match (displays.first(), displays.last()) {
        (Some(first), Some(last)) if first == last => format!(":{}", first),
        (Some(first), Some(last)) => format!(":{}-:{}", first, last),
        _ => "none".to_string(),
    }
}

/// One-line description of how a task finished.
pub fn completion_line(result: &ExecutionResult) -> String {
    let duration = format_duration(result.duration);
    match result.outcome {
        TaskOutcome::Passed => {
            format!("[{}] ✓ Completed successfully in {}", result.task, duration)
        }
        TaskOutcome::Failed => format!(
            "[{}] ✗ Failed with exit code {} after {}",
            result.task, result.exit_code, duration
        ),
        TaskOutcome::TimedOut => format!("[{}] ✗ Timed out after {}", result.task, duration),
        TaskOutcome::SpawnError => format!(
            "[{}] ✗ Process error: {}",
            result.task,
            result.output.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Lines of the summary block.
pub fn summary_lines(summary: &RunSummary) -> Vec<String> {
    let mut lines = vec![
        format!("Total Duration: {}", format_duration(summary.duration)),
        format!("Total Tasks: {}", summary.total_tasks),
        format!("Failed Tasks: {}", summary.failed),
    ];
    if summary.timed_out > 0 {
        lines.push(format!("Timed Out Tasks: {}", summary.timed_out));
    }
    lines.push(format!("Success Rate: {:.1}%", summary.success_rate()));
    lines
}

/// Console reporter that shows progress in the terminal.
pub struct ConsoleReporter {
    verbose: bool,
    screenshots_dir: Option<PathBuf>,
    reports_dir: Option<PathBuf>,
    buffered: AtomicBool,
    progress: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            screenshots_dir: None,
            reports_dir: None,
            buffered: AtomicBool::new(false),
            progress: Mutex::new(None),
        }
    }

    /// Artifact locations printed after the summary.
    pub fn with_artifacts(mut self, screenshots_dir: PathBuf, reports_dir: PathBuf) -> Self {
        self.screenshots_dir = Some(screenshots_dir);
        self.reports_dir = Some(reports_dir);
        self
    }

    fn progress(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_buffered(&self) -> bool {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Prints above the progress bar when one is active.
    ///
    /// `suspend` rather than `println` so the line still appears when the
    /// bar is hidden on a non-terminal stdout.
    fn line(&self, text: String) {
        match self.progress().as_ref() {
            Some(pb) => pb.suspend(|| println!("{}", text)),
            None => println!("{}", text),
        }
    }

    fn styled_completion(result: &ExecutionResult) -> String {
        let line = completion_line(result);
        if result.success() {
            style(line).green().to_string()
        } else {
            style(line).red().to_string()
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_run_start(&self, info: &RunInfo) {
        self.buffered.store(info.buffered, Ordering::Relaxed);

        section("Cypress Parallel Test Runner");
        println!("Workspace: {}", info.workspace_root.display());
        println!("Parallel Streams: {}", info.streams);
        println!("Browser: {}", info.browser);
        if !info.displays.is_empty() {
            println!("Displays: {}", format_displays(&info.displays));
        }
        println!(
            "Output: {}",
            if info.buffered { "buffered" } else { "live" }
        );
        println!("{}", border());
        println!();
    }

    async fn on_discovery_complete(&self, plan: &DiscoveryPlan) {
        if !plan.pre_setup.is_empty() {
            println!("Pre-setup: {} file(s)", plan.pre_setup.len());
        }
        for group in &plan.groups {
            println!("{}: found {} file(s)", group.name, group.files.len());
            if self.verbose {
                for file in &group.files {
                    println!("  {}", style(file).dim());
                }
            }
        }
        if plan.mode == DiscoveryMode::Override {
            println!("{}", style("(spec pattern override)").dim());
        }
        println!();
    }

    async fn on_pre_setup_complete(&self, result: &ExecutionResult) {
        println!("{}", Self::styled_completion(result));
        if !result.success() {
            println!(
                "{}",
                style(format!(
                    "Pre-setup failed, skipping parallel execution (exit code {})",
                    result.exit_code
                ))
                .red()
                .bold()
            );
            if let Some(output) = result.output.as_deref().filter(|o| !o.is_empty()) {
                println!("{}", output);
            }
        }
        println!();
    }

    async fn on_tasks_planned(&self, tasks: &[ExecutionTask]) {
        let mut by_domain: BTreeMap<&str, (usize, usize, usize)> = BTreeMap::new();
        for task in tasks {
            let entry = by_domain
                .entry(task.domain.key())
                .or_insert((task.index, 0, 0));
            entry.1 += task.files.len();
            entry.2 += 1;
        }
        let mut rows: Vec<_> = by_domain.into_iter().collect();
        rows.sort_by_key(|(_, (first, _, _))| *first);

        for (domain, (_, files, chunks)) in rows {
            println!("{}: {} file(s) → {} chunk(s)", domain, files, chunks);
        }
        if self.verbose {
            for task in tasks {
                println!("  {} ({} file(s))", task.name, task.files.len());
            }
        }
        println!();
        println!("Total execution tasks: {}", tasks.len());
        println!("{}", border());
        println!();

        if self.is_buffered() && !tasks.is_empty() {
            let pb = ProgressBar::new(tasks.len() as u64);
            if let Ok(template) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tasks")
            {
                pb.set_style(template.progress_chars("#>-"));
            }
            *self.progress() = Some(pb);
        }
    }

    async fn on_task_start(&self, task: &ExecutionTask, display: u32) {
        if self.is_buffered() && !self.verbose {
            return;
        }
        self.line(format!(
            "[{}] Starting execution with {} file(s) on display :{}",
            task.name,
            task.files.len(),
            display
        ));
    }

    async fn on_task_complete(&self, result: &ExecutionResult) {
        if let Some(pb) = self.progress().as_ref() {
            pb.inc(1);
        }
        self.line(Self::styled_completion(result));
    }

    async fn on_run_complete(&self, results: &[ExecutionResult], summary: &RunSummary) {
        if let Some(pb) = self.progress().take() {
            pb.finish_and_clear();
        }

        for result in results {
            if let Some(output) = result.output.as_deref().filter(|o| !o.is_empty()) {
                println!();
                section(&format!("Output: {}", result.task));
                println!("{}", output);
            }
        }

        println!();
        section("Task Results");
        for result in results {
            let status = match result.outcome {
                TaskOutcome::Passed => style(result.outcome.label()).green(),
                TaskOutcome::Failed => style(result.outcome.label()).red(),
                TaskOutcome::TimedOut => style(result.outcome.label()).yellow(),
                TaskOutcome::SpawnError => style(result.outcome.label()).red().bold(),
            };
            println!(
                "{:<9} {:<32} {:>10}  {} file(s), display :{}",
                status,
                result.task,
                format_duration(result.duration),
                result.files.len(),
                result.display
            );
            if self.verbose || !result.success() {
                for file in &result.files {
                    println!("          {}", style(file).dim());
                }
            }
        }

        println!();
        section("Execution Summary");
        for line in summary_lines(summary) {
            println!("{}", line);
        }
        if let Some(dir) = &self.screenshots_dir {
            println!("Screenshots: {}", dir.display());
        }
        if let Some(dir) = &self.reports_dir {
            println!("Reports: {}", dir.display());
        }
        println!("{}", border());

        println!();
        if summary.success() {
            println!("{}", style("All tasks passed!").green().bold());
        } else {
            println!("{}", style("Some tasks failed.").red().bold());
        }
    }
}
