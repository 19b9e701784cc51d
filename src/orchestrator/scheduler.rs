//! Spec partitioning and task planning.
//!
//! This module splits discovered spec files into chunks that run as
//! independent worker processes. Partitioning is round-robin: file `i` lands
//! in bucket `i mod N`, so bucket sizes never differ by more than one and the
//! same input always produces the same chunks.
//!
//! # Naming
//!
//! | Mode | Chunked | Task names |
//! |------|---------|------------|
//! | Domains | per domain | `integrationApi-stream-1`, `integrationApi-stream-2`, ... |
//! | Override | all files together | `stream-1`, `stream-2`, ... |
//!
//! # Example
//!
//! ```
//! use fanout::discovery::SpecFile;
//! use fanout::orchestrator::Scheduler;
//!
//! let scheduler = Scheduler::new(2);
//! let files: Vec<SpecFile> = ["a", "b", "c"].into_iter().map(SpecFile::new).collect();
//!
//! let buckets = scheduler.partition(&files);
//! assert_eq!(buckets.len(), 2);
//! assert_eq!(buckets[0], vec![SpecFile::new("a"), SpecFile::new("c")]);
//! assert_eq!(buckets[1], vec![SpecFile::new("b")]);
//! ```

use serde::Serialize;

use crate::discovery::{DiscoveryMode, DiscoveryPlan, DomainTag, SpecFile};

/// One unit of work: the files a single worker process runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionTask {
    /// Position in submission order, starting at 0.
    pub index: usize,

    /// Unique task name, also used for report directories.
    pub name: String,

    /// Domain the task is grouped under when reporting.
    pub domain: DomainTag,

    /// Spec files, never empty.
    pub files: Vec<SpecFile>,
}

impl ExecutionTask {
    pub fn new(
        index: usize,
        name: impl Into<String>,
        domain: DomainTag,
        files: Vec<SpecFile>,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            domain,
            files,
        }
    }

    /// Comma-joined file list, as passed to the runner's `--spec` flag.
    pub fn spec_list(&self) -> String {
        self.files
            .iter()
            .map(SpecFile::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Name of the task that runs the pre-setup specs.
pub const PRE_SETUP_TASK: &str = "pre-setup";

/// Distributes spec files across parallel streams.
///
/// The scheduler only decides what goes together. How many tasks run at
/// once is enforced separately by the orchestrator.
pub struct Scheduler {
    streams: usize,
}

impl Scheduler {
    /// Creates a scheduler for `streams` parallel streams (minimum 1).
    pub fn new(streams: usize) -> Self {
        Self {
            streams: streams.max(1),
        }
    }

    pub fn streams(&self) -> usize {
        self.streams
    }

    /// Splits files into at most `streams` non-empty buckets, round-robin.
    pub fn partition(&self, files: &[SpecFile]) -> Vec<Vec<SpecFile>> {
        if files.is_empty() {
            return Vec::new();
        }

        let mut buckets: Vec<Vec<SpecFile>> = (0..self.streams).map(|_| Vec::new()).collect();

        for (i, file) in files.iter().enumerate() {
            buckets[i % self.streams].push(file.clone());
        }

        buckets.retain(|b| !b.is_empty());

        buckets
    }

    /// Builds the parallel-phase tasks for a discovery plan.
    ///
    /// Pre-setup files are not part of the result.
    pub fn plan_tasks(&self, plan: &DiscoveryPlan) -> Vec<ExecutionTask> {
        let mut tasks = Vec::new();

        match plan.mode {
            DiscoveryMode::Domains => {
                for group in &plan.groups {
                    for (k, bucket) in self.partition(&group.files).into_iter().enumerate() {
                        tasks.push(ExecutionTask::new(
                            tasks.len(),
                            format!("{}-stream-{}", group.tag.key(), k + 1),
                            group.tag.clone(),
                            bucket,
                        ));
                    }
                }
            }
            DiscoveryMode::Override => {
                let mut tags = Vec::new();
                let mut files = Vec::new();
                for group in &plan.groups {
                    for file in &group.files {
                        tags.push(group.tag.clone());
                        files.push(file.clone());
                    }
                }

                // Bucket `k` starts with file `k`.
                for (k, bucket) in self.partition(&files).into_iter().enumerate() {
                    tasks.push(ExecutionTask::new(
                        k,
                        format!("stream-{}", k + 1),
                        tags[k].clone(),
                        bucket,
                    ));
                }
            }
        }

        tasks
    }

    /// The single task running every pre-setup spec, if there are any.
    pub fn pre_setup_task(&self, plan: &DiscoveryPlan) -> Option<ExecutionTask> {
        if plan.pre_setup.is_empty() {
            return None;
        }
        Some(ExecutionTask::new(
            0,
            PRE_SETUP_TASK,
            DomainTag::Domain(PRE_SETUP_TASK.to_string()),
            plan.pre_setup.clone(),
        ))
    }
}
