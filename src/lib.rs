//! fanout: a parallel scheduler for browser-test specs.
//!
//! fanout discovers Cypress-style spec files, splits them into balanced
//! chunks, and runs each chunk as its own test-runner process bound to its
//! own virtual display, with a fixed number of processes in flight.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Display**: Start virtual display servers and hand out display numbers
//! - **Discovery**: Find spec files and group them by domain
//! - **Orchestrator**: Partition, gate on pre-setup, run with bounded concurrency
//! - **Worker**: Launch one test-runner process per chunk
//! - **Report**: Console output, JUnit XML, summary statistics
//!
//! # Example
//!
//! ```no_run
//! use fanout::config::load_config;
//! use fanout::orchestrator::Orchestrator;
//! use fanout::report::ConsoleReporter;
//! use fanout::worker::ProcessLauncher;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("fanout.toml"))?;
//!     let orchestrator = Orchestrator::new(config, ProcessLauncher::new(), ConsoleReporter::new(false))?;
//!     let outcome = orchestrator.run().await?;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod display;
pub mod orchestrator;
pub mod report;
pub mod worker;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use discovery::{DiscoveryPlan, Discoverer, DomainTag, SpecFile};
pub use orchestrator::{ExecutionTask, Orchestrator, RunOutcome};
pub use report::{Reporter, RunSummary};
pub use worker::{ExecutionResult, Launcher, TaskOutcome};
