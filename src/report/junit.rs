//! JUnit XML summary of a run.
//!
//! Each task becomes one test case, grouped by domain:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="1" time="42.000">
//!   <testsuite name="fanout" tests="3" failures="1" errors="1" skipped="0" time="42.000" timestamp="2024-05-01T10:00:00+00:00">
//!     <testcase classname="integrationApi" name="integrationApi-stream-1" time="12.000">
//!       <system-out>cypress/integration/api/a.api.spec.js</system-out>
//!     </testcase>
//!     <testcase classname="e2eUi" name="e2eUi-stream-1" time="30.000">
//!       <failure message="exit code 2" type="TestFailure">...</failure>
//!     </testcase>
//!     <testcase classname="e2eUi" name="e2eUi-stream-2" time="30.000">
//!       <error message="timed out" type="Timeout">...</error>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! Failed tasks get a `failure`, timeouts and spawn errors get an `error`.

use std::path::PathBuf;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::{Reporter, RunInfo, RunSummary};
use crate::discovery::DiscoveryPlan;
use crate::orchestrator::ExecutionTask;
use crate::worker::{ExecutionResult, TaskOutcome};

/// Reporter that writes a JUnit XML file when the run completes.
///
/// Parent directories are created automatically.
///
/// # Example
///
/// ```
/// use fanout::report::JUnitReporter;
///
/// let reporter = JUnitReporter::new("cypress/reports/fanout-junit.xml".into())
///     .with_testsuite_name("storefront-e2e");
/// ```
pub struct JUnitReporter {
    output_path: PathBuf,
    testsuite_name: String,
}

impl JUnitReporter {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "fanout".to_string(),
        }
    }

    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    /// Generate JUnit XML content from results.
    fn generate_xml(
        &self,
        results: &[ExecutionResult],
        summary: &RunSummary,
    ) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let tests = results.len();
        let failures = results
            .iter()
            .filter(|r| r.outcome == TaskOutcome::Failed)
            .count();
        let errors = results
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::TimedOut | TaskOutcome::SpawnError))
            .count();
        let time = format!("{:.3}", summary.duration.as_secs_f64());

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.to_string().as_str()));
        testsuites.push_attribute(("failures", failures.to_string().as_str()));
        testsuites.push_attribute(("errors", errors.to_string().as_str()));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", self.testsuite_name.as_str()));
        testsuite.push_attribute(("tests", tests.to_string().as_str()));
        testsuite.push_attribute(("failures", failures.to_string().as_str()));
        testsuite.push_attribute(("errors", errors.to_string().as_str()));
        testsuite.push_attribute(("skipped", "0"));
        testsuite.push_attribute(("time", time.as_str()));
        testsuite.push_attribute(("timestamp", chrono::Utc::now().to_rfc3339().as_str()));
        writer.write_event(Event::Start(testsuite))?;

        for result in results {
            write_testcase(&mut writer, result)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        let xml = String::from_utf8(writer.into_inner())?;
        Ok(xml)
    }
}

fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    result: &ExecutionResult,
) -> anyhow::Result<()> {
    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", result.domain.key()));
    testcase.push_attribute(("name", result.task.as_str()));
    testcase.push_attribute((
        "time",
        format!("{:.3}", result.duration.as_secs_f64()).as_str(),
    ));
    writer.write_event(Event::Start(testcase))?;

    let failure = match result.outcome {
        TaskOutcome::Passed => None,
        TaskOutcome::Failed => Some((
            "failure",
            format!("exit code {}", result.exit_code),
            "TestFailure",
        )),
        TaskOutcome::TimedOut => Some(("error", "timed out".to_string(), "Timeout")),
        TaskOutcome::SpawnError => Some(("error", "worker failed to start".to_string(), "SpawnError")),
    };

    if let Some((tag, message, kind)) = failure {
        let mut element = BytesStart::new(tag);
        element.push_attribute(("message", message.as_str()));
        element.push_attribute(("type", kind));
        writer.write_event(Event::Start(element))?;
        let body = result.output.as_deref().unwrap_or_default();
        if !body.is_empty() {
            writer.write_event(Event::Text(BytesText::new(&strip_invalid_xml(body))))?;
        }
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
    }

    let files = result
        .files
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    writer.write_event(Event::Start(BytesStart::new("system-out")))?;
    writer.write_event(Event::Text(BytesText::new(&strip_invalid_xml(&files))))?;
    writer.write_event(Event::End(BytesEnd::new("system-out")))?;

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Removes characters XML 1.0 cannot represent. quick-xml escapes the rest.
fn strip_invalid_xml(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'))
        .collect()
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_run_start(&self, _info: &RunInfo) {}

    async fn on_discovery_complete(&self, _plan: &DiscoveryPlan) {}

    async fn on_pre_setup_complete(&self, _result: &ExecutionResult) {}

    async fn on_tasks_planned(&self, _tasks: &[ExecutionTask]) {}

    async fn on_task_start(&self, _task: &ExecutionTask, _display: u32) {}

    async fn on_task_complete(&self, _result: &ExecutionResult) {}

    async fn on_run_complete(&self, results: &[ExecutionResult], summary: &RunSummary) {
        match self.generate_xml(results, summary) {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::error!("Failed to create output directory: {}", e);
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("Failed to write JUnit XML: {}", e);
                } else {
                    tracing::info!("JUnit XML written to: {}", self.output_path.display());
                }
            }
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
            }
        }
    }
}
