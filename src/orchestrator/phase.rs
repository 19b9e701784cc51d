//! Run phases and the pre-setup gate.

use crate::worker::ExecutionResult;

/// Where a run currently stands.
///
/// ```text
/// PreSetup ──(no pre-setup / exit 0)──► Parallel
///    │
///    └──(non-zero exit)──► Aborted { exit_code }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Pre-setup specs are running alone.
    PreSetup,
    /// Chunked tasks are running under the concurrency limit.
    Parallel,
    /// Pre-setup failed; the run ends with its exit code.
    Aborted { exit_code: i32 },
}

impl Phase {
    /// The phase a run starts in.
    pub fn initial(has_pre_setup: bool) -> Phase {
        if has_pre_setup {
            Phase::PreSetup
        } else {
            Phase::Parallel
        }
    }

    /// Decides the next phase from the pre-setup result.
    ///
    /// `None` means there were no pre-setup specs to run.
    ///
    /// # Example
    ///
    /// ```
    /// use fanout::orchestrator::Phase;
    ///
    /// assert_eq!(Phase::after_pre_setup(None), Phase::Parallel);
    /// ```
    pub fn after_pre_setup(result: Option<&ExecutionResult>) -> Phase {
        match result {
            None => Phase::Parallel,
            Some(r) if r.exit_code == 0 => Phase::Parallel,
            Some(r) => Phase::Aborted {
                exit_code: r.exit_code,
            },
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Phase::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DomainTag;
    use crate::worker::TaskOutcome;
    use std::time::Duration;

    fn result(exit_code: i32, outcome: TaskOutcome) -> ExecutionResult {
        ExecutionResult {
            index: 0,
            task: "pre-setup".to_string(),
            domain: DomainTag::Domain("pre-setup".to_string()),
            files: Vec::new(),
            display: 99,
            exit_code,
            outcome,
            duration: Duration::from_secs(1),
            output: None,
        }
    }

    #[test]
    fn test_initial_phase() {
        assert_eq!(Phase::initial(true), Phase::PreSetup);
        assert_eq!(Phase::initial(false), Phase::Parallel);
        assert!(!Phase::initial(true).is_aborted());
    }

    #[test]
    fn test_no_pre_setup_goes_parallel() {
        assert_eq!(Phase::after_pre_setup(None), Phase::Parallel);
    }

    #[test]
    fn test_passing_pre_setup_goes_parallel() {
        let r = result(0, TaskOutcome::Passed);
        assert_eq!(Phase::after_pre_setup(Some(&r)), Phase::Parallel);
    }

    #[test]
    fn test_failing_pre_setup_aborts_with_its_code() {
        let r = result(2, TaskOutcome::Failed);
        let phase = Phase::after_pre_setup(Some(&r));
        assert_eq!(phase, Phase::Aborted { exit_code: 2 });
        assert!(phase.is_aborted());
    }

    #[test]
    fn test_timed_out_pre_setup_aborts() {
        let r = result(124, TaskOutcome::TimedOut);
        assert_eq!(
            Phase::after_pre_setup(Some(&r)),
            Phase::Aborted { exit_code: 124 }
        );
    }
}
