//! Local child-process launcher.
//!
//! Runs each [`WorkerCommand`] as a direct child of fanout, without a shell.
//!
//! | Mode | stdout / stderr | Returned output |
//! |------|-----------------|-----------------|
//! | Live | inherited from the terminal | `None` |
//! | Buffered | piped, lines merged as they arrive | `Some(text)` |
//!
//! On unix every worker leads its own process group, so the browser and
//! any other grandchildren are signalled together with the runner. A timed
//! out worker gets SIGTERM, then SIGKILL once the grace period passes.
//! Dropping an in-flight launch (for example when the run is cancelled by a
//! signal) kills the whole group, and so does a normal exit, so nothing the
//! worker started outlives its display lease.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};

use super::{
    LaunchOptions, Launched, Launcher, ProcessExit, ProviderError, ProviderResult, WorkerCommand,
};

/// Time a timed out worker gets between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Launcher backed by `tokio::process`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLauncher {
    grace: Duration,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Sets the delay between SIGTERM and SIGKILL on timeout.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(
        &self,
        cmd: &WorkerCommand,
        options: LaunchOptions,
    ) -> ProviderResult<Launched> {
        let mut process = tokio::process::Command::new(&cmd.program);
        process.args(&cmd.args);

        for key in &cmd.env_remove {
            process.env_remove(key);
        }
        for (key, value) in &cmd.env {
            process.env(key, value);
        }
        if let Some(dir) = &cmd.working_dir {
            process.current_dir(dir);
        }

        // A worker outside the terminal's foreground group must not read it.
        process.stdin(Stdio::null());
        if options.buffered {
            process.stdout(Stdio::piped());
            process.stderr(Stdio::piped());
        } else {
            process.stdout(Stdio::inherit());
            process.stderr(Stdio::inherit());
        }
        #[cfg(unix)]
        process.process_group(0);
        process.kill_on_drop(true);

        let mut child = process
            .spawn()
            .map_err(|source| ProviderError::SpawnFailed {
                program: cmd.program.clone(),
                source,
            })?;
        let mut group = ProcessGroup::of(&child);

        let mut lines = Vec::new();
        let run = supervise(&mut child, &mut lines, options.buffered);

        let status = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(status) => Some(status?),
                Err(_) => None,
            },
            None => Some(run.await?),
        };

        let exit = match status {
            Some(status) => ProcessExit::Exited(status.code()),
            None => {
                debug!("Terminating {} after timeout", cmd.program);
                group.terminate(&mut child, self.grace).await;
                ProcessExit::TimedOut
            }
        };
        group.kill();

        let output = options.buffered.then(|| lines.join("\n"));

        Ok(Launched { exit, output })
    }
}

/// The process group led by one worker.
///
/// Killed with SIGKILL when dropped, unless already killed.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    /// Asks the group to stop, escalating to SIGKILL after `grace`.
    async fn terminate(&mut self, child: &mut Child, grace: Duration) {
        let Some(leader) = self.leader else {
            return;
        };
        if !signal_group(leader, GroupSignal::Terminate) {
            // No group to signal; stop the direct child at least.
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill timed out worker: {}", e);
            }
        }
        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            debug!("Worker ignored SIGTERM for {:?}", grace);
        }
        self.kill();
        if let Err(e) = child.kill().await {
            debug!("Worker already gone: {}", e);
        }
    }

    /// Kills every process left in the group.
    fn kill(&mut self) {
        if let Some(leader) = self.leader.take() {
            signal_group(leader, GroupSignal::Kill);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// Signals the group led by `leader`. Returns `false` when nothing could be
/// signalled.
#[cfg(unix)]
fn signal_group(leader: u32, signal: GroupSignal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(leader) else {
        return false;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!("Failed to send {} to worker group {}: {}", signal, raw, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_leader: u32, _signal: GroupSignal) -> bool {
    false
}

/// Drains the child's output (when piped) and waits for it to exit.
async fn supervise(
    child: &mut Child,
    lines: &mut Vec<String>,
    buffered: bool,
) -> ProviderResult<std::process::ExitStatus> {
    if buffered {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::WaitFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProviderError::WaitFailed("stderr not captured".to_string()))?;

        let stdout_stream = LinesStream::new(BufReader::new(stdout).lines());
        let stderr_stream = LinesStream::new(BufReader::new(stderr).lines());

        // Merge stdout and stderr in arrival order
        let mut combined = stream::select(stdout_stream, stderr_stream);
        while let Some(line) = combined.next().await {
            match line {
                Ok(line) => lines.push(line),
                Err(e) => {
                    debug!("Stopped reading worker output: {}", e);
                    break;
                }
            }
        }
    }

    child
        .wait()
        .await
        .map_err(|e| ProviderError::WaitFailed(e.to_string()))
}
