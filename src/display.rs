//! Virtual display provisioning for headful browsers in headless CI.
//!
//! Browsers launched by concurrent workers each need their own X display.
//! The [`DisplayProvisioner`] starts one display server per stream before
//! any work begins and hands back a [`DisplayGuard`] that owns them. The
//! guard is the single place displays are torn down: explicitly through
//! [`DisplayGuard::shutdown`], or implicitly when it is dropped because the
//! run returned early, failed, or was cancelled by a signal.
//!
//! Which running task uses which display is tracked separately by the
//! [`DisplayPool`].
//!
//! # Example
//!
//! ```no_run
//! use fanout::config::DisplayConfig;
//! use fanout::display::DisplayProvisioner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DisplayConfig { enabled: true, ..Default::default() };
//!     let mut guard = DisplayProvisioner::new(config).start(3).await?;
//!     println!("displays: {:?}", guard.numbers());
//!     // ... run workers ...
//!     guard.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod pool;

pub use pool::DisplayPool;

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::DisplayConfig;

/// Errors that abort the run before any spec is discovered.
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    /// The display server binary could not be started.
    #[error("Failed to start display :{display} with {command}: {source}")]
    SpawnFailed {
        display: u32,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A display server exited during the settle period.
    #[error("Display :{display} exited during start-up ({status})")]
    ExitedEarly { display: u32, status: String },

    /// The requested range of display numbers overflows.
    #[error("Display numbers starting at {base} cannot fit {count} displays")]
    OutOfRange { base: u32, count: usize },
}

/// Starts display servers according to [`DisplayConfig`].
pub struct DisplayProvisioner {
    config: DisplayConfig,
}

impl DisplayProvisioner {
    pub fn new(config: DisplayConfig) -> Self {
        Self { config }
    }

    /// First display number.
    pub fn base(&self) -> u32 {
        self.config.base
    }

    /// Renders the server arguments for display `number`.
    ///
    /// # Example
    ///
    /// ```
    /// use fanout::config::DisplayConfig;
    /// use fanout::display::DisplayProvisioner;
    ///
    /// let provisioner = DisplayProvisioner::new(DisplayConfig::default());
    /// assert_eq!(
    ///     provisioner.server_args(101),
    ///     vec![":101", "-screen", "0", "1600x1200x24", "-nolisten", "tcp"]
    /// );
    /// ```
    pub fn server_args(&self, number: u32) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{display}", &number.to_string())
                    .replace("{screen}", &self.config.screen)
            })
            .collect()
    }

    /// Starts `count` display servers numbered from the configured base.
    ///
    /// Resolves after the settle delay once every server is confirmed
    /// running. When provisioning is disabled this returns an empty guard
    /// immediately.
    ///
    /// # Errors
    ///
    /// Fails if any server cannot be spawned or exits during the settle
    /// delay. Servers that did start are torn down before returning.
    pub async fn start(&self, count: usize) -> Result<DisplayGuard, DisplayError> {
        let mut guard = DisplayGuard::empty();
        if !self.config.enabled {
            debug!("Display provisioning disabled");
            return Ok(guard);
        }

        let numbers = display_range(self.config.base, count)?;
        info!(
            "Starting {} display server(s) on :{}..:{}",
            numbers.len(),
            self.config.base,
            numbers.last().copied().unwrap_or(self.config.base)
        );

        for number in numbers {
            match self.spawn_server(number) {
                Ok(child) => guard.servers.push(DisplayServer { number, child }),
                Err(source) => {
                    guard.shutdown().await;
                    return Err(DisplayError::SpawnFailed {
                        display: number,
                        command: self.config.command.clone(),
                        source,
                    });
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;

        let mut early_exit = None;
        for server in &mut guard.servers {
            if let Ok(Some(status)) = server.child.try_wait() {
                early_exit = Some(DisplayError::ExitedEarly {
                    display: server.number,
                    status: status.to_string(),
                });
                break;
            }
        }
        if let Some(err) = early_exit {
            guard.shutdown().await;
            return Err(err);
        }

        info!("Display servers ready: {:?}", guard.numbers());
        Ok(guard)
    }

    fn spawn_server(&self, number: u32) -> std::io::Result<Child> {
        let args = self.server_args(number);
        debug!("Spawning {} {}", self.config.command, args.join(" "));

        Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

fn display_range(base: u32, count: usize) -> Result<Vec<u32>, DisplayError> {
    (0..count)
        .map(|offset| {
            u32::try_from(offset)
                .ok()
                .and_then(|o| base.checked_add(o))
                .ok_or(DisplayError::OutOfRange { base, count })
        })
        .collect()
}

struct DisplayServer {
    number: u32,
    child: Child,
}

/// Owns the running display servers.
///
/// Teardown is idempotent: [`shutdown`](Self::shutdown) drains the server
/// list, so later calls and the final drop have nothing left to do.
pub struct DisplayGuard {
    servers: Vec<DisplayServer>,
}

impl DisplayGuard {
    /// A guard holding no servers (provisioning disabled).
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
        }
    }

    /// Display numbers of the servers still owned by this guard.
    pub fn numbers(&self) -> Vec<u32> {
        self.servers.iter().map(|s| s.number).collect()
    }

    /// Returns `true` if at least one server is owned.
    pub fn is_active(&self) -> bool {
        !self.servers.is_empty()
    }

    /// Kills and reaps every server. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        for mut server in self.servers.drain(..) {
            match server.child.kill().await {
                Ok(()) => debug!("Stopped display :{}", server.number),
                Err(e) => warn!("Failed to stop display :{}: {}", server.number, e),
            }
        }
    }
}

impl Drop for DisplayGuard {
    fn drop(&mut self) {
        for server in &mut self.servers {
            debug!("Stopping display :{} on drop", server.number);
            if let Err(e) = server.child.start_kill() {
                warn!("Failed to stop display :{}: {}", server.number, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str]) -> DisplayConfig {
        DisplayConfig {
            enabled: true,
            command: command.to_string(),
            base: 99,
            args: args.iter().map(|a| a.to_string()).collect(),
            settle_ms: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_server_args_substitution() {
        let provisioner = DisplayProvisioner::new(DisplayConfig {
            screen: "800x600x16".to_string(),
            args: vec![":{display}".into(), "-screen".into(), "0".into(), "{screen}".into()],
            ..Default::default()
        });
        assert_eq!(
            provisioner.server_args(7),
            vec![":7", "-screen", "0", "800x600x16"]
        );
    }

    #[test]
    fn test_display_range() {
        assert_eq!(display_range(99, 3).unwrap(), vec![99, 100, 101]);
        assert!(display_range(99, 0).unwrap().is_empty());
        assert!(matches!(
            display_range(u32::MAX, 2),
            Err(DisplayError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let provisioner = DisplayProvisioner::new(DisplayConfig::default());
        let guard = tokio_test::assert_ok!(provisioner.start(4).await);
        assert!(!guard.is_active());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let provisioner = DisplayProvisioner::new(config("sleep", &["30"]));
        let mut guard = tokio_test::assert_ok!(provisioner.start(2).await);
        assert_eq!(guard.numbers(), vec![99, 100]);

        guard.shutdown().await;
        assert!(!guard.is_active());

        // Second teardown has nothing left to do.
        guard.shutdown().await;
        assert!(guard.numbers().is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_fatal() {
        let provisioner = DisplayProvisioner::new(config("/nonexistent/Xvfb", &[":{display}"]));
        let err = provisioner.start(2).await.err().unwrap();
        assert!(matches!(err, DisplayError::SpawnFailed { display: 99, .. }));
    }

    #[tokio::test]
    async fn test_early_exit_is_fatal() {
        let provisioner = DisplayProvisioner::new(config("false", &[]));
        let err = provisioner.start(1).await.err().unwrap();
        assert!(matches!(err, DisplayError::ExitedEarly { display: 99, .. }));
    }
}
