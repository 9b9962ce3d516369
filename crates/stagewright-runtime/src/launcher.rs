use std::fmt;
use std::io::IsTerminal;
use std::process::Stdio;

use crate::signals;

/// Abstraction over the processes the entrypoint starts, for testability.
///
/// Production code uses [`SystemLauncher`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait Launcher: Send + Sync {
    /// Interactive iff both stdin and stdout are terminals.
    fn is_interactive(&self) -> bool;

    /// Run a wrapper script with bash, inheriting stdio. Returns its exit code.
    async fn run_script(&self, script: &str) -> Result<i32, LaunchError>;

    /// Start the SSH daemon. sshd detaches on its own; this returns once the
    /// daemon has forked.
    async fn spawn_sshd(&self) -> Result<(), LaunchError>;

    /// Block until a termination signal arrives.
    async fn wait_for_termination(&self) -> Result<Signal, LaunchError>;
}

/// Signals that end the foreground wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Interrupt,
    Hangup,
    Quit,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Terminate => "SIGTERM",
            Self::Interrupt => "SIGINT",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
        })
    }
}

const SSHD: &str = "/usr/sbin/sshd";

/// Real process launcher.
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
    }

    async fn run_script(&self, script: &str) -> Result<i32, LaunchError> {
        let status = tokio::process::Command::new("bash")
            .arg(script)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| LaunchError::Spawn {
                program: format!("bash {script}"),
                source: e,
            })?;
        // Killed by a signal: report it the way a shell would.
        Ok(status.code().unwrap_or(128))
    }

    async fn spawn_sshd(&self) -> Result<(), LaunchError> {
        let status = tokio::process::Command::new(SSHD)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| LaunchError::Spawn {
                program: SSHD.to_owned(),
                source: e,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(LaunchError::Failed {
                program: SSHD.to_owned(),
                status: status.to_string(),
            })
        }
    }

    async fn wait_for_termination(&self) -> Result<Signal, LaunchError> {
        signals::wait_for_termination()
            .await
            .map_err(|e| LaunchError::Signal { source: e })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to start {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },

    #[error("failed to install signal handlers")]
    Signal { source: std::io::Error },
}
