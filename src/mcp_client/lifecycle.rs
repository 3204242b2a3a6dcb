//! Server process lifecycle management.
//!
//! Spawns an MCP server as a child process with piped stdin/stdout, and
//! shuts it down again by escalating: close stdin, then SIGTERM, then SIGKILL.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::errors::McpError;
use super::types::ServerParameters;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long each shutdown step waits for the process to exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Host variables passed to a server when no explicit environment is given.
#[cfg(unix)]
const DEFAULT_INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const DEFAULT_INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// Allow-listed subset of the host environment.
///
/// Values that look like exported shell functions (`() {...`) are skipped.
pub fn default_environment() -> HashMap<String, String> {
    DEFAULT_INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| {
            let value = std::env::var(key).ok()?;
            if value.starts_with("()") {
                return None;
            }
            Some((key.to_string(), value))
        })
        .collect()
}

// ─── ServerProcess ───────────────────────────────────────────────────────────

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The process had already exited; nothing was sent.
    AlreadyExited,
    /// Exited on its own after stdin was closed.
    ExitedAfterStdinClose,
    /// Exited after SIGTERM.
    ExitedAfterTerm,
    /// Had to be killed.
    Killed,
}

/// A running MCP server process.
pub struct ServerProcess {
    /// Human-readable server name (e.g., "sqlite").
    pub name: String,
    process: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl ServerProcess {
    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Hand the pipes to the transport. Returns `None` if already taken.
    pub fn take_stdio(&mut self) -> Option<(ChildStdin, ChildStdout)> {
        match (self.stdin.take(), self.stdout.take()) {
            (Some(stdin), Some(stdout)) => Some((stdin, stdout)),
            (stdin, stdout) => {
                self.stdin = stdin;
                self.stdout = stdout;
                None
            }
        }
    }

    /// Check if the server process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(Some(_)))
    }

    /// SIGTERM the process and wait for it; kill it if that does not work.
    ///
    /// No-op on a process that has already exited.
    pub async fn terminate(&mut self) {
        if self.has_exited() {
            return;
        }

        match send_term(&mut self.process) {
            Ok(()) => match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.process.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(server = %self.name, %status, "server terminated");
                    return;
                }
                Ok(Err(e)) => {
                    tracing::error!(server = %self.name, error = %e, "error waiting for terminated server");
                }
                Err(_) => {
                    tracing::warn!(server = %self.name, "server ignored termination request");
                }
            },
            Err(e) => {
                tracing::error!(server = %self.name, error = %e, "error terminating server");
            }
        }

        tracing::warn!(server = %self.name, "forcefully killing the server");
        self.force_kill().await;
    }

    /// Shut the server down, escalating from closing stdin to SIGTERM to
    /// SIGKILL, each step waiting up to `timeout`. Any error along the way
    /// jumps straight to the kill.
    pub async fn shutdown(&mut self, timeout: Duration) -> ShutdownOutcome {
        if self.has_exited() {
            tracing::info!(server = %self.name, "server already exited");
            return ShutdownOutcome::AlreadyExited;
        }

        tracing::info!(server = %self.name, "initiating stdio server shutdown");
        let outcome = match self.escalate(timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(server = %self.name, error = %e, "unexpected error during shutdown, killing");
                self.force_kill().await;
                ShutdownOutcome::Killed
            }
        };
        tracing::info!(server = %self.name, ?outcome, "stdio server shutdown complete");
        outcome
    }

    async fn escalate(&mut self, timeout: Duration) -> io::Result<ShutdownOutcome> {
        // Dropping the handle closes the pipe. If the transport owns stdin,
        // it has already closed it by the time we get here.
        drop(self.stdin.take());
        tracing::info!(server = %self.name, state = "stdin_closed", "closed stdin");

        if let Ok(status) = tokio::time::timeout(timeout, self.process.wait()).await {
            let status = status?;
            tracing::info!(server = %self.name, %status, state = "exited", "server exited normally");
            return Ok(ShutdownOutcome::ExitedAfterStdinClose);
        }

        tracing::warn!(
            server = %self.name,
            ?timeout,
            state = "term_sent",
            "server did not exit after stdin close, sending SIGTERM"
        );
        send_term(&mut self.process)?;

        if let Ok(status) = tokio::time::timeout(timeout, self.process.wait()).await {
            let status = status?;
            tracing::info!(server = %self.name, %status, state = "exited", "server exited after SIGTERM");
            return Ok(ShutdownOutcome::ExitedAfterTerm);
        }

        tracing::warn!(server = %self.name, state = "kill_sent", "server did not respond to SIGTERM, sending SIGKILL");
        self.process.kill().await?;
        tracing::info!(server = %self.name, state = "exited", "server exited after SIGKILL");
        Ok(ShutdownOutcome::Killed)
    }

    async fn force_kill(&mut self) {
        if let Err(e) = self.process.kill().await {
            tracing::error!(server = %self.name, error = %e, "error killing server");
        }
    }
}

#[cfg(unix)]
fn send_term(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // `id()` is `None` once the child has been reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn send_term(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a server process with piped stdin/stdout.
///
/// stderr is passed through to ours. Without an explicit `env` the child
/// only sees [`default_environment`]; the host environment is never
/// inherited wholesale. The child is killed if the handle is dropped.
pub fn spawn_server(name: &str, params: &ServerParameters) -> Result<ServerProcess, McpError> {
    params.validate()?;

    let env = params.env.clone().unwrap_or_else(default_environment);

    let mut cmd = Command::new(&params.command);
    cmd.args(&params.args);
    cmd.env_clear();
    cmd.envs(&env);

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;

    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    tracing::info!(
        server = name,
        command = %params.command,
        args = ?params.args,
        pid = child.id(),
        "spawned server process"
    );

    Ok(ServerProcess {
        name: name.to_string(),
        process: child,
        stdin: Some(stdin),
        stdout: Some(stdout),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
