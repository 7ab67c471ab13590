//! Stdio transport: server process launch and termination.
//!
//! Shutdown closes stdin, sends SIGTERM, waits for the grace period and
//! escalates to SIGKILL. The child is always reaped.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use toolrelay_core::{McpError, ServerConfig};
use tracing::debug;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// A spawned server process with its pipes detached for the client.
pub struct ProcessTransport {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
}

impl ProcessTransport {
    /// Launch `config.command` with piped stdio.
    ///
    /// Config validation and spawn failures are both `McpError::Connection`.
    pub fn spawn(config: &ServerConfig) -> Result<Self, McpError> {
        config.validate().map_err(McpError::Connection)?;

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(config.env_pairs())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            McpError::Connection(format!(
                "Failed to spawn '{}': {e}\nArgs: {:?}\nCwd: {:?}",
                config.command, config.args, config.working_dir
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection("Failed to capture stdout".into()))?;
        let stderr = child.stderr.take();

        debug!(
            server = %config.name,
            pid = ?child.id(),
            command = %config.command,
            "Spawned MCP server process"
        );

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

/// Forward a server's stderr to the debug log, line by line.
pub fn forward_stderr(server: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %server, "stderr: {line}");
        }
    })
}

/// Terminate a child process, escalating to a forced kill after `grace`.
///
/// # Platform behavior
/// - Unix: SIGTERM via nix, then SIGKILL via `.kill()`
/// - Windows: immediate `.kill()`
pub async fn shutdown_child(mut child: Child, grace: Duration) -> io::Result<ExitStatus> {
    // Already gone (e.g. exited on stdin EOF)
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    #[cfg(unix)]
    {
        shutdown_unix(&mut child, grace).await
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn shutdown_unix(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // Reaped already
        return child.wait().await;
    };
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))?;

    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    if let Ok(result) = timeout(grace, child.wait()).await {
        return result;
    }

    debug!(pid, "Process ignored SIGTERM, sending SIGKILL");
    child.kill().await?;
    child.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let config = ServerConfig::new(1, "blank", "", vec![]);
        assert!(matches!(
            ProcessTransport::spawn(&config),
            Err(McpError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_connection_error() {
        let config = ServerConfig::new(1, "ghost", "definitely-not-a-real-binary-4821", vec![]);
        match ProcessTransport::spawn(&config) {
            Err(McpError::Connection(msg)) => {
                assert!(msg.contains("definitely-not-a-real-binary-4821"));
            }
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_shutdown_responds_to_sigterm() {
        let config = ServerConfig::new(1, "sleeper", "sleep", vec!["30".into()]);
        let transport = ProcessTransport::spawn(&config).unwrap();

        let status = shutdown_child(transport.child, Duration::from_secs(2)).await;
        assert!(status.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_shutdown_handles_already_exited() {
        let config = ServerConfig::new(1, "echo", "echo", vec!["hi".into()]);
        let mut transport = ProcessTransport::spawn(&config).unwrap();
        transport.child.wait().await.unwrap();

        let status = shutdown_child(transport.child, Duration::from_secs(2)).await;
        assert!(status.is_ok());
    }
}
