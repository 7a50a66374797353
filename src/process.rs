//! Language server process management and stdio wiring.
//!
//! # Process Cleanup Safety
//!
//! The child is spawned with `kill_on_drop`, so an early return never leaves
//! an orphaned server behind. The normal path goes through
//! [`ServerProcess::terminate`], which asks the server to exit with SIGTERM,
//! escalates to SIGKILL after a grace period, and always reaps the process.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::config::WrapperConfig;
use crate::error::WrapperError;
use crate::wrapper::{Pump, StreamPair, Wrapper};

/// A running language server subprocess.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    program: String,
}

impl ServerProcess {
    /// Spawn `command` (program followed by its arguments) with piped stdin
    /// and stdout. Stderr is inherited so server logs reach the editor.
    pub fn spawn(command: &[String]) -> Result<(Self, ChildStdin, ChildStdout), WrapperError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| WrapperError::Spawn("empty command".to_string()))?;

        info!(program = %program, args = ?args, "starting language server");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WrapperError::Spawn(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WrapperError::Spawn("failed to capture server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WrapperError::Spawn("failed to capture server stdout".to_string()))?;

        info!(program = %program, pid = ?child.id(), "language server started");
        Ok((
            Self {
                child,
                program: program.clone(),
            },
            stdin,
            stdout,
        ))
    }

    /// OS process id, while the process has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stop the server and wait for it to exit.
    ///
    /// 1. Return immediately if it already exited
    /// 2. Send SIGTERM (Unix) and wait up to `grace`
    /// 3. Send SIGKILL and reap
    ///
    /// Returns the exit code, or `None` if the server died from a signal.
    pub async fn terminate(mut self, grace: Duration) -> Result<Option<i32>, WrapperError> {
        if let Some(status) = self.child.try_wait()? {
            info!(program = %self.program, code = ?status.code(), "language server already exited");
            return Ok(status.code());
        }

        self.signal_terminate();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(program = %self.program, code = ?status.code(), "language server exited");
                return Ok(status.code());
            }
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "wait failed after SIGTERM");
            }
            Err(_) => {
                warn!(
                    program = %self.program,
                    grace_ms = grace.as_millis() as u64,
                    "language server did not exit in time, killing it"
                );
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!(program = %self.program, error = %e, "SIGKILL failed");
        }
        let status = self.child.wait().await?;
        info!(program = %self.program, code = ?status.code(), "language server killed");
        Ok(status.code())
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return;
        };
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            warn!(program = %self.program, pid, error = %e, "SIGTERM failed");
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(program = %self.program, error = %e, "failed to stop language server");
        }
    }
}

/// How a wrapper session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    /// The pump that ended the session, or the error that did.
    pub engine: Result<Pump, WrapperError>,
    /// The language server's exit code, if it exited normally.
    pub exit_code: Option<i32>,
}

impl SessionOutcome {
    /// Process exit code for the wrapper binary.
    pub fn process_exit_code(&self) -> i32 {
        match (&self.engine, self.exit_code) {
            (Err(_), _) => 1,
            (Ok(_), Some(code)) => code,
            (Ok(_), None) => 0,
        }
    }
}

/// Spawn `command` and proxy between it and `client` until the session ends,
/// then shut the server down.
pub async fn serve<CR, CW>(
    command: &[String],
    config: &WrapperConfig,
    client: StreamPair<CR, CW>,
) -> Result<SessionOutcome, WrapperError>
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
{
    let (server, stdin, stdout) = ServerProcess::spawn(command)?;
    let wrapper = Wrapper::from_config(config);

    let engine = wrapper.run(client, StreamPair::new(stdout, stdin)).await;
    let terminated = server.terminate(config.terminate_grace()).await;

    Ok(finish_session(engine, terminated))
}

/// Combine the engine result with the server's shutdown. A failed shutdown
/// costs only the exit code.
fn finish_session(
    engine: Result<Pump, WrapperError>,
    terminated: Result<Option<i32>, WrapperError>,
) -> SessionOutcome {
    let exit_code = match terminated {
        Ok(code) => code,
        Err(e) => {
            warn!(error = %e, "failed to reap language server");
            None
        }
    };
    SessionOutcome { engine, exit_code }
}

/// [`serve`] over the wrapper's own stdin and stdout.
pub async fn serve_stdio(
    command: &[String],
    config: &WrapperConfig,
) -> Result<SessionOutcome, WrapperError> {
    let client = StreamPair::new(tokio::io::stdin(), tokio::io::stdout());
    serve(command, config, client).await
}
