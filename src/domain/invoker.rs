//! External shell invoker: runs one script against one node through mysqlsh.
//!
//! Each call spawns exactly one `mysqlsh` process in batch mode, feeds the
//! password over stdin, and waits for it under a hard deadline. On expiry the
//! whole process group is killed and the child reaped before returning.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{Credentials, Endpoint, InvocationResult, Language};

/// How long to wait for the pipes to close once the child is gone. Anything
/// mysqlsh forked may hold them open well past its own exit.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Stderr lines mysqlsh prints about passwords on the command line.
const PASSWORD_WARNING: &str = "can be insecure";

/// Failure to run the external tool at all. A non-zero exit is not an error.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("{program} not found; install MySQL Shell or set shell.program")]
    ToolNotFound { program: String },
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for mysqlsh: {source}")]
    Wait {
        #[source]
        source: io::Error,
    },
}

/// Runs scripts against nodes. Implemented by [`MysqlShell`]; tests substitute
/// in-process fakes.
#[async_trait]
pub trait ShellInvoker: Send + Sync {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        language: Language,
        script: &str,
        timeout: Duration,
    ) -> Result<InvocationResult, InvokeError>;
}

/// The real `mysqlsh` executable.
#[derive(Debug, Clone)]
pub struct MysqlShell {
    program: PathBuf,
}

impl MysqlShell {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolve the binary from PATH and well-known install locations.
    pub fn locate() -> Result<Self, InvokeError> {
        crate::tools::find_mysqlsh()
            .map(Self::new)
            .ok_or_else(|| InvokeError::ToolNotFound {
                program: crate::tools::MYSQLSH.into(),
            })
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Argument vector for one batch invocation. The password never appears
    /// here; it is written to stdin.
    pub fn arguments(
        endpoint: &Endpoint,
        credentials: &Credentials,
        language: Language,
        script: &str,
    ) -> Vec<String> {
        vec![
            "--uri".to_string(),
            endpoint.uri(&credentials.user),
            "--passwords-from-stdin".to_string(),
            "--no-wizard".to_string(),
            language.flag().to_string(),
            "-e".to_string(),
            script.to_string(),
        ]
    }

    fn command(&self, args: Vec<String>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("MYSQLSH_WARN_PASSWORD", "0")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a timeout can take down anything mysqlsh forked.
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd
    }

    fn spawn_error(&self, source: io::Error) -> InvokeError {
        let program = self.program.display().to_string();
        if source.kind() == io::ErrorKind::NotFound {
            InvokeError::ToolNotFound { program }
        } else {
            InvokeError::Spawn { program, source }
        }
    }
}

#[async_trait]
impl ShellInvoker for MysqlShell {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        language: Language,
        script: &str,
        timeout: Duration,
    ) -> Result<InvocationResult, InvokeError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let args = Self::arguments(endpoint, credentials, language, script);
        let mut child = self
            .command(args)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        debug!(node = %endpoint, pid = ?child.id(), %language, "mysqlsh started");

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{}\n", credentials.password());
            // A child that exits before reading its password closes the pipe.
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                debug!(node = %endpoint, error = %e, "could not deliver password over stdin");
            }
            drop(stdin);
        }

        let stdout = Drain::spawn(child.stdout.take());
        let stderr = Drain::spawn(child.stderr.take());

        // Only the child's own exit counts against the deadline.
        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(source)) => {
                terminate(&mut child).await;
                return Err(InvokeError::Wait { source });
            }
            Err(_) => {
                warn!(
                    node = %endpoint,
                    timeout_ms = timeout.as_millis() as u64,
                    "mysqlsh timed out, killing process group"
                );
                terminate(&mut child).await;
                (None, true)
            }
        };

        let out = stdout.collect(DRAIN_GRACE).await;
        let err = stderr.collect(DRAIN_GRACE).await;

        let result = InvocationResult {
            exit_code,
            stdout: String::from_utf8_lossy(&out).trim().to_string(),
            stderr: strip_password_warning(&String::from_utf8_lossy(&err)),
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: clock.elapsed().as_millis() as u64,
            timed_out,
        };

        debug!(
            node = %endpoint,
            exit_code = ?result.exit_code,
            elapsed_ms = result.elapsed_ms,
            timed_out = result.timed_out,
            "mysqlsh finished"
        );

        Ok(result)
    }
}

/// Background reader for one child pipe. What has been read stays available
/// even when the reader is abandoned before EOF.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Drain {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buf, task }
    }

    /// Wait up to `grace` for EOF, then take whatever was read.
    async fn collect(mut self, grace: Duration) -> Vec<u8> {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            debug!("pipe still open after exit, keeping partial output");
            self.task.abort();
        }
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *buf)
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Kill the child's process group, then the child itself, and reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: killpg only sends a signal; the group id is the child's
            // pid because it was spawned with process_group(0).
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill mysqlsh");
    }
}

fn strip_password_warning(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !line.contains(PASSWORD_WARNING))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
