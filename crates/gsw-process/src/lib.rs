//! Child process supervision: shell spawn, pipe draining, lifecycle signals.

pub mod line_buffer;

pub use line_buffer::LineBuffer;

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gsw_core::error::WardenError;

/// Which of the child's output streams to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Exit code reported while the child is still running.
pub const EXIT_CODE_RUNNING: i32 = -1;

const READ_BUF_SIZE: usize = 4096;

/// One supervised child, addressed only through its pipes.
///
/// The command string is handed to `/bin/sh -c`, so operators can compose
/// directory changes and redirections. A reader task drains stdout and
/// stderr into per-stream [`LineBuffer`]s and records the exit code once
/// both pipes close: the plain status for a normal exit, the negated signal
/// number for a signalled one.
pub struct ChildProcess {
    command: String,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    stdout_buf: LineBuffer,
    stderr_buf: LineBuffer,
    running: AtomicBool,
    exit_code: AtomicI32,
    pid: AtomicI32,
    reader: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChildProcess {
    pub fn new(command: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            command: command.into(),
            stdin: tokio::sync::Mutex::new(None),
            stdout_buf: LineBuffer::new(),
            stderr_buf: LineBuffer::new(),
            running: AtomicBool::new(false),
            exit_code: AtomicI32::new(EXIT_CODE_RUNNING),
            pid: AtomicI32::new(-1),
            reader: tokio::sync::Mutex::new(None),
        })
    }

    /// Spawn the child and schedule the reader task.
    ///
    /// Fails when a child is already live.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WardenError::ChildAlreadyRunning.into());
        }

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The child leads its own process group so stop()/kill() reach the
        // shell and everything it spawned.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err).with_context(|| format!("failed to spawn `{}`", self.command));
            }
        };

        let pid = child.id().map(|p| p as i32).unwrap_or(-1);
        self.pid.store(pid, Ordering::SeqCst);
        self.exit_code.store(EXIT_CODE_RUNNING, Ordering::SeqCst);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().context("child stdout was not piped")?;
        let stderr = child.stderr.take().context("child stderr was not piped")?;
        *self.stdin.lock().await = stdin;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.drain_streams(child, stdout, stderr).await;
        });
        *self.reader.lock().await = Some(handle);

        debug!(pid, command = %self.command, "child spawned");
        Ok(())
    }

    async fn drain_streams(
        self: Arc<Self>,
        mut child: tokio::process::Child,
        mut stdout: tokio::process::ChildStdout,
        mut stderr: tokio::process::ChildStderr,
    ) {
        let mut out_buf = [0u8; READ_BUF_SIZE];
        let mut err_buf = [0u8; READ_BUF_SIZE];
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !stdout_done || !stderr_done {
            tokio::select! {
                read = stdout.read(&mut out_buf), if !stdout_done => match read {
                    Ok(0) => stdout_done = true,
                    Ok(n) => self.stdout_buf.append(&out_buf[..n]),
                    Err(err) => {
                        debug!(error = %err, "child stdout read failed");
                        stdout_done = true;
                    }
                },
                read = stderr.read(&mut err_buf), if !stderr_done => match read {
                    Ok(0) => stderr_done = true,
                    Ok(n) => self.stderr_buf.append(&err_buf[..n]),
                    Err(err) => {
                        debug!(error = %err, "child stderr read failed");
                        stderr_done = true;
                    }
                },
            }
        }

        let code = match child.wait().await {
            Ok(status) => exit_code_of(status),
            Err(err) => {
                warn!(error = %err, "failed to reap child");
                EXIT_CODE_RUNNING
            }
        };

        self.exit_code.store(code, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        *self.stdin.lock().await = None;
        debug!(code, "child exited");
    }

    /// Write raw bytes to the child's stdin.
    ///
    /// Transient interruptions are retried by the runtime; a closed pipe
    /// drops the handle so later sends fail fast.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(WardenError::ChildNotRunning)?;
        if let Err(err) = stdin.write_all(bytes).await {
            *guard = None;
            return Err(anyhow::Error::new(err).context("child stdin write failed"));
        }
        stdin
            .flush()
            .await
            .context("child stdin flush failed")?;
        Ok(())
    }

    pub fn read_line(&self, stream: OutputStream) -> Option<String> {
        self.buffer(stream).read_line()
    }

    pub fn read_all(&self, stream: OutputStream) -> String {
        self.buffer(stream).read_all()
    }

    fn buffer(&self, stream: OutputStream) -> &LineBuffer {
        match stream {
            OutputStream::Stdout => &self.stdout_buf,
            OutputStream::Stderr => &self.stderr_buf,
        }
    }

    /// Ask the child to terminate. Does not wait.
    pub fn stop(&self) {
        self.signal(libc::SIGTERM);
    }

    /// Terminate the child unconditionally.
    pub fn kill(&self) {
        self.signal(libc::SIGKILL);
    }

    fn signal(&self, sig: i32) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid <= 0 || !self.running() {
            return;
        }
        // Negative PID addresses the whole process group.
        // SAFETY: kill() is async-signal-safe and validates its arguments.
        #[cfg(unix)]
        unsafe {
            libc::kill(-pid, sig);
        }
        #[cfg(not(unix))]
        let _ = sig;
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Exit status: [`EXIT_CODE_RUNNING`] while live, the plain status after
    /// a normal exit, the negated signal number after a signalled one.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    /// Join the reader task, which finishes once the child has exited and
    /// both pipes are drained.
    ///
    /// The handle is left in place until the join completes, so a caller
    /// whose wait timed out can call again and still join the task.
    pub async fn wait(&self) {
        let mut guard = self.reader.lock().await;
        if let Some(handle) = guard.as_mut() {
            if let Err(err) = handle.await {
                warn!(error = %err, "child reader task failed");
            }
            *guard = None;
        }
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(EXIT_CODE_RUNNING)
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(EXIT_CODE_RUNNING)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
