//! Wires the child, the registries, and the audit ring together.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gsw_core::audit::{AuditEntry, AuditLog};
use gsw_core::sink::CommandSink;
use gsw_core::types::LineEvent;
use gsw_moderation::{BanRegistry, classify};
use gsw_process::{ChildProcess, OutputStream};
use gsw_requests::RequestVoteEngine;

const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(10);
const STOP_GRACE: Duration = Duration::from_secs(10);

/// [`CommandSink`] backed by the supervised child's stdin.
pub struct ChildStdinSink(pub Arc<ChildProcess>);

#[async_trait::async_trait]
impl CommandSink for ChildStdinSink {
    async fn send_line(&self, line: &str) -> Result<()> {
        self.0.send(line.as_bytes()).await
    }
}

/// Owns the child process and the long-lived workers around it: the log
/// pump, the ban sweeper, and the request executor.
pub struct Supervisor {
    child: Arc<ChildProcess>,
    registry: Arc<BanRegistry>,
    engine: Arc<RequestVoteEngine>,
    audit: Arc<AuditLog>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(
        child: Arc<ChildProcess>,
        registry: Arc<BanRegistry>,
        engine: Arc<RequestVoteEngine>,
        audit: Arc<AuditLog>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            child,
            registry,
            engine,
            audit,
            cancel,
            workers: Vec::new(),
        }
    }

    /// Spawn the child and schedule the workers.
    pub async fn start(&mut self, ban_sweep: Duration, request_sweep: Duration) -> Result<()> {
        self.child.run().await?;
        self.workers.push(spawn_log_pump(
            Arc::clone(&self.child),
            Arc::clone(&self.registry),
            Arc::clone(&self.audit),
            self.cancel.child_token(),
        ));
        self.workers
            .push(self.registry.spawn_sweeper(ban_sweep, self.cancel.child_token()));
        self.workers
            .push(self.engine.spawn_executor(request_sweep, self.cancel.child_token()));
        Ok(())
    }

    pub fn child_running(&self) -> bool {
        self.child.running()
    }

    /// Stop the workers first, then the child: the pump is joined before
    /// the process goes away, and a server that ignores the polite signal
    /// is killed after a grace period.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker task failed");
            }
        }

        if self.child.running() {
            self.child.stop();
            if tokio::time::timeout(STOP_GRACE, self.child.wait())
                .await
                .is_err()
            {
                warn!("server ignored the termination signal, killing it");
                self.child.kill();
                self.child.wait().await;
            }
        } else {
            self.child.wait().await;
        }
        info!(exit_code = self.child.exit_code(), "server process closed");
    }
}

/// Read stdout line by line, classify, and feed the registry and the audit
/// ring. Unrecognised lines and everything on stderr are echoed to the
/// operator console. Exits when cancelled or when the child is gone and
/// drained.
pub fn spawn_log_pump(
    child: Arc<ChildProcess>,
    registry: Arc<BanRegistry>,
    audit: Arc<AuditLog>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            while let Some(line) = child.read_line(OutputStream::Stderr) {
                eprint!("{line}");
            }
            match child.read_line(OutputStream::Stdout) {
                Some(line) => handle_line(&line, &registry, &audit).await,
                None => {
                    if !child.running() {
                        let rest = child.read_all(OutputStream::Stdout);
                        if !rest.is_empty() {
                            print!("{rest}");
                        }
                        let rest = child.read_all(OutputStream::Stderr);
                        if !rest.is_empty() {
                            eprint!("{rest}");
                        }
                        break;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(PUMP_POLL_INTERVAL) => {}
                    }
                }
            }
        }
        debug!("log pump stopped");
    })
}

async fn handle_line(raw: &str, registry: &BanRegistry, audit: &AuditLog) {
    let classified = classify(raw, registry);
    if classified.event == LineEvent::Other {
        // Not a player event; hand it to the operator untouched.
        print!("{raw}");
        return;
    }
    if let Err(err) = registry.on_event(&classified.event).await {
        warn!(error = %err, "could not apply classified event");
    }
    if let Some(entry) = AuditEntry::from_event(&classified.event) {
        audit.push(entry);
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
