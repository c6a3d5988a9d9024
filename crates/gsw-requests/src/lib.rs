//! Community-voted command requests: creation, IP-keyed votes, the deferred
//! executor, and time-windowed cleanup.

mod store;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gsw_core::audit::SystemLog;
use gsw_core::persist::{read_or_create, write_atomic};
use gsw_core::sink::CommandSink;
use gsw_core::text::fold_for_match;

/// One community-proposed privileged command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub id: String,
    pub applicant: String,
    pub command: String,
    pub reason: String,
    /// Base name of the attached image under the upload directory.
    pub image: Option<String>,
    pub voted_ips: BTreeSet<String>,
    pub created_at: DateTime<Local>,
    pub executed_at: Option<DateTime<Local>>,
    pub executed: bool,
}

impl CommandRequest {
    pub fn votes(&self) -> usize {
        self.voted_ips.len()
    }
}

/// Outcome of one vote attempt. Only [`Accepted`] changes the record.
///
/// [`Accepted`]: VoteOutcome::Accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted,
    DuplicateIp,
    NotFound,
    AlreadyExecuted,
}

/// Tuning for the engine; TTLs are measured from execution / creation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub threshold: usize,
    pub executed_ttl: chrono::Duration,
    /// `None` keeps unexecuted requests forever.
    pub unexecuted_ttl: Option<chrono::Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            executed_ttl: chrono::Duration::hours(24),
            unexecuted_ttl: None,
        }
    }
}

/// The request map with its persistence file and upload directory.
///
/// Votes mutate under one mutex; the executor stages threshold-crossed
/// requests under that mutex and forwards their commands only after
/// releasing it.
pub struct RequestVoteEngine {
    state: Mutex<HashMap<String, CommandRequest>>,
    config: EngineConfig,
    data_path: PathBuf,
    upload_dir: PathBuf,
    sink: Arc<dyn CommandSink>,
    syslog: Arc<SystemLog>,
}

impl RequestVoteEngine {
    pub fn load(
        data_path: PathBuf,
        upload_dir: PathBuf,
        config: EngineConfig,
        sink: Arc<dyn CommandSink>,
        syslog: Arc<SystemLog>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&upload_dir)
            .with_context(|| format!("failed to create {}", upload_dir.display()))?;
        let requests = store::parse(&read_or_create(&data_path)?);
        info!(requests = requests.len(), "request engine loaded");
        Ok(Self {
            state: Mutex::new(requests),
            config,
            data_path,
            upload_dir,
            sink,
            syslog,
        })
    }

    pub fn threshold(&self) -> usize {
        self.config.threshold
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, CommandRequest>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// File a new request. Returns its id.
    pub async fn create(
        &self,
        applicant: &str,
        command: &str,
        reason: &str,
        image: Option<(&[u8], &str)>,
    ) -> Result<String> {
        let image = image.filter(|(bytes, _)| !bytes.is_empty());
        let (id, image_name) = {
            let mut state = self.locked();
            let mut id = new_request_id();
            while state.contains_key(&id) {
                id = new_request_id();
            }
            let image_name = image.map(|(_, ext)| format!("{id}{}", sanitize_ext(ext)));
            state.insert(
                id.clone(),
                CommandRequest {
                    id: id.clone(),
                    applicant: applicant.to_string(),
                    command: command.to_string(),
                    reason: reason.to_string(),
                    image: image_name.clone(),
                    voted_ips: BTreeSet::new(),
                    created_at: Local::now(),
                    executed_at: None,
                    executed: false,
                },
            );
            (id, image_name)
        };

        if let (Some((bytes, _)), Some(name)) = (image, &image_name) {
            let path = self.upload_dir.join(name);
            if let Err(err) = tokio::fs::write(&path, bytes).await {
                self.locked().remove(&id);
                return Err(err)
                    .with_context(|| format!("failed to store upload {}", path.display()));
            }
        }

        self.syslog
            .notice(format!("request {id} filed by {applicant}: {command}"));
        self.persist().await;
        Ok(id)
    }

    /// Record one vote. Non-accepted outcomes leave the record untouched.
    pub async fn vote(&self, id: &str, ip: &str) -> VoteOutcome {
        let outcome = {
            let mut state = self.locked();
            match state.get_mut(id) {
                None => VoteOutcome::NotFound,
                Some(request) if request.executed => VoteOutcome::AlreadyExecuted,
                Some(request) => {
                    if request.voted_ips.insert(ip.to_string()) {
                        VoteOutcome::Accepted
                    } else {
                        VoteOutcome::DuplicateIp
                    }
                }
            }
        };
        if outcome == VoteOutcome::Accepted {
            debug!(id, ip, "vote accepted");
            self.persist().await;
        }
        outcome
    }

    /// Newest-first snapshot.
    pub fn list(&self) -> Vec<CommandRequest> {
        let mut requests: Vec<CommandRequest> = self.locked().values().cloned().collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        requests
    }

    pub fn get(&self, id: &str) -> Option<CommandRequest> {
        self.locked().get(id).cloned()
    }

    /// Whether executing `command` would lift a ban on `applicant` itself.
    /// Such requests must carry a confession image.
    pub fn is_self_pardon(applicant: &str, command: &str) -> bool {
        let folded = fold_for_match(command);
        let folded = folded.strip_prefix('/').unwrap_or(&folded);
        match folded.strip_prefix("pardon") {
            Some(rest) => rest.contains(&fold_for_match(applicant)),
            None => false,
        }
    }

    /// One executor pass: materialise threshold-crossed requests, then
    /// drop expired ones.
    pub async fn run_tick(&self) {
        self.execute_ready().await;
        self.expire_old().await;
    }

    async fn execute_ready(&self) {
        let ready: Vec<(String, String, String)> = {
            let mut state = self.locked();
            let now = Local::now();
            state
                .values_mut()
                .filter(|request| {
                    !request.executed && request.votes() >= self.config.threshold
                })
                .map(|request| {
                    request.executed = true;
                    request.executed_at = Some(now);
                    (
                        request.id.clone(),
                        request.command.clone(),
                        request.applicant.clone(),
                    )
                })
                .collect()
        };
        if ready.is_empty() {
            return;
        }

        for (id, command, applicant) in &ready {
            let mut line = command.clone();
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if let Err(err) = self.sink.send_line(&line).await {
                warn!(id, error = %err, "could not forward voted command to the server");
            }
            self.syslog
                .notice(format!("executed request {id} from {applicant}: {command}"));
        }
        self.persist().await;
    }

    async fn expire_old(&self) {
        let now = Local::now();
        let removed: Vec<CommandRequest> = {
            let mut state = self.locked();
            let expired: Vec<String> = state
                .values()
                .filter(|request| self.is_expired(request, now))
                .map(|request| request.id.clone())
                .collect();
            expired
                .iter()
                .filter_map(|id| state.remove(id))
                .collect()
        };
        if removed.is_empty() {
            return;
        }

        for request in &removed {
            debug!(id = request.id, "request expired");
            if let Some(image) = &request.image {
                let path = self.upload_dir.join(image);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to remove upload")
                    }
                }
            }
        }
        self.persist().await;
    }

    fn is_expired(&self, request: &CommandRequest, now: DateTime<Local>) -> bool {
        if request.executed {
            request
                .executed_at
                .is_some_and(|at| now - at >= self.config.executed_ttl)
        } else {
            self.config
                .unexecuted_ttl
                .is_some_and(|ttl| now - request.created_at >= ttl)
        }
    }

    /// Run [`run_tick`] every `interval` until cancelled.
    ///
    /// [`run_tick`]: RequestVoteEngine::run_tick
    pub fn spawn_executor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                engine.run_tick().await;
            }
            debug!("request executor stopped");
        })
    }

    async fn persist(&self) {
        let snapshot = store::render(&self.locked());
        if let Err(err) = write_atomic(&self.data_path, &snapshot).await {
            warn!(error = %err, "failed to persist requests");
        }
    }
}

fn new_request_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random_range(1000..=9999);
    format!("{millis:x}-{suffix}")
}

fn sanitize_ext(ext: &str) -> String {
    let cleaned: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    if cleaned.is_empty() {
        ".png".to_string()
    } else {
        format!(".{cleaned}")
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
