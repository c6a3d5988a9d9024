//! Persistent ban registry with the periodic unban sweeper.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gsw_core::audit::SystemLog;
use gsw_core::clock;
use gsw_core::persist::{read_or_create, write_atomic};
use gsw_core::sink::CommandSink;
use gsw_core::text::fold_for_match;
use gsw_core::types::{LineEvent, OnlinePlayer};

use crate::classify::KnownPlayerResolver;
use crate::rules::ForbiddenRule;

/// One banned player. Identity is the name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BanRecord {
    pub name: String,
    pub reason: String,
    pub banned_at: DateTime<Local>,
    /// The never-time sentinel when `permanent` is set.
    pub unbans_at: DateTime<Local>,
    pub permanent: bool,
}

struct RegistryState {
    bans: HashMap<String, BanRecord>,
    known: BTreeSet<String>,
    online: HashMap<String, OnlinePlayer>,
}

/// Players ever seen, players online, bans in force, and the rule table
/// that escalates forbidden commands to bans.
///
/// All mutation happens under one internal mutex; the child-facing sink and
/// persistence are only touched after the lock is released.
pub struct BanRegistry {
    state: Mutex<RegistryState>,
    rules: Vec<ForbiddenRule>,
    sink: Arc<dyn CommandSink>,
    syslog: Arc<SystemLog>,
    players_path: PathBuf,
    banned_path: PathBuf,
}

impl BanRegistry {
    /// Load both persistence files (creating them when missing) and build
    /// the registry around the given rule table and sink.
    pub fn load(
        players_path: PathBuf,
        banned_path: PathBuf,
        rules: Vec<ForbiddenRule>,
        sink: Arc<dyn CommandSink>,
        syslog: Arc<SystemLog>,
    ) -> Result<Self> {
        let known = load_players(&players_path)?;
        let bans = load_banned(&banned_path)?;
        info!(
            players = known.len(),
            bans = bans.len(),
            rules = rules.len(),
            "ban registry loaded"
        );
        Ok(Self {
            state: Mutex::new(RegistryState {
                bans,
                known,
                online: HashMap::new(),
            }),
            rules,
            sink,
            syslog,
            players_path,
            banned_path,
        })
    }

    fn locked(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one classified event: track joins and leaves, and escalate
    /// forbidden commands to bans. Rule matching happens under the lock;
    /// the resulting `ban` call runs after release.
    pub async fn on_event(&self, event: &LineEvent) -> Result<()> {
        match event {
            LineEvent::Join {
                player,
                client_info,
            } => {
                let players_snapshot = {
                    let mut state = self.locked();
                    state.online.insert(
                        player.clone(),
                        OnlinePlayer {
                            name: player.clone(),
                            joined_at: Local::now(),
                            client_info: client_info.clone(),
                        },
                    );
                    state
                        .known
                        .insert(player.clone())
                        .then(|| render_players(&state.known))
                };
                if let Some(snapshot) = players_snapshot {
                    self.save_players(snapshot).await;
                }
            }
            LineEvent::Leave { player } => {
                self.locked().online.remove(player);
            }
            LineEvent::Command { player, content } => {
                let matched = {
                    let state = self.locked();
                    if player.is_empty() || !state.known.contains(player) {
                        None
                    } else {
                        let folded = fold_for_match(content);
                        self.rules.iter().find(|rule| rule.matches(&folded))
                    }
                };
                if let Some(rule) = matched {
                    let reason = ban_reason(content, rule.ban_hours);
                    self.ban(player, &reason, rule.ban_hours).await?;
                }
            }
            LineEvent::Chat { .. } | LineEvent::Other => {}
        }
        Ok(())
    }

    /// Upsert a ban, forward it to the child, and persist. `hours == 0`
    /// makes the ban permanent.
    pub async fn ban(&self, name: &str, reason: &str, hours: u64) -> Result<()> {
        let permanent = hours == 0;
        let now = Local::now();
        let unbans_at = if permanent {
            clock::never()
        } else {
            now + chrono::Duration::hours(hours as i64)
        };

        let snapshot = {
            let mut state = self.locked();
            state.bans.insert(
                name.to_string(),
                BanRecord {
                    name: name.to_string(),
                    reason: reason.to_string(),
                    banned_at: now,
                    unbans_at,
                    permanent,
                },
            );
            render_banned(&state.bans)
        };

        if let Err(err) = self.sink.send_line(&format!("ban {name} {reason}\n")).await {
            warn!(name, error = %err, "could not forward ban to the server");
        }
        self.syslog.notice(format!("banned {name}: {reason}"));
        self.save_banned(snapshot).await;
        Ok(())
    }

    /// Lift a ban. Returns false when the player was not banned.
    pub async fn pardon(&self, name: &str) -> Result<bool> {
        let snapshot = {
            let mut state = self.locked();
            if state.bans.remove(name).is_none() {
                return Ok(false);
            }
            render_banned(&state.bans)
        };

        if let Err(err) = self.sink.send_line(&format!("pardon {name}\n")).await {
            warn!(name, error = %err, "could not forward pardon to the server");
        }
        self.syslog.notice(format!("pardoned {name}"));
        self.save_banned(snapshot).await;
        Ok(true)
    }

    /// Pardon every non-permanent ban whose time is up.
    pub async fn sweep_expired(&self) {
        let now = Local::now();
        let expired: Vec<String> = {
            let state = self.locked();
            state
                .bans
                .values()
                .filter(|ban| !ban.permanent && ban.unbans_at <= now)
                .map(|ban| ban.name.clone())
                .collect()
        };
        for name in expired {
            debug!(name, "ban expired");
            if let Err(err) = self.pardon(&name).await {
                warn!(name, error = %err, "automatic pardon failed");
            }
        }
    }

    /// Run [`sweep_expired`] every `interval` until cancelled.
    ///
    /// [`sweep_expired`]: BanRegistry::sweep_expired
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                registry.sweep_expired().await;
            }
            debug!("ban sweeper stopped");
        })
    }

    pub fn players(&self) -> Vec<String> {
        self.locked().known.iter().cloned().collect()
    }

    pub fn banned(&self) -> Vec<BanRecord> {
        let mut records: Vec<BanRecord> = self.locked().bans.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn online(&self) -> Vec<OnlinePlayer> {
        let mut players: Vec<OnlinePlayer> = self.locked().online.values().cloned().collect();
        players.sort_by(|a, b| a.name.cmp(&b.name));
        players
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.locked().known.contains(name)
    }

    pub fn is_banned(&self, name: &str) -> bool {
        self.locked().bans.contains_key(name)
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.locked().online.contains_key(name)
    }

    async fn save_players(&self, snapshot: String) {
        if let Err(err) = write_atomic(&self.players_path, &snapshot).await {
            warn!(error = %err, "failed to persist the player list");
        }
    }

    async fn save_banned(&self, snapshot: String) {
        if let Err(err) = write_atomic(&self.banned_path, &snapshot).await {
            warn!(error = %err, "failed to persist the ban list");
        }
    }
}

impl KnownPlayerResolver for BanRegistry {
    fn find_known(&self, content: &str) -> Option<String> {
        let state = self.locked();
        state
            .known
            .iter()
            .find(|name| content.contains(name.as_str()))
            .cloned()
    }
}

fn ban_reason(content: &str, hours: u64) -> String {
    if hours == 0 {
        format!("forbidden command {content}, banned permanently")
    } else {
        let until = Local::now() + chrono::Duration::hours(hours as i64);
        format!(
            "forbidden command {content}, banned until {}",
            clock::format_stamp(until)
        )
    }
}

fn render_players(known: &BTreeSet<String>) -> String {
    let mut out = String::from("# one player name per line\n");
    for name in known {
        out.push_str(name);
        out.push('\n');
    }
    out
}

fn render_banned(bans: &HashMap<String, BanRecord>) -> String {
    let mut records: Vec<&BanRecord> = bans.values().collect();
    records.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::from("# name|reason|banned at|unbans at\n");
    for ban in records {
        out.push_str(&format!(
            "{}|{}|{}|{}\n",
            ban.name,
            ban.reason,
            clock::format_stamp(ban.banned_at),
            clock::format_stamp(ban.unbans_at),
        ));
    }
    out
}

fn load_players(path: &std::path::Path) -> Result<BTreeSet<String>> {
    let text = read_or_create(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn load_banned(path: &std::path::Path) -> Result<HashMap<String, BanRecord>> {
    let text = read_or_create(path)?;
    let mut bans = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_banned_line(line) {
            Some(record) => {
                bans.insert(record.name.clone(), record);
            }
            None => warn!(path = %path.display(), line, "skipping malformed ban record"),
        }
    }
    Ok(bans)
}

/// `name|reason|bannedAt|unbansAt`; the reason may itself contain pipes, so
/// the timestamps are taken from the end.
fn parse_banned_line(line: &str) -> Option<BanRecord> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 4 {
        return None;
    }
    let name = fields[0].to_string();
    if name.is_empty() {
        return None;
    }
    let unbans_field = fields[fields.len() - 1];
    let banned_at = clock::parse_stamp(fields[fields.len() - 2])?;
    let unbans_at = clock::parse_stamp(unbans_field)?;
    let reason = fields[1..fields.len() - 2].join("|");
    Some(BanRecord {
        name,
        reason,
        banned_at,
        unbans_at,
        permanent: unbans_field == clock::NEVER_STAMP,
    })
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
