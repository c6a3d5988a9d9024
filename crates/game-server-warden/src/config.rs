use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use gsw_requests::EngineConfig;

/// `warden.toml`. Every field is optional; a missing file means defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_web_root")]
    pub web_root: PathBuf,
    #[serde(default = "default_ops_file")]
    pub ops_file: PathBuf,
    #[serde(default = "default_vote_threshold")]
    pub vote_threshold: usize,
    #[serde(default = "default_executed_ttl_hours")]
    pub executed_request_ttl_hours: u64,
    /// Unset keeps unexecuted requests forever.
    #[serde(default)]
    pub unexecuted_request_ttl_hours: Option<u64>,
    #[serde(default = "default_ban_sweep_secs")]
    pub ban_sweep_secs: u64,
    #[serde(default = "default_request_sweep_secs")]
    pub request_sweep_secs: u64,
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_web_root() -> PathBuf {
    PathBuf::from("web")
}

fn default_ops_file() -> PathBuf {
    PathBuf::from("server/ops.json")
}

fn default_vote_threshold() -> usize {
    3
}

fn default_executed_ttl_hours() -> u64 {
    24
}

fn default_ban_sweep_secs() -> u64 {
    30
}

fn default_request_sweep_secs() -> u64 {
    10
}

fn default_audit_capacity() -> usize {
    1000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            web_root: default_web_root(),
            ops_file: default_ops_file(),
            vote_threshold: default_vote_threshold(),
            executed_request_ttl_hours: default_executed_ttl_hours(),
            unexecuted_request_ttl_hours: None,
            ban_sweep_secs: default_ban_sweep_secs(),
            request_sweep_secs: default_request_sweep_secs(),
            audit_capacity: default_audit_capacity(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl WardenConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn players_path(&self) -> PathBuf {
        self.data_dir.join("players.list")
    }

    pub fn banned_path(&self) -> PathBuf {
        self.data_dir.join("banned.list")
    }

    pub fn forbidden_path(&self) -> PathBuf {
        self.data_dir.join("forbidden_commands.list")
    }

    pub fn requests_path(&self) -> PathBuf {
        self.data_dir.join("requests.dat")
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            threshold: self.vote_threshold,
            executed_ttl: chrono::Duration::hours(self.executed_request_ttl_hours as i64),
            unexecuted_ttl: self
                .unexecuted_request_ttl_hours
                .map(|hours| chrono::Duration::hours(hours as i64)),
        }
    }
}
