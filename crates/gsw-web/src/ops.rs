//! Operator list, read once at startup from the server's `ops.json`.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct OpEntry {
    name: String,
}

/// Operator names from the server's ops file. A missing or unreadable file
/// is an empty list; the server manages that file, not the warden.
pub fn load_ops(path: &Path) -> Vec<String> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            info!(path = %path.display(), error = %err, "no operator list");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<OpEntry>>(&text) {
        Ok(entries) => entries.into_iter().map(|entry| entry.name).collect(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "malformed operator list");
            Vec::new()
        }
    }
}
