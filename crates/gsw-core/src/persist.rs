//! Whole-file persistence helper shared by the registries.

use std::path::Path;

use anyhow::{Context, Result};

/// Overwrite `path` with `contents` via a temp file and rename, so readers
/// never observe a half-written file.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents.as_bytes())
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

/// Read a persisted file, creating an empty one when it does not exist yet.
pub fn read_or_create(path: &Path) -> Result<String> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, b"").with_context(|| format!("failed to create {}", path.display()))?;
        return Ok(String::new());
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
