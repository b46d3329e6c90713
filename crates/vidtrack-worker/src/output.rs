//! Output file writing

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use vidtrack_types::TrackingOutput;

/// Temporary sibling used while writing `path`
pub fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Write the tracking output; readers never observe a partial file
pub fn write_atomic(path: &Path, output: &TrackingOutput) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // Atomic write via temp file
    let tmp_path = temp_path(path);
    let content = serde_json::to_string_pretty(output)?;
    std::fs::write(&tmp_path, content)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    // A failed rename leaves the partial output in place for inspection
    std::fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to move output to {}; partial output kept at {}",
            path.display(),
            tmp_path.display()
        )
    })?;

    tracing::debug!("Output written to {}", path.display());
    Ok(())
}
