//! Persistent device identity.
//!
//! The identity is written once, on first boot, and never overwritten: a
//! device keeps its topic namespace across restarts and config changes.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Identity stored at `path`, or `fallback` written there if the file is
/// missing or blank.
pub(crate) fn resolve(path: &Path, fallback: &str) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            if let Some(id) = contents.lines().next().map(str::trim).filter(|l| !l.is_empty()) {
                info!(device_id = id, path = %path.display(), "device identity loaded");
                return Ok(id.to_string());
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read identity: {}", path.display()))
        }
    }

    std::fs::write(path, format!("{fallback}\n"))
        .with_context(|| format!("failed to write identity: {}", path.display()))?;
    info!(device_id = fallback, path = %path.display(), "device identity created");
    Ok(fallback.to_string())
}
