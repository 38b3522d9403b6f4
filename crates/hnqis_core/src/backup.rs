use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

/// Pretty-print `value` to `dir/filename`, creating `dir` if needed.
pub fn write_json_snapshot<T: Serialize + ?Sized>(
    dir: &Path,
    filename: &str,
    value: &T,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(filename);
    let rendered =
        serde_json::to_string_pretty(value).context("failed to serialize backup snapshot")?;
    fs::write(&path, rendered)
        .with_context(|| format!("failed to write backup {}", path.display()))?;
    tracing::info!("backup written to {}", path.display());
    Ok(path)
}

/// `<prefix>_backup_<YYYY-mm-dd-HH-MM-SS>.json`
pub fn timestamped_backup_name(prefix: &str) -> String {
    let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    format!("{prefix}_backup_{stamp}.json")
}
