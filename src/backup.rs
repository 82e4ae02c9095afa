//! Versioned snapshots taken before every local overwrite (§4.2).
//!
//! A pure side-effect: failure to back up is logged and reported but never
//! blocks the overwrite it guards.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::logging;

pub const BACKUP_DIR_NAME: &str = "sites-versions";

/// Snapshots `content` (the pre-overwrite bytes) under
/// `sites-versions/<site_name>/<sortable-timestamp>.html`. Returns the
/// backup path on success. Callers must not let a failure here abort the
/// overwrite it precedes.
pub fn snapshot(sync_root: &Path, site_name: &str, content: &[u8]) -> Result<PathBuf> {
    let dir = sync_root.join(BACKUP_DIR_NAME).join(site_name);
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let ts = Utc::now().format("%Y-%m-%d-%H-%M-%S-%3f").to_string();
    let path = dir.join(format!("{ts}.html"));
    std::fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Best-effort wrapper: logs and reports failure but always returns,
/// matching the spec's "survive, keep syncing" bias.
pub fn snapshot_best_effort(sync_root: &Path, site_name: &str, content: &[u8]) -> Option<PathBuf> {
    match snapshot(sync_root, site_name, content) {
        Ok(path) => Some(path),
        Err(e) => {
            logging::error(&format!("backup failed for {site_name}: {e:#}"));
            None
        }
    }
}

/// Enforces the retention cap in `max_backups_per_site` by deleting the
/// oldest snapshots once the count is exceeded. Best-effort: failures are
/// logged, never propagated.
pub fn enforce_retention(sync_root: &Path, site_name: &str, max_backups_per_site: usize) {
    let dir = sync_root.join(BACKUP_DIR_NAME).join(site_name);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return;
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "html").unwrap_or(false))
        .collect();
    if files.len() <= max_backups_per_site {
        return;
    }
    files.sort();
    let excess = files.len() - max_backups_per_site;
    for path in files.into_iter().take(excess) {
        if let Err(e) = std::fs::remove_file(&path) {
            logging::error(&format!(
                "failed to prune backup {}: {e:#}",
                path.display()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, time::SystemTime};

    fn make_temp_dir(prefix: &str) -> PathBuf {
        let mut root = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        root.push(format!("{prefix}-{nanos}"));
        fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn snapshot_preserves_pre_overwrite_bytes() {
        let root = make_temp_dir("sitesync-rs-backup-snapshot");
        let path = snapshot(&root, "home", b"old content").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"old content");
        assert!(path.starts_with(root.join(BACKUP_DIR_NAME).join("home")));
    }

    #[test]
    fn snapshot_handles_nested_site_names() {
        let root = make_temp_dir("sitesync-rs-backup-nested");
        let path = snapshot(&root, "foo/bar/site", b"x").unwrap();
        assert!(path.starts_with(root.join(BACKUP_DIR_NAME).join("foo/bar/site")));
    }

    #[test]
    fn enforce_retention_prunes_oldest() {
        let root = make_temp_dir("sitesync-rs-backup-retention");
        let dir = root.join(BACKUP_DIR_NAME).join("home");
        fs::create_dir_all(&dir).unwrap();
        for i in 0..5 {
            fs::write(dir.join(format!("2025-01-01-00-00-{i:02}-000.html")), "x").unwrap();
        }
        enforce_retention(&root, "home", 3);
        let remaining: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(remaining.len(), 3);
    }
}
