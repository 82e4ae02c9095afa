//! Walks SyncRoot and yields `RelativePath -> LocalFile` in a single
//! depth-first pass (§4.8). Hidden entries and excluded directories are
//! skipped; mtime is read once per entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::filters::SyncExclusions;

#[derive(Debug, Clone)]
pub struct LocalFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub mtime: SystemTime,
    pub size: u64,
}

/// Converts OS path separators to `/` so the rest of the engine only ever
/// deals in forward-slash relative paths (§9 Design Notes).
pub fn to_relative_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn scan(sync_root: &Path, exclusions: &SyncExclusions) -> Result<HashMap<String, LocalFile>> {
    let mut out = HashMap::new();

    let walker = WalkDir::new(sync_root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| {
        if e.depth() == 0 {
            return true;
        }
        let rel = e.path().strip_prefix(sync_root).unwrap_or(e.path());
        !exclusions.should_exclude_rel(rel, e.file_type().is_dir())
    }) {
        let entry = entry.with_context(|| format!("walk {}", sync_root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().map(|e| e != "html").unwrap_or(true) {
            continue;
        }
        let rel = path.strip_prefix(sync_root).unwrap_or(path);
        let relative_path = to_relative_path(rel);
        let meta = entry
            .metadata()
            .with_context(|| format!("metadata {}", path.display()))?;
        out.insert(
            relative_path.clone(),
            LocalFile {
                relative_path,
                absolute_path: path.to_path_buf(),
                mtime: meta.modified().with_context(|| format!("mtime {}", path.display()))?,
                size: meta.len(),
            },
        );
    }

    Ok(out)
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
    fn scan_finds_html_files_and_skips_excluded() {
        let root = make_temp_dir("sitesync-rs-scanner");
        fs::write(root.join("home.html"), "hi").unwrap();
        fs::create_dir_all(root.join("foo/bar")).unwrap();
        fs::write(root.join("foo/bar/site.html"), "hi").unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.html"), "nope").unwrap();
        fs::create_dir_all(root.join("sites-versions/home")).unwrap();
        fs::write(root.join("sites-versions/home/ts.html"), "backup").unwrap();
        fs::write(root.join("notes.txt"), "not html").unwrap();

        let exclusions = SyncExclusions::load(&root).unwrap();
        let found = scan(&root, &exclusions).unwrap();

        assert!(found.contains_key("home.html"));
        assert!(found.contains_key("foo/bar/site.html"));
        assert!(!found.contains_key("node_modules/pkg/index.html"));
        assert!(!found.contains_key("sites-versions/home/ts.html"));
        assert!(!found.contains_key("notes.txt"));
        assert_eq!(found.len(), 2);
    }
}
