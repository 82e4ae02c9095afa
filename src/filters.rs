//! Exclusion rules shared by the Scanner and the Watcher: hidden entries,
//! `node_modules`, and the reserved backup directory (§4.2/§4.6/§4.8).

use std::path::Path;

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::backup::BACKUP_DIR_NAME;

const DEFAULT_EXCLUDE_LINES: &[&str] = &["node_modules/", ".*"];

#[derive(Clone)]
pub struct SyncExclusions {
    matcher: Gitignore,
}

impl SyncExclusions {
    pub fn load(sync_root: &Path) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(sync_root);
        for line in DEFAULT_EXCLUDE_LINES {
            builder
                .add_line(None, line)
                .with_context(|| format!("add default exclude line: {line}"))?;
        }
        builder
            .add_line(None, &format!("{BACKUP_DIR_NAME}/"))
            .context("add backup dir exclude line")?;
        let matcher = builder.build().context("build exclude matcher")?;
        Ok(Self { matcher })
    }

    pub fn should_exclude_rel(&self, rel_path: &Path, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, time::SystemTime};

    fn make_temp_dir(prefix: &str) -> std::path::PathBuf {
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
    fn excludes_hidden_entries() {
        let root = make_temp_dir("sitesync-rs-excl-hidden");
        let excl = SyncExclusions::load(&root).unwrap();
        assert!(excl.should_exclude_rel(Path::new(".git"), true));
        assert!(excl.should_exclude_rel(Path::new(".DS_Store"), false));
    }

    #[test]
    fn excludes_node_modules() {
        let root = make_temp_dir("sitesync-rs-excl-nm");
        let excl = SyncExclusions::load(&root).unwrap();
        assert!(excl.should_exclude_rel(Path::new("node_modules"), true));
        assert!(excl.should_exclude_rel(Path::new("node_modules/pkg/index.html"), false));
    }

    #[test]
    fn excludes_backup_dir() {
        let root = make_temp_dir("sitesync-rs-excl-backup");
        let excl = SyncExclusions::load(&root).unwrap();
        assert!(excl.should_exclude_rel(Path::new("sites-versions"), true));
        assert!(excl.should_exclude_rel(Path::new("sites-versions/home/1.html"), false));
    }

    #[test]
    fn regular_html_not_excluded() {
        let root = make_temp_dir("sitesync-rs-excl-regular");
        let excl = SyncExclusions::load(&root).unwrap();
        assert!(!excl.should_exclude_rel(Path::new("home.html"), false));
        assert!(!excl.should_exclude_rel(Path::new("foo/bar/site.html"), false));
    }
}
