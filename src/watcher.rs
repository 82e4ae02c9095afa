//! Recursive `**/*.html` watch rooted at SyncRoot (§4.6). Emits stabilized
//! `add`/`change`/`unlink` events after ≈1s of quiescence; `unlink` is
//! observed and logged but never enqueued upward.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};

use crate::filters::SyncExclusions;
use crate::logging;
use crate::scanner::to_relative_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Add,
    Change,
    Unlink,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub relative_path: String,
}

pub struct FileWatcher {
    // Keeps the debouncer (and its background polling thread) alive for
    // as long as the watcher is running.
    #[allow(dead_code)]
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl FileWatcher {
    pub fn start(
        sync_root: &Path,
        exclusions: SyncExclusions,
        stability_threshold: Duration,
        tx: tokio::sync::mpsc::Sender<WatchEvent>,
    ) -> Result<Self> {
        let root = sync_root.to_path_buf();
        let mut debouncer = new_debouncer(
            stability_threshold,
            Some(Duration::from_millis(250)),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for path in &event.event.paths {
                            if let Some(watch_event) =
                                classify(&root, path, &event.event.kind, &exclusions)
                            {
                                if watch_event.kind == WatchEventKind::Unlink {
                                    logging::info(&format!(
                                        "observed unlink {} (not propagated)",
                                        watch_event.relative_path
                                    ));
                                    continue;
                                }
                                if let Err(e) = tx.try_send(watch_event) {
                                    logging::error(&format!("watcher channel full: {e}"));
                                }
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        logging::error(&format!("watcher error: {e:?}"));
                    }
                }
            },
        )
        .context("create debounced watcher")?;

        debouncer
            .watch(sync_root, RecursiveMode::Recursive)
            .with_context(|| format!("watch {}", sync_root.display()))?;

        Ok(Self { debouncer })
    }
}

fn classify(
    sync_root: &Path,
    path: &Path,
    kind: &EventKind,
    exclusions: &SyncExclusions,
) -> Option<WatchEvent> {
    if path.extension().map(|e| e != "html").unwrap_or(true) {
        return None;
    }
    let rel = path.strip_prefix(sync_root).ok()?;
    if exclusions.should_exclude_rel(rel, false) {
        return None;
    }

    let relative_path = to_relative_path(rel);
    let watch_kind = match kind {
        EventKind::Create(_) => WatchEventKind::Add,
        EventKind::Modify(_) => WatchEventKind::Change,
        EventKind::Remove(_) => WatchEventKind::Unlink,
        _ => return None,
    };

    Some(WatchEvent {
        kind: watch_kind,
        relative_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_create_modify_remove() {
        let root = PathBuf::from("/tmp/sync-root");
        let exclusions = SyncExclusions::load(&root).unwrap();

        let create = classify(
            &root,
            &root.join("home.html"),
            &EventKind::Create(notify::event::CreateKind::File),
            &exclusions,
        )
        .unwrap();
        assert_eq!(create.kind, WatchEventKind::Add);
        assert_eq!(create.relative_path, "home.html");

        let modify = classify(
            &root,
            &root.join("foo/bar/site.html"),
            &EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            &exclusions,
        )
        .unwrap();
        assert_eq!(modify.kind, WatchEventKind::Change);
        assert_eq!(modify.relative_path, "foo/bar/site.html");

        let remove = classify(
            &root,
            &root.join("home.html"),
            &EventKind::Remove(notify::event::RemoveKind::File),
            &exclusions,
        )
        .unwrap();
        assert_eq!(remove.kind, WatchEventKind::Unlink);
    }

    #[test]
    fn classify_ignores_non_html_and_excluded_paths() {
        let root = PathBuf::from("/tmp/sync-root");
        let exclusions = SyncExclusions::load(&root).unwrap();

        assert!(classify(
            &root,
            &root.join("notes.txt"),
            &EventKind::Create(notify::event::CreateKind::File),
            &exclusions
        )
        .is_none());

        assert!(classify(
            &root,
            &root.join("node_modules/pkg/index.html"),
            &EventKind::Create(notify::event::CreateKind::File),
            &exclusions
        )
        .is_none());

        assert!(classify(
            &root,
            &root.join("sites-versions/home/ts.html"),
            &EventKind::Create(notify::event::CreateKind::File),
            &exclusions
        )
        .is_none());
    }
}
