//! Coalescing FIFO with per-item retry scheduling and the server-files
//! cache (§4.5). A single worker drains this queue; the debounce timer
//! that defers draining after an `add` lives in the engine's run loop,
//! since it needs to race against the watcher channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::errors::ErrorKind;
use crate::http::RemoteFileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Add,
    Change,
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub kind: ItemKind,
    pub relative_path: String,
    pub enqueued_at: Instant,
}

#[derive(Default)]
struct QueueState {
    order: VecDeque<String>,
    items: HashMap<String, QueueItem>,
}

/// Coalescing, deduped FIFO. Re-enqueuing a path already queued is a no-op
/// on ordering; the earlier slot wins and the kind upgrades `add -> change`.
#[derive(Default)]
pub struct SyncQueue {
    state: Mutex<QueueState>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this path was newly enqueued (the caller should
    /// (re)schedule a debounced drain); `false` if it coalesced into an
    /// item already pending.
    pub fn enqueue(&self, kind: ItemKind, relative_path: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.items.get_mut(relative_path) {
            if existing.kind == ItemKind::Add && kind == ItemKind::Change {
                existing.kind = ItemKind::Change;
            }
            return false;
        }
        state.order.push_back(relative_path.to_string());
        state.items.insert(
            relative_path.to_string(),
            QueueItem {
                kind,
                relative_path: relative_path.to_string(),
                enqueued_at: Instant::now(),
            },
        );
        true
    }

    pub fn pop_front(&self) -> Option<QueueItem> {
        let mut state = self.state.lock().unwrap();
        let path = state.order.pop_front()?;
        state.items.remove(&path)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `stop()`: drain pending state, nothing persists across sessions.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.order.clear();
        state.items.clear();
    }
}

#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub attempts: u32,
    pub next_attempt_at: Instant,
    pub last_error_kind: ErrorKind,
}

pub enum RetryOutcome {
    ScheduleRetry { attempt: u32, delay: Duration },
    PermanentlyFailed { attempts: u32 },
}

/// Keyed by RelativePath; all updates happen in the drain worker (§5).
#[derive(Default)]
pub struct RetryTracker {
    records: HashMap<String, RetryRecord>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a retryable failure and decides whether to schedule another
    /// attempt or mark the path permanently failed for this session.
    pub fn record_failure(
        &mut self,
        relative_path: &str,
        kind: ErrorKind,
        max_retries: u32,
        delays: &[Duration],
    ) -> RetryOutcome {
        let record = self
            .records
            .entry(relative_path.to_string())
            .or_insert(RetryRecord {
                attempts: 0,
                next_attempt_at: Instant::now(),
                last_error_kind: kind,
            });
        record.attempts += 1;
        record.last_error_kind = kind;

        if record.attempts <= max_retries {
            let delay = delays
                .get((record.attempts - 1) as usize)
                .copied()
                .unwrap_or_else(|| *delays.last().unwrap_or(&Duration::from_secs(60)));
            record.next_attempt_at = Instant::now() + delay;
            RetryOutcome::ScheduleRetry {
                attempt: record.attempts,
                delay,
            }
        } else {
            let attempts = record.attempts;
            self.records.remove(relative_path);
            RetryOutcome::PermanentlyFailed { attempts }
        }
    }

    pub fn clear_path(&mut self, relative_path: &str) {
        self.records.remove(relative_path);
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }
}

/// Last observed `list` snapshot, with a 30s TTL by default. A successful
/// upload invalidates it immediately; `download` never does (§4.5).
#[derive(Default)]
pub struct ServerFilesCache {
    entry: Mutex<Option<CacheEntry>>,
}

struct CacheEntry {
    fetched_at: Instant,
    files: HashMap<String, RemoteFileEntry>,
}

impl ServerFilesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, files: HashMap<String, RemoteFileEntry>) {
        *self.entry.lock().unwrap() = Some(CacheEntry {
            fetched_at: Instant::now(),
            files,
        });
    }

    pub fn invalidate(&self) {
        *self.entry.lock().unwrap() = None;
    }

    /// Looks up a cached checksum for `site_name`, honoring `ttl`. Returns
    /// `None` on cache miss or expiry, never forcing a refresh (§4.9.3 step 3).
    pub fn checksum_for(&self, site_name: &str, ttl: Duration) -> Option<String> {
        let guard = self.entry.lock().unwrap();
        let entry = guard.as_ref()?;
        if entry.fetched_at.elapsed() > ttl {
            return None;
        }
        entry.files.get(site_name).map(|f| f.checksum.clone())
    }
}
