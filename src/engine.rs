//! The orchestrator: owns lifecycle, initial reconcile, push/pull, stats,
//! and the event stream (§4.9). A plain struct constructed by the caller —
//! never a process-global (§9 Design Notes, `[[Open question resolved]]`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;

use crate::backup;
use crate::checksum::{self, ClockOffset};
use crate::config::RuntimeOptions;
use crate::errors::{self, ErrorKind, RecentError};
use crate::events::{EventBus, SyncAction, SyncEvent};
use crate::filters::SyncExclusions;
use crate::http::{ApiClient, HttpStats, RemoteFileEntry, UploadOutcome, UploadRequest};
use crate::logging;
use crate::poller::Poller;
use crate::queue::{ItemKind, RetryOutcome, RetryTracker, ServerFilesCache, SyncQueue};
use crate::scanner::{self, LocalFile};
use crate::stats::{Stats, StatsTracker};
use crate::validator;
use crate::watcher::{FileWatcher, WatchEvent, WatchEventKind};
use crate::workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Initializing,
    Running,
    Stopping,
}

struct RunningHandles {
    watcher: FileWatcher,
    poller: Poller,
    worker: tokio::task::JoinHandle<()>,
}

pub struct Engine {
    sync_root: PathBuf,
    api: ApiClient,
    runtime: RuntimeOptions,
    exclusions: SyncExclusions,
    events: EventBus,

    state: Arc<Mutex<EngineState>>,
    running: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,

    clock_offset: Arc<Mutex<ClockOffset>>,
    stats: Arc<Mutex<StatsTracker>>,
    queue: Arc<SyncQueue>,
    retries: Arc<Mutex<RetryTracker>>,
    cache: Arc<ServerFilesCache>,

    handles: Option<RunningHandles>,
}

impl Engine {
    pub fn new(sync_root: &Path, server_url: &str, api_key: &str) -> Result<Self> {
        let exclusions = SyncExclusions::load(sync_root)?;
        let http_stats = Arc::new(HttpStats::default());
        let api = ApiClient::new(server_url, api_key, http_stats)?;
        Ok(Self {
            sync_root: sync_root.to_path_buf(),
            api,
            runtime: RuntimeOptions::default(),
            exclusions,
            events: EventBus::new(),
            state: Arc::new(Mutex::new(EngineState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
            clock_offset: Arc::new(Mutex::new(ClockOffset::zero())),
            stats: Arc::new(Mutex::new(StatsTracker::default())),
            queue: Arc::new(SyncQueue::new()),
            retries: Arc::new(Mutex::new(RetryTracker::new())),
            cache: Arc::new(ServerFilesCache::new()),
            handles: None,
        })
    }

    pub fn with_runtime_options(mut self, runtime: RuntimeOptions) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> EngineState {
        *self.state.lock().await
    }

    pub async fn stats_snapshot(&self) -> Stats {
        self.stats.lock().await.snapshot()
    }

    pub async fn recent_errors(&self) -> Vec<RecentError> {
        self.stats.lock().await.recent_errors()
    }

    /// §4.9.1 init(apiKey, username, syncFolder, serverUrl). `username` is
    /// accepted for parity with the configuration surface (§6) but is not
    /// otherwise consulted by the core — the server scopes the API key.
    pub async fn init(&mut self, _username: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != EngineState::Idle {
                anyhow::bail!("engine must be idle before init (current: {state:?})");
            }
            *state = EngineState::Initializing;
        }

        match self.init_inner().await {
            Ok(()) => {
                *self.state.lock().await = EngineState::Running;
                self.running.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                *self.state.lock().await = EngineState::Idle;
                Err(e)
            }
        }
    }

    async fn init_inner(&mut self) -> Result<()> {
        self.stats.lock().await.reset();
        self.queue.clear();
        self.retries.lock().await.reset();
        self.cache.invalidate();

        workspace::ensure_workspace_layout(&self.sync_root)?;

        let local_now = Utc::now();
        let status = self
            .api
            .status()
            .await
            .context("fetch /sync/status during init")?;
        *self.clock_offset.lock().await = ClockOffset::sample(status.server_time, local_now);

        self.initial_reconcile(status.server_time).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(1024);
        let watcher = FileWatcher::start(
            &self.sync_root,
            self.exclusions.clone(),
            self.runtime.watcher_stability,
            tx,
        )
        .context("start file watcher")?;

        let worker = self.spawn_worker(rx);

        let poller = {
            let engine_poll = self.clone_for_poller();
            Poller::spawn(self.runtime.poll_interval, move || {
                let engine_poll = engine_poll.clone();
                async move {
                    if engine_poll.draining.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Err(e) = engine_poll.remote_changes_check().await {
                        logging::error(&format!("poller check failed: {e:#}"));
                    }
                }
            })
        };

        self.handles = Some(RunningHandles {
            watcher,
            poller,
            worker,
        });

        Ok(())
    }

    /// A cheap, cloneable projection of shared state for background tasks
    /// (poller/worker) that must outlive the borrow of `&mut self`.
    fn clone_for_poller(&self) -> EngineHandle {
        EngineHandle {
            sync_root: self.sync_root.clone(),
            api: self.api.clone(),
            runtime: self.runtime,
            events: self.events.clone(),
            draining: self.draining.clone(),
            running: self.running.clone(),
            clock_offset: self.clock_offset.clone(),
            stats: self.stats.clone(),
            queue: self.queue.clone(),
            retries: self.retries.clone(),
            cache: self.cache.clone(),
        }
    }

    fn spawn_worker(&self, mut rx: tokio::sync::mpsc::Receiver<WatchEvent>) -> tokio::task::JoinHandle<()> {
        let handle = self.clone_for_poller();
        let debounce = self.runtime.debounce_window;
        let queue = self.queue.clone();

        tokio::spawn(async move {
            loop {
                let Some(event) = rx.recv().await else {
                    return;
                };
                if event.kind == WatchEventKind::Unlink {
                    continue;
                }

                let validation = validator::validate_path(&event.relative_path);
                if !validation.valid {
                    handle.events.emit(SyncEvent::SyncError {
                        file: Some(event.relative_path.clone()),
                        error: validation.error.unwrap_or_default(),
                        kind: ErrorKind::Validation,
                        priority: errors::Priority::High,
                        action: "upload",
                        can_retry: false,
                    });
                    continue;
                }

                let item_kind = match event.kind {
                    WatchEventKind::Add => ItemKind::Add,
                    WatchEventKind::Change => ItemKind::Change,
                    WatchEventKind::Unlink => unreachable!(),
                };
                queue.enqueue(item_kind, &event.relative_path);

                tokio::time::sleep(debounce).await;
                handle.drain_queue().await;
            }
        })
    }

    async fn initial_reconcile(&self, server_now: chrono::DateTime<Utc>) -> Result<()> {
        self.events.emit(SyncEvent::SyncStart { kind: "initial" });

        let remote = self.api.list().await.context("list server files")?;
        self.cache.set(
            remote
                .files
                .iter()
                .map(|f| (f.filename.clone(), f.clone()))
                .collect(),
        );

        let local = scanner::scan(&self.sync_root, &self.exclusions)?;
        let clock_offset = *self.clock_offset.lock().await;
        let buffer = self.runtime.clock_buffer;

        for remote_file in &remote.files {
            if let Err(e) = self
                .reconcile_one(remote_file, &local, clock_offset, server_now, buffer)
                .await
            {
                let mut stats = self.stats.lock().await;
                stats.record_error(RecentError {
                    file: Some(remote_file.path.clone()),
                    message: format!("{e:#}"),
                    kind: ErrorKind::Unknown,
                    priority: errors::Priority::Medium,
                });
                logging::error(&format!("reconcile {} failed: {e:#}", remote_file.path));
            }
        }

        let remote_paths: std::collections::HashSet<&str> =
            remote.files.iter().map(|f| f.path.as_str()).collect();
        for (relative_path, local_file) in &local {
            if remote_paths.contains(relative_path.as_str()) {
                continue;
            }
            if let Err(e) = self.upload_local_file(local_file).await {
                let mut stats = self.stats.lock().await;
                stats.record_error(RecentError {
                    file: Some(relative_path.clone()),
                    message: format!("{e:#}"),
                    kind: ErrorKind::Unknown,
                    priority: errors::Priority::Medium,
                });
                logging::error(&format!("initial upload {relative_path} failed: {e:#}"));
            } else {
                self.stats.lock().await.incr_uploaded();
            }
        }

        let snapshot = {
            let mut stats = self.stats.lock().await;
            stats.touch_last_sync(Utc::now());
            stats.snapshot()
        };
        self.events.emit(SyncEvent::SyncComplete {
            kind: "initial",
            stats: snapshot,
        });
        Ok(())
    }

    async fn reconcile_one(
        &self,
        remote_file: &RemoteFileEntry,
        local: &HashMap<String, LocalFile>,
        clock_offset: ClockOffset,
        server_now: chrono::DateTime<Utc>,
        buffer: Duration,
    ) -> Result<()> {
        let Some(local_file) = local.get(&remote_file.path) else {
            self.download_and_write(remote_file).await?;
            self.stats.lock().await.incr_downloaded();
            return Ok(());
        };

        let local_mtime: chrono::DateTime<Utc> = local_file.mtime.into();

        if clock_offset.is_future(local_mtime, server_now, buffer) {
            self.stats.lock().await.incr_protected();
            return Ok(());
        }
        if clock_offset.is_local_newer(local_mtime, remote_file.modified_at, buffer) {
            self.stats.lock().await.incr_protected();
            return Ok(());
        }

        let local_checksum = checksum::checksum_file(&local_file.absolute_path)?;
        if local_checksum == remote_file.checksum {
            self.stats.lock().await.incr_downloaded_skipped();
            return Ok(());
        }

        self.download_and_write(remote_file).await?;
        self.stats.lock().await.incr_downloaded();
        Ok(())
    }

    /// §4.9.6 Download protocol.
    async fn download_and_write(&self, remote_file: &RemoteFileEntry) -> Result<()> {
        let site_name = site_name_of(&remote_file.path);
        let download = self
            .api
            .download(&site_name)
            .await
            .with_context(|| format!("download {site_name}"))?;

        let dest = self.sync_root.join(&remote_file.path);

        if dest.exists() {
            let previous = std::fs::read(&dest).with_context(|| format!("read {}", dest.display()))?;
            if let Some(backup_path) = backup::snapshot_best_effort(&self.sync_root, &site_name, &previous) {
                self.events.emit(SyncEvent::BackupCreated {
                    original: remote_file.path.clone(),
                    backup: backup_path.display().to_string(),
                });
                backup::enforce_retention(&self.sync_root, &site_name, self.runtime.max_backups_per_site);
            }
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&dest, download.content.as_bytes())
            .with_context(|| format!("write {}", dest.display()))?;
        let mtime = std::time::SystemTime::from(download.modified_at);
        let _ = filetime_set_mtime(&dest, mtime);

        self.events.emit(SyncEvent::FileSynced {
            file: remote_file.path.clone(),
            action: SyncAction::Download,
        });
        Ok(())
    }

    async fn upload_local_file(&self, local_file: &LocalFile) -> Result<()> {
        let site_name = site_name_of(&local_file.relative_path);
        let content = std::fs::read_to_string(&local_file.absolute_path)
            .with_context(|| format!("read {}", local_file.absolute_path.display()))?;
        let request = UploadRequest {
            filename: &site_name,
            content: &content,
            modified_at: local_file.mtime.into(),
        };
        match self.api.upload(&request).await? {
            UploadOutcome::Uploaded => {
                self.cache.invalidate();
                self.events.emit(SyncEvent::FileSynced {
                    file: local_file.relative_path.clone(),
                    action: SyncAction::Upload,
                });
                Ok(())
            }
            UploadOutcome::Conflict { suggestions, message } => {
                self.events.emit(SyncEvent::SyncConflict {
                    file: local_file.relative_path.clone(),
                    conflict: "name_taken",
                    suggestions,
                    message,
                });
                anyhow::bail!("name conflict uploading {site_name}")
            }
        }
    }

    pub async fn stop(&mut self) {
        *self.state.lock().await = EngineState::Stopping;
        self.running.store(false, Ordering::SeqCst);

        if let Some(handles) = self.handles.take() {
            handles.worker.abort();
            handles.poller.stop();
            drop(handles.watcher);
        }

        self.queue.clear();
        self.retries.lock().await.reset();
        self.cache.invalidate();

        *self.state.lock().await = EngineState::Idle;
    }
}

pub(crate) fn site_name_of(relative_path: &str) -> String {
    relative_path
        .strip_suffix(".html")
        .unwrap_or(relative_path)
        .to_string()
}

fn filetime_set_mtime(path: &Path, mtime: std::time::SystemTime) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(mtime)
}

/// A cheap projection of the engine's shared state, cloneable into
/// background tasks (poller, worker drain loop) that outlive `&mut self`.
#[derive(Clone)]
struct EngineHandle {
    sync_root: PathBuf,
    api: ApiClient,
    runtime: RuntimeOptions,
    events: EventBus,
    draining: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    clock_offset: Arc<Mutex<ClockOffset>>,
    stats: Arc<Mutex<StatsTracker>>,
    queue: Arc<SyncQueue>,
    retries: Arc<Mutex<RetryTracker>>,
    cache: Arc<ServerFilesCache>,
}

impl EngineHandle {
    /// §4.9.3 worker drain loop.
    async fn drain_queue(&self) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        while let Some(item) = self.queue.pop_front() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.process_item(&item.relative_path).await;
        }

        self.draining.store(false, Ordering::SeqCst);
    }

    async fn process_item(&self, relative_path: &str) {
        let site_name = site_name_of(relative_path);
        let absolute_path = self.sync_root.join(relative_path);

        let bytes = match std::fs::read(&absolute_path) {
            Ok(b) => b,
            Err(e) => {
                self.emit_error(relative_path, ErrorKind::FileAccess, format!("{e}"), "upload");
                return;
            }
        };
        let local_checksum = checksum::checksum_bytes(&bytes);

        if let Some(cached) = self.cache.checksum_for(&site_name, self.runtime.cache_ttl) {
            if cached == local_checksum {
                self.stats.lock().await.incr_uploaded_skipped();
                return;
            }
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();
        let mtime: chrono::DateTime<Utc> = std::fs::metadata(&absolute_path)
            .and_then(|m| m.modified())
            .map(chrono::DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let request = UploadRequest {
            filename: &site_name,
            content: &content,
            modified_at: mtime,
        };

        match self.api.upload(&request).await {
            Ok(UploadOutcome::Uploaded) => {
                self.cache.invalidate();
                self.stats.lock().await.incr_uploaded();
                self.retries.lock().await.clear_path(relative_path);
                self.events.emit(SyncEvent::FileSynced {
                    file: relative_path.to_string(),
                    action: SyncAction::Upload,
                });
            }
            Ok(UploadOutcome::Conflict { suggestions, message }) => {
                self.events.emit(SyncEvent::SyncConflict {
                    file: relative_path.to_string(),
                    conflict: "name_taken",
                    suggestions,
                    message,
                });
            }
            Err(e) => {
                let status = e
                    .downcast_ref::<crate::http::ApiError>()
                    .map(|api_err| api_err.status_code);
                let classification = status
                    .map(errors::classify_status)
                    .unwrap_or_else(|| ErrorKind::Network.classify());

                if !classification.retryable {
                    self.emit_error(
                        relative_path,
                        classification.kind,
                        format!("{e:#}"),
                        "upload",
                    );
                    return;
                }

                let outcome = {
                    let mut retries = self.retries.lock().await;
                    retries.record_failure(
                        relative_path,
                        classification.kind,
                        self.runtime.max_retries,
                        &self.runtime.retry_delays,
                    )
                };

                match outcome {
                    RetryOutcome::ScheduleRetry { attempt, delay } => {
                        self.events.emit(SyncEvent::SyncRetry {
                            file: relative_path.to_string(),
                            attempt,
                            max_attempts: self.runtime.max_retries,
                            next_retry_in_ms: delay.as_millis() as u64,
                            error: format!("{e:#}"),
                        });
                        let queue = self.queue.clone();
                        let relative_path = relative_path.to_string();
                        let handle = self.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            queue.enqueue(ItemKind::Change, &relative_path);
                            handle.drain_queue().await;
                        });
                    }
                    RetryOutcome::PermanentlyFailed { attempts } => {
                        self.events.emit(SyncEvent::SyncFailed {
                            file: relative_path.to_string(),
                            error: format!("{e:#}"),
                            priority: errors::Priority::Critical,
                            attempts,
                            final_failure: true,
                        });
                    }
                }
            }
        }
    }

    fn emit_error(&self, file: &str, kind: ErrorKind, message: String, action: &'static str) {
        let classification = kind.classify();
        self.events.emit(SyncEvent::SyncError {
            file: Some(file.to_string()),
            error: message,
            kind,
            priority: classification.priority,
            action,
            can_retry: classification.retryable,
        });
    }

    /// §4.9.5 remote-changes check (poller). Never initiates uploads.
    async fn remote_changes_check(&self) -> Result<()> {
        let remote = self.api.list().await.context("poller list")?;
        self.cache.set(
            remote
                .files
                .iter()
                .map(|f| (f.filename.clone(), f.clone()))
                .collect(),
        );

        let clock_offset = *self.clock_offset.lock().await;
        let buffer = self.runtime.clock_buffer;

        for remote_file in &remote.files {
            let dest = self.sync_root.join(&remote_file.path);
            let site_name = site_name_of(&remote_file.path);

            if !dest.exists() {
                self.download_poller(remote_file).await;
                continue;
            }

            let local_checksum = match checksum::checksum_file(&dest) {
                Ok(c) => c,
                Err(e) => {
                    logging::error(&format!("checksum {} failed: {e:#}", dest.display()));
                    continue;
                }
            };
            if local_checksum == remote_file.checksum {
                continue;
            }

            let local_mtime: chrono::DateTime<Utc> = match std::fs::metadata(&dest).and_then(|m| m.modified()) {
                Ok(m) => m.into(),
                Err(_) => continue,
            };
            if clock_offset.is_local_newer(local_mtime, remote_file.modified_at, buffer) {
                self.stats.lock().await.incr_protected();
                continue;
            }

            if let Ok(previous) = std::fs::read(&dest) {
                if backup::snapshot_best_effort(&self.sync_root, &site_name, &previous).is_some() {
                    backup::enforce_retention(&self.sync_root, &site_name, self.runtime.max_backups_per_site);
                }
            }
            self.download_poller(remote_file).await;
        }

        Ok(())
    }

    async fn download_poller(&self, remote_file: &RemoteFileEntry) {
        let site_name = site_name_of(&remote_file.path);
        match self.api.download(&site_name).await {
            Ok(download) => {
                let dest = self.sync_root.join(&remote_file.path);
                if let Some(parent) = dest.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if std::fs::write(&dest, download.content.as_bytes()).is_ok() {
                    let _ = filetime_set_mtime(&dest, download.modified_at.into());
                    self.stats.lock().await.incr_downloaded();
                    self.events.emit(SyncEvent::FileSynced {
                        file: remote_file.path.clone(),
                        action: SyncAction::Download,
                    });
                }
            }
            Err(e) => {
                logging::error(&format!("poller download {site_name} failed: {e:#}"));
            }
        }
    }
}
