//! Monotonically increasing sync counters plus a bounded recent-errors ring
//! (§3 Data Model, §7). Mutated only by the drain worker, the initial
//! reconcile routine, and the poller callback — never concurrently (§5).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{RecentError, RecentErrors};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub files_downloaded: u64,
    pub files_uploaded: u64,
    pub files_downloaded_skipped: u64,
    pub files_uploaded_skipped: u64,
    pub files_protected: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Owns the live counters and the recent-errors ring. A single writer holds
/// `&mut StatsTracker` at a time; readers get immutable snapshots.
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: Stats,
    recent_errors: RecentErrors,
}

impl StatsTracker {
    pub fn reset(&mut self) {
        self.stats = Stats::default();
        self.recent_errors = RecentErrors::default();
    }

    pub fn snapshot(&self) -> Stats {
        self.stats.clone()
    }

    pub fn recent_errors(&self) -> Vec<RecentError> {
        self.recent_errors.snapshot()
    }

    pub fn record_error(&mut self, error: RecentError) {
        self.recent_errors.push(error);
    }

    pub fn incr_downloaded(&mut self) {
        self.stats.files_downloaded += 1;
    }

    pub fn incr_uploaded(&mut self) {
        self.stats.files_uploaded += 1;
    }

    pub fn incr_downloaded_skipped(&mut self) {
        self.stats.files_downloaded_skipped += 1;
    }

    pub fn incr_uploaded_skipped(&mut self) {
        self.stats.files_uploaded_skipped += 1;
    }

    pub fn incr_protected(&mut self) {
        self.stats.files_protected += 1;
    }

    pub fn touch_last_sync(&mut self, at: DateTime<Utc>) {
        self.stats.last_sync = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, Priority};

    #[test]
    fn counters_start_at_zero_and_increment() {
        let mut tracker = StatsTracker::default();
        tracker.incr_downloaded();
        tracker.incr_downloaded();
        tracker.incr_uploaded();
        let snap = tracker.snapshot();
        assert_eq!(snap.files_downloaded, 2);
        assert_eq!(snap.files_uploaded, 1);
        assert_eq!(snap.files_protected, 0);
    }

    #[test]
    fn reset_clears_counters_and_errors() {
        let mut tracker = StatsTracker::default();
        tracker.incr_uploaded();
        tracker.record_error(RecentError {
            file: Some("a.html".to_string()),
            message: "boom".to_string(),
            kind: ErrorKind::Network,
            priority: Priority::Medium,
        });
        tracker.reset();
        assert_eq!(tracker.snapshot().files_uploaded, 0);
        assert!(tracker.recent_errors().is_empty());
    }
}
