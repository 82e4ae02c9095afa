//! Maps a raised error + operation context to (kind, priority, retryable)
//! triples (§4.4). Shapes UI priority and drives the retry gate in §4.5.

use std::collections::VecDeque;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Auth,
    Network,
    RateLimit,
    NameConflict,
    Validation,
    NotFound,
    Server,
    FileAccess,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub kind: ErrorKind,
    pub priority: Priority,
    pub retryable: bool,
}

impl ErrorKind {
    pub fn classify(self) -> Classification {
        use ErrorKind::*;
        let (priority, retryable) = match self {
            Auth => (Priority::Critical, false),
            Network => (Priority::Medium, true),
            RateLimit => (Priority::Medium, true),
            Server => (Priority::Medium, true),
            NameConflict => (Priority::High, false),
            Validation => (Priority::High, false),
            NotFound => (Priority::Medium, false),
            FileAccess => (Priority::Medium, false),
            Unknown => (Priority::Low, false),
        };
        Classification {
            kind: self,
            priority,
            retryable,
        }
    }
}

/// Classifies an HTTP status code raised by the API client (§4.3/§4.4).
pub fn classify_status(status: u16) -> Classification {
    let kind = match status {
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::NameConflict,
        422 => ErrorKind::Validation,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Unknown,
    };
    kind.classify()
}

/// A recorded entry in the bounded recent-errors ring (§7, `getStatus()`).
#[derive(Debug, Clone, Serialize)]
pub struct RecentError {
    pub file: Option<String>,
    pub message: String,
    pub kind: ErrorKind,
    pub priority: Priority,
}

const RECENT_ERRORS_CAPACITY: usize = 50;

#[derive(Debug, Default)]
pub struct RecentErrors {
    ring: VecDeque<RecentError>,
}

impl RecentErrors {
    pub fn push(&mut self, entry: RecentError) {
        if self.ring.len() == RECENT_ERRORS_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<RecentError> {
        self.ring.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_server_and_rate_limit_are_retryable() {
        assert!(ErrorKind::Network.classify().retryable);
        assert!(ErrorKind::RateLimit.classify().retryable);
        assert!(ErrorKind::Server.classify().retryable);
    }

    #[test]
    fn auth_validation_name_conflict_are_not_retryable() {
        assert!(!ErrorKind::Auth.classify().retryable);
        assert!(!ErrorKind::Validation.classify().retryable);
        assert!(!ErrorKind::NameConflict.classify().retryable);
    }

    #[test]
    fn classify_status_maps_common_codes() {
        assert_eq!(classify_status(401).kind, ErrorKind::Auth);
        assert_eq!(classify_status(409).kind, ErrorKind::NameConflict);
        assert_eq!(classify_status(503).kind, ErrorKind::Server);
        assert!(classify_status(503).retryable);
    }

    #[test]
    fn recent_errors_ring_is_bounded() {
        let mut ring = RecentErrors::default();
        for i in 0..60 {
            ring.push(RecentError {
                file: Some(format!("f{i}.html")),
                message: "boom".to_string(),
                kind: ErrorKind::Network,
                priority: Priority::Medium,
            });
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 50);
        assert_eq!(snap.first().unwrap().file.as_deref(), Some("f10.html"));
        assert_eq!(snap.last().unwrap().file.as_deref(), Some("f59.html"));
    }
}
