//! Content fingerprints and skew-tolerant clock comparisons.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Stable content fingerprint agreed with the server. Computed identically
/// whether the bytes come from disk or from an HTTP response body.
pub fn checksum_bytes(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

pub fn checksum_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

/// Signed offset sampled once at init: server_now - local_now.
#[derive(Debug, Clone, Copy)]
pub struct ClockOffset {
    offset_ms: i64,
}

impl ClockOffset {
    pub fn sample(server_now: DateTime<Utc>, local_now: DateTime<Utc>) -> Self {
        Self {
            offset_ms: server_now.timestamp_millis() - local_now.timestamp_millis(),
        }
    }

    pub fn zero() -> Self {
        Self { offset_ms: 0 }
    }

    pub fn normalize(&self, t_local: DateTime<Utc>) -> DateTime<Utc> {
        t_local + chrono::Duration::milliseconds(self.offset_ms)
    }

    pub fn is_future(&self, t_local: DateTime<Utc>, server_now: DateTime<Utc>, buffer: Duration) -> bool {
        self.normalize(t_local) > server_now + chrono::Duration::from_std(buffer).unwrap_or_default()
    }

    pub fn is_local_newer(
        &self,
        t_local: DateTime<Utc>,
        t_server: DateTime<Utc>,
        buffer: Duration,
    ) -> bool {
        self.normalize(t_local) > t_server + chrono::Duration::from_std(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn checksum_bytes_and_file_agree() {
        let tmp = std::env::temp_dir().join("sitesync-rs-checksum-test.html");
        let mut f = File::create(&tmp).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        let from_bytes = checksum_bytes(b"hello world");
        let from_file = checksum_file(&tmp).unwrap();
        assert_eq!(from_bytes, from_file);
        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn clock_offset_normalizes_local_time() {
        let server_now = DateTime::parse_from_rfc3339("2025-01-01T00:00:10Z")
            .unwrap()
            .with_timezone(&Utc);
        let local_now = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let offset = ClockOffset::sample(server_now, local_now);

        let t_local = DateTime::parse_from_rfc3339("2025-01-01T00:00:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let normalized = offset.normalize(t_local);
        assert_eq!(normalized, DateTime::parse_from_rfc3339("2025-01-01T00:00:15Z").unwrap());
    }

    #[test]
    fn is_future_respects_buffer() {
        let server_now = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let offset = ClockOffset::zero();
        let buffer = Duration::from_secs(10);

        let just_over = DateTime::parse_from_rfc3339("2025-01-01T00:00:11Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(offset.is_future(just_over, server_now, buffer));

        let within_buffer = DateTime::parse_from_rfc3339("2025-01-01T00:00:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!offset.is_future(within_buffer, server_now, buffer));
    }

    #[test]
    fn is_local_newer_respects_buffer() {
        let offset = ClockOffset::zero();
        let buffer = Duration::from_secs(10);
        let t_server = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let within = DateTime::parse_from_rfc3339("2025-01-01T00:00:08Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!offset.is_local_newer(within, t_server, buffer));

        let beyond = DateTime::parse_from_rfc3339("2025-01-01T00:00:20Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(offset.is_local_newer(beyond, t_server, buffer));
    }
}
