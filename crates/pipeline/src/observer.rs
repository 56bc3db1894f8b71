//! Progress and log reporting.
//!
//! The pipeline writes to an [`Observer`] and never reads back from it.
//! [`RunLog`] is the bundled implementation: it keeps the latest progress
//! record and a bounded log, the way an admin screen would poll them.

use crate::error::{ErrorKind, Result};
use crate::lease::RunLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;

/// Entries kept by [`RunLog`]; the oldest are dropped first.
pub const LOG_CAPACITY: usize = 1_000;
/// A progress record not refreshed for this long is considered abandoned.
pub const PROGRESS_TTL: Duration = Duration::from_secs(3_600);

/// Where a run stands, on a 0 to 100 scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    pub status: String,
    pub percentage: u8,
    #[serde(with = "time::serde::timestamp")]
    pub updated_at: OffsetDateTime,
}

impl Progress {
    pub fn new(current: u32, total: u32, status: impl Into<String>) -> Self {
        let percentage = if total == 0 { 0 } else { (u64::from(current.min(total)) * 100 / u64::from(total)) as u8 };
        Self { current, total, status: status.into(), percentage, updated_at: OffsetDateTime::now_utc() }
    }

    /// The zero/zero state reported after a fatal error.
    pub fn failed() -> Self {
        Self::new(0, 0, "failed")
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.updated_at + PROGRESS_TTL < now
    }
}

/// One line of the user-visible run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
    pub message: String,
    pub is_error: bool,
}

impl LogRecord {
    pub fn new(message: impl Into<String>, is_error: bool) -> Self {
        Self { timestamp: OffsetDateTime::now_utc(), message: message.into(), is_error }
    }
}

/// Write-only sink for what a run reports.
pub trait Observer: Send + Sync {
    fn progress(&self, progress: &Progress);
    fn log(&self, record: &LogRecord);
}

/// Latest progress plus a bounded, ordered log.
#[derive(Debug, Default)]
pub struct RunLog {
    progress: Mutex<Option<Progress>>,
    records: Mutex<VecDeque<LogRecord>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest progress record, unless it has expired.
    pub fn current(&self) -> Option<Progress> {
        let progress = self.progress.lock().ok()?.clone()?;
        (!progress.is_expired(OffsetDateTime::now_utc())).then_some(progress)
    }

    /// Log entries, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map(|records| records.iter().cloned().collect()).unwrap_or_default()
    }

    /// Drop every log entry. Refused while `lock` is held by a run.
    pub fn clear(&self, lock: &RunLock) -> Result<()> {
        if lock.is_held() {
            exn::bail!(ErrorKind::LogLocked);
        }
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
        if let Ok(mut progress) = self.progress.lock() {
            *progress = None;
        }
        Ok(())
    }
}

impl Observer for RunLog {
    fn progress(&self, progress: &Progress) {
        if let Ok(mut current) = self.progress.lock() {
            *current = Some(progress.clone());
        }
    }

    fn log(&self, record: &LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            while records.len() >= LOG_CAPACITY {
                records.pop_front();
            }
            records.push_back(record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case(0, 100, 0)]
    #[case(40, 100, 40)]
    #[case(100, 100, 100)]
    #[case(1, 3, 33)]
    #[case(0, 0, 0)]
    fn test_percentage(#[case] current: u32, #[case] total: u32, #[case] expected: u8) {
        assert_eq!(Progress::new(current, total, "x").percentage, expected);
    }

    #[test]
    fn test_log_is_capped() {
        let log = RunLog::new();
        for i in 0..LOG_CAPACITY + 5 {
            log.log(&LogRecord::new(format!("line {i}"), false));
        }
        let records = log.records();
        assert_eq!(records.len(), LOG_CAPACITY);
        assert_eq!(records[0].message, "line 5");
        assert_eq!(records[LOG_CAPACITY - 1].message, format!("line {}", LOG_CAPACITY + 4));
    }

    #[test]
    fn test_clear_refused_while_running() {
        let state = TempDir::new().unwrap();
        let lock = RunLock::new(state.path(), Duration::from_secs(60));
        let log = RunLog::new();
        log.log(&LogRecord::new("hello", false));

        let lease = lock.acquire().unwrap();
        let err = log.clear(&lock).unwrap_err();
        assert!(matches!(&*err, ErrorKind::LogLocked));
        assert_eq!(log.records().len(), 1);

        drop(lease);
        log.clear(&lock).unwrap();
        assert!(log.records().is_empty());
    }

    #[test]
    fn test_expired_progress_is_hidden() {
        let log = RunLog::new();
        let mut stale = Progress::new(50, 100, "Fetching");
        stale.updated_at -= PROGRESS_TTL + Duration::from_secs(1);
        log.progress(&stale);
        assert_eq!(log.current(), None);

        log.progress(&Progress::new(60, 100, "Fetching"));
        assert_eq!(log.current().unwrap().percentage, 60);
    }
}
