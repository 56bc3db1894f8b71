//! Run exclusivity.
//!
//! A run holds a marker file for its whole duration. The marker records when
//! it expires, so a process that died without cleaning up blocks new runs
//! for at most one TTL. Each marker carries a random token, and a lease only
//! ever removes the marker holding its own token.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// File name of the marker inside the state directory.
pub const MARKER_FILE: &str = "run.lock";

#[derive(Debug, Serialize, Deserialize)]
struct Marker {
    #[serde(with = "time::serde::timestamp")]
    expires_at: OffsetDateTime,
    pid: u32,
    token: Uuid,
}

/// The run marker location and lifetime.
#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
    ttl: Duration,
}

impl RunLock {
    pub fn new(state_dir: impl AsRef<Path>, ttl: Duration) -> Self {
        Self { path: state_dir.as_ref().join(MARKER_FILE), ttl }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lease. Fails with [`AlreadyRunning`](ErrorKind::AlreadyRunning)
    /// while another live marker exists; an expired or unreadable marker is
    /// replaced.
    pub fn acquire(&self) -> Result<RunLease> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).or_raise(|| ErrorKind::Lease(self.path.clone()))?;
        }
        // Second attempt only after removing a stale marker.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(mut file) => {
                    let marker = Marker {
                        expires_at: OffsetDateTime::now_utc() + self.ttl,
                        pid: std::process::id(),
                        token: Uuid::new_v4(),
                    };
                    let encoded = serde_json::to_vec(&marker).or_raise(|| ErrorKind::Lease(self.path.clone()))?;
                    let lease = RunLease { path: self.path.clone(), token: marker.token };
                    file.write_all(&encoded).or_raise(|| ErrorKind::Lease(self.path.clone()))?;
                    tracing::debug!(path = %self.path.display(), expires_at = %marker.expires_at, "Run lease acquired");
                    return Ok(lease);
                },
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    if let Some(marker) = self.live_marker() {
                        tracing::info!(pid = marker.pid, expires_at = %marker.expires_at, "Run marker is held");
                        exn::bail!(ErrorKind::AlreadyRunning);
                    }
                    tracing::warn!(path = %self.path.display(), "Replacing expired run marker");
                    match fs::remove_file(&self.path) {
                        Ok(()) => {},
                        Err(e) if e.kind() == IoErrorKind::NotFound => {},
                        Err(e) => return Err(e).or_raise(|| ErrorKind::Lease(self.path.clone())),
                    }
                },
                Err(e) => return Err(e).or_raise(|| ErrorKind::Lease(self.path.clone())),
            }
        }
        exn::bail!(ErrorKind::AlreadyRunning)
    }

    /// Whether a live (unexpired) marker exists.
    pub fn is_held(&self) -> bool {
        self.live_marker().is_some()
    }

    fn live_marker(&self) -> Option<Marker> {
        read_marker(&self.path).filter(|marker| marker.expires_at > OffsetDateTime::now_utc())
    }
}

fn read_marker(path: &Path) -> Option<Marker> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Proof of exclusivity for one run. Dropping it removes the marker, unless
/// the marker expired and another run has since replaced it.
#[derive(Debug)]
pub struct RunLease {
    path: PathBuf,
    token: Uuid,
}

impl Drop for RunLease {
    fn drop(&mut self) {
        match read_marker(&self.path) {
            Some(marker) if marker.token == self.token => {},
            Some(marker) => {
                tracing::warn!(path = %self.path.display(), pid = marker.pid, "Run marker was taken over after expiry; leaving it");
                return;
            },
            None => {
                tracing::warn!(path = %self.path.display(), "Run marker is missing or unreadable; leaving it");
                return;
            },
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Run lease released"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => tracing::error!(path = %self.path.display(), error = %e, "Could not remove run marker"),
        }
    }
}
