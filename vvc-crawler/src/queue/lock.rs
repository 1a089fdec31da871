//! Advisory exclusive lock on a path
//!
//! One interface, one platform-conditional liveness probe; callers never
//! see the branching. The lock is a sidecar file created with
//! `create_new`, carrying the holder's pid and acquisition time. Stale or
//! corrupt lockfiles (dead pid, or older than the stale window) are
//! archived and reclaimed. Acquisition retries with exponential backoff up
//! to a bounded budget.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vvc_common::{Error, Result};

const LOCK_STALE_SECONDS: i64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    created: String,
    operation: String,
}

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct PathLock {
    path: PathBuf,
    released: bool,
}

impl PathLock {
    /// Acquire the lock for `target`, retrying with exponential backoff.
    ///
    /// `max_attempts` bounds the retry loop; each failed attempt doubles the
    /// wait starting from `backoff_ms`.
    pub async fn acquire(
        target: &Path,
        operation: &str,
        max_attempts: u32,
        backoff_ms: u64,
    ) -> Result<Self> {
        let mut attempt = 0;
        let mut wait_ms = backoff_ms.max(1);

        loop {
            attempt += 1;
            match Self::try_acquire(target, operation) {
                Ok(lock) => return Ok(lock),
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(
                        target = %target.display(),
                        attempts = attempt,
                        error = %e,
                        "Failed to acquire lock: retry budget exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        target = %target.display(),
                        attempt,
                        backoff_ms = wait_ms,
                        error = %e,
                        "Lock busy, will retry after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    wait_ms = (wait_ms * 2).min(5000);
                }
            }
        }
    }

    /// Single acquisition attempt.
    pub fn try_acquire(target: &Path, operation: &str) -> Result<Self> {
        let path = lock_path(target);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            match serde_json::from_str::<LockInfo>(&contents) {
                Ok(info) => {
                    if is_lock_stale(&info) {
                        archive_stale_lock(&path, "stale")?;
                        tracing::warn!(
                            lock = %path.display(),
                            pid = info.pid,
                            "Reclaimed stale lock"
                        );
                    } else {
                        return Err(Error::Transient(format!(
                            "lock held by pid {} since {}; remove {} if the process is dead",
                            info.pid,
                            info.created,
                            path.display()
                        )));
                    }
                }
                Err(_) => {
                    // Corrupt lock file; archive and proceed
                    archive_stale_lock(&path, "corrupt")?;
                    tracing::warn!(lock = %path.display(), "Reclaimed corrupt lock file");
                }
            }
        }

        let info = LockInfo {
            pid: std::process::id(),
            created: Utc::now().to_rfc3339(),
            operation: operation.to_string(),
        };

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                Error::Transient(format!("failed to create lock {}: {}", path.display(), e))
            })?;
        file.write_all(
            serde_json::to_string_pretty(&info)
                .map_err(|e| Error::Internal(e.to_string()))?
                .as_bytes(),
        )?;
        file.sync_all()?;

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        self.released = true;
        Ok(())
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        if !self.released && self.path.exists() {
            let _ = fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("shared");
    target.with_file_name(format!("{}.lock", name))
}

fn is_lock_stale(info: &LockInfo) -> bool {
    if !pid_is_alive(info.pid) {
        return true;
    }

    if let Ok(created) = chrono::DateTime::parse_from_rfc3339(&info.created) {
        let age = Utc::now().signed_duration_since(created);
        if age.num_seconds() > LOCK_STALE_SECONDS {
            return true;
        }
    }

    false
}

fn archive_stale_lock(path: &Path, reason: &str) -> Result<()> {
    let timestamp = Utc::now().timestamp_millis();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("queue.lock");
    let archived = path.with_file_name(format!("{}.{}.{}.json", name, reason, timestamp));
    fs::rename(path, archived)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
