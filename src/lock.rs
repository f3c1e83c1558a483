use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::Result;

/// Name of the advisory lock file inside the cache directory.
pub const LOCK_FILE_NAME: &str = "download-lock";

/// A lock older than this is considered abandoned and is discarded.
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(20);

/// Advisory single-flight guard for concurrent invocations on the same host.
///
/// The lock is a file containing a millisecond timestamp. A sibling process
/// that finds a fresh lock skips its downloads rather than duplicating them; a
/// stale one (crashed or wedged owner) is simply taken over. This is
/// best-effort by design: the cache's write-temp-then-rename discipline is
/// what actually guarantees readers never see partial artifacts.
#[derive(Debug)]
pub struct DownloadLock {
    path: PathBuf,
}

impl DownloadLock {
    /// Try to take the advisory lock in `dir`.
    ///
    /// Returns `Ok(None)` when another process holds a fresh lock; the guard
    /// otherwise removes the lock file on drop, whatever the exit path.
    pub fn acquire(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(LOCK_FILE_NAME);

        if let Ok(raw) = fs::read_to_string(&path) {
            let held_since = raw.trim().parse::<u64>().unwrap_or(0);
            let age = now_millis().saturating_sub(held_since);
            if age < LOCK_STALE_AFTER.as_millis() as u64 {
                debug!(lock = %path.display(), age_ms = age, "download lock held elsewhere");
                return Ok(None);
            }
            warn!(lock = %path.display(), age_ms = age, "discarding stale download lock");
        }

        fs::create_dir_all(dir)?;
        fs::write(&path, now_millis().to_string())?;
        debug!(lock = %path.display(), "acquired download lock");
        Ok(Some(Self { path }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DownloadLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(lock = %self.path.display(), error = %e, "failed to release download lock");
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join(LOCK_FILE_NAME);

        let lock = DownloadLock::acquire(tmp.path()).unwrap().unwrap();
        assert!(lock_path.is_file());
        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn fresh_foreign_lock_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(LOCK_FILE_NAME), now_millis().to_string()).unwrap();

        assert!(DownloadLock::acquire(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let tmp = tempfile::tempdir().unwrap();
        let stale = now_millis() - 2 * LOCK_STALE_AFTER.as_millis() as u64;
        fs::write(tmp.path().join(LOCK_FILE_NAME), stale.to_string()).unwrap();

        let lock = DownloadLock::acquire(tmp.path()).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn garbage_timestamp_counts_as_stale() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(LOCK_FILE_NAME), "not-a-number").unwrap();

        assert!(DownloadLock::acquire(tmp.path()).unwrap().is_some());
    }
}
