//! Cross-process mutual exclusion over the filesystem.
//!
//! [`DirLock`] uses `mkdir` as an atomic create-if-absent: whoever creates the
//! directory owns the key until it removes it. Existing lock directories are
//! only probed, never read.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, warn};

use crate::error::{Error, Result};

/// Backend for per-key mutual exclusion.
pub trait LockManager {
    /// Try once. `Ok(false)` means another party holds the lock.
    fn try_acquire(&self, lock: &Path) -> io::Result<bool>;

    /// Best-effort release; all failures are swallowed.
    fn release(&self, lock: &Path);

    /// Whether someone currently holds the lock.
    fn is_held(&self, lock: &Path) -> bool;

    /// Poll [`try_acquire`](Self::try_acquire) every `poll` until it succeeds
    /// or `timeout` has elapsed. Returns `Ok(false)` on timeout.
    fn acquire(&self, lock: &Path, timeout: Duration, poll: Duration) -> Result<bool> {
        let started = Instant::now();
        loop {
            match self.try_acquire(lock) {
                Ok(true) => {
                    debug!(
                        "lock: acquired {} after {:.1}ms",
                        lock.display(),
                        started.elapsed().as_secs_f64() * 1000.0
                    );
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => return Err(Error::io(lock, e)),
            }
            if started.elapsed() >= timeout {
                debug!("lock: gave up on {} after {}ms", lock.display(), timeout.as_millis());
                return Ok(false);
            }
            thread::sleep(poll);
        }
    }
}

/// Directory-node lock.
#[derive(Debug, Clone, Default)]
pub struct DirLock {
    /// Reclaim lock directories older than this. `None` never reclaims.
    stale_after: Option<Duration>,
}

impl DirLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_after(stale_after: Option<Duration>) -> Self {
        Self { stale_after }
    }

    fn is_stale(&self, lock: &Path) -> bool {
        let Some(limit) = self.stale_after else {
            return false;
        };
        let age = std::fs::metadata(lock)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok());
        matches!(age, Some(age) if age > limit)
    }

    /// Replace a stale lock with our own. Reclaimers serialize on
    /// `<lock>.reclaim` and re-check staleness inside it, so a lock that
    /// another contender has just reclaimed is never removed.
    fn reclaim(&self, lock: &Path) -> io::Result<bool> {
        let mutex = reclaim_path(lock);
        match std::fs::create_dir(&mutex) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e),
        }
        let result = if self.is_stale(lock) {
            warn!("lock: reclaiming stale {}", lock.display());
            match std::fs::remove_dir(lock) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    let _ = std::fs::remove_dir(&mutex);
                    return Err(e);
                }
            }
            match std::fs::create_dir(lock) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e),
            }
        } else {
            Ok(false)
        };
        if let Err(e) = std::fs::remove_dir(&mutex) {
            debug!("lock: release of {} failed: {e}", mutex.display());
        }
        result
    }
}

fn reclaim_path(lock: &Path) -> PathBuf {
    let mut s = lock.as_os_str().to_os_string();
    s.push(".reclaim");
    PathBuf::from(s)
}

impl LockManager for DirLock {
    fn try_acquire(&self, lock: &Path) -> io::Result<bool> {
        match std::fs::create_dir(lock) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !self.is_stale(lock) {
                    return Ok(false);
                }
                self.reclaim(lock)
            }
            Err(e) => Err(e),
        }
    }

    fn release(&self, lock: &Path) {
        if let Err(e) = std::fs::remove_dir(lock) {
            debug!("lock: release of {} failed: {e}", lock.display());
        }
    }

    fn is_held(&self, lock: &Path) -> bool {
        lock.exists()
    }
}

/// Releases the lock when dropped.
pub struct LockGuard<'a, L: LockManager + ?Sized> {
    manager: &'a L,
    lock: PathBuf,
}

impl<'a, L: LockManager + ?Sized> LockGuard<'a, L> {
    /// Wrap a lock that has already been acquired.
    pub fn held(manager: &'a L, lock: &Path) -> Self {
        Self {
            manager,
            lock: lock.to_path_buf(),
        }
    }

    /// Release now rather than at end of scope.
    pub fn release(self) {}
}

impl<L: LockManager + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        self.manager.release(&self.lock);
        debug!("lock: released {}", self.lock.display());
    }
}
