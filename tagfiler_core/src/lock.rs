//! Advisory lock file serializing index updates.
//!
//! The lock is a marker file claimed with exclusive creation. It only protects
//! callers that go through [`Gate`]; nothing stops another program from
//! writing the index directly.

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default interval between attempts to claim a held lock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time to wait for a held lock before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A lock marker at a well-known path.
#[derive(Debug, Clone)]
pub struct Gate {
    path: PathBuf,
    poll_interval: Duration,
}

impl Gate {
    /// Create a gate for the marker at `path`.
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim the lock, polling until `timeout` elapses.
    ///
    /// The returned guard releases the lock when dropped.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard> {
        let started = Instant::now();

        loop {
            if self.try_claim()? {
                debug!("Acquired lock {}", self.path.display());
                return Ok(LockGuard {
                    path: self.path.clone(),
                });
            }

            let waited = started.elapsed();
            if waited >= timeout {
                warn!(
                    "Gave up on lock {} after {:?}",
                    self.path.display(),
                    waited
                );
                return Err(Error::lock_timeout(&self.path, waited));
            }

            thread::sleep(self.poll_interval.min(timeout - waited));
        }
    }

    /// Returns true if the lock is currently held by anyone.
    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    /// One atomic attempt to create the marker. `Ok(false)` means someone holds it.
    fn try_claim(&self) -> Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                // Owner pid, for whoever has to clean up a stale lock by hand.
                if let Err(e) = writeln!(file, "{}", std::process::id()) {
                    let _ = fs::remove_file(&self.path);
                    return Err(e.into());
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Holds the lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released lock {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Lock {} was already removed", self.path.display());
            }
            Err(e) => warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}
