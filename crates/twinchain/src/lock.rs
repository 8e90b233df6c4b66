//! Cooperative cross-process lock.
//!
//! Every mutating or verifying operation runs while holding an exclusive OS
//! advisory lock (`flock` on Unix, `LockFileEx` on Windows) on the store's
//! `.ulock` file. The OS drops the lock when the holder exits, so a crashed
//! process never leaves a stale lock behind.
//!
//! The lock file itself is never removed: a waiter blocked on a file that
//! gets unlinked would go on to lock an orphaned inode.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Extension of the lock file next to the data file.
pub const LOCK_EXTENSION: &str = "ulock";

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Lock path for a data file: same stem, [`LOCK_EXTENSION`] extension.
pub fn lock_path_for(data_path: &Path) -> PathBuf {
    data_path.with_extension(LOCK_EXTENSION)
}

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {}", .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Handle on a store's lock file.
#[derive(Debug)]
pub struct ChainLock {
    path: PathBuf,
    file: File,
    timeout: Duration,
}

impl ChainLock {
    /// Opens (creating if needed) the lock file at `path`.
    pub fn open(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, LockError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until the lock is held exclusively or the timeout elapses.
    ///
    /// Waiters are not served in any particular order.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] if another holder keeps the lock too long
    /// - [`LockError::Io`] if locking fails for any other reason
    pub fn acquire(&self) -> Result<LockGuard, LockError> {
        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };

        // Lock and unlock through the guard's own handle.
        let file = self.file.try_clone().map_err(io_err)?;

        let started = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= self.timeout {
                        return Err(LockError::Timeout {
                            path: self.path.clone(),
                            waited,
                        });
                    }
                    thread::sleep(backoff.min(self.timeout - waited));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(io_err(e)),
            }
        }

        tracing::trace!(
            path = %self.path.display(),
            waited_us = started.elapsed().as_micros() as u64,
            "lock acquired"
        );
        Ok(LockGuard {
            file,
            path: self.path.clone(),
            held: true,
        })
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Holds the lock until dropped or [`LockGuard::release`]d.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    held: bool,
}

impl LockGuard {
    /// Releases the lock. Calling it again is a no-op.
    pub fn release(&mut self) -> Result<(), LockError> {
        if !self.held {
            return Ok(());
        }
        self.held = false;

        FileExt::unlock(&self.file).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::trace!(path = %self.path.display(), "lock released");
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "failed to release store lock");
        }
    }
}
