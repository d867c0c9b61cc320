//! Single-instance guard for the receive loop.
//!
//! Uses an OS advisory lock on a file: the kernel drops it when the holder
//! exits, so a crashed process never leaves a stale lock behind.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that prevent taking the lock at all
#[derive(Error, Debug)]
pub enum LockError {
    /// The lock file could not be opened or locked
    #[error("lock file {path}: {source}")]
    Io {
        /// Lock file path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

/// Held exclusive lock; released on [`InstanceLock::release`] or drop
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Tries to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another holder has it.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Io` if the file cannot be opened or locked for a
    /// reason other than contention.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => return Err(io_err(e)),
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        if let Err(e) = lock.write_owner() {
            warn!(path = %lock.path.display(), "Could not record lock owner: {e}");
        }
        Ok(Some(lock))
    }

    /// Waits for the lock, retrying every `retry` until it is free or
    /// `cancel` fires.
    ///
    /// Returns `Ok(None)` if cancelled while parked.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Io` on a non-contention failure.
    pub async fn acquire(
        path: &Path,
        retry: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Self>, LockError> {
        let mut announced = false;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                info!(path = %path.display(), "Acquired single-instance lock");
                return Ok(Some(lock));
            }
            if !announced {
                warn!(
                    path = %path.display(),
                    "Another instance holds the polling lock, waiting for it to exit"
                );
                announced = true;
            }
            tokio::select! {
                () = cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(retry) => {}
            }
        }
    }

    /// Path of the lock file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock explicitly.
    pub fn release(self) {
        drop(self);
    }

    fn write_owner(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", std::process::id())?;
        self.file.flush()
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => info!(path = %self.path.display(), "Released single-instance lock"),
            Err(e) => warn!(path = %self.path.display(), "Failed to release lock: {e}"),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
