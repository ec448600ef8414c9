//! Advisory flock(2) locks guarding the run and the history journal.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// An exclusive file lock. Released when dropped.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Block until the lock is available.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .with_context(|| format!("acquire lock {}", path.display()))?;
        Ok(Self { _file: file })
    }

    /// `Ok(None)` when another process holds the lock.
    pub fn try_exclusive(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            // fs2 on Linux may surface EAGAIN as Other
            Err(ref e) if e.raw_os_error() == Some(11) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("try lock {}", path.display())),
        }
    }

    /// Lock held for the whole provisioning run. A concurrent run is a fatal precondition.
    pub fn for_run(path: &Path) -> Result<Self> {
        match Self::try_exclusive(path)? {
            Some(lock) => Ok(lock),
            None => bail!(
                "another hostforge run holds {}; concurrent runs are not supported",
                path.display()
            ),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}
