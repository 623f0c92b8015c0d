use crate::{ArchiveError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;

// Waits above this are worth a debug line: another process is rebuilding.
const SLOW_LOCK_WAIT_MS: u128 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

/// Advisory lock on an archive's sidecar lock file, released on drop.
///
/// The lock lives on a separate file because writes replace the container via rename, which
/// would silently detach a lock held on the container's old inode.
pub(crate) struct ArchiveLock {
    file: File,
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) fn lock_path_for_archive(archive: &Path) -> PathBuf {
    archive.with_extension("lock")
}

pub(crate) fn acquire(lock_path: &Path, mode: LockMode) -> Result<ArchiveLock> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|err| ArchiveError::Lock {
            path: lock_path.to_path_buf(),
            reason: format!("open: {err}"),
        })?;

    let start = Instant::now();
    let locked = match mode {
        LockMode::Shared => file.lock_shared(),
        LockMode::Exclusive => file.lock_exclusive(),
    };
    locked.map_err(|err| ArchiveError::Lock {
        path: lock_path.to_path_buf(),
        reason: format!("{mode:?}: {err}"),
    })?;

    let waited = start.elapsed().as_millis();
    if waited >= SLOW_LOCK_WAIT_MS {
        log::debug!(
            "Waited {waited} ms for {mode:?} lock on {}",
            lock_path.display()
        );
    }

    Ok(ArchiveLock { file })
}
