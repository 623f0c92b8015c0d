use crate::lock::{self, LockMode};
use crate::paths::is_valid_key;
use crate::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ARCHIVE_MAGIC: &str = "hive-archive";
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// One persisted archive: a single container file holding entries addressed by path-like keys.
///
/// Reads take a shared lock for the duration of the read, writes take an exclusive lock for the
/// duration of one read-modify-write. Nothing is held between calls, so two processes may both
/// decide to rebuild the same entry and write it back one after the other; the later write wins.
#[derive(Debug, Clone)]
pub struct HiveArchive {
    path: PathBuf,
    lock_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveContainer {
    magic: String,
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, StoredEntry>,
}

impl ArchiveContainer {
    fn empty() -> Self {
        Self {
            magic: ARCHIVE_MAGIC.to_string(),
            version: ARCHIVE_FORMAT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    digest: String,
    written_at_unix_ms: u64,
    payload: Value,
}

impl HiveArchive {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock::lock_path_for_archive(&path);
        Self { path, lock_path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read one entry under a shared lock.
    ///
    /// `Ok(None)` means the archive or the entry does not exist. A damaged container is
    /// reported as [`ArchiveError::Corrupt`], a damaged entry as [`ArchiveError::EntryCorrupt`].
    pub fn read_entry(&self, key: &str) -> Result<Option<Value>> {
        check_key(key)?;
        let _guard = lock::acquire(&self.lock_path, LockMode::Shared)?;

        let Some(mut container) = load_container(&self.path)? else {
            return Ok(None);
        };
        let Some(entry) = container.entries.remove(key) else {
            return Ok(None);
        };

        let actual = payload_digest(&entry.payload)?;
        if actual != entry.digest {
            return Err(ArchiveError::EntryCorrupt {
                key: key.to_string(),
                expected: entry.digest,
                actual,
            });
        }
        Ok(Some(entry.payload))
    }

    /// Write one entry under an exclusive lock, replacing any previous value.
    ///
    /// A corrupt container is discarded and recreated around the new entry.
    pub fn write_entry(&self, key: &str, payload: &Value) -> Result<()> {
        check_key(key)?;
        let _guard = lock::acquire(&self.lock_path, LockMode::Exclusive)?;

        let mut container = self.load_or_reset()?;
        let entry = StoredEntry {
            digest: payload_digest(payload)?,
            written_at_unix_ms: unix_now_ms(),
            payload: payload.clone(),
        };
        container.entries.insert(key.to_string(), entry);
        store_container(&self.path, &container)?;
        log::debug!("Wrote archive entry {key} to {}", self.path.display());
        Ok(())
    }

    /// Remove one entry; returns whether it existed.
    pub fn remove_entry(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        let _guard = lock::acquire(&self.lock_path, LockMode::Exclusive)?;

        let mut container = self.load_or_reset()?;
        let removed = container.entries.remove(key).is_some();
        if removed {
            store_container(&self.path, &container)?;
        }
        Ok(removed)
    }

    /// Keys currently stored, in sorted order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let _guard = lock::acquire(&self.lock_path, LockMode::Shared)?;
        Ok(load_container(&self.path)?
            .map(|container| container.entries.into_keys().collect())
            .unwrap_or_default())
    }

    /// Drop every entry, keeping an empty container on disk.
    pub fn clear(&self) -> Result<()> {
        let _guard = lock::acquire(&self.lock_path, LockMode::Exclusive)?;
        store_container(&self.path, &ArchiveContainer::empty())
    }

    /// Delete the container file and write a fresh, empty one in its place.
    pub fn recreate(&self) -> Result<()> {
        let _guard = lock::acquire(&self.lock_path, LockMode::Exclusive)?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        log::warn!("Recreated archive {}", self.path.display());
        store_container(&self.path, &ArchiveContainer::empty())
    }

    // Caller holds the exclusive lock.
    fn load_or_reset(&self) -> Result<ArchiveContainer> {
        match load_container(&self.path) {
            Ok(Some(container)) => Ok(container),
            Ok(None) => Ok(ArchiveContainer::empty()),
            Err(err) if err.is_container_corrupt() => {
                log::warn!("Discarding {err}");
                Ok(ArchiveContainer::empty())
            }
            Err(err) => Err(err),
        }
    }
}

fn check_key(key: &str) -> Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(ArchiveError::InvalidKey(key.to_string()))
    }
}

fn load_container(path: &Path) -> Result<Option<ArchiveContainer>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let container: ArchiveContainer =
        serde_json::from_slice(&bytes).map_err(|err| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    if container.magic != ARCHIVE_MAGIC {
        return Err(ArchiveError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unexpected magic '{}'", container.magic),
        });
    }
    if container.version != ARCHIVE_FORMAT_VERSION {
        return Err(ArchiveError::Corrupt {
            path: path.to_path_buf(),
            reason: format!(
                "unsupported container version {} (expected {ARCHIVE_FORMAT_VERSION})",
                container.version
            ),
        });
    }
    Ok(Some(container))
}

// Caller holds the exclusive lock, so a fixed temporary name cannot be shared by two writers.
fn store_container(path: &Path, container: &ArchiveContainer) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(container)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn payload_digest(payload: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
