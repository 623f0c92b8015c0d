use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The container itself is unreadable; callers recreate it.
    #[error("Archive {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A single entry failed its digest check; the rest of the archive is intact.
    #[error("Archive entry '{key}' is corrupt (expected digest {expected}, found {actual})")]
    EntryCorrupt {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to lock archive {path}: {reason}")]
    Lock { path: PathBuf, reason: String },

    #[error("Invalid archive key '{0}'")]
    InvalidKey(String),
}

impl ArchiveError {
    /// True when the whole container must be deleted and recreated.
    #[must_use]
    pub const fn is_container_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
