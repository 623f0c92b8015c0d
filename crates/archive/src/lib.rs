//! # Hive Archive
//!
//! Persistent storage for derived hive metadata.
//!
//! ## Layout
//!
//! ```text
//! <archive_dir>/
//!     ├── aggregate.hive.json        platform-wide composites
//!     ├── aggregate.hive.lock
//!     └── modules/
//!            ├── App__Blog-<digest>.hive.json one container per module
//!            └── App__Blog-<digest>.hive.lock shared/exclusive advisory lock
//! ```
//!
//! Each container maps path-like keys (`hive/type-graph`) to digest-checked JSON payloads.
//!
//! ## Example
//!
//! ```no_run
//! use hive_archive::{module_archive_path, HiveArchive};
//! use std::path::Path;
//!
//! let archive = HiveArchive::open(module_archive_path(Path::new(".hive"), "App::Blog"));
//! archive.write_entry("hive/type-graph", &serde_json::json!({"types": {}}))?;
//! let payload = archive.read_entry("hive/type-graph")?;
//! assert!(payload.is_some());
//! # Ok::<(), hive_archive::ArchiveError>(())
//! ```

mod archive;
mod error;
mod lock;
mod paths;

pub use archive::{HiveArchive, ARCHIVE_FORMAT_VERSION, ARCHIVE_MAGIC};
pub use error::{ArchiveError, Result};
pub use paths::{aggregate_archive_path, module_archive_path, ARCHIVE_EXTENSION};
