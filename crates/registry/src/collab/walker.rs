use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// One filesystem entry seen by a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub modified_ms: u64,
}

/// Enumerates candidate files under a root.
///
/// The sequence is lazy, finite and not restartable. A missing root yields nothing. Convention
/// filtering (hidden directories, naming rules) is the caller's job; `name_filter` only
/// narrows which *file* names are yielded.
pub trait FileWalker: Send + Sync {
    fn walk<'a>(
        &'a self,
        root: &'a Path,
        name_filter: Option<&'a Regex>,
    ) -> Box<dyn Iterator<Item = WalkEntry> + 'a>;
}

/// Default walker backed by `walkdir`, sorted by file name for stable output.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkdirWalker;

impl FileWalker for WalkdirWalker {
    fn walk<'a>(
        &'a self,
        root: &'a Path,
        name_filter: Option<&'a Regex>,
    ) -> Box<dyn Iterator<Item = WalkEntry> + 'a> {
        if !root.is_dir() {
            log::debug!("Walk root {} does not exist", root.display());
            return Box::new(std::iter::empty());
        }

        let entries = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|result| match result {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Failed to read entry: {e}");
                    None
                }
            })
            .filter_map(move |entry| {
                let is_dir = entry.file_type().is_dir();
                if !is_dir {
                    if let Some(filter) = name_filter {
                        let name = entry.file_name().to_string_lossy();
                        if !filter.is_match(&name) {
                            return None;
                        }
                    }
                }
                let modified_ms = entry
                    .metadata()
                    .ok()
                    .and_then(|meta| meta.modified().ok())
                    .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                    .unwrap_or(0);
                Some(WalkEntry {
                    path: entry.into_path(),
                    is_dir,
                    modified_ms,
                })
            });
        Box::new(entries)
    }
}
