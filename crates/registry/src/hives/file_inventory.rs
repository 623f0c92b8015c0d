use crate::hive::{digest_parts, Hive, HiveContext, HiveKind, HiveType};
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::OnceLock;

/// One file seen by a scan; the path is relative to the platform root, `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub relative_path: String,
    pub modified_ms: u64,
}

/// Every relevant file under a module root, with its modification time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInventoryHive {
    files: Vec<FileRecord>,
    last_updated: u64,
}

impl HiveType for FileInventoryHive {
    const KIND: HiveKind = HiveKind::new("hive/file-inventory");
    const FORMAT_VERSION: u32 = 1;
    const DEPENDENCIES: &'static [HiveKind] = &[];
}

impl FileInventoryHive {
    /// Sorted by path.
    #[must_use]
    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    /// Newest modification time seen, 0 for an empty inventory.
    #[must_use]
    pub const fn last_updated(&self) -> u64 {
        self.last_updated
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn scan(ctx: &HiveContext<'_>) -> Self {
        let root = ctx.module_root();
        let prefix = ctx.module().relative_path();
        let mut files = Vec::new();
        let mut last_updated = 0u64;

        for entry in ctx.walker().walk(&root, Some(leaf_name_pattern())) {
            if entry.is_dir {
                continue;
            }
            let Ok(relative) = entry.path.strip_prefix(&root) else {
                log::debug!("Walker yielded {} outside {}", entry.path.display(), root.display());
                continue;
            };
            if !is_inventory_path(relative) {
                continue;
            }

            let inner = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let relative_path = if prefix.is_empty() {
                inner
            } else {
                format!("{prefix}/{inner}")
            };

            last_updated = last_updated.max(entry.modified_ms);
            files.push(FileRecord {
                relative_path,
                modified_ms: entry.modified_ms,
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        log::debug!(
            "Scanned {} files for module {}",
            files.len(),
            ctx.module().name()
        );
        Self {
            files,
            last_updated,
        }
    }

    // Both the set of files and their freshness feed the checksum: a touched file keeps its
    // name but must still invalidate dependents.
    fn checksum(&self) -> Result<String> {
        let listing = serde_json::to_vec(&self.files)?;
        Ok(digest_parts([
            listing,
            self.last_updated.to_string().into_bytes(),
        ]))
    }
}

impl Hive for FileInventoryHive {
    fn kind(&self) -> HiveKind {
        Self::KIND
    }

    fn input_checksum(&self, ctx: &HiveContext<'_>) -> Result<String> {
        Self::scan(ctx).checksum()
    }

    fn scan_inputs(&self, ctx: &HiveContext<'_>) -> Result<(String, Option<Box<dyn Hive>>)> {
        let scanned = Self::scan(ctx);
        let checksum = scanned.checksum()?;
        Ok((checksum, Some(Box::new(scanned))))
    }

    fn rebuild(&mut self, ctx: &HiveContext<'_>) -> Result<String> {
        *self = Self::scan(ctx);
        self.checksum()
    }

    fn merge(&mut self, other: &dyn Hive) -> bool {
        let Some(other) = other.as_any().downcast_ref::<Self>() else {
            return false;
        };

        let mut by_path: BTreeMap<String, u64> = self
            .files
            .drain(..)
            .map(|f| (f.relative_path, f.modified_ms))
            .collect();
        for file in &other.files {
            let slot = by_path.entry(file.relative_path.clone()).or_insert(0);
            *slot = (*slot).max(file.modified_ms);
        }

        self.files = by_path
            .into_iter()
            .map(|(relative_path, modified_ms)| FileRecord {
                relative_path,
                modified_ms,
            })
            .collect();
        self.last_updated = self.last_updated.max(other.last_updated);
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

fn leaf_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Z]").expect("leaf name pattern is valid"))
}

/// No `_`/`.` component anywhere, and the file name starts with an uppercase letter.
fn is_inventory_path(relative: &Path) -> bool {
    let mut last = None;
    for component in relative.components() {
        let Component::Normal(name) = component else {
            return false;
        };
        let name = name.to_string_lossy();
        if name.starts_with('_') || name.starts_with('.') {
            return false;
        }
        last = name.chars().next();
    }
    last.is_some_and(|c| c.is_ascii_uppercase())
}
