use crate::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MAX_LOAD_PRIORITY: u8 = 9;

/// An installed module: read-only input supplied by whoever enumerates the platform's apps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Module {
    name: String,
    relative_path: String,
    priority: u8,
}

impl Module {
    pub fn new(
        name: impl Into<String>,
        relative_path: impl Into<String>,
        priority: u8,
    ) -> Result<Self> {
        let name = name.into();
        if priority > MAX_LOAD_PRIORITY {
            return Err(RegistryError::InvalidPriority {
                module: name,
                priority,
            });
        }
        Ok(Self {
            name,
            relative_path: normalize_relative(&relative_path.into()),
            priority,
        })
    }

    /// Qualified module name, e.g. `App::Blog`. Also the namespace of every type it declares.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module directory relative to the platform root, `/`-separated.
    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Load priority 0-9, lower loads first.
    #[must_use]
    pub const fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub fn root(&self, platform_root: &Path) -> PathBuf {
        if self.relative_path.is_empty() {
            platform_root.to_path_buf()
        } else {
            platform_root.join(&self.relative_path)
        }
    }
}

/// Order modules for aggregation: ascending priority, discovery order among equals.
pub fn sort_by_priority(modules: &mut [Module]) {
    modules.sort_by_key(Module::priority);
}

fn normalize_relative(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
