use crate::module::Module;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const ENV_REBUILD_POLICY: &str = "HIVE_REBUILD_POLICY";
pub const ENV_VALIDATION: &str = "HIVE_VALIDATION";
pub const ENV_ARCHIVE_DIR: &str = "HIVE_ARCHIVE_DIR";

const DEFAULT_ARCHIVE_DIR: &str = ".hive";
const DEFAULT_RESERVED_NAMESPACE: &str = "App";
const DEFAULT_TYPE_EXTENSION: &str = "type";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Whether stale hives may be recomputed. `Frozen` is the production setting: the registry serves
/// whatever is persisted and only rebuilds when the on-disk shape is unreadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPolicy {
    #[default]
    Enabled,
    Frozen,
}

impl RebuildPolicy {
    #[must_use]
    pub const fn allows_rebuild(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl FromStr for RebuildPolicy {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "enabled" | "development" | "dev" => Ok(Self::Enabled),
            "frozen" | "production" | "prod" => Ok(Self::Frozen),
            _ => Err(invalid(ENV_REBUILD_POLICY, raw)),
        }
    }
}

/// How structural input errors found while reflecting type files are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Raise the error and abort the module's hive load.
    #[default]
    Strict,
    /// Skip the offending file.
    Relaxed,
}

impl FromStr for ValidationMode {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "relaxed" => Ok(Self::Relaxed),
            _ => Err(invalid(ENV_VALIDATION, raw)),
        }
    }
}

/// What the aggregate does when one module's hive cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModuleFailurePolicy {
    #[default]
    Abort,
    /// Log, leave the module out, and serve a partial composite.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeGraphOptions {
    pub validation: ValidationMode,
    /// Only parents inside this namespace become graph nodes.
    pub reserved_namespace: String,
    /// Extension of type-declaration files, without the dot.
    pub type_extension: String,
    /// Registry-only types: neither they nor anything deriving from them enter the graph.
    pub excluded_types: BTreeSet<String>,
}

impl Default for TypeGraphOptions {
    fn default() -> Self {
        let excluded_types = ["Registry::Hive", "Registry::Definition"]
            .iter()
            .map(|suffix| format!("{DEFAULT_RESERVED_NAMESPACE}::{suffix}"))
            .collect();
        Self {
            validation: ValidationMode::default(),
            reserved_namespace: DEFAULT_RESERVED_NAMESPACE.to_string(),
            type_extension: DEFAULT_TYPE_EXTENSION.to_string(),
            excluded_types,
        }
    }
}

impl TypeGraphOptions {
    /// True when `name` lives in the reserved namespace (`App` matches `App::X`, not `Apple::X`).
    #[must_use]
    pub fn is_reserved(&self, name: &str) -> bool {
        name.strip_prefix(self.reserved_namespace.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub platform_root: PathBuf,
    /// Where archives live; relative paths resolve against `platform_root`.
    pub archive_dir: PathBuf,
    pub rebuild_policy: RebuildPolicy,
    pub module_failure: ModuleFailurePolicy,
    pub types: TypeGraphOptions,
    pub modules: Vec<ModuleConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            platform_root: PathBuf::from("."),
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            rebuild_policy: RebuildPolicy::default(),
            module_failure: ModuleFailurePolicy::default(),
            types: TypeGraphOptions::default(),
            modules: Vec::new(),
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn for_platform(platform_root: impl Into<PathBuf>) -> Self {
        Self {
            platform_root: platform_root.into(),
            ..Self::default()
        }
    }

    /// Load a TOML file; a relative `platform_root` is taken relative to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if config.platform_root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.platform_root = base.join(&config.platform_root);
        }
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `HIVE_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(ENV_REBUILD_POLICY) {
            self.rebuild_policy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_VALIDATION) {
            self.types.validation = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_ARCHIVE_DIR) {
            if raw.trim().is_empty() {
                return Err(invalid(ENV_ARCHIVE_DIR, &raw));
            }
            self.archive_dir = PathBuf::from(raw);
        }
        Ok(())
    }

    #[must_use]
    pub fn resolved_archive_dir(&self) -> PathBuf {
        if self.archive_dir.is_absolute() {
            self.archive_dir.clone()
        } else {
            self.platform_root.join(&self.archive_dir)
        }
    }

    /// Modules declared in the config file, in declaration order.
    pub fn declared_modules(&self) -> crate::Result<Vec<Module>> {
        self.modules
            .iter()
            .map(|m| Module::new(m.name.clone(), m.path.clone(), m.priority))
            .collect()
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
