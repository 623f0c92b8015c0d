use crate::hive::HiveKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// The file matched the type-name convention but declares no type.
    #[error("{file} declares no type")]
    EmptyDefinition { file: String },

    #[error("{file} declares type '{actual}', expected '{expected}'")]
    NamingMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("{file} declares namespace '{actual}', expected '{expected}'")]
    NamespaceMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to reflect {file}: {reason}")]
    Reflection { file: String, reason: String },

    #[error("Module '{module}' failed to load {kind}: {source}")]
    Module {
        module: String,
        kind: HiveKind,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("Unknown module '{0}'")]
    UnknownModule(String),

    #[error("Module '{0}' is declared twice")]
    DuplicateModule(String),

    #[error("Hive kind {0} is not registered in the catalog")]
    UnknownHiveKind(HiveKind),

    #[error("Cannot merge a {other} hive into a {target} hive")]
    MergeMismatch { target: HiveKind, other: HiveKind },

    #[error("Module '{module}' has load priority {priority}, expected 0-9")]
    InvalidPriority { module: String, priority: u8 },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Archive error: {0}")]
    Archive(#[from] hive_archive::ArchiveError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Structural input errors point at one malformed source file.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        match self {
            Self::EmptyDefinition { .. }
            | Self::NamingMismatch { .. }
            | Self::NamespaceMismatch { .. }
            | Self::Reflection { .. } => true,
            Self::Module { source, .. } => source.is_structural(),
            _ => false,
        }
    }
}

/// Problems with the declared hive dependency graph, detected when the catalog is built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Hive kind {0} registered twice")]
    DuplicateKind(HiveKind),

    #[error("Hive kind {0} depends on itself")]
    SelfDependency(HiveKind),

    #[error("Hive kind {kind} depends on unregistered kind {dependency}")]
    UnknownDependency { kind: HiveKind, dependency: HiveKind },

    #[error("Hive dependency cycle through {0}")]
    Cycle(HiveKind),
}
