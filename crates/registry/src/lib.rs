//! # Hive Registry
//!
//! Checksum-driven, incrementally rebuilt metadata for modular platforms.
//!
//! ## Architecture
//!
//! ```text
//! RegistryContext (one per process, or per test)
//!     │
//!     ├──> ModuleRegistry (one per module, archive-backed)
//!     │      ├─ HiveCatalog::plan(kind): dependencies first (petgraph toposort)
//!     │      ├─ read envelope under a shared lock
//!     │      ├─ assess_rebuild: format version → checksum → updated dependency
//!     │      └─ rebuild + write back under an exclusive lock
//!     │
//!     └──> AggregateRegistry
//!            ├─ persisted composite (frozen fast path, or unchanged sources)
//!            └─ merge module hives in load-priority order
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use hive_registry::{RegistryConfig, RegistryContext, TypeFilter, TypeGraphHive, HiveType};
//!
//! let config = RegistryConfig::from_file("hive.toml".as_ref())?;
//! let context = RegistryContext::new(config)?;
//! let graph = context.aggregate_hive(TypeGraphHive::KIND)?;
//! if let Some(types) = graph.downcast::<TypeGraphHive>() {
//!     let models = types.qualified_names(Some("App::Core::Model"), TypeFilter::CONCRETE)?;
//!     println!("{models:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod aggregate;
mod catalog;
pub mod collab;
mod config;
mod context;
mod error;
mod hive;
mod hives;
mod module;
mod module_registry;
mod staleness;

pub use aggregate::{AggregateHive, AggregateRegistry, ModuleFailure, SourceChecksum};
pub use catalog::{HiveCatalog, HiveCatalogBuilder, HiveSpec};
pub use config::{
    ConfigError, ModuleConfig, ModuleFailurePolicy, RebuildPolicy, RegistryConfig,
    TypeGraphOptions, ValidationMode, ENV_ARCHIVE_DIR, ENV_REBUILD_POLICY, ENV_VALIDATION,
};
pub use context::{RegistryContext, RegistryContextBuilder};
pub use error::{CatalogError, RegistryError, Result};
pub use hive::{digest_parts, Hive, HiveContext, HiveKind, HiveRecord, HiveType};
pub use hives::{
    FileInventoryHive, FileRecord, TypeFilter, TypeGraphHive, TypeRecord, UnknownAncestor,
};
pub use module::{sort_by_priority, Module, MAX_LOAD_PRIORITY};
pub use module_registry::ModuleRegistry;
pub use staleness::{assess_rebuild, PersistedState, RebuildAssessment, RebuildReason};
