//! # Hive Query
//!
//! Read-side façade over the aggregate type graph, backed by a pluggable [`SharedCache`].
//!
//! ```no_run
//! use hive_query::{MemoryCache, MetadataQuery};
//! use hive_registry::{RegistryConfig, RegistryContext};
//! use std::sync::Arc;
//!
//! let context = Arc::new(RegistryContext::new(RegistryConfig::for_platform("."))?);
//! let query = MetadataQuery::new(context, Arc::new(MemoryCache::default()));
//! for name in query.concrete_descendants("App::Core::Model")? {
//!     println!("{name}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod cache;
mod error;
mod query;

pub use cache::{MemoryCache, SharedCache, DEFAULT_CACHE_CAPACITY};
pub use error::{QueryError, Result};
pub use query::{MetadataQuery, CACHE_NAMESPACE};
