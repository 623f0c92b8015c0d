use crate::cache::SharedCache;
use crate::{QueryError, Result};
use hive_registry::{AggregateHive, HiveType, RegistryContext, TypeFilter, TypeGraphHive};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const CACHE_NAMESPACE: &str = "hive.metadata";

/// Type lookups over the aggregate type graph, memoised in a [`SharedCache`].
///
/// Cache keys embed the aggregate checksum, so entries computed from an older graph are never
/// served. The namespace is additionally flushed once when this process rebuilt the aggregate.
pub struct MetadataQuery {
    context: Arc<RegistryContext>,
    cache: Arc<dyn SharedCache>,
    flushed: AtomicBool,
}

impl MetadataQuery {
    pub fn new(context: Arc<RegistryContext>, cache: Arc<dyn SharedCache>) -> Self {
        Self {
            context,
            cache,
            flushed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn context(&self) -> &RegistryContext {
        &self.context
    }

    /// Every type (or every descendant of `ancestor`) carrying all bits of `filter`.
    pub fn qualified_names(
        &self,
        ancestor: Option<&str>,
        filter: TypeFilter,
    ) -> Result<BTreeSet<String>> {
        let aggregate = self.type_graph()?;
        let scope = match ancestor {
            Some(name) => format!("ancestor={name}"),
            None => "all".to_string(),
        };
        let key = format!("names:{}:{}:{scope}", aggregate.checksum(), filter.bits());

        self.cached(&key, || {
            Ok(graph_of(&aggregate)?
                .qualified_names(ancestor, filter)?
                .into_iter()
                .collect())
        })
    }

    pub fn concrete_descendants(&self, ancestor: &str) -> Result<BTreeSet<String>> {
        self.qualified_names(Some(ancestor), TypeFilter::CONCRETE)
    }

    /// True for declared types and for reserved-namespace parents seen only as ancestors.
    pub fn is_valid_type(&self, name: &str) -> Result<bool> {
        let aggregate = self.type_graph()?;
        let key = format!("valid:{}:{name}", aggregate.checksum());
        self.cached(&key, || Ok(graph_of(&aggregate)?.is_valid_type(name)))
    }

    /// Serve `key` from the shared cache, or compute and store it. Errors are never cached.
    fn cached<T>(&self, key: &str, compute: impl FnOnce() -> Result<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(bytes) = self.cache.get(CACHE_NAMESPACE, key) {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    log::debug!("Metadata cache hit {key}");
                    return Ok(value);
                }
                Err(err) => log::warn!("Discarding unreadable metadata cache entry {key}: {err}"),
            }
        }

        let value = compute()?;
        match serde_json::to_vec(&value) {
            Ok(bytes) => self.cache.set(CACHE_NAMESPACE, key, bytes),
            Err(err) => log::warn!("Failed to cache {key}: {err}"),
        }
        Ok(value)
    }

    fn type_graph(&self) -> Result<Arc<AggregateHive>> {
        let aggregate = self.context.aggregate_hive(TypeGraphHive::KIND)?;
        if aggregate.updated() && !self.flushed.swap(true, Ordering::SeqCst) {
            log::debug!("Type graph aggregate was rebuilt, flushing {CACHE_NAMESPACE}");
            self.cache.invalidate(CACHE_NAMESPACE);
        }
        Ok(aggregate)
    }
}

fn graph_of(aggregate: &AggregateHive) -> Result<&TypeGraphHive> {
    aggregate
        .downcast::<TypeGraphHive>()
        .ok_or(QueryError::UnexpectedHive(aggregate.record().kind()))
}
