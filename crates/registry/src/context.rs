use crate::aggregate::{AggregateHive, AggregateRegistry};
use crate::catalog::HiveCatalog;
use crate::collab::Collaborators;
use crate::config::RegistryConfig;
use crate::hive::{HiveKind, HiveRecord};
use crate::module::{sort_by_priority, Module};
use crate::module_registry::ModuleRegistry;
use crate::{RegistryError, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Owns every registry of one process (or one test). Nothing here is global: two contexts
/// over the same platform share only what is on disk.
#[derive(Debug)]
pub struct RegistryContext {
    config: Arc<RegistryConfig>,
    catalog: Arc<HiveCatalog>,
    modules: Vec<Arc<ModuleRegistry>>,
    aggregate: AggregateRegistry,
}

pub struct RegistryContextBuilder {
    config: RegistryConfig,
    catalog: Option<HiveCatalog>,
    collaborators: Option<Collaborators>,
    modules: Vec<Module>,
}

impl RegistryContextBuilder {
    #[must_use]
    pub fn catalog(mut self, catalog: HiveCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[must_use]
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Add a module on top of those declared in the config.
    #[must_use]
    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn build(self) -> Result<RegistryContext> {
        let mut modules = self.config.declared_modules()?;
        modules.extend(self.modules);

        let mut seen = HashSet::new();
        for module in &modules {
            if !seen.insert(module.name()) {
                return Err(RegistryError::DuplicateModule(module.name().to_string()));
            }
        }
        sort_by_priority(&mut modules);

        let config = Arc::new(self.config);
        let catalog = Arc::new(self.catalog.unwrap_or_default());
        let collaborators = self.collaborators.unwrap_or_default();
        let modules: Vec<_> = modules
            .into_iter()
            .map(|module| {
                Arc::new(ModuleRegistry::new(
                    module,
                    Arc::clone(&config),
                    Arc::clone(&catalog),
                    collaborators.clone(),
                ))
            })
            .collect();
        let aggregate =
            AggregateRegistry::new(modules.clone(), Arc::clone(&config), Arc::clone(&catalog));

        log::debug!(
            "Registry context over {} with {} modules",
            config.platform_root.display(),
            modules.len()
        );
        Ok(RegistryContext {
            config,
            catalog,
            modules,
            aggregate,
        })
    }
}

impl RegistryContext {
    #[must_use]
    pub fn builder(config: RegistryConfig) -> RegistryContextBuilder {
        RegistryContextBuilder {
            config,
            catalog: None,
            collaborators: None,
            modules: Vec::new(),
        }
    }

    /// Standard catalog, default collaborators, modules from the config.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &HiveCatalog {
        &self.catalog
    }

    /// Modules in load-priority order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter().map(|registry| registry.module())
    }

    pub fn module_registry(&self, name: &str) -> Result<&ModuleRegistry> {
        self.modules
            .iter()
            .find(|registry| registry.module().name() == name)
            .map(|registry| &**registry)
            .ok_or_else(|| RegistryError::UnknownModule(name.to_string()))
    }

    pub fn module_registries(&self) -> impl Iterator<Item = &ModuleRegistry> {
        self.modules.iter().map(|registry| &**registry)
    }

    pub fn module_hive(&self, module: &str, kind: HiveKind) -> Result<Arc<HiveRecord>> {
        self.module_registry(module)?.get_hive(kind)
    }

    pub fn aggregate_hive(&self, kind: HiveKind) -> Result<Arc<AggregateHive>> {
        self.aggregate.get_hive(kind)
    }

    #[must_use]
    pub fn aggregate(&self) -> &AggregateRegistry {
        &self.aggregate
    }

    /// Empty every module archive and the aggregate archive. Hives already resolved by this
    /// context stay cached; the next context rebuilds from scratch.
    pub fn clear_archives(&self) -> Result<()> {
        let archives = self
            .modules
            .iter()
            .map(|registry| registry.archive())
            .chain(std::iter::once(self.aggregate.archive()));
        for archive in archives {
            if archive.exists() {
                archive.clear()?;
                log::info!("Cleared {}", archive.path().display());
            }
        }
        Ok(())
    }
}
