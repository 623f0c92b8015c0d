use crate::error::CatalogError;
use crate::hive::{Hive, HiveKind, HiveType};
use crate::hives::{FileInventoryHive, TypeGraphHive};
use crate::{RegistryError, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Constructors and static metadata for one hive type.
#[derive(Debug, Clone, Copy)]
pub struct HiveSpec {
    pub kind: HiveKind,
    pub format_version: u32,
    pub dependencies: &'static [HiveKind],
    create: fn() -> Box<dyn Hive>,
    decode: fn(Value) -> serde_json::Result<Box<dyn Hive>>,
}

impl HiveSpec {
    #[must_use]
    pub fn of<H: HiveType>() -> Self {
        Self {
            kind: H::KIND,
            format_version: H::FORMAT_VERSION,
            dependencies: H::DEPENDENCIES,
            create: create_hive::<H>,
            decode: decode_hive::<H>,
        }
    }

    /// A fresh, empty instance.
    #[must_use]
    pub fn create(&self) -> Box<dyn Hive> {
        (self.create)()
    }

    pub fn decode(&self, payload: Value) -> serde_json::Result<Box<dyn Hive>> {
        (self.decode)(payload)
    }
}

fn create_hive<H: HiveType>() -> Box<dyn Hive> {
    Box::new(H::default())
}

fn decode_hive<H: HiveType>(payload: Value) -> serde_json::Result<Box<dyn Hive>> {
    Ok(Box::new(serde_json::from_value::<H>(payload)?))
}

/// The set of hive types a registry knows, validated as a directed acyclic graph.
#[derive(Debug, Clone)]
pub struct HiveCatalog {
    specs: HashMap<HiveKind, HiveSpec>,
    order: Vec<HiveKind>,
}

#[derive(Debug, Default)]
pub struct HiveCatalogBuilder {
    specs: Vec<HiveSpec>,
}

impl HiveCatalogBuilder {
    #[must_use]
    pub fn register<H: HiveType>(self) -> Self {
        self.register_spec(HiveSpec::of::<H>())
    }

    #[must_use]
    pub fn register_spec(mut self, spec: HiveSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> std::result::Result<HiveCatalog, CatalogError> {
        let mut specs = HashMap::with_capacity(self.specs.len());
        let mut graph: DiGraph<HiveKind, ()> = DiGraph::new();
        let mut nodes: HashMap<HiveKind, NodeIndex> = HashMap::new();

        for spec in &self.specs {
            if specs.insert(spec.kind, *spec).is_some() {
                return Err(CatalogError::DuplicateKind(spec.kind));
            }
            nodes.insert(spec.kind, graph.add_node(spec.kind));
        }

        for spec in &self.specs {
            for &dependency in spec.dependencies {
                if dependency == spec.kind {
                    return Err(CatalogError::SelfDependency(spec.kind));
                }
                let Some(&from) = nodes.get(&dependency) else {
                    return Err(CatalogError::UnknownDependency {
                        kind: spec.kind,
                        dependency,
                    });
                };
                graph.add_edge(from, nodes[&spec.kind], ());
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| CatalogError::Cycle(graph[cycle.node_id()]))?
            .into_iter()
            .map(|idx| graph[idx])
            .collect();

        Ok(HiveCatalog { specs, order })
    }
}

impl HiveCatalog {
    #[must_use]
    pub fn builder() -> HiveCatalogBuilder {
        HiveCatalogBuilder::default()
    }

    /// File inventory and type graph.
    #[must_use]
    pub fn standard() -> Self {
        Self::builder()
            .register::<FileInventoryHive>()
            .register::<TypeGraphHive>()
            .build()
            .expect("standard hive catalog is acyclic")
    }

    #[must_use]
    pub fn spec(&self, kind: HiveKind) -> Option<&HiveSpec> {
        self.specs.get(&kind)
    }

    /// Every registered kind, dependencies before dependents.
    #[must_use]
    pub fn kinds(&self) -> &[HiveKind] {
        &self.order
    }

    /// `kind` and its transitive dependencies, dependencies first.
    pub fn plan(&self, kind: HiveKind) -> Result<Vec<HiveKind>> {
        if !self.specs.contains_key(&kind) {
            return Err(RegistryError::UnknownHiveKind(kind));
        }

        let mut needed = HashSet::new();
        let mut stack = vec![kind];
        while let Some(current) = stack.pop() {
            if !needed.insert(current) {
                continue;
            }
            if let Some(spec) = self.specs.get(&current) {
                stack.extend(spec.dependencies.iter().copied());
            }
        }

        Ok(self
            .order
            .iter()
            .copied()
            .filter(|k| needed.contains(k))
            .collect())
    }
}

impl Default for HiveCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
