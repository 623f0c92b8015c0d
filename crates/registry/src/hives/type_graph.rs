use crate::collab::{ReflectionFailure, TypeCandidate, TypeDescriptor};
use crate::config::{TypeGraphOptions, ValidationMode};
use crate::hive::{digest_parts, Hive, HiveContext, HiveKind, HiveType};
use crate::hives::FileInventoryHive;
use crate::module::Module;
use crate::{RegistryError, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

bitflags! {
    /// Classification bits of a type. A query mask matches when all of its bits are set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TypeFilter: u8 {
        const ABSTRACT = 1;
        const CONCRETE = 1 << 1;
        /// No known descendants.
        const LEAF = 1 << 2;
    }
}

impl TypeFilter {
    /// An empty mask matches every type.
    #[must_use]
    pub fn matches(self, mask: Self) -> bool {
        self.contains(mask)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    /// Transitive descendants, never including the type itself.
    pub children: BTreeSet<String>,
    pub filter: TypeFilter,
}

impl TypeRecord {
    fn placeholder() -> Self {
        Self {
            children: BTreeSet::new(),
            filter: TypeFilter::LEAF,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown ancestor type '{0}'")]
pub struct UnknownAncestor(pub String);

/// Inheritance index of the reserved namespace, keyed by qualified type name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeGraphHive {
    types: BTreeMap<String, TypeRecord>,
}

impl HiveType for TypeGraphHive {
    const KIND: HiveKind = HiveKind::new("hive/type-graph");
    const FORMAT_VERSION: u32 = 1;
    const DEPENDENCIES: &'static [HiveKind] = &[FileInventoryHive::KIND];
}

impl TypeGraphHive {
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TypeRecord> {
        self.types.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeRecord)> {
        self.types.iter().map(|(name, record)| (name.as_str(), record))
    }

    /// Any type the index knows, including parents that were only ever seen as ancestors.
    #[must_use]
    pub fn is_valid_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Sorted names of every type (or every descendant of `ancestor`) whose bits contain `mask`.
    pub fn qualified_names(
        &self,
        ancestor: Option<&str>,
        mask: TypeFilter,
    ) -> std::result::Result<Vec<String>, UnknownAncestor> {
        let matching = |name: &String| {
            self.types
                .get(name)
                .is_some_and(|record| record.filter.matches(mask))
        };

        match ancestor {
            None => Ok(self.types.keys().filter(|n| matching(n)).cloned().collect()),
            Some(ancestor) => {
                let record = self
                    .types
                    .get(ancestor)
                    .ok_or_else(|| UnknownAncestor(ancestor.to_string()))?;
                Ok(record.children.iter().filter(|n| matching(n)).cloned().collect())
            }
        }
    }

    fn register(&mut self, descriptor: &TypeDescriptor, options: &TypeGraphOptions) {
        let own = self
            .types
            .entry(descriptor.name.clone())
            .or_insert_with(TypeRecord::placeholder);
        own.filter.remove(TypeFilter::ABSTRACT | TypeFilter::CONCRETE);
        own.filter.insert(if descriptor.is_abstract {
            TypeFilter::ABSTRACT
        } else {
            TypeFilter::CONCRETE
        });

        for parent in &descriptor.parents {
            if parent == &descriptor.name || !options.is_reserved(parent) {
                continue;
            }
            let record = self
                .types
                .entry(parent.clone())
                .or_insert_with(TypeRecord::placeholder);
            record.children.insert(descriptor.name.clone());
            record.filter.remove(TypeFilter::LEAF);
        }
    }

    /// Expand direct children to all descendants, then re-derive LEAF from the result.
    fn close_descendants(&mut self) {
        loop {
            let mut grew = false;
            let names: Vec<String> = self.types.keys().cloned().collect();
            for name in &names {
                let children = &self.types[name].children;
                let reachable: BTreeSet<String> = children
                    .iter()
                    .filter_map(|child| self.types.get(child))
                    .flat_map(|record| record.children.iter())
                    .filter(|grandchild| *grandchild != name && !children.contains(*grandchild))
                    .cloned()
                    .collect();
                if reachable.is_empty() {
                    continue;
                }
                grew = true;
                if let Some(record) = self.types.get_mut(name) {
                    record.children.extend(reachable);
                }
            }
            if !grew {
                break;
            }
        }

        for record in self.types.values_mut() {
            record
                .filter
                .set(TypeFilter::LEAF, record.children.is_empty());
        }
    }

    fn checksum(ctx: &HiveContext<'_>) -> Result<String> {
        let inventory = ctx.dependency_record(FileInventoryHive::KIND);
        let options = serde_json::to_vec(&ctx.config().types)?;
        Ok(digest_parts([
            Self::KIND.name().as_bytes(),
            inventory.checksum().as_bytes(),
            ctx.module().name().as_bytes(),
            options.as_slice(),
        ]))
    }

    fn reflect_file(
        ctx: &HiveContext<'_>,
        relative_path: &str,
        expected_name: String,
    ) -> Result<TypeDescriptor> {
        let candidate = TypeCandidate {
            path: ctx.platform_root().join(relative_path),
            expected_name,
        };
        let descriptor = ctx
            .reflector()
            .reflect(&candidate)
            .map_err(|failure| structural_error(relative_path, &candidate.expected_name, failure))?;
        if descriptor.name != candidate.expected_name {
            return Err(name_mismatch(
                relative_path,
                &candidate.expected_name,
                &descriptor.name,
            ));
        }
        Ok(descriptor)
    }
}

impl Hive for TypeGraphHive {
    fn kind(&self) -> HiveKind {
        Self::KIND
    }

    fn input_checksum(&self, ctx: &HiveContext<'_>) -> Result<String> {
        Self::checksum(ctx)
    }

    fn rebuild(&mut self, ctx: &HiveContext<'_>) -> Result<String> {
        let inventory = ctx.dependency::<FileInventoryHive>();
        let options = &ctx.config().types;
        let mut graph = Self::default();
        let mut skipped = 0usize;

        for file in inventory.files() {
            let Some(expected) =
                expected_type_name(ctx.module(), &file.relative_path, &options.type_extension)
            else {
                continue;
            };

            let descriptor = match Self::reflect_file(ctx, &file.relative_path, expected) {
                Ok(descriptor) => descriptor,
                Err(err) if options.validation == ValidationMode::Relaxed => {
                    log::warn!("Skipping {}: {err}", file.relative_path);
                    skipped += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let excluded = std::iter::once(&descriptor.name)
                .chain(&descriptor.parents)
                .any(|name| options.excluded_types.contains(name));
            if excluded {
                log::debug!("Type {} is registry-internal, not indexed", descriptor.name);
                continue;
            }

            graph.register(&descriptor, options);
        }

        graph.close_descendants();
        log::debug!(
            "Type graph for {}: {} types, {} files skipped",
            ctx.module().name(),
            graph.len(),
            skipped
        );
        *self = graph;
        Self::checksum(ctx)
    }

    fn merge(&mut self, other: &dyn Hive) -> bool {
        let Some(other) = other.as_any().downcast_ref::<Self>() else {
            return false;
        };
        for (name, theirs) in &other.types {
            let ours = self
                .types
                .entry(name.clone())
                .or_insert_with(|| TypeRecord {
                    children: BTreeSet::new(),
                    filter: TypeFilter::empty(),
                });
            ours.children.extend(theirs.children.iter().cloned());
            ours.filter |= theirs.filter;
        }
        self.close_descendants();
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// `modules/blog/Model/Post.type` in module `App::Blog` at `modules/blog` names
/// `App::Blog::Model::Post`. Returns `None` when the path does not follow the convention.
fn expected_type_name(module: &Module, relative_path: &str, extension: &str) -> Option<String> {
    let inner = match module.relative_path() {
        "" => relative_path,
        prefix => relative_path.strip_prefix(prefix)?.strip_prefix('/')?,
    };
    let stem = inner.strip_suffix(extension)?.strip_suffix('.')?;

    let segments: Vec<&str> = stem.split('/').collect();
    if !segments.iter().all(|s| is_type_identifier(s)) {
        return None;
    }
    Some(format!("{}::{}", module.name(), segments.join("::")))
}

fn is_type_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn structural_error(file: &str, expected: &str, failure: ReflectionFailure) -> RegistryError {
    match failure {
        ReflectionFailure::NoTypeDeclared => RegistryError::EmptyDefinition {
            file: file.to_string(),
        },
        ReflectionFailure::UnexpectedName { declared } => name_mismatch(file, expected, &declared),
        ReflectionFailure::Unreadable { reason } => RegistryError::Reflection {
            file: file.to_string(),
            reason,
        },
    }
}

fn name_mismatch(file: &str, expected: &str, actual: &str) -> RegistryError {
    let (expected_ns, expected_leaf) = split_qualified(expected);
    let (actual_ns, actual_leaf) = split_qualified(actual);
    if expected_ns == actual_ns {
        RegistryError::NamingMismatch {
            file: file.to_string(),
            expected: expected_leaf.to_string(),
            actual: actual_leaf.to_string(),
        }
    } else {
        RegistryError::NamespaceMismatch {
            file: file.to_string(),
            expected: expected_ns.to_string(),
            actual: actual_ns.to_string(),
        }
    }
}

fn split_qualified(name: &str) -> (&str, &str) {
    name.rsplit_once("::").unwrap_or(("", name))
}
