use crate::catalog::{HiveCatalog, HiveSpec};
use crate::config::{ModuleFailurePolicy, RegistryConfig};
use crate::hive::{digest_parts, Hive, HiveKind, HiveRecord, HiveType};
use crate::module_registry::{read_envelope, unix_now_ms, EnvelopeKind, Lookup, ModuleRegistry};
use crate::{RegistryError, Result};
use hive_archive::{aggregate_archive_path, HiveArchive};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Which module hive, at which checksum, went into a composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceChecksum {
    pub module: String,
    pub checksum: String,
}

/// A module left out of a composite under [`ModuleFailurePolicy::Skip`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleFailure {
    pub module: String,
    pub error: String,
}

/// Platform-wide merge of every module's hive of one kind.
#[derive(Debug, Clone)]
pub struct AggregateHive {
    record: HiveRecord,
    sources: Vec<SourceChecksum>,
    skipped: Vec<ModuleFailure>,
}

impl AggregateHive {
    #[must_use]
    pub fn record(&self) -> &HiveRecord {
        &self.record
    }

    #[must_use]
    pub fn checksum(&self) -> &str {
        self.record.checksum()
    }

    /// True when the composite was merged in this process rather than read back.
    #[must_use]
    pub fn updated(&self) -> bool {
        self.record.updated()
    }

    #[must_use]
    pub fn downcast<H: HiveType>(&self) -> Option<&H> {
        self.record.downcast::<H>()
    }

    /// Merge inputs in load-priority order.
    #[must_use]
    pub fn sources(&self) -> &[SourceChecksum] {
        &self.sources
    }

    #[must_use]
    pub fn skipped(&self) -> &[ModuleFailure] {
        &self.skipped
    }

    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AggregateEnvelope {
    kind: String,
    format_version: u32,
    checksum: String,
    built_at_unix_ms: u64,
    sources: Vec<SourceChecksum>,
    payload: Value,
}

impl EnvelopeKind for AggregateEnvelope {
    fn kind(&self) -> &str {
        &self.kind
    }
}

struct Collected {
    sources: Vec<SourceChecksum>,
    skipped: Vec<ModuleFailure>,
    hives: Vec<Arc<HiveRecord>>,
}

/// Merges module hives into composites and keeps them for the rest of the process.
pub struct AggregateRegistry {
    modules: Vec<Arc<ModuleRegistry>>,
    archive: HiveArchive,
    config: Arc<RegistryConfig>,
    catalog: Arc<HiveCatalog>,
    composites: Mutex<HashMap<HiveKind, Arc<AggregateHive>>>,
}

impl AggregateRegistry {
    /// `modules` must already be in load-priority order.
    pub fn new(
        modules: Vec<Arc<ModuleRegistry>>,
        config: Arc<RegistryConfig>,
        catalog: Arc<HiveCatalog>,
    ) -> Self {
        let archive = HiveArchive::open(aggregate_archive_path(&config.resolved_archive_dir()));
        Self {
            modules,
            archive,
            config,
            catalog,
            composites: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn archive(&self) -> &HiveArchive {
        &self.archive
    }

    /// The composite of `kind`, merged from every module before it is handed out.
    pub fn get_hive(&self, kind: HiveKind) -> Result<Arc<AggregateHive>> {
        let mut composites = self
            .composites
            .lock()
            .expect("aggregate cache mutex poisoned");
        if let Some(composite) = composites.get(&kind) {
            return Ok(Arc::clone(composite));
        }

        let spec = self
            .catalog
            .spec(kind)
            .ok_or(RegistryError::UnknownHiveKind(kind))?;
        let mut persisted = read_envelope::<AggregateEnvelope>(&self.archive, kind, None);

        if !self.config.rebuild_policy.allows_rebuild() {
            if let Lookup::Found(envelope) = persisted {
                if let Some(composite) = Self::revive(spec, envelope, None) {
                    log::debug!("Serving persisted {kind} composite (frozen)");
                    let composite = Arc::new(composite);
                    composites.insert(kind, Arc::clone(&composite));
                    return Ok(composite);
                }
                persisted = Lookup::Corrupt;
            }
        }

        let collected = self.collect(kind)?;
        let any_updated = collected.hives.iter().any(|record| record.updated());

        if !any_updated && collected.skipped.is_empty() {
            if let Lookup::Found(envelope) = persisted {
                let sources = Some(collected.sources.as_slice());
                if let Some(composite) = Self::revive(spec, envelope, sources) {
                    log::debug!("Reusing persisted {kind} composite");
                    let composite = Arc::new(composite);
                    composites.insert(kind, Arc::clone(&composite));
                    return Ok(composite);
                }
            }
        }

        let composite = Arc::new(self.merge(spec, collected)?);
        composites.insert(kind, Arc::clone(&composite));
        Ok(composite)
    }

    fn collect(&self, kind: HiveKind) -> Result<Collected> {
        let mut collected = Collected {
            sources: Vec::with_capacity(self.modules.len()),
            skipped: Vec::new(),
            hives: Vec::with_capacity(self.modules.len()),
        };

        for registry in &self.modules {
            let name = registry.module().name().to_string();
            match registry.get_hive(kind) {
                Ok(record) => {
                    collected.sources.push(SourceChecksum {
                        module: name,
                        checksum: record.checksum().to_string(),
                    });
                    collected.hives.push(record);
                }
                Err(err) => match self.config.module_failure {
                    ModuleFailurePolicy::Abort => return Err(err),
                    ModuleFailurePolicy::Skip => {
                        log::warn!("Leaving module {name} out of the {kind} composite: {err}");
                        collected.skipped.push(ModuleFailure {
                            module: name,
                            error: err.to_string(),
                        });
                    }
                },
            }
        }
        Ok(collected)
    }

    fn merge(&self, spec: &HiveSpec, collected: Collected) -> Result<AggregateHive> {
        let kind = spec.kind;
        let mut composite = spec.create();
        for record in &collected.hives {
            if !composite.merge(record.hive()) {
                return Err(RegistryError::MergeMismatch {
                    target: kind,
                    other: record.kind(),
                });
            }
        }

        let checksum = composite_checksum(kind, &collected.sources);
        if collected.skipped.is_empty() {
            self.write_back(spec, &checksum, &collected.sources, composite.as_ref());
        } else {
            log::warn!(
                "Composite {kind} is partial ({} modules skipped), not persisting",
                collected.skipped.len()
            );
        }
        log::info!(
            "Merged {kind} composite from {} modules",
            collected.sources.len()
        );

        Ok(AggregateHive {
            record: HiveRecord::new(
                checksum,
                spec.format_version,
                spec.dependencies,
                true,
                Arc::from(composite),
            ),
            sources: collected.sources,
            skipped: collected.skipped,
        })
    }

    /// Decode a persisted composite, optionally requiring it was merged from `sources`.
    fn revive(
        spec: &HiveSpec,
        envelope: AggregateEnvelope,
        sources: Option<&[SourceChecksum]>,
    ) -> Option<AggregateHive> {
        if envelope.format_version != spec.format_version {
            log::debug!(
                "Persisted {} composite has format {}, expected {}",
                spec.kind,
                envelope.format_version,
                spec.format_version
            );
            return None;
        }
        if sources.is_some_and(|sources| sources != envelope.sources.as_slice()) {
            return None;
        }
        let hive = match spec.decode(envelope.payload) {
            Ok(hive) => hive,
            Err(err) => {
                log::warn!("Persisted {} composite does not decode: {err}", spec.kind);
                return None;
            }
        };
        Some(AggregateHive {
            record: HiveRecord::new(
                envelope.checksum,
                spec.format_version,
                spec.dependencies,
                false,
                Arc::from(hive),
            ),
            sources: envelope.sources,
            skipped: Vec::new(),
        })
    }

    fn write_back(
        &self,
        spec: &HiveSpec,
        checksum: &str,
        sources: &[SourceChecksum],
        hive: &dyn Hive,
    ) {
        let written = hive
            .to_payload()
            .map_err(RegistryError::from)
            .and_then(|payload| {
                let envelope = AggregateEnvelope {
                    kind: spec.kind.name().to_string(),
                    format_version: spec.format_version,
                    checksum: checksum.to_string(),
                    built_at_unix_ms: unix_now_ms(),
                    sources: sources.to_vec(),
                    payload,
                };
                Ok(serde_json::to_value(envelope)?)
            })
            .and_then(|value| Ok(self.archive.write_entry(spec.kind.name(), &value)?));
        if let Err(err) = written {
            log::warn!("Failed to persist {} composite: {err}", spec.kind);
        }
    }
}

impl std::fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRegistry")
            .field("modules", &self.modules.len())
            .field("archive", &self.archive.path())
            .finish_non_exhaustive()
    }
}

fn composite_checksum(kind: HiveKind, sources: &[SourceChecksum]) -> String {
    digest_parts(
        std::iter::once(kind.name().as_bytes()).chain(
            sources
                .iter()
                .flat_map(|source| [source.module.as_bytes(), source.checksum.as_bytes()]),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(module: &str, checksum: &str) -> SourceChecksum {
        SourceChecksum {
            module: module.to_string(),
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn composite_checksum_tracks_order_and_content() {
        let kind = HiveKind::new("hive/type-graph");
        let ab = composite_checksum(kind, &[source("A", "1"), source("B", "2")]);
        let ba = composite_checksum(kind, &[source("B", "2"), source("A", "1")]);
        let changed = composite_checksum(kind, &[source("A", "1"), source("B", "3")]);

        assert_eq!(ab, composite_checksum(kind, &[source("A", "1"), source("B", "2")]));
        assert_ne!(ab, ba);
        assert_ne!(ab, changed);
        assert_ne!(
            ab,
            composite_checksum(HiveKind::new("hive/other"), &[source("A", "1"), source("B", "2")])
        );
    }
}
