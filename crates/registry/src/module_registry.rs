use crate::catalog::{HiveCatalog, HiveSpec};
use crate::collab::Collaborators;
use crate::config::RegistryConfig;
use crate::hive::{Hive, HiveContext, HiveKind, HiveRecord};
use crate::module::Module;
use crate::staleness::{assess_rebuild, PersistedState};
use crate::{RegistryError, Result};
use hive_archive::{module_archive_path, HiveArchive};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Archive entry wrapping one persisted hive.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HiveEnvelope {
    pub module: String,
    pub kind: String,
    pub format_version: u32,
    pub checksum: String,
    pub built_at_unix_ms: u64,
    pub payload: Value,
}

impl HiveEnvelope {
    pub(crate) fn wrap(
        module: &Module,
        kind: HiveKind,
        format_version: u32,
        checksum: &str,
        hive: &dyn Hive,
    ) -> Result<Self> {
        Ok(Self {
            module: module.name().to_string(),
            kind: kind.name().to_string(),
            format_version,
            checksum: checksum.to_string(),
            built_at_unix_ms: unix_now_ms(),
            payload: hive.to_payload()?,
        })
    }
}

/// Outcome of looking a hive up in an archive. Every failure mode collapses into `Corrupt`:
/// the caller's only remedy is a rebuild.
pub(crate) enum Lookup<T> {
    Missing,
    Corrupt,
    Found(T),
}

/// Read and unwrap an envelope for `kind`, recreating the container when it is unreadable.
///
/// With `owner` set, an envelope written for another module counts as corrupt.
pub(crate) fn read_envelope<T>(
    archive: &HiveArchive,
    kind: HiveKind,
    owner: Option<&str>,
) -> Lookup<T>
where
    T: serde::de::DeserializeOwned + EnvelopeKind,
{
    match archive.read_entry(kind.name()) {
        Ok(None) => Lookup::Missing,
        Ok(Some(value)) => match serde_json::from_value::<T>(value) {
            Ok(envelope) if envelope.kind() != kind.name() => {
                log::warn!(
                    "Entry {kind} in {} holds a {} hive, rebuilding",
                    archive.path().display(),
                    envelope.kind()
                );
                Lookup::Corrupt
            }
            Ok(envelope) => match (owner, envelope.module()) {
                (Some(owner), written_by) if written_by != Some(owner) => {
                    log::warn!(
                        "Entry {kind} in {} belongs to module {}, not {owner}, rebuilding",
                        archive.path().display(),
                        written_by.unwrap_or("<none>")
                    );
                    Lookup::Corrupt
                }
                _ => Lookup::Found(envelope),
            },
            Err(err) => {
                log::warn!(
                    "Unreadable entry {kind} in {}: {err}, rebuilding",
                    archive.path().display()
                );
                Lookup::Corrupt
            }
        },
        Err(err) if err.is_container_corrupt() => {
            log::warn!("{err}, recreating");
            if let Err(err) = archive.recreate() {
                log::warn!("Failed to recreate {}: {err}", archive.path().display());
            }
            Lookup::Corrupt
        }
        Err(err) => {
            log::warn!("Failed to read {kind} from {}: {err}", archive.path().display());
            Lookup::Corrupt
        }
    }
}

pub(crate) trait EnvelopeKind {
    fn kind(&self) -> &str;

    /// Module that wrote the envelope, for per-module entries.
    fn module(&self) -> Option<&str> {
        None
    }
}

impl EnvelopeKind for HiveEnvelope {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn module(&self) -> Option<&str> {
        Some(&self.module)
    }
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Archive-backed hives of one module.
///
/// Each kind is resolved at most once per registry: the first `get_hive` reads the archive,
/// decides whether to rebuild, writes back if it did, and caches the record. A failed load
/// is not cached.
pub struct ModuleRegistry {
    module: Module,
    archive: HiveArchive,
    config: Arc<RegistryConfig>,
    catalog: Arc<HiveCatalog>,
    collaborators: Collaborators,
    hives: Mutex<HashMap<HiveKind, Arc<HiveRecord>>>,
}

impl ModuleRegistry {
    pub fn new(
        module: Module,
        config: Arc<RegistryConfig>,
        catalog: Arc<HiveCatalog>,
        collaborators: Collaborators,
    ) -> Self {
        let archive = HiveArchive::open(module_archive_path(
            &config.resolved_archive_dir(),
            module.name(),
        ));
        Self {
            module,
            archive,
            config,
            catalog,
            collaborators,
            hives: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    #[must_use]
    pub fn archive(&self) -> &HiveArchive {
        &self.archive
    }

    /// Resolve `kind` and everything it depends on, dependencies first.
    ///
    /// Errors are wrapped in [`RegistryError::Module`] naming the module and the kind that
    /// failed.
    pub fn get_hive(&self, kind: HiveKind) -> Result<Arc<HiveRecord>> {
        let mut hives = self
            .hives
            .lock()
            .expect("module hive cache mutex poisoned");
        if let Some(record) = hives.get(&kind) {
            return Ok(Arc::clone(record));
        }

        for step in self.catalog.plan(kind)? {
            if hives.contains_key(&step) {
                continue;
            }
            let record = self
                .load(step, &hives)
                .map_err(|source| RegistryError::Module {
                    module: self.module.name().to_string(),
                    kind: step,
                    source: Box::new(source),
                })?;
            hives.insert(step, Arc::new(record));
        }

        hives
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::UnknownHiveKind(kind))
    }

    /// Records resolved so far, sorted by kind.
    #[must_use]
    pub fn loaded(&self) -> Vec<Arc<HiveRecord>> {
        let hives = self
            .hives
            .lock()
            .expect("module hive cache mutex poisoned");
        let mut records: Vec<_> = hives.values().cloned().collect();
        records.sort_by_key(|record| record.kind());
        records
    }

    fn load(
        &self,
        kind: HiveKind,
        resolved: &HashMap<HiveKind, Arc<HiveRecord>>,
    ) -> Result<HiveRecord> {
        let spec = self
            .catalog
            .spec(kind)
            .ok_or(RegistryError::UnknownHiveKind(kind))?;
        let ctx = HiveContext::new(
            kind,
            spec.dependencies,
            &self.module,
            &self.config,
            &self.collaborators,
            resolved,
        );
        let dependency_updated = spec
            .dependencies
            .iter()
            .any(|dep| resolved.get(dep).is_some_and(|record| record.updated()));

        let envelope =
            read_envelope::<HiveEnvelope>(&self.archive, kind, Some(self.module.name()));
        let mut decoded: Option<Box<dyn Hive>> = None;
        let state = match &envelope {
            Lookup::Missing => PersistedState::Missing,
            Lookup::Corrupt => PersistedState::Corrupt,
            Lookup::Found(found) if found.format_version != spec.format_version => {
                PersistedState::Present {
                    format_version: found.format_version,
                    checksum: &found.checksum,
                }
            }
            Lookup::Found(found) => match spec.decode(found.payload.clone()) {
                Ok(hive) => {
                    decoded = Some(hive);
                    PersistedState::Present {
                        format_version: found.format_version,
                        checksum: &found.checksum,
                    }
                }
                Err(err) => {
                    log::warn!(
                        "Persisted {kind} for module {} does not decode: {err}",
                        self.module.name()
                    );
                    PersistedState::Corrupt
                }
            },
        };

        let mut scanned: Option<(String, Box<dyn Hive>)> = None;
        let assessment = assess_rebuild(
            state,
            spec.format_version,
            self.config.rebuild_policy,
            dependency_updated,
            || {
                let (checksum, rebuilt) = match &decoded {
                    Some(hive) => hive.scan_inputs(&ctx)?,
                    None => spec.create().scan_inputs(&ctx)?,
                };
                if let Some(hive) = rebuilt {
                    scanned = Some((checksum.clone(), hive));
                }
                Ok(checksum)
            },
        )?;

        if !assessment.required {
            if let (Some(hive), Lookup::Found(found)) = (decoded, envelope) {
                log::debug!("Hive {kind} of module {} is current", self.module.name());
                return Ok(HiveRecord::new(
                    found.checksum,
                    spec.format_version,
                    spec.dependencies,
                    false,
                    Arc::from(hive),
                ));
            }
        }

        log::info!(
            "Rebuilding {kind} for module {} ({:?})",
            self.module.name(),
            assessment.reasons
        );
        let (checksum, hive) = match scanned {
            Some(ready) => ready,
            None => {
                let mut hive = spec.create();
                let checksum = hive.rebuild(&ctx)?;
                (checksum, hive)
            }
        };
        self.write_back(spec, &checksum, hive.as_ref());

        Ok(HiveRecord::new(
            checksum,
            spec.format_version,
            spec.dependencies,
            true,
            Arc::from(hive),
        ))
    }

    // The read lock was released before the rebuild; another process may write the same entry
    // in between. Both writers hold equivalent content, so the last one wins.
    fn write_back(&self, spec: &HiveSpec, checksum: &str, hive: &dyn Hive) {
        let written =
            HiveEnvelope::wrap(&self.module, spec.kind, spec.format_version, checksum, hive)
                .and_then(|envelope| Ok(serde_json::to_value(envelope)?))
                .and_then(|value| Ok(self.archive.write_entry(spec.kind.name(), &value)?));
        match written {
            Ok(()) => log::debug!(
                "Persisted {} for module {} to {}",
                spec.kind,
                self.module.name(),
                self.archive.path().display()
            ),
            Err(err) => log::warn!(
                "Failed to persist {} for module {}: {err}",
                spec.kind,
                self.module.name()
            ),
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("module", &self.module)
            .field("archive", &self.archive.path())
            .finish_non_exhaustive()
    }
}
