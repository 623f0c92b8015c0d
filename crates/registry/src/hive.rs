use crate::collab::{Collaborators, FileWalker, TypeReflector};
use crate::config::RegistryConfig;
use crate::module::Module;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity of a hive type. The name doubles as the archive entry key, so it is slash-separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HiveKind(&'static str);

impl HiveKind {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for HiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A unit of derived metadata that can recompute itself and absorb another instance of itself.
pub trait Hive: Any + Send + Sync + fmt::Debug {
    fn kind(&self) -> HiveKind;

    /// Digest of the inputs a rebuild would consume right now.
    fn input_checksum(&self, ctx: &HiveContext<'_>) -> Result<String>;

    /// [`Hive::input_checksum`], plus the rebuilt hive when computing the digest already
    /// produced it. A stale hive is then not recomputed a second time.
    fn scan_inputs(&self, ctx: &HiveContext<'_>) -> Result<(String, Option<Box<dyn Hive>>)> {
        Ok((self.input_checksum(ctx)?, None))
    }

    /// Recompute all content from the context; returns the checksum of the inputs consumed.
    ///
    /// Must only touch `self`: dependencies are already resolved and read-only.
    fn rebuild(&mut self, ctx: &HiveContext<'_>) -> Result<String>;

    /// Fold `other` into `self`. Returns `false`, leaving `self` untouched, when `other` is a
    /// different concrete hive type.
    fn merge(&mut self, other: &dyn Hive) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn to_payload(&self) -> serde_json::Result<Value>;
}

/// Static description of a concrete hive type, consumed by the catalog.
pub trait HiveType: Hive + Default + Serialize + DeserializeOwned {
    const KIND: HiveKind;
    /// Bump whenever the persisted shape changes; older entries are then rebuilt unconditionally.
    const FORMAT_VERSION: u32;
    const DEPENDENCIES: &'static [HiveKind];
}

/// A loaded hive plus the bookkeeping that decides whether it is current.
///
/// Records are immutable once handed out: a checksum only changes by building a new record.
#[derive(Debug, Clone)]
pub struct HiveRecord {
    kind: HiveKind,
    checksum: String,
    format_version: u32,
    dependencies: &'static [HiveKind],
    updated: bool,
    hive: Arc<dyn Hive>,
}

impl HiveRecord {
    pub(crate) fn new(
        checksum: String,
        format_version: u32,
        dependencies: &'static [HiveKind],
        updated: bool,
        hive: Arc<dyn Hive>,
    ) -> Self {
        Self {
            kind: hive.kind(),
            checksum,
            format_version,
            dependencies,
            updated,
            hive,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> HiveKind {
        self.kind
    }

    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    #[must_use]
    pub const fn format_version(&self) -> u32 {
        self.format_version
    }

    #[must_use]
    pub const fn dependencies(&self) -> &'static [HiveKind] {
        self.dependencies
    }

    /// True when this process rebuilt the hive rather than reading it back unchanged.
    #[must_use]
    pub const fn updated(&self) -> bool {
        self.updated
    }

    #[must_use]
    pub fn hive(&self) -> &dyn Hive {
        self.hive.as_ref()
    }

    #[must_use]
    pub fn downcast<H: HiveType>(&self) -> Option<&H> {
        self.hive.as_any().downcast_ref::<H>()
    }
}

/// Everything a hive may consult while computing its checksum or rebuilding.
pub struct HiveContext<'a> {
    kind: HiveKind,
    declared: &'static [HiveKind],
    module: &'a Module,
    platform_root: &'a Path,
    config: &'a RegistryConfig,
    collaborators: &'a Collaborators,
    resolved: &'a HashMap<HiveKind, Arc<HiveRecord>>,
}

impl<'a> HiveContext<'a> {
    pub(crate) fn new(
        kind: HiveKind,
        declared: &'static [HiveKind],
        module: &'a Module,
        config: &'a RegistryConfig,
        collaborators: &'a Collaborators,
        resolved: &'a HashMap<HiveKind, Arc<HiveRecord>>,
    ) -> Self {
        Self {
            kind,
            declared,
            module,
            platform_root: &config.platform_root,
            config,
            collaborators,
            resolved,
        }
    }

    #[must_use]
    pub const fn module(&self) -> &'a Module {
        self.module
    }

    #[must_use]
    pub const fn platform_root(&self) -> &'a Path {
        self.platform_root
    }

    #[must_use]
    pub fn module_root(&self) -> PathBuf {
        self.module.root(self.platform_root)
    }

    #[must_use]
    pub const fn config(&self) -> &'a RegistryConfig {
        self.config
    }

    #[must_use]
    pub fn walker(&self) -> &'a dyn FileWalker {
        self.collaborators.walker.as_ref()
    }

    #[must_use]
    pub fn reflector(&self) -> &'a dyn TypeReflector {
        self.collaborators.reflector.as_ref()
    }

    /// Record of a declared dependency.
    ///
    /// # Panics
    ///
    /// Reading a kind the hive did not declare is a bug in the hive implementation.
    #[must_use]
    pub fn dependency_record(&self, kind: HiveKind) -> &'a HiveRecord {
        assert!(
            self.declared.contains(&kind),
            "hive {} read undeclared dependency {kind}",
            self.kind
        );
        match self.resolved.get(&kind) {
            Some(record) => record.as_ref(),
            None => panic!("hive {} dependency {kind} was not resolved", self.kind),
        }
    }

    /// Typed content of a declared dependency.
    ///
    /// # Panics
    ///
    /// Same contract as [`HiveContext::dependency_record`].
    #[must_use]
    pub fn dependency<H: HiveType>(&self) -> &'a H {
        match self.dependency_record(H::KIND).downcast::<H>() {
            Some(hive) => hive,
            None => panic!("dependency {} has an unexpected concrete type", H::KIND),
        }
    }
}

/// Hex SHA-256 over length-prefixed parts, so `["ab", "c"]` and `["a", "bc"]` differ.
#[must_use]
pub fn digest_parts<I, P>(parts: I) -> String
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}
