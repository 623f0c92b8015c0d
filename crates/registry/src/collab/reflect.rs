use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A file the type graph wants reflected, and the type name its location implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCandidate {
    pub expected_name: String,
    pub path: PathBuf,
}

/// What reflection learned about one declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub is_abstract: bool,
    /// Superclass first, then implemented contracts, then composed behaviors.
    pub parents: Vec<String>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, is_abstract: bool) -> Self {
        Self {
            name: name.into(),
            is_abstract,
            parents: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectionFailure {
    #[error("no type declared")]
    NoTypeDeclared,

    #[error("declares '{declared}' instead")]
    UnexpectedName { declared: String },

    #[error("{reason}")]
    Unreadable { reason: String },
}

/// Pluggable type introspection.
pub trait TypeReflector: Send + Sync {
    fn reflect(&self, candidate: &TypeCandidate) -> Result<TypeDescriptor, ReflectionFailure>;
}

/// Reads type-declaration files written in TOML:
///
/// ```toml
/// name = "App::Blog::Model::Post"
/// abstract = false
/// extends = "App::Blog::Model::Entry"
/// implements = ["App::Core::Contract::Routable"]
/// uses = ["App::Core::Behavior::Timestamps"]
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarationReflector;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDeclaration {
    name: Option<String>,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    extends: Option<String>,
    #[serde(default)]
    implements: Vec<String>,
    #[serde(default)]
    uses: Vec<String>,
}

impl DeclarationReflector {
    pub fn parse(source: &str) -> Result<TypeDescriptor, ReflectionFailure> {
        if source.trim().is_empty() {
            return Err(ReflectionFailure::NoTypeDeclared);
        }
        let raw: RawDeclaration =
            toml::from_str(source).map_err(|err| ReflectionFailure::Unreadable {
                reason: err.to_string(),
            })?;
        let Some(name) = raw.name.filter(|name| !name.trim().is_empty()) else {
            return Err(ReflectionFailure::NoTypeDeclared);
        };

        let parents = raw
            .extends
            .into_iter()
            .chain(raw.implements)
            .chain(raw.uses)
            .collect();
        Ok(TypeDescriptor {
            name: name.trim().to_string(),
            is_abstract: raw.is_abstract,
            parents,
        })
    }

    fn read(path: &Path) -> Result<String, ReflectionFailure> {
        std::fs::read_to_string(path).map_err(|err| ReflectionFailure::Unreadable {
            reason: format!("read {}: {err}", path.display()),
        })
    }
}

impl TypeReflector for DeclarationReflector {
    fn reflect(&self, candidate: &TypeCandidate) -> Result<TypeDescriptor, ReflectionFailure> {
        let descriptor = Self::parse(&Self::read(&candidate.path)?)?;
        if descriptor.name != candidate.expected_name {
            return Err(ReflectionFailure::UnexpectedName {
                declared: descriptor.name,
            });
        }
        Ok(descriptor)
    }
}
