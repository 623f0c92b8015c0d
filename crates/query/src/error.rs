use hive_registry::{HiveKind, RegistryError, UnknownAncestor};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Error, Debug)]
pub enum QueryError {
    /// The query named an ancestor the aggregate does not know; distinct from an empty answer.
    #[error(transparent)]
    UnknownAncestor(#[from] UnknownAncestor),

    #[error("Aggregate {0} is not a type graph")]
    UnexpectedHive(HiveKind),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
