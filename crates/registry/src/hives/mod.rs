//! Hive types shipped with the registry.

mod file_inventory;
mod type_graph;

pub use file_inventory::{FileInventoryHive, FileRecord};
pub use type_graph::{TypeFilter, TypeGraphHive, TypeRecord, UnknownAncestor};
