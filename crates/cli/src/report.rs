use anyhow::Result;
use hive_registry::{
    AggregateHive, FileInventoryHive, HiveKind, HiveRecord, ModuleFailure, RegistryError,
    TypeGraphHive,
};
use serde::Serialize;
use std::collections::BTreeSet;

const SHORT_CHECKSUM: usize = 12;

#[derive(Debug, Serialize)]
pub struct StatusRow {
    pub module: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusRow {
    pub fn loaded(module: &str, record: &HiveRecord) -> Self {
        Self {
            module: module.to_string(),
            kind: record.kind().name(),
            checksum: Some(record.checksum().to_string()),
            updated: record.updated(),
            size: hive_size(record),
            error: None,
        }
    }

    pub fn failed(module: &str, kind: HiveKind, err: &RegistryError) -> Self {
        Self {
            module: module.to_string(),
            kind: kind.name(),
            checksum: None,
            updated: false,
            size: None,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AggregateRow {
    pub kind: &'static str,
    pub checksum: String,
    pub modules: usize,
    pub size: Option<usize>,
    pub skipped: Vec<ModuleFailure>,
}

impl AggregateRow {
    pub fn from_aggregate(aggregate: &AggregateHive) -> Self {
        Self {
            kind: aggregate.record().kind().name(),
            checksum: aggregate.checksum().to_string(),
            modules: aggregate.sources().len(),
            size: hive_size(aggregate.record()),
            skipped: aggregate.skipped().to_vec(),
        }
    }
}

/// Entry count for the built-in hive kinds; `None` for kinds this binary does not know.
fn hive_size(record: &HiveRecord) -> Option<usize> {
    if let Some(inventory) = record.downcast::<FileInventoryHive>() {
        return Some(inventory.len());
    }
    record.downcast::<TypeGraphHive>().map(TypeGraphHive::len)
}

fn short(checksum: &str) -> &str {
    checksum.get(..SHORT_CHECKSUM).unwrap_or(checksum)
}

#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub const fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn status(self, rows: &[StatusRow]) -> Result<()> {
        if self.json {
            return print_json(&rows);
        }
        for row in rows {
            match (&row.checksum, &row.error) {
                (Some(checksum), _) => println!(
                    "{:<24} {:<22} {}  {:<7} {}",
                    row.module,
                    row.kind,
                    short(checksum),
                    if row.updated { "rebuilt" } else { "current" },
                    row.size.map_or_else(|| "-".to_string(), |n| n.to_string()),
                ),
                (None, Some(error)) => {
                    println!("{:<24} {:<22} error: {error}", row.module, row.kind);
                }
                (None, None) => {}
            }
        }
        Ok(())
    }

    pub fn rebuild(self, rows: &[AggregateRow]) -> Result<()> {
        if self.json {
            return print_json(&rows);
        }
        for row in rows {
            println!(
                "{:<22} {}  modules={} size={}",
                row.kind,
                short(&row.checksum),
                row.modules,
                row.size.map_or_else(|| "-".to_string(), |n| n.to_string()),
            );
            for failure in &row.skipped {
                println!("  skipped {}: {}", failure.module, failure.error);
            }
        }
        Ok(())
    }

    pub fn names(self, names: &BTreeSet<String>) -> Result<()> {
        if self.json {
            return print_json(names);
        }
        for name in names {
            println!("{name}");
        }
        Ok(())
    }

    pub fn check(self, name: &str, valid: bool) -> Result<()> {
        if self.json {
            return print_json(&serde_json::json!({ "name": name, "valid": valid }));
        }
        println!("{name}: {}", if valid { "valid" } else { "unknown" });
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
