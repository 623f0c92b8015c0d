use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Parser, Subcommand};
use hive_query::{MemoryCache, MetadataQuery};
use hive_registry::{HiveType, RegistryConfig, RegistryContext, TypeFilter, TypeGraphHive};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod report;

use report::{AggregateRow, Output, StatusRow};

#[derive(Parser, Debug)]
#[command(
    name = "hivectl",
    version,
    about = "Inspect, rebuild and query a platform's hive registry"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Registry configuration file
    #[arg(long, global = true, default_value = "hive.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every module hive and report checksum, freshness and size
    Status,

    /// Clear every archive, then rebuild all module and aggregate hives
    Rebuild,

    /// List qualified type names from the aggregate type graph
    Query {
        /// Restrict to descendants of this type
        #[arg(long)]
        ancestor: Option<String>,

        /// Comma-separated flags every result must carry (abstract, concrete, leaf)
        #[arg(long, value_parser = parse_filter, default_value = "")]
        filter: TypeFilter,
    },

    /// Exit successfully when NAME is a known type
    Check {
        /// Fully qualified type name
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = load_config(&cli.config)?;
    let output = Output::new(cli.json);

    match cli.command {
        Command::Status => status(config, output),
        Command::Rebuild => rebuild(config, output),
        Command::Query { ancestor, filter } => query(config, output, ancestor.as_deref(), filter),
        Command::Check { name } => check(config, output, &name),
    }
}

fn load_config(path: &Path) -> Result<RegistryConfig> {
    let mut config = RegistryConfig::from_file(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    config
        .apply_env()
        .context("Invalid HIVE_* environment override")?;
    log::debug!(
        "Platform {} ({} declared modules)",
        config.platform_root.display(),
        config.modules.len()
    );
    Ok(config)
}

fn status(config: RegistryConfig, output: Output) -> Result<()> {
    let context = RegistryContext::new(config).context("Failed to build registry context")?;

    let mut rows = Vec::new();
    for registry in context.module_registries() {
        for &kind in context.catalog().kinds() {
            let row = match registry.get_hive(kind) {
                Ok(record) => StatusRow::loaded(registry.module().name(), &record),
                Err(err) => StatusRow::failed(registry.module().name(), kind, &err),
            };
            rows.push(row);
        }
    }

    output.status(&rows)?;
    let failed = rows.iter().filter(|row| row.error.is_some()).count();
    if failed > 0 {
        bail!("{failed} module hive(s) failed to load");
    }
    Ok(())
}

fn rebuild(config: RegistryConfig, output: Output) -> Result<()> {
    RegistryContext::new(config.clone())
        .context("Failed to build registry context")?
        .clear_archives()
        .context("Failed to clear archives")?;

    // Hives resolved before the clear stay cached per context, so rebuild through a fresh one.
    let context = RegistryContext::new(config).context("Failed to build registry context")?;
    let mut rows = Vec::new();
    for &kind in context.catalog().kinds() {
        let aggregate = context
            .aggregate_hive(kind)
            .with_context(|| format!("Failed to rebuild {kind}"))?;
        rows.push(AggregateRow::from_aggregate(&aggregate));
    }
    log::info!("Rebuilt {} aggregate hive(s)", rows.len());

    output.rebuild(&rows)
}

fn query(
    config: RegistryConfig,
    output: Output,
    ancestor: Option<&str>,
    filter: TypeFilter,
) -> Result<()> {
    let query = metadata_query(config)?;
    let names = query.qualified_names(ancestor, filter)?;
    output.names(&names)
}

fn check(config: RegistryConfig, output: Output, name: &str) -> Result<()> {
    let query = metadata_query(config)?;
    let valid = query.is_valid_type(name)?;
    output.check(name, valid)?;
    if !valid {
        bail!("Unknown type {name}");
    }
    Ok(())
}

fn metadata_query(config: RegistryConfig) -> Result<MetadataQuery> {
    let context = RegistryContext::new(config).context("Failed to build registry context")?;
    log::debug!(
        "Querying {} across {} module(s)",
        TypeGraphHive::KIND,
        context.modules().count()
    );
    Ok(MetadataQuery::new(
        Arc::new(context),
        Arc::new(MemoryCache::default()),
    ))
}

fn parse_filter(raw: &str) -> std::result::Result<TypeFilter, String> {
    let mut filter = TypeFilter::empty();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        filter |= match part.to_ascii_lowercase().as_str() {
            "abstract" => TypeFilter::ABSTRACT,
            "concrete" => TypeFilter::CONCRETE,
            "leaf" => TypeFilter::LEAF,
            other => {
                return Err(format!(
                    "unknown filter flag '{other}' (expected abstract, concrete or leaf)"
                ))
            }
        };
    }
    Ok(filter)
}
