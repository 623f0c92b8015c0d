use hive_archive::{module_archive_path, HiveArchive};
use hive_registry::{
    FileInventoryHive, HiveType, Module, ModuleFailurePolicy, RebuildPolicy, RegistryConfig,
    RegistryContext, RegistryError, TypeFilter, TypeGraphHive, ValidationMode,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn write_type(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    std::fs::write(path, body).expect("write type");
}

fn touch(root: &Path, relative: &str, offset: Duration) {
    let file = std::fs::File::options()
        .write(true)
        .open(root.join(relative))
        .expect("open for touch");
    file.set_modified(SystemTime::now() + offset)
        .expect("set mtime");
}

fn context(config: &RegistryConfig, modules: &[(&str, &str, u8)]) -> RegistryContext {
    let mut builder = RegistryContext::builder(config.clone());
    for (name, path, priority) in modules {
        builder = builder.module(Module::new(*name, *path, *priority).expect("module"));
    }
    builder.build().expect("context")
}

fn module_archive(config: &RegistryConfig, module: &str) -> HiveArchive {
    HiveArchive::open(module_archive_path(&config.resolved_archive_dir(), module))
}

fn names_under(context: &RegistryContext, ancestor: Option<&str>, mask: TypeFilter) -> Vec<String> {
    let aggregate = context
        .aggregate_hive(TypeGraphHive::KIND)
        .expect("aggregate");
    aggregate
        .downcast::<TypeGraphHive>()
        .expect("type graph")
        .qualified_names(ancestor, mask)
        .expect("known ancestor")
}

/// Module `App::M` with abstract `A` and concrete `B extends A`.
fn simple_platform() -> (TempDir, RegistryConfig) {
    let temp = TempDir::new().expect("tempdir");
    write_type(temp.path(), "m/A.type", "name = \"App::M::A\"\nabstract = true\n");
    write_type(
        temp.path(),
        "m/B.type",
        "name = \"App::M::B\"\nextends = \"App::M::A\"\n",
    );
    let config = RegistryConfig::for_platform(temp.path());
    (temp, config)
}

const SIMPLE: &[(&str, &str, u8)] = &[("App::M", "m", 0)];

#[test]
fn abstract_parent_and_concrete_leaf_child() {
    let (_temp, config) = simple_platform();
    let context = context(&config, SIMPLE);

    let aggregate = context
        .aggregate_hive(TypeGraphHive::KIND)
        .expect("aggregate");
    let graph = aggregate.downcast::<TypeGraphHive>().expect("type graph");
    assert_eq!(graph.get("App::M::A").expect("A").filter, TypeFilter::ABSTRACT);
    assert_eq!(
        graph.get("App::M::B").expect("B").filter,
        TypeFilter::CONCRETE | TypeFilter::LEAF
    );
    assert_eq!(
        names_under(&context, Some("App::M::A"), TypeFilter::CONCRETE),
        vec!["App::M::B"]
    );
    assert!(graph.is_valid_type("App::M::A"));
    assert!(!graph.is_valid_type("App::M::C"));
}

#[test]
fn second_context_reuses_persisted_hives() {
    let (_temp, config) = simple_platform();

    let first = context(&config, SIMPLE);
    let first_graph = first.module_hive("App::M", TypeGraphHive::KIND).expect("graph");
    let first_aggregate = first.aggregate_hive(TypeGraphHive::KIND).expect("aggregate");
    assert!(first_graph.updated());
    assert!(first_aggregate.updated());

    let second = context(&config, SIMPLE);
    let second_graph = second.module_hive("App::M", TypeGraphHive::KIND).expect("graph");
    let second_aggregate = second.aggregate_hive(TypeGraphHive::KIND).expect("aggregate");
    assert!(!second_graph.updated());
    assert!(!second_aggregate.updated());
    assert_eq!(first_graph.checksum(), second_graph.checksum());
    assert_eq!(first_aggregate.checksum(), second_aggregate.checksum());
    assert_eq!(
        second_aggregate.downcast::<TypeGraphHive>(),
        first_aggregate.downcast::<TypeGraphHive>()
    );
}

#[test]
fn corrupt_type_graph_entry_is_rebuilt_and_overwritten() {
    let (_temp, config) = simple_platform();
    context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect("first load");

    let archive = module_archive(&config, "App::M");
    let mut container: serde_json::Value =
        serde_json::from_slice(&std::fs::read(archive.path()).expect("read container"))
            .expect("parse container");
    container["entries"][TypeGraphHive::KIND.name()]["payload"]["payload"] =
        serde_json::json!({ "types": "garbage" });
    std::fs::write(archive.path(), serde_json::to_vec(&container).expect("encode"))
        .expect("write tampered container");
    assert!(archive.read_entry(TypeGraphHive::KIND.name()).is_err());

    let reloaded = context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect("corruption must not surface");
    assert!(reloaded.updated());
    assert_eq!(
        reloaded.downcast::<TypeGraphHive>().expect("type graph").len(),
        2
    );
    assert!(archive
        .read_entry(TypeGraphHive::KIND.name())
        .expect("entry is valid again")
        .is_some());
}

#[test]
fn corrupt_container_is_recreated() {
    let (_temp, config) = simple_platform();
    context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect("first load");

    let archive = module_archive(&config, "App::M");
    std::fs::write(archive.path(), b"{ not json").expect("clobber container");

    let reloaded = context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect("corruption must not surface");
    assert!(reloaded.updated());
    assert_eq!(
        archive.keys().expect("keys"),
        vec![
            FileInventoryHive::KIND.name().to_string(),
            TypeGraphHive::KIND.name().to_string()
        ]
    );
}

#[test]
fn updated_dependency_forces_dependent_rebuild() {
    let (_temp, config) = simple_platform();
    let before = context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect("first load");

    // Losing the inventory rebuilds it with identical content, so the type graph's own
    // checksum is unchanged; only the dependency's `updated` flag can trigger its rebuild.
    module_archive(&config, "App::M")
        .remove_entry(FileInventoryHive::KIND.name())
        .expect("remove inventory");

    let ctx = context(&config, SIMPLE);
    let after = ctx.module_hive("App::M", TypeGraphHive::KIND).expect("reload");
    let inventory = ctx
        .module_hive("App::M", FileInventoryHive::KIND)
        .expect("inventory");
    assert!(inventory.updated());
    assert!(after.updated());
    assert_eq!(before.checksum(), after.checksum());
}

#[test]
fn touched_file_invalidates_inventory_and_type_graph() {
    let (temp, config) = simple_platform();
    let before = context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect("first load");

    touch(temp.path(), "m/A.type", Duration::from_secs(120));

    let ctx = context(&config, SIMPLE);
    let after = ctx.module_hive("App::M", TypeGraphHive::KIND).expect("reload");
    assert!(ctx
        .module_hive("App::M", FileInventoryHive::KIND)
        .expect("inventory")
        .updated());
    assert!(after.updated());
    assert_ne!(before.checksum(), after.checksum());
}

#[test]
fn frozen_policy_serves_persisted_state() {
    let (temp, mut config) = simple_platform();
    context(&config, SIMPLE)
        .aggregate_hive(TypeGraphHive::KIND)
        .expect("warm archives");

    write_type(
        temp.path(),
        "m/C.type",
        "name = \"App::M::C\"\nextends = \"App::M::A\"\n",
    );
    config.rebuild_policy = RebuildPolicy::Frozen;

    let frozen = context(&config, SIMPLE);
    let inventory = frozen
        .module_hive("App::M", FileInventoryHive::KIND)
        .expect("inventory");
    assert!(!inventory.updated());
    assert_eq!(
        inventory
            .downcast::<FileInventoryHive>()
            .expect("inventory")
            .len(),
        2
    );
    assert_eq!(
        names_under(&frozen, Some("App::M::A"), TypeFilter::empty()),
        vec!["App::M::B"]
    );

    config.rebuild_policy = RebuildPolicy::Enabled;
    let thawed = context(&config, SIMPLE);
    assert_eq!(
        names_under(&thawed, Some("App::M::A"), TypeFilter::empty()),
        vec!["App::M::B", "App::M::C"]
    );
}

#[test]
fn modules_with_colliding_file_stems_keep_separate_archives() {
    let temp = TempDir::new().expect("tempdir");
    write_type(temp.path(), "a/Post.type", "name = \"App::Blog::Post\"\n");
    write_type(temp.path(), "b/Page.type", "name = \"App__Blog::Page\"\n");
    let mut config = RegistryConfig::for_platform(temp.path());
    let modules: [(&str, &str, u8); 2] = [("App::Blog", "a", 0), ("App__Blog", "b", 1)];

    assert_ne!(
        module_archive(&config, "App::Blog").path(),
        module_archive(&config, "App__Blog").path()
    );

    let module_types = |ctx: &RegistryContext, module: &str| -> Vec<String> {
        let graph = ctx.module_hive(module, TypeGraphHive::KIND).expect("graph");
        graph
            .downcast::<TypeGraphHive>()
            .expect("type graph")
            .qualified_names(None, TypeFilter::empty())
            .expect("all types")
    };

    let first = context(&config, &modules);
    assert_eq!(module_types(&first, "App::Blog"), vec!["App::Blog::Post"]);
    assert_eq!(module_types(&first, "App__Blog"), vec!["App__Blog::Page"]);

    let second = context(&config, &modules);
    for module in ["App::Blog", "App__Blog"] {
        assert!(!second
            .module_hive(module, TypeGraphHive::KIND)
            .expect("graph")
            .updated());
    }

    config.rebuild_policy = RebuildPolicy::Frozen;
    let frozen = context(&config, &modules);
    assert_eq!(module_types(&frozen, "App::Blog"), vec!["App::Blog::Post"]);
    assert_eq!(module_types(&frozen, "App__Blog"), vec!["App__Blog::Page"]);
}

#[test]
fn frozen_policy_still_builds_missing_hives() {
    let (_temp, mut config) = simple_platform();
    config.rebuild_policy = RebuildPolicy::Frozen;

    let ctx = context(&config, SIMPLE);
    let graph = ctx.module_hive("App::M", TypeGraphHive::KIND).expect("graph");
    assert!(graph.updated());
    assert_eq!(graph.downcast::<TypeGraphHive>().expect("type graph").len(), 2);
}

#[test]
fn rebuild_is_idempotent() {
    let (_temp, config) = simple_platform();

    let first = context(&config, SIMPLE);
    let first_graph = first.aggregate_hive(TypeGraphHive::KIND).expect("aggregate");
    first.clear_archives().expect("clear");

    let second = context(&config, SIMPLE);
    let second_graph = second.aggregate_hive(TypeGraphHive::KIND).expect("aggregate");
    assert!(second_graph.updated());
    assert_eq!(first_graph.checksum(), second_graph.checksum());
    assert_eq!(
        first_graph.record().hive().to_payload().expect("payload"),
        second_graph.record().hive().to_payload().expect("payload")
    );
}

#[test]
fn leaf_is_cleared_across_modules() {
    let temp = TempDir::new().expect("tempdir");
    write_type(
        temp.path(),
        "core/Model.type",
        "name = \"App::Core::Model\"\nabstract = true\n",
    );
    write_type(
        temp.path(),
        "blog/Post.type",
        "name = \"App::Blog::Post\"\nextends = \"App::Core::Model\"\nimplements = [\"Vendor::Routable\"]\n",
    );
    let config = RegistryConfig::for_platform(temp.path());
    let ctx = context(&config, &[("App::Blog", "blog", 5), ("App::Core", "core", 0)]);

    let core = ctx
        .module_hive("App::Core", TypeGraphHive::KIND)
        .expect("core graph");
    assert!(core
        .downcast::<TypeGraphHive>()
        .expect("type graph")
        .get("App::Core::Model")
        .expect("model")
        .filter
        .contains(TypeFilter::LEAF));

    let aggregate = ctx.aggregate_hive(TypeGraphHive::KIND).expect("aggregate");
    let sources: Vec<_> = aggregate.sources().iter().map(|s| s.module.as_str()).collect();
    assert_eq!(sources, vec!["App::Core", "App::Blog"]);

    let graph = aggregate.downcast::<TypeGraphHive>().expect("type graph");
    assert_eq!(graph.get("App::Core::Model").expect("model").filter, TypeFilter::ABSTRACT);
    assert!(!graph.is_valid_type("Vendor::Routable"));
    assert_eq!(
        names_under(&ctx, Some("App::Core::Model"), TypeFilter::CONCRETE | TypeFilter::LEAF),
        vec!["App::Blog::Post"]
    );
}

#[test]
fn strict_validation_reports_structural_errors() {
    let (temp, config) = simple_platform();
    write_type(temp.path(), "m/Empty.type", "");
    write_type(temp.path(), "m/Model/Post.type", "name = \"App::M::Model::Article\"\n");

    let err = context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect_err("strict");
    assert!(err.is_structural());
    let RegistryError::Module { module, source, .. } = err else {
        panic!("expected module error");
    };
    assert_eq!(module, "App::M");
    assert!(matches!(*source, RegistryError::EmptyDefinition { ref file } if file == "m/Empty.type"));

    std::fs::remove_file(temp.path().join("m/Empty.type")).expect("remove");
    let err = context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect_err("strict");
    let RegistryError::Module { source, .. } = err else {
        panic!("expected module error");
    };
    assert!(matches!(
        *source,
        RegistryError::NamingMismatch { ref expected, ref actual, ref file }
            if expected == "Post" && actual == "Article" && file == "m/Model/Post.type"
    ));

    write_type(temp.path(), "m/Model/Post.type", "name = \"App::Other::Model::Post\"\n");
    let err = context(&config, SIMPLE)
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect_err("strict");
    let RegistryError::Module { source, .. } = err else {
        panic!("expected module error");
    };
    assert!(matches!(
        *source,
        RegistryError::NamespaceMismatch { ref expected, ref actual, .. }
            if expected == "App::M::Model" && actual == "App::Other::Model"
    ));
}

#[test]
fn relaxed_validation_skips_only_the_offending_file() {
    let (temp, mut config) = simple_platform();
    write_type(temp.path(), "m/Empty.type", "");
    config.types.validation = ValidationMode::Relaxed;

    let ctx = context(&config, SIMPLE);
    assert_eq!(
        names_under(&ctx, None, TypeFilter::empty()),
        vec!["App::M::A", "App::M::B"]
    );
}

#[test]
fn failed_load_is_retried_within_the_same_context() {
    let (temp, config) = simple_platform();
    write_type(temp.path(), "m/Empty.type", "");

    let ctx = context(&config, SIMPLE);
    ctx.module_hive("App::M", TypeGraphHive::KIND)
        .expect_err("strict");

    write_type(temp.path(), "m/Empty.type", "name = \"App::M::Empty\"\n");
    let graph = ctx
        .module_hive("App::M", TypeGraphHive::KIND)
        .expect("retry succeeds");
    assert_eq!(graph.downcast::<TypeGraphHive>().expect("type graph").len(), 3);
}

#[test]
fn module_failure_policy_controls_the_aggregate() {
    let (temp, mut config) = simple_platform();
    write_type(temp.path(), "bad/Broken.type", "");
    let modules = &[("App::M", "m", 0), ("App::Bad", "bad", 1)];

    let err = context(&config, modules)
        .aggregate_hive(TypeGraphHive::KIND)
        .expect_err("abort");
    assert!(matches!(err, RegistryError::Module { ref module, .. } if module == "App::Bad"));

    config.module_failure = ModuleFailurePolicy::Skip;
    let ctx = context(&config, modules);
    let aggregate = ctx.aggregate_hive(TypeGraphHive::KIND).expect("partial");
    assert!(aggregate.is_partial());
    assert_eq!(aggregate.skipped()[0].module, "App::Bad");
    assert_eq!(aggregate.sources().len(), 1);
    assert_eq!(
        names_under(&ctx, None, TypeFilter::CONCRETE),
        vec!["App::M::B"]
    );
    assert!(ctx
        .aggregate()
        .archive()
        .read_entry(TypeGraphHive::KIND.name())
        .expect("read aggregate archive")
        .is_none());
}

#[test]
fn registry_internal_types_are_not_indexed() {
    let (temp, config) = simple_platform();
    write_type(
        temp.path(),
        "m/Catalog.type",
        "name = \"App::M::Catalog\"\nextends = \"App::Registry::Hive\"\n",
    );

    let ctx = context(&config, SIMPLE);
    assert_eq!(
        names_under(&ctx, None, TypeFilter::empty()),
        vec!["App::M::A", "App::M::B"]
    );
}

#[test]
fn hidden_and_private_paths_are_ignored() {
    let (temp, config) = simple_platform();
    write_type(temp.path(), "m/_drafts/Draft.type", "");
    write_type(temp.path(), "m/.cache/Stale.type", "");
    write_type(temp.path(), "m/helpers.type", "");

    let ctx = context(&config, SIMPLE);
    let inventory = ctx
        .module_hive("App::M", FileInventoryHive::KIND)
        .expect("inventory");
    let paths: Vec<_> = inventory
        .downcast::<FileInventoryHive>()
        .expect("inventory")
        .files()
        .iter()
        .map(|f| f.relative_path.clone())
        .collect();
    assert_eq!(paths, vec!["m/A.type", "m/B.type"]);
}

#[test]
fn missing_module_root_is_an_empty_valid_module() {
    let temp = TempDir::new().expect("tempdir");
    let config = RegistryConfig::for_platform(temp.path());
    let ctx = context(&config, &[("App::Gone", "gone", 0)]);

    let graph = ctx
        .module_hive("App::Gone", TypeGraphHive::KIND)
        .expect("empty module");
    assert!(graph.downcast::<TypeGraphHive>().expect("type graph").is_empty());
}
