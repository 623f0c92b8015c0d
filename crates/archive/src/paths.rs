use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const ARCHIVE_EXTENSION: &str = "hive.json";
pub const MODULES_DIR_NAME: &str = "modules";
pub const AGGREGATE_ARCHIVE_NAME: &str = "aggregate";
const NAME_DIGEST_LEN: usize = 12;

/// Archive file for one module, e.g. `App::Blog` -> `<dir>/modules/App__Blog-<digest>.hive.json`.
///
/// The readable stem is lossy; the digest of the raw name keeps distinct modules apart.
#[must_use]
pub fn module_archive_path(archive_dir: &Path, module_name: &str) -> PathBuf {
    archive_dir.join(MODULES_DIR_NAME).join(format!(
        "{}-{}.{ARCHIVE_EXTENSION}",
        safe_component(module_name),
        name_digest(module_name)
    ))
}

/// Archive file holding platform-wide composites.
#[must_use]
pub fn aggregate_archive_path(archive_dir: &Path) -> PathBuf {
    archive_dir.join(format!("{AGGREGATE_ARCHIVE_NAME}.{ARCHIVE_EXTENSION}"))
}

pub(crate) fn safe_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

fn name_digest(raw: &str) -> String {
    let mut hex = format!("{:x}", Sha256::digest(raw.as_bytes()));
    hex.truncate(NAME_DIGEST_LEN);
    hex
}

/// Entry keys are slash-separated paths: non-empty segments, no `.`/`..`, no backslashes.
pub(crate) fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_names_become_flat_file_names() {
        let path = module_archive_path(Path::new("/var/hive"), "App::Blog");
        assert_eq!(path.parent(), Some(Path::new("/var/hive/modules")));
        let file = path.file_name().and_then(|f| f.to_str()).unwrap();
        assert!(file.starts_with("App__Blog-"), "{file}");
        assert!(file.ends_with(".hive.json"), "{file}");
        assert_eq!(
            file.len(),
            "App__Blog-".len() + NAME_DIGEST_LEN + ".hive.json".len()
        );
        assert_eq!(safe_component(""), "_");
    }

    #[test]
    fn names_with_the_same_stem_get_distinct_files() {
        let dir = Path::new("/var/hive");
        assert_ne!(
            module_archive_path(dir, "App::Blog"),
            module_archive_path(dir, "App__Blog")
        );
        assert_eq!(
            module_archive_path(dir, "App::Blog"),
            module_archive_path(dir, "App::Blog")
        );
    }

    #[test]
    fn rejects_traversal_keys() {
        assert!(is_valid_key("hive/type-graph"));
        assert!(!is_valid_key("hive//type-graph"));
        assert!(!is_valid_key("../escape"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("hive\\type-graph"));
    }
}
