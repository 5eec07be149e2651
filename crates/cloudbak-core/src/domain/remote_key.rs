//! Mapping between local paths and bucket keys

use std::path::Path;

/// Bucket key for a local path.
///
/// Each non-empty prefix in `prefixes` is removed once (its first
/// occurrence), in order. The result is not re-scanned for a prefix that
/// was already applied.
pub fn remote_key_for(path: &str, prefixes: &[String]) -> String {
    prefixes
        .iter()
        .filter(|p| !p.is_empty())
        .fold(path.to_string(), |key, prefix| key.replacen(prefix.as_str(), "", 1))
}

/// Bucket key of the uploaded database snapshot: `/<file name>`
pub fn database_key(db_file: &Path) -> String {
    let name = db_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("/{}", name)
}

/// Normalizes a restore prefix so it starts with `/`
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{}", prefix)
    }
}
