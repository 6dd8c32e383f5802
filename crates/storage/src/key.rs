//! Cache-key validation and filename mapping.
//!
//! Keys are resource URLs. File-backed adapters need two mappings out of
//! them: a collision-free flat filename (hashed) and, for the sandboxed
//! file tree, a relative path that mirrors the URL structure without ever
//! escaping the tree root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Longest key any adapter accepts. Matches common URL length ceilings.
const MAX_KEY_LEN: usize = 2048;

/// Validate a cache key.
///
/// Rejects empty keys, keys over [`MAX_KEY_LEN`] bytes, and keys containing
/// control characters (a null byte inside a key would truncate C-based
/// filesystem calls further down).
pub fn validate(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.chars().any(|c| c.is_control()) {
        exn::bail!(ErrorKind::InvalidKey(key.chars().take(64).collect()));
    }
    Ok(())
}

/// Flat filename for a key: hex BLAKE3 of the key bytes plus an extension.
///
/// Collision-free for practical purposes and indifferent to whatever
/// characters the URL contains.
pub fn hashed_name(key: &str) -> String {
    format!("{}.json", blake3::hash(key.as_bytes()).to_hex())
}

/// Map a key (URL) to a relative path inside a sandboxed tree.
///
/// The scheme is dropped, the host becomes the first component, query and
/// fragment are folded into the final filename, and the result is
/// normalized through Rust's component parser so `..` can never walk out of
/// the tree root.
///
/// # Examples
///
/// ```
/// use webstash_storage::key::tree_path;
/// let path = tree_path("https://cdn.example.com/js/app.js?v=2").unwrap();
/// assert_eq!(path, std::path::Path::new("cdn.example.com/js/app.js_v_2.json"));
/// ```
pub fn tree_path(key: &str) -> Result<PathBuf> {
    validate(key)?;
    let stripped = key.split_once("://").map_or(key, |(_, rest)| rest);
    let sanitized: String = stripped
        .chars()
        .map(|c| match c {
            '/' => '/',
            c if c.is_alphanumeric() => c,
            '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    let mut path = normalize(Path::new(&sanitized), key)?;
    // Append rather than Path::with_extension: "app.min.js" must become
    // "app.min.js.json", not "app.min.json".
    if let Some(file) = path.file_name() {
        let file = format!("{}.json", file.to_string_lossy());
        path.set_file_name(file);
    }
    Ok(path)
}

/// Collapse `.`/`..`/empty components, rejecting anything that would climb
/// above the root. Adapted component-walk: `Path::components` already
/// handles separator weirdness for us.
fn normalize(path: &Path, original: &str) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => components.push(s),
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidKey(original.to_string())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidKey(original.to_string()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidKey(original.to_string())),
        false => Ok(components.into_iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_urls() {
        assert!(validate("https://example.com/app.js").is_ok());
        assert!(validate("relative/path/style.css").is_ok());
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(validate("").is_err());
        assert!(validate("a\0b").is_err());
        assert!(validate("line\nbreak").is_err());
        assert!(validate(&"x".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_hashed_name_is_stable_and_distinct() {
        let a = hashed_name("https://example.com/a.js");
        let b = hashed_name("https://example.com/b.js");
        assert_eq!(a, hashed_name("https://example.com/a.js"));
        assert_ne!(a, b);
        assert!(a.ends_with(".json"));
    }

    #[test]
    fn test_tree_path_mirrors_url_structure() {
        let path = tree_path("https://cdn.example.com/assets/js/app.js").unwrap();
        assert_eq!(path, Path::new("cdn.example.com/assets/js/app.js.json"));
    }

    #[test]
    fn test_tree_path_folds_query_characters() {
        let path = tree_path("https://example.com/app.js?version=2&x=1").unwrap();
        assert_eq!(path, Path::new("example.com/app.js_version_2_x_1.json"));
    }

    #[test]
    fn test_tree_path_never_escapes_root() {
        // Dot-dot segments collapse within the tree or fail outright.
        assert!(tree_path("https://example.com/../../etc/passwd").is_err());
        let inside = tree_path("https://example.com/a/../b.css").unwrap();
        assert_eq!(inside, Path::new("example.com/b.css.json"));
    }

    #[test]
    fn test_tree_path_handles_schemeless_keys() {
        let path = tree_path("vendor/lib.js").unwrap();
        assert_eq!(path, Path::new("vendor/lib.js.json"));
    }
}
