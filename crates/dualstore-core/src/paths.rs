//! Relative path helpers. Paths are `/`-separated with no leading or
//! trailing slash; the empty string is the root.

use std::path::Path;

/// Replace backslashes with `/` and strip leading/trailing slashes.
pub fn normalize_path(path: &str) -> String {
    path.trim().replace('\\', "/").trim_matches('/').to_string()
}

/// Join a child name onto a base directory.
pub fn join_path(base: &str, name: &str) -> String {
    let base = normalize_path(base);
    let name = normalize_path(name);
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name,
        (_, true) => base,
        _ => format!("{}/{}", base, name),
    }
}

/// Parent directory of a normalized path; `None` at the root.
pub fn parent_path(path: &str) -> Option<String> {
    let path = normalize_path(path);
    if path.is_empty() {
        return None;
    }
    Some(match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    })
}

/// Non-empty segments of a path, root to leaf.
pub fn segments(path: &str) -> Vec<String> {
    normalize_path(path)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Location label shown to users: `/` for the root, `/a/b` otherwise.
pub fn display_path(path: &str) -> String {
    let path = normalize_path(path);
    match path.as_str() {
        "" | "." => "/".to_string(),
        _ => format!("/{}", path),
    }
}

/// Base name of a local file, as used for upload targets.
pub fn local_base_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
}
