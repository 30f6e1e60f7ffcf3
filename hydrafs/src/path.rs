//! Repository-relative path handling.
//!
//! Driver callbacks deliver paths with platform separators and occasional
//! leading or trailing separators. Every table in the crate keys on the
//! normalized form produced here: forward slashes, no empty components, no
//! leading or trailing slash. The repository root is the empty string.

use thiserror::Error;

/// Errors produced by path normalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path contains a `.` or `..` component.
    #[error("path {0:?} contains a relative component")]
    RelativeComponent(String),

    /// The path contains a NUL byte.
    #[error("path {0:?} contains a NUL byte")]
    Nul(String),
}

/// Normalizes a repository-relative path.
///
/// # Examples
///
/// ```
/// use hydrafs::path::normalize;
///
/// assert_eq!(normalize("\\src\\main.rs").unwrap(), "src/main.rs");
/// assert_eq!(normalize("docs//").unwrap(), "docs");
/// assert_eq!(normalize("").unwrap(), "");
/// ```
pub fn normalize(path: &str) -> Result<String, PathError> {
    if path.contains('\0') {
        return Err(PathError::Nul(path.to_string()));
    }

    let mut out = String::with_capacity(path.len());
    for component in path.split(|c| c == '/' || c == '\\') {
        match component {
            "" => continue,
            "." | ".." => return Err(PathError::RelativeComponent(path.to_string())),
            name => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(name);
            }
        }
    }
    Ok(out)
}

/// Returns the parent of a normalized path (`""` for top-level entries).
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Returns the final component of a normalized path.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a normalized directory and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// True when `path` lies strictly beneath `dir`.
pub fn is_descendant(path: &str, dir: &str) -> bool {
    if dir.is_empty() {
        return !path.is_empty();
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// True when `path` is a direct child of `dir`.
pub fn is_child(path: &str, dir: &str) -> bool {
    is_descendant(path, dir) && parent(path) == dir
}

/// Iterates every proper ancestor directory of a normalized path, nearest first,
/// ending with the root (`""`).
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = Some(path);
    std::iter::from_fn(move || {
        let p = current?;
        if p.is_empty() {
            current = None;
            return None;
        }
        let up = parent(p);
        current = Some(up);
        Some(up)
    })
}
