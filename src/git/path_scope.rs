//! Resolution of caller-supplied paths against a repository root.
//!
//! Paths are resolved component by component. `..` pops the resolved
//! prefix, and every symlink met along the way is replaced by its target
//! (recursively, including dangling links) so a path cannot escape its
//! scope through a link that points elsewhere.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Upper bound on links followed for one path; mirrors the kernel's ELOOP
const MAX_SYMLINK_HOPS: usize = 40;

/// Fully resolve `path` (relative paths are taken from `base`).
///
/// Returns `None` for link cycles or chains longer than the hop limit.
pub(crate) fn resolve_path(path: &Path, base: &Path) -> Option<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut hops = 0;
    resolve_components(&joined, &mut hops)
}

/// Resolve everything except the final component, which is kept as named.
///
/// This is the path git itself records for an entry: a symlink inside the
/// repository is tracked as a link, not as its target.
pub(crate) fn resolve_entry(path: &Path, base: &Path) -> Option<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    match (joined.parent(), joined.file_name()) {
        (Some(parent), Some(name)) => {
            let mut hops = 0;
            Some(resolve_components(parent, &mut hops)?.join(name))
        }
        _ => resolve_path(&joined, base),
    }
}

fn resolve_components(path: &Path, hops: &mut usize) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                let is_link = fs::symlink_metadata(&resolved)
                    .map(|meta| meta.file_type().is_symlink())
                    .unwrap_or(false);
                if is_link {
                    *hops += 1;
                    if *hops > MAX_SYMLINK_HOPS {
                        return None;
                    }
                    let target = fs::read_link(&resolved).ok()?;
                    let next = if target.is_absolute() {
                        target
                    } else {
                        resolved
                            .parent()
                            .map(Path::to_path_buf)
                            .unwrap_or_default()
                            .join(target)
                    };
                    resolved = resolve_components(&next, hops)?;
                }
            }
        }
    }
    Some(resolved)
}

/// `resolved` relative to `root`, if it lies within it
pub(crate) fn relative_to(resolved: &Path, root: &Path) -> Option<PathBuf> {
    resolved.strip_prefix(root).ok().map(Path::to_path_buf)
}

/// Whether any component of a repository-relative path is named `name`
pub(crate) fn has_component(rel: &Path, name: &str) -> bool {
    rel.components()
        .any(|c| matches!(c, Component::Normal(n) if n == name))
}
