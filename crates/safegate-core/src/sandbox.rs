//! Workspace containment guard.
//!
//! A path is inside the workspace when its resolved absolute form is a
//! descendant of the resolved workspace root. Resolution follows symlinks for
//! every component that exists; components that do not exist yet (a file
//! about to be written) are appended lexically.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Return `true` if `path` resolves inside `workspace_root`.
///
/// Relative paths are taken relative to the workspace root. Any resolution
/// error (missing root, dangling symlink, permission error) yields `false`.
pub fn is_within_workspace(path: &Path, workspace_root: &Path) -> bool {
    let Ok(root) = workspace_root.canonicalize() else {
        return false;
    };
    let candidate = anchor(path, &root);
    match resolve_lenient(&candidate) {
        Ok(resolved) => resolved.starts_with(&root),
        Err(_) => false,
    }
}

/// Join a relative path onto `root`; absolute paths are returned unchanged.
pub(crate) fn anchor(path: &Path, root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Canonicalize the longest existing prefix of `path` and append the rest.
pub(crate) fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        match ancestor.canonicalize() {
            Ok(base) => {
                let tail = path
                    .strip_prefix(ancestor)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                return append_lexically(base, tail);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A dangling symlink exists but cannot be followed.
                if ancestor.symlink_metadata().is_ok() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("dangling symlink: {}", ancestor.display()),
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no resolvable ancestor: {}", path.display()),
    ))
}

fn append_lexically(mut base: PathBuf, tail: &Path) -> io::Result<PathBuf> {
    for component in tail.components() {
        match component {
            Component::Normal(part) => base.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unexpected root in relative tail",
                ));
            }
        }
    }
    Ok(base)
}
