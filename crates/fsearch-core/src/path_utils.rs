//! Path helpers for index roots

use std::path::{Path, PathBuf};

/// Canonicalize a path, resolving symlinks and producing an absolute path.
///
/// On Windows, uses `dunce::canonicalize` to avoid the `\\?\` extended-length path prefix
/// that `std::fs::canonicalize` produces, which would leak into every indexed path.
/// On other platforms, delegates directly to `std::fs::canonicalize`.
#[cfg(windows)]
pub fn canonicalize(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    dunce::canonicalize(path)
}

#[cfg(not(windows))]
pub fn canonicalize(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

/// Resolves an index root and checks that it can be read.
pub fn resolve_root(root: &Path) -> std::io::Result<PathBuf> {
    let resolved = canonicalize(root)?;
    let metadata = std::fs::metadata(&resolved)?;
    if metadata.is_dir() {
        // metadata succeeds on unreadable directories, listing does not
        std::fs::read_dir(&resolved)?;
    }
    Ok(resolved)
}
