//! Common utilities and types module.
// Shared entry model and relative-path helpers used by both the writer and the reader.

use std::path::{Path, PathBuf};

use crate::PackError;

/// Separator used for every relative path stored in an archive, regardless of platform.
pub const SEPARATOR: char = '/';

/// Longest relative path the reader accepts, in bytes.
pub const MAX_PATH_LEN: usize = 64 * 1024;

/// The kind of filesystem object an archive entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// Metadata for a single file or directory entry within the archive.
///
/// File contents are streamed separately; see [`crate::extract::ArchiveItem::read_contents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub kind: EntryKind,
    /// Root-relative, `/`-separated, no leading separator. Empty for the archive root.
    pub path: String,
    /// Original length in bytes. Always 0 for directories.
    pub size: u64,
    /// Unix permission bits, when the source platform recorded them.
    pub mode: Option<u32>,
}

impl ArchiveEntry {
    pub fn directory(path: impl Into<String>, mode: Option<u32>) -> Self {
        Self { kind: EntryKind::Directory, path: path.into(), size: 0, mode }
    }

    pub fn file(path: impl Into<String>, size: u64, mode: Option<u32>) -> Self {
        Self { kind: EntryKind::File, path: path.into(), size, mode }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_root(&self) -> bool {
        self.is_dir() && self.path.is_empty()
    }
}

/// Replaces platform separators with `/`.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Joins a parent relative path and a child name. An empty parent is the archive root.
pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}{SEPARATOR}{name}")
    }
}

/// The candidate string used when matching a directory against ignore patterns.
/// Directories carry a trailing separator so patterns can target them distinctly from files.
pub fn directory_match_path(relative: &str) -> String {
    format!("{relative}{SEPARATOR}")
}

/// Checks that `relative` is a well-formed archive path: no leading separator,
/// no backslashes, no empty, `.` or `..` segments. The empty string (root) is accepted.
pub fn validate_relative(relative: &str) -> Result<(), PackError> {
    if relative.is_empty() {
        return Ok(());
    }
    if relative.len() > MAX_PATH_LEN {
        return Err(PackError::CorruptArchive(format!(
            "entry path is {} bytes long (limit {MAX_PATH_LEN})",
            relative.len()
        )));
    }
    if relative.contains('\\') || relative.contains('\0') {
        return Err(PackError::CorruptArchive(format!("entry path '{relative}' contains a forbidden character")));
    }
    for segment in relative.split(SEPARATOR) {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(PackError::CorruptArchive(format!("entry path '{relative}' is not a plain relative path")));
        }
        #[cfg(windows)]
        if segment.contains(':') {
            return Err(PackError::CorruptArchive(format!("entry path '{relative}' contains a drive or stream separator")));
        }
    }
    Ok(())
}

/// Translates a validated archive path into a native path under `root`.
pub fn to_native(root: &Path, relative: &str) -> Result<PathBuf, PackError> {
    validate_relative(relative)?;
    let mut native = root.to_path_buf();
    if !relative.is_empty() {
        native.extend(relative.split(SEPARATOR));
    }
    Ok(native)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_from_root_has_no_leading_separator() {
        assert_eq!(join_relative("", "app.exe"), "app.exe");
        assert_eq!(join_relative("data", "readme.txt"), "data/readme.txt");
        assert_eq!(directory_match_path("data/cache"), "data/cache/");
    }

    #[test]
    fn rejects_escaping_paths() {
        for bad in ["/etc/passwd", "../up", "a/../b", "a//b", "a/./b", "a\\b", "dir/"] {
            assert!(validate_relative(bad).is_err(), "{bad} should be rejected");
        }
        assert!(validate_relative("").is_ok());
        assert!(validate_relative("a/b/c.txt").is_ok());
    }

    #[test]
    fn native_path_is_rooted() {
        let root = Path::new("out");
        assert_eq!(to_native(root, "").unwrap(), PathBuf::from("out"));
        assert_eq!(to_native(root, "data/readme.txt").unwrap(), root.join("data").join("readme.txt"));
    }
}
