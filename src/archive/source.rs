//! Directory-listing capability the archive writer walks over.
//!
//! The writer only ever sees root-relative, `/`-separated paths; translation to native
//! paths happens here, at the boundary.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::common::{to_native, EntryKind};
use crate::fsx;

/// One direct child of a directory in a [`SourceTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChild {
    pub name: String,
    pub kind: EntryKind,
    pub mode: Option<u32>,
}

/// A tree of directories and files that can be archived.
pub trait SourceTree {
    /// Permission bits of the root directory, if recorded.
    fn root_mode(&self) -> io::Result<Option<u32>>;

    /// Direct children of the directory at `dir` (empty string is the root).
    /// Order does not matter; the writer sorts.
    fn list(&self, dir: &str) -> io::Result<Vec<SourceChild>>;

    /// Opens the file at `path` for reading and reports its current length.
    fn open(&self, path: &str) -> io::Result<(Box<dyn Read + '_>, u64)>;
}

/// A [`SourceTree`] backed by a directory on disk.
///
/// Symbolic links are skipped. Absolute paths registered with [`FsTree::skip`] are
/// treated as if they did not exist.
#[derive(Debug, Clone)]
pub struct FsTree {
    root: PathBuf,
    skipped: HashSet<PathBuf>,
}

impl FsTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), skipped: HashSet::new() }
    }

    /// Hides `path` from listings. Paths that cannot be canonicalized are ignored.
    pub fn skip(&mut self, path: &Path) {
        if let Ok(canonical) = fs::canonicalize(path) {
            self.skipped.insert(canonical);
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn native(&self, relative: &str) -> io::Result<PathBuf> {
        to_native(&self.root, relative).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    }

    fn is_skipped(&self, path: &Path) -> bool {
        if self.skipped.is_empty() {
            return false;
        }
        fs::canonicalize(path).map(|p| self.skipped.contains(&p)).unwrap_or(false)
    }
}

impl SourceTree for FsTree {
    fn root_mode(&self) -> io::Result<Option<u32>> {
        let metadata = fs::metadata(&self.root)?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a directory", self.root.display()),
            ));
        }
        Ok(fsx::mode_of(&metadata))
    }

    fn list(&self, dir: &str) -> io::Result<Vec<SourceChild>> {
        let native_dir = self.native(dir)?;
        let mut children = Vec::new();
        for entry in fs::read_dir(&native_dir)? {
            let entry = entry?;
            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(md) => md,
                // vanished between listing and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if metadata.file_type().is_symlink() {
                warn!(path = %path.display(), "skipping symbolic link");
                continue;
            }
            if self.is_skipped(&path) {
                continue;
            }
            let name = entry.file_name().into_string().map_err(|raw| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file name {:?} is not valid UTF-8", raw),
                )
            })?;
            let kind = if metadata.is_dir() { EntryKind::Directory } else { EntryKind::File };
            children.push(SourceChild { name, kind, mode: fsx::mode_of(&metadata) });
        }
        Ok(children)
    }

    fn open(&self, path: &str) -> io::Result<(Box<dyn Read + '_>, u64)> {
        let file = File::open(self.native(path)?)?;
        let size = file.metadata()?.len();
        Ok((Box::new(file), size))
    }
}
