//! # Archive Stream Format
//!
//! The uncompressed archive stream is a tar archive, which is what gets handed to the block
//! codec. Tools that ship LZMA-compressed tarballs of a folder can read our archives, and
//! theirs unpack here.
//!
//! Headers are GNU-flavoured (long paths use `././@LongLink` records) with zero owner ids
//! and a zero mtime, so the same tree always produces the same bytes. The root directory is
//! the first entry, named `./`, and directory names end in `/`.
//!
//! Entries are written pre-order, depth-first: a directory always precedes its children.
//! Within a directory, files come first, then subdirectories, each group sorted by byte-wise
//! name order.

pub mod source;

use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use tar::{Builder, EntryType, Header};
use tracing::debug;

use crate::common::{directory_match_path, join_relative, EntryKind};
use crate::matcher::PathMatcher;
use crate::PackError;
pub use source::{FsTree, SourceChild, SourceTree};

/// Name the root directory entry is stored under.
pub const ROOT_ENTRY_NAME: &str = "./";

/// Size of a tar block; headers and padded payloads are multiples of it.
pub const BLOCK_SIZE: usize = 512;

const DEFAULT_DIR_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;

fn entry_header(kind: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_size(size);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

/// Hands out exactly `remaining` bytes of `inner` and fails if it runs dry first.
struct ExactReader<'a, R> {
    inner: &'a mut R,
    remaining: u64,
    path: &'a str,
}

impl<R: Read> Read for ExactReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("'{}' shrank while being archived: {} bytes missing", self.path, self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Writes tar entries to an underlying byte sink.
///
/// Call [`ArchiveWriter::finish`] to append the end-of-archive blocks; a stream without them
/// is rejected by the reader.
pub struct ArchiveWriter<W: Write> {
    builder: Builder<W>,
    entries: u64,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { builder: Builder::new(writer), entries: 0 }
    }

    /// Appends a directory entry. The empty path is the archive root.
    pub fn add_directory(&mut self, path: &str, mode: Option<u32>) -> Result<(), PackError> {
        let name = if path.is_empty() { ROOT_ENTRY_NAME.to_string() } else { format!("{path}/") };
        let mut header = entry_header(EntryType::Directory, mode.unwrap_or(DEFAULT_DIR_MODE), 0);
        self.builder.append_data(&mut header, name, io::empty())?;
        self.entries += 1;
        Ok(())
    }

    /// Appends a file entry, copying exactly `size` bytes from `reader`.
    ///
    /// Fails if the reader yields fewer or more than `size` bytes (the file changed while it
    /// was being archived); the stream is then unusable and must be discarded.
    pub fn add_file<R: Read>(&mut self, path: &str, mode: Option<u32>, size: u64, mut reader: R) -> Result<(), PackError> {
        if path.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "file entry needs a name").into());
        }
        let mut header = entry_header(EntryType::Regular, mode.unwrap_or(DEFAULT_FILE_MODE), size);
        let exact = ExactReader { inner: &mut reader, remaining: size, path };
        self.builder.append_data(&mut header, path, exact)?;

        let mut extra = [0u8; 1];
        if reader.read(&mut extra)? != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("'{path}' grew while being archived beyond {size} bytes"),
            )
            .into());
        }
        self.entries += 1;
        Ok(())
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Writes the end-of-archive blocks, flushes, and hands back the sink with the entry count.
    pub fn finish(self) -> Result<(W, u64), PackError> {
        let mut writer = self.builder.into_inner()?;
        writer.flush()?;
        Ok((writer, self.entries))
    }
}

/// Writes every entry of `tree` not excluded by `matcher` to `output`.
///
/// The root directory is always written. An excluded directory contributes neither itself
/// nor any descendant. Returns the number of entries written, root included.
pub fn write_tree<T, W>(tree: &T, matcher: &PathMatcher, output: W) -> Result<u64, PackError>
where
    T: SourceTree + ?Sized,
    W: Write,
{
    let mut writer = ArchiveWriter::new(output);
    let root_mode = tree.root_mode()?;

    // (relative path, mode) of directories whose entry has not been written yet
    let mut pending: Vec<(String, Option<u32>)> = vec![(String::new(), root_mode)];

    while let Some((dir, mode)) = pending.pop() {
        writer.add_directory(&dir, mode)?;

        let mut children = tree.list(&dir)?;
        children.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        let (subdirs, files): (Vec<SourceChild>, Vec<SourceChild>) =
            children.into_iter().partition(|c| c.kind == EntryKind::Directory);

        for file in files {
            let relative = join_relative(&dir, &file.name);
            if matcher.matches(&relative) {
                debug!(path = %relative, "excluded file");
                continue;
            }
            let (reader, size) = tree.open(&relative)?;
            writer.add_file(&relative, file.mode, size, reader)?;
        }

        // pushed in reverse so the first subdirectory is visited next
        for sub in subdirs.into_iter().rev() {
            let relative = join_relative(&dir, &sub.name);
            if matcher.matches(&directory_match_path(&relative)) {
                debug!(path = %relative, "excluded directory");
                continue;
            }
            pending.push((relative, sub.mode));
        }
    }

    let (_, entries) = writer.finish()?;
    Ok(entries)
}

/// Archives the directory at `source_root` into `output`. See [`write_tree`].
pub fn write_directory<W: Write>(source_root: &Path, matcher: &PathMatcher, output: W) -> Result<u64, PackError> {
    let tree = FsTree::new(source_root);
    write_tree(&tree, matcher, BufWriter::new(output)).map_err(|e| with_root(e, source_root))
}

/// Attaches `root` to I/O errors that carry no path of their own.
pub(crate) fn with_root(err: PackError, root: &Path) -> PackError {
    match err {
        PackError::Io { source, path } if path.as_os_str().is_empty() => {
            PackError::Io { source, path: root.to_path_buf() }
        }
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    /// In-memory tree used to test the walk independently of the filesystem.
    #[derive(Default)]
    pub(crate) struct MemoryTree {
        pub(crate) dirs: BTreeMap<String, Vec<SourceChild>>,
        pub(crate) files: BTreeMap<String, Vec<u8>>,
    }

    impl MemoryTree {
        pub(crate) fn new() -> Self {
            let mut tree = Self::default();
            tree.dirs.insert(String::new(), Vec::new());
            tree
        }

        fn parent_and_name(path: &str) -> (String, String) {
            match path.rsplit_once('/') {
                Some((parent, name)) => (parent.to_string(), name.to_string()),
                None => (String::new(), path.to_string()),
            }
        }

        pub(crate) fn dir(mut self, path: &str) -> Self {
            let (parent, name) = Self::parent_and_name(path);
            self.dirs.get_mut(&parent).expect("parent dir").push(SourceChild {
                name,
                kind: EntryKind::Directory,
                mode: None,
            });
            self.dirs.insert(path.to_string(), Vec::new());
            self
        }

        pub(crate) fn file(mut self, path: &str, contents: &[u8]) -> Self {
            let (parent, name) = Self::parent_and_name(path);
            self.dirs.get_mut(&parent).expect("parent dir").push(SourceChild {
                name,
                kind: EntryKind::File,
                mode: None,
            });
            self.files.insert(path.to_string(), contents.to_vec());
            self
        }
    }

    impl SourceTree for MemoryTree {
        fn root_mode(&self) -> io::Result<Option<u32>> {
            Ok(None)
        }

        fn list(&self, dir: &str) -> io::Result<Vec<SourceChild>> {
            self.dirs.get(dir).cloned().ok_or_else(|| io::ErrorKind::NotFound.into())
        }

        fn open(&self, path: &str) -> io::Result<(Box<dyn Read + '_>, u64)> {
            let data = self.files.get(path).ok_or(io::ErrorKind::NotFound)?;
            Ok((Box::new(&data[..]), data.len() as u64))
        }
    }

    pub(crate) fn sample_tree() -> MemoryTree {
        MemoryTree::new()
            .dir("data")
            .file("data/readme.txt", b"abc")
            .file("app.log", b"12345")
            .file("app.exe", b"0123456789")
            .dir("cache")
            .file("cache/blob", b"zz")
    }

    fn entry_paths(stream: &[u8]) -> Vec<String> {
        crate::extract::list_entries(stream).unwrap().into_iter().map(|e| e.path).collect()
    }

    #[test]
    fn ends_with_end_of_archive_blocks() {
        let mut buf = Vec::new();
        let count = write_tree(&MemoryTree::new(), &PathMatcher::empty(), &mut buf).unwrap();
        assert_eq!(count, 1, "root directory only");
        assert_eq!(buf.len() % BLOCK_SIZE, 0);
        assert!(buf[buf.len() - 2 * BLOCK_SIZE..].iter().all(|b| *b == 0));

        let mut archive = tar::Archive::new(&buf[..]);
        let entries: Vec<_> = archive.entries().unwrap().map(|e| e.unwrap().header().entry_type()).collect();
        assert_eq!(entries, vec![EntryType::Directory]);
    }

    #[test]
    fn headers_carry_modes_and_no_timestamps() {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_directory("", Some(0o750)).unwrap();
        writer.add_file("run.sh", Some(0o755), 3, &b"abc"[..]).unwrap();
        writer.add_file("notes.txt", None, 0, io::empty()).unwrap();
        let (buf, count) = writer.finish().unwrap();
        assert_eq!(count, 3);

        let mut archive = tar::Archive::new(&buf[..]);
        let seen: Vec<(String, u32, u64, u64)> = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let header = e.header();
                let path = String::from_utf8(e.path_bytes().into_owned()).unwrap();
                (path, header.mode().unwrap(), header.size().unwrap(), header.mtime().unwrap())
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                ("./".to_string(), 0o750, 0, 0),
                ("run.sh".to_string(), 0o755, 3, 0),
                ("notes.txt".to_string(), 0o644, 0, 0),
            ]
        );
    }

    #[test]
    fn long_paths_survive() {
        let deep = format!("{}/file.bin", vec!["segment"; 30].join("/"));
        assert!(deep.len() > 100);
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_directory("", None).unwrap();
        writer.add_file(&deep, None, 1, &b"x"[..]).unwrap();
        let (buf, _) = writer.finish().unwrap();
        assert_eq!(entry_paths(&buf), vec!["".to_string(), deep]);
    }

    #[test]
    fn order_is_files_first_then_sorted_subdirectories() {
        let mut buf = Vec::new();
        let count = write_tree(&sample_tree(), &PathMatcher::empty(), &mut buf).unwrap();
        assert_eq!(count, 7);
        assert_eq!(
            entry_paths(&buf),
            vec!["", "app.exe", "app.log", "cache", "cache/blob", "data", "data/readme.txt"]
        );
    }

    #[test]
    fn excluded_files_and_directories_are_skipped() {
        let matcher = PathMatcher::compile(["*.log", "cache/"]).unwrap();
        let mut buf = Vec::new();
        let count = write_tree(&sample_tree(), &matcher, &mut buf).unwrap();
        assert_eq!(count, 4);
        assert_eq!(entry_paths(&buf), vec!["", "app.exe", "data", "data/readme.txt"]);
    }

    #[test]
    fn excluding_a_directory_drops_its_descendants() {
        let tree = MemoryTree::new().dir("a").dir("a/b").file("a/b/c.txt", b"c").file("a/keep.txt", b"k");
        let matcher = PathMatcher::compile(["a/b/"]).unwrap();
        let mut buf = Vec::new();
        write_tree(&tree, &matcher, &mut buf).unwrap();
        assert_eq!(entry_paths(&buf), vec!["", "a", "a/keep.txt"]);
    }

    #[test]
    fn output_is_reproducible() {
        let mut first = Vec::new();
        let mut second = Vec::new();
        write_tree(&sample_tree(), &PathMatcher::empty(), &mut first).unwrap();
        write_tree(&sample_tree(), &PathMatcher::empty(), &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn short_reader_is_an_io_error() {
        let mut writer = ArchiveWriter::new(Vec::new());
        let err = writer.add_file("x", None, 10, &b"abc"[..]).unwrap_err();
        assert!(matches!(err, PackError::Io { .. }));
    }

    #[test]
    fn long_reader_is_an_io_error() {
        let mut writer = ArchiveWriter::new(Vec::new());
        let err = writer.add_file("x", None, 2, &b"abc"[..]).unwrap_err();
        assert!(matches!(err, PackError::Io { .. }));
    }

    #[test]
    fn write_directory_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.txt"), b"1").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("two.txt"), b"22").unwrap();

        let mut buf = Vec::new();
        let count = write_directory(dir.path(), &PathMatcher::empty(), &mut buf).unwrap();
        assert_eq!(count, 4);
        assert_eq!(entry_paths(&buf), vec!["", "one.txt", "nested", "nested/two.txt"]);
    }

    #[test]
    fn missing_source_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        match write_directory(&missing, &PathMatcher::empty(), Vec::new()) {
            Err(PackError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
