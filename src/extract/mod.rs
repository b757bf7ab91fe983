//! # Extraction Module
//!
//! Reads the tar stream written by [`crate::archive`] (or by any tool producing plain tar)
//! and materializes it into a destination directory. [`ArchiveReader`] gives entry-by-entry
//! access; [`extract`] and [`list_entries`] are the high-level entry points.
//!
//! Names are normalized before use: leading `./` and trailing `/` are dropped, and `./` or
//! `/` alone name the root. Anything that would land outside the destination is rejected.
//! Links, devices and other special entries are skipped.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tar::EntryType;
use tracing::{debug, warn};

use crate::common::{to_native, validate_relative, ArchiveEntry, EntryKind, MAX_PATH_LEN};
use crate::fsx;
use crate::PackError;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Maps a failure of the tar layer to `CorruptArchive` unless it is a genuine I/O error.
fn corrupt(e: io::Error) -> PackError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData | io::ErrorKind::Other => {
            PackError::CorruptArchive(e.to_string())
        }
        _ => PackError::from(e),
    }
}

/// Records whether the underlying stream ran out, so a stream that stops at an entry
/// boundary without its end-of-archive block can be told apart from a complete one.
struct EndGuard<R> {
    inner: R,
    reached_eof: Arc<AtomicBool>,
}

impl<R: Read> Read for EndGuard<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.reached_eof.store(true, Ordering::Relaxed);
        }
        Ok(n)
    }
}

/// A sequential reader over an archive stream.
pub struct ArchiveReader<R: Read> {
    archive: tar::Archive<EndGuard<R>>,
    reached_eof: Arc<AtomicBool>,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(reader: R) -> Self {
        let reached_eof = Arc::new(AtomicBool::new(false));
        let guard = EndGuard { inner: reader, reached_eof: Arc::clone(&reached_eof) };
        Self { archive: tar::Archive::new(guard), reached_eof }
    }

    /// Starts iterating over the entries. Can only be called once per reader.
    pub fn entries(&mut self) -> Result<ArchiveEntries<'_, R>, PackError> {
        let inner = self.archive.entries().map_err(corrupt)?;
        Ok(ArchiveEntries {
            inner,
            reached_eof: Arc::clone(&self.reached_eof),
            seen: HashSet::new(),
            entries_read: 0,
            finished: false,
        })
    }
}

/// Validated entries of an [`ArchiveReader`], in stream order.
pub struct ArchiveEntries<'a, R: Read> {
    inner: tar::Entries<'a, EndGuard<R>>,
    reached_eof: Arc<AtomicBool>,
    seen: HashSet<String>,
    entries_read: u64,
    finished: bool,
}

impl<'a, R: Read> ArchiveEntries<'a, R> {
    /// Returns the next entry, or `None` once the end-of-archive block has been read.
    ///
    /// Contents of the previous file entry that were not consumed are skipped.
    pub fn next_entry(&mut self) -> Result<Option<ArchiveItem<'a, R>>, PackError> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let data = match self.inner.next() {
                Some(entry) => entry.map_err(corrupt)?,
                None => {
                    self.finished = true;
                    if self.reached_eof.load(Ordering::Relaxed) {
                        return Err(PackError::CorruptArchive("missing end-of-archive marker".into()));
                    }
                    return Ok(None);
                }
            };

            let raw = String::from_utf8(data.path_bytes().into_owned())
                .map_err(|_| PackError::CorruptArchive("entry path is not valid UTF-8".into()))?;
            if raw.len() > MAX_PATH_LEN {
                return Err(PackError::CorruptArchive(format!(
                    "entry path length {} exceeds {MAX_PATH_LEN}",
                    raw.len()
                )));
            }
            let kind = match data.header().entry_type() {
                EntryType::Directory => EntryKind::Directory,
                // pre-POSIX tars mark directories only by the trailing slash
                EntryType::Regular | EntryType::Continuous if raw.ends_with('/') => EntryKind::Directory,
                EntryType::Regular | EntryType::Continuous => EntryKind::File,
                other => {
                    warn!(path = %raw, kind = ?other, "skipping unsupported entry");
                    continue;
                }
            };

            let path = normalize_entry_path(&raw);
            validate_relative(&path)?;
            if path.is_empty() {
                if kind == EntryKind::File {
                    return Err(PackError::CorruptArchive("file entry with an empty path".into()));
                }
                if self.entries_read != 0 {
                    return Err(PackError::CorruptArchive("root entry must be the first entry".into()));
                }
            }
            if !self.seen.insert(path.clone()) {
                return Err(PackError::CorruptArchive(format!("duplicate entry '{path}'")));
            }

            let mode = data.header().mode().ok().map(|m| m & 0o7777).filter(|m| *m != 0);
            let entry = match kind {
                EntryKind::Directory => ArchiveEntry::directory(path, mode),
                EntryKind::File => ArchiveEntry::file(path, data.size(), mode),
            };
            self.entries_read += 1;
            return Ok(Some(ArchiveItem { entry, data }));
        }
    }

    /// Number of entries returned so far.
    pub fn entries_read(&self) -> u64 {
        self.entries_read
    }

    /// True once the end of the archive has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<'a, R: Read> Iterator for ArchiveEntries<'a, R> {
    type Item = Result<ArchiveItem<'a, R>, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// One entry together with access to its contents.
pub struct ArchiveItem<'a, R: Read> {
    entry: ArchiveEntry,
    data: tar::Entry<'a, EndGuard<R>>,
}

impl<'a, R: Read> ArchiveItem<'a, R> {
    pub fn entry(&self) -> &ArchiveEntry {
        &self.entry
    }

    pub fn into_entry(self) -> ArchiveEntry {
        self.entry
    }

    /// Copies the file contents into `out`. Returns the number of bytes copied.
    ///
    /// Fails with `CorruptArchive` if the stream ends before the recorded size.
    pub fn read_contents<W: Write>(&mut self, out: &mut W) -> Result<u64, PackError> {
        let size = self.entry.size;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut copied = 0u64;
        loop {
            let n = match self.data.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(corrupt(e)),
            };
            out.write_all(&buf[..n])?;
            copied += n as u64;
        }
        if copied != size {
            return Err(PackError::CorruptArchive(format!(
                "stream ended inside '{}': expected {size} bytes, got {copied}",
                self.entry.path
            )));
        }
        Ok(copied)
    }

    /// Reads past the contents, still checking that all of them are present.
    pub fn skip_contents(&mut self) -> Result<(), PackError> {
        self.read_contents(&mut io::sink()).map(|_| ())
    }
}

/// Strips `./` prefixes and trailing `/`. The root comes out as the empty string.
fn normalize_entry_path(raw: &str) -> String {
    let mut path = raw.trim_end_matches('/');
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    if path == "." {
        path = "";
    }
    path.to_string()
}

/// Lists the entries of an archive stream without extracting anything.
pub fn list_entries<R: Read>(input: R) -> Result<Vec<ArchiveEntry>, PackError> {
    let mut reader = ArchiveReader::new(input);
    let mut entries = reader.entries()?;
    let mut listed = Vec::new();
    while let Some(mut item) = entries.next_entry()? {
        if !item.entry().is_dir() {
            item.skip_contents()?;
        }
        listed.push(item.into_entry());
    }
    Ok(listed)
}

/// Extracts an archive stream into `destination_root`, creating it if needed.
///
/// Existing files are overwritten and existing directories are made writable first, so
/// re-running against the same destination is a no-op in effect. Returns the number of
/// entries materialized.
pub fn extract<R: Read>(input: R, destination_root: &Path) -> Result<u64, PackError> {
    fs::create_dir_all(destination_root).map_err(PackError::io_at(destination_root))?;

    let mut reader = ArchiveReader::new(input);
    let mut entries = reader.entries()?;
    // applied after all children are written, deepest first
    let mut directory_modes: Vec<(PathBuf, u32)> = Vec::new();

    while let Some(mut item) = entries.next_entry()? {
        let entry = item.entry().clone();
        let target = to_native(destination_root, &entry.path)?;
        match entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&target).map_err(PackError::io_at(&target))?;
                fsx::make_writable(&target).map_err(PackError::io_at(&target))?;
                if let Some(mode) = entry.mode {
                    directory_modes.push((target, mode));
                }
            }
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(PackError::io_at(parent))?;
                    fsx::make_writable(parent).map_err(PackError::io_at(parent))?;
                }
                fsx::make_writable(&target).map_err(PackError::io_at(&target))?;
                let file = File::create(&target).map_err(PackError::io_at(&target))?;
                let mut out = BufWriter::new(file);
                item.read_contents(&mut out).map_err(|e| attach_path(e, &target))?;
                out.flush().map_err(PackError::io_at(&target))?;
                drop(out);
                if let Some(mode) = entry.mode {
                    fsx::set_unix_permissions(&target, mode).map_err(PackError::io_at(&target))?;
                }
                debug!(path = %entry.path, bytes = entry.size, "extracted file");
            }
        }
    }

    for (dir, mode) in directory_modes.iter().rev() {
        fsx::set_unix_permissions(dir, *mode).map_err(PackError::io_at(dir))?;
    }
    Ok(entries.entries_read())
}

fn attach_path(err: PackError, path: &Path) -> PackError {
    crate::archive::with_root(err, path)
}
