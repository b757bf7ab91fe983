//! # Pack / Unpack Pipeline
//!
//! Packing walks a folder into an uncompressed archive stream staged in a temporary file,
//! then compresses that file into the destination. Unpacking decompresses into a temporary
//! file and extracts it. The staging file lives next to the destination, is named after it,
//! and is removed on every exit path.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::archive::{self, FsTree};
use crate::common::ArchiveEntry;
use crate::compress::BlockCodec;
use crate::extract;
use crate::matcher::PathMatcher;
use crate::project::ProjectInfo;
use crate::PackError;

/// Suffix of the staging file that holds the uncompressed archive stream.
pub const TEMP_ARCHIVE_SUFFIX: &str = ".tmptar";

/// Outcome of a successful pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackSummary {
    /// Entries written, the root directory included.
    pub entries: u64,
    /// Length of the uncompressed archive stream.
    pub archive_bytes: u64,
    /// Size of the destination file.
    pub compressed_bytes: u64,
}

/// Outcome of a successful unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackSummary {
    pub entries: u64,
    pub archive_bytes: u64,
}

/// Creates the uniquely named staging file beside `destination`.
fn create_staging_file(destination: &Path) -> Result<NamedTempFile, PackError> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let temp = tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(TEMP_ARCHIVE_SUFFIX)
        .tempfile_in(&dir)
        .map_err(PackError::io_at(&dir))?;
    debug!(path = %temp.path().display(), "created staging file");
    Ok(temp)
}

/// Deletes the staging file, surfacing the error on the success path.
fn remove_staging_file(temp: NamedTempFile) -> Result<(), PackError> {
    let path = temp.path().to_path_buf();
    temp.close().map_err(PackError::io_at(&path))?;
    debug!(path = %path.display(), "removed staging file");
    Ok(())
}

/// Packs `source` into `destination` with the default LZMA codec, excluding paths that match
/// any of `ignored_paths`.
pub fn pack_folder<S: AsRef<str>>(source: &Path, destination: &Path, ignored_paths: &[S]) -> Result<PackSummary, PackError> {
    let matcher = PathMatcher::compile(ignored_paths)?;
    pack_folder_with(source, destination, &matcher, &BlockCodec::default())
}

/// Packs `source` using the project's ignore patterns and compression settings.
pub fn pack_project(project: &ProjectInfo, source: &Path, destination: &Path) -> Result<PackSummary, PackError> {
    project.validate()?;
    pack_folder_with(source, destination, &project.matcher()?, &project.codec()?)
}

/// Packs `source` into `destination`.
///
/// On failure the destination, if it was already created, is removed best-effort; callers
/// should still treat any error as "no destination".
pub fn pack_folder_with(
    source: &Path,
    destination: &Path,
    matcher: &PathMatcher,
    codec: &BlockCodec,
) -> Result<PackSummary, PackError> {
    info!(
        source = %source.display(),
        destination = %destination.display(),
        codec = codec.coder_name(),
        patterns = matcher.patterns().len(),
        "packing folder"
    );
    let mut temp = create_staging_file(destination)?;

    let mut tree = FsTree::new(source);
    tree.skip(temp.path());
    tree.skip(destination);

    let entries = {
        let writer = BufWriter::new(temp.as_file_mut());
        archive::write_tree(&tree, matcher, writer).map_err(|e| archive::with_root(e, source))?
    };

    let temp_path = temp.path().to_path_buf();
    let staged = temp.as_file_mut();
    staged.seek(SeekFrom::Start(0)).map_err(PackError::io_at(&temp_path))?;

    let archive_bytes = match compress_into(&mut BufReader::new(staged), destination, codec) {
        Ok(length) => length,
        Err(e) => {
            discard_partial(destination);
            return Err(e);
        }
    };
    remove_staging_file(temp)?;

    let compressed_bytes = fs::metadata(destination).map_err(PackError::io_at(destination))?.len();
    info!(entries, archive_bytes, compressed_bytes, "packed folder");
    Ok(PackSummary { entries, archive_bytes, compressed_bytes })
}

fn compress_into(input: &mut BufReader<&mut File>, destination: &Path, codec: &BlockCodec) -> Result<u64, PackError> {
    let out = File::create(destination).map_err(PackError::io_at(destination))?;
    let mut out = BufWriter::new(out);
    let length = codec.compress(input, &mut out)?;
    out.flush().map_err(PackError::io_at(destination))?;
    Ok(length)
}

fn discard_partial(destination: &Path) {
    match fs::remove_file(destination) {
        Ok(()) => debug!(path = %destination.display(), "removed partial destination"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %destination.display(), error = %e, "could not remove partial destination"),
    }
}

/// Unpacks an LZMA archive produced by [`pack_folder`] into `destination_root`.
pub fn unpack_folder(archive: &Path, destination_root: &Path) -> Result<UnpackSummary, PackError> {
    unpack_folder_with(archive, destination_root, &BlockCodec::default())
}

/// Unpacks `archive` into `destination_root`, creating it if needed.
pub fn unpack_folder_with(archive: &Path, destination_root: &Path, codec: &BlockCodec) -> Result<UnpackSummary, PackError> {
    info!(
        archive = %archive.display(),
        destination = %destination_root.display(),
        codec = codec.coder_name(),
        "unpacking folder"
    );
    fs::create_dir_all(destination_root).map_err(PackError::io_at(destination_root))?;
    let mut temp = create_staging_file(destination_root)?;

    let archive_bytes = decompress_into(archive, temp.as_file_mut(), codec)?;

    let temp_path = temp.path().to_path_buf();
    let staged = temp.as_file_mut();
    staged.seek(SeekFrom::Start(0)).map_err(PackError::io_at(&temp_path))?;
    let entries = extract::extract(BufReader::new(staged), destination_root)?;

    remove_staging_file(temp)?;
    info!(entries, archive_bytes, "unpacked folder");
    Ok(UnpackSummary { entries, archive_bytes })
}

fn decompress_into(archive: &Path, staged: &mut File, codec: &BlockCodec) -> Result<u64, PackError> {
    let input = File::open(archive).map_err(PackError::io_at(archive))?;
    let mut input = BufReader::new(input);
    let mut out = BufWriter::new(staged);
    let length = codec.decompress_stored(&mut input, &mut out)?;
    out.flush()?;
    Ok(length)
}

/// Compresses a single file into the codec envelope. Returns the original length.
pub fn compress_file(input: &Path, output: &Path, codec: &BlockCodec) -> Result<u64, PackError> {
    let file = File::open(input).map_err(PackError::io_at(input))?;
    let mut file = BufReader::new(file);
    let out = File::create(output).map_err(PackError::io_at(output))?;
    let mut out = BufWriter::new(out);
    let length = codec.compress(&mut file, &mut out).map_err(|e| archive::with_root(e, input))?;
    out.flush().map_err(PackError::io_at(output))?;
    Ok(length)
}

/// Restores a file written by [`compress_file`]. Returns the decompressed length.
pub fn decompress_file(input: &Path, output: &Path, codec: &BlockCodec) -> Result<u64, PackError> {
    let file = File::open(input).map_err(PackError::io_at(input))?;
    let mut file = BufReader::new(file);
    let out = File::create(output).map_err(PackError::io_at(output))?;
    let mut out = BufWriter::new(out);
    let length = codec.decompress_stored(&mut file, &mut out).map_err(|e| archive::with_root(e, output))?;
    out.flush().map_err(PackError::io_at(output))?;
    Ok(length)
}

/// Lists the entries of a packed archive without extracting it.
///
/// The decompressed stream is staged in the system temp directory and removed afterwards.
pub fn list_archive(archive: &Path, codec: &BlockCodec) -> Result<Vec<ArchiveEntry>, PackError> {
    let mut temp = tempfile::Builder::new()
        .suffix(TEMP_ARCHIVE_SUFFIX)
        .tempfile()
        .map_err(PackError::io_at(std::env::temp_dir()))?;
    decompress_into(archive, temp.as_file_mut(), codec)?;
    let staged = temp.as_file_mut();
    staged.seek(SeekFrom::Start(0))?;
    let entries = extract::list_entries(BufReader::new(staged))?;
    remove_staging_file(temp)?;
    Ok(entries)
}
