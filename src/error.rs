use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The primary error type for all operations in the `patchpack` crate.
#[derive(Debug, Error)]
pub enum PackError {
    /// A filesystem operation failed (read, write, create, delete).
    /// Includes the path where the error happened; empty when unknown.
    #[error("I/O error on path '{}': {}", .path.display(), .source)]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// The archive stream is malformed or truncated.
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// The compressed envelope is invalid, or decoding produced the wrong number of bytes.
    #[error("Codec error: {0}")]
    Codec(String),

    /// An ignore pattern could not be compiled into a matcher.
    #[error("Invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The project settings failed validation.
    #[error("Invalid project settings: {0}")]
    Config(String),

    /// The project settings file could not be parsed or serialized.
    #[error("Project file error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PackError {
    /// Returns a closure that wraps an `io::Error` together with the path it occurred on.
    pub(crate) fn io_at(path: impl AsRef<Path>) -> impl FnOnce(io::Error) -> PackError {
        let path = path.as_ref().to_path_buf();
        move |source| PackError::Io { source, path }
    }

    /// True for the two archive-content failures (`CorruptArchive` and `Codec`).
    pub fn is_data_error(&self) -> bool {
        matches!(self, PackError::CorruptArchive(_) | PackError::Codec(_))
    }
}

// Generic IO error conversion that doesn't require a path
impl From<io::Error> for PackError {
    fn from(err: io::Error) -> Self {
        PackError::Io { source: err, path: PathBuf::new() }
    }
}
