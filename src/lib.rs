//! # patchpack
//!
//! Packs a directory tree into a single compressed file and restores it verbatim, as the
//! transport format of a self-updating application.
//!
//! ## Key Modules
//!
//! - [`matcher`]: Compiles wildcard ignore patterns and tests relative paths against them.
//! - [`archive`]: Walks a folder and writes the uncompressed tar stream.
//! - [`extract`]: Reads a tar stream back into a folder.
//! - [`compress`]: The length-prefixed compressed envelope and its pluggable coders.
//! - [`pipeline`]: Pack/unpack orchestration with a self-cleaning staging file.
//! - [`project`]: Project settings (ignore patterns, compression format).
//!
//! ## Examples
//!
//! ```no_run
//! use std::path::Path;
//!
//! let summary = patchpack::pack_folder(Path::new("proj"), Path::new("proj.lzma"), &["*.log"])?;
//! println!("{} entries", summary.entries);
//! patchpack::unpack_folder(Path::new("proj.lzma"), Path::new("restored"))?;
//! # Ok::<(), patchpack::PackError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod common;
pub mod compress;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod pipeline;
pub mod project;

// Cross-platform filesystem helpers
pub mod fsx;

pub use error::PackError;
pub use matcher::PathMatcher;
pub use pipeline::{pack_folder, pack_folder_with, pack_project, unpack_folder, unpack_folder_with, PackSummary, UnpackSummary};
