use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::compress::CompressionFormat;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Pack a folder into a single compressed archive.
    #[command(alias = "c")]
    Pack {
        /// The folder to pack.
        #[arg(required = true)]
        source: PathBuf,

        /// The path for the output archive file.
        #[arg(short, long)]
        output: PathBuf,

        /// Wildcard pattern of paths to leave out (e.g. "*.log", "cache/"). May be repeated.
        #[arg(short, long = "ignore")]
        ignore: Vec<String>,

        /// Project settings file (JSON). Its IgnoredPaths and compression settings are used,
        /// with --ignore patterns added and --format/--level taking precedence.
        #[arg(long)]
        project: Option<PathBuf>,

        /// Compression format.
        #[arg(long, value_enum)]
        format: Option<CompressionFormat>,

        /// LZMA preset (0-9) or zstd level (1-22).
        #[arg(long)]
        level: Option<u32>,
    },

    /// Restore a folder from an archive.
    #[command(alias = "x")]
    Unpack {
        /// The archive file to unpack.
        #[arg(required = true)]
        archive: PathBuf,

        /// The directory to restore into. Created if missing.
        #[arg(short, long)]
        output: PathBuf,

        /// Compression format the archive was packed with.
        #[arg(long, value_enum, default_value_t = CompressionFormat::Lzma)]
        format: CompressionFormat,
    },

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,

        /// Compression format the archive was packed with.
        #[arg(long, value_enum, default_value_t = CompressionFormat::Lzma)]
        format: CompressionFormat,
    },
}

/// Parses command-line arguments using `clap` and returns the command to execute.
pub fn run() -> Result<Commands, Box<dyn std::error::Error>> {
    let args = Args::try_parse()?;
    Ok(args.command)
}
