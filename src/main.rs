//! Main entry point for the patchpack CLI app

use patchpack::cli::{self, Commands};
use patchpack::common::EntryKind;
use patchpack::compress::CompressionFormat;
use patchpack::project::ProjectInfo;
use patchpack::{pipeline, PathMatcher};
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_app() {
        match e.downcast_ref::<clap::Error>() {
            Some(clap_err) => {
                let _ = clap_err.print();
                if !clap_err.use_stderr() {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            None => eprintln!("Error: {}", e),
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let command = cli::run()?;

    match command {
        Commands::Pack { source, output, ignore, project, format, level } => {
            let project = match project {
                Some(path) => ProjectInfo::load(&path)?,
                None => ProjectInfo { ignored_paths: Vec::new(), ..ProjectInfo::default() },
            };
            let mut patterns: Vec<String> = project.ignored_paths.clone();
            patterns.extend(ignore);
            let matcher = PathMatcher::compile(patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()))?;
            let format = format.unwrap_or(project.compression);
            let level = level.or(project.compression_level);
            let codec = format.codec(level)?;

            let summary = pipeline::pack_folder_with(&source, &output, &matcher, &codec)?;
            println!(
                "Packed {} entries ({} bytes) into {} ({} bytes)",
                summary.entries,
                summary.archive_bytes,
                output.display(),
                summary.compressed_bytes
            );
        }
        Commands::Unpack { archive, output, format } => {
            let summary = pipeline::unpack_folder_with(&archive, &output, &format.codec(None)?)?;
            println!("Unpacked {} entries into {}", summary.entries, output.display());
        }
        Commands::List { archive, format } => {
            list(&archive, format)?;
        }
    }

    Ok(())
}

fn list(archive: &std::path::Path, format: CompressionFormat) -> Result<(), Box<dyn std::error::Error>> {
    let entries = pipeline::list_archive(archive, &format.codec(None)?)?;
    println!("Archive Index ({} entries):", entries.len());
    for entry in entries.iter().filter(|e| !e.is_root()) {
        match entry.kind {
            EntryKind::Directory => println!("- {}/", entry.path),
            EntryKind::File => println!("- {} ({} bytes)", entry.path, entry.size),
        }
    }
    Ok(())
}
