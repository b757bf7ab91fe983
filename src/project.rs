//! Project settings consumed by the pipeline: which patterns to ignore and how to compress.
//!
//! Stored as JSON with PascalCase keys, e.g.
//!
//! ```json
//! { "Version": 1, "Name": "MyApp", "IgnoredPaths": ["*logs.dat", "cache/"], "Compression": "lzma" }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compress::{BlockCodec, CompressionFormat};
use crate::matcher::PathMatcher;
use crate::PackError;

pub const LATEST_VERSION: u32 = 1;

/// Log file the self-updater writes next to the application; never shipped.
pub const LOG_FILE_NAME: &str = "logs.dat";

const INVALID_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProjectInfo {
    pub version: u32,
    pub name: String,
    pub ignored_paths: Vec<String>,
    pub compression: CompressionFormat,
    pub compression_level: Option<u32>,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self {
            version: LATEST_VERSION,
            name: "NewProject".to_string(),
            ignored_paths: vec![format!("*{LOG_FILE_NAME}")],
            compression: CompressionFormat::Lzma,
            compression_level: None,
        }
    }
}

/// True if `name` can be used as a project (and file) name on every platform.
pub fn is_project_name_valid(name: &str) -> bool {
    !name.trim().is_empty() && !name.chars().any(|c| c.is_control() || INVALID_NAME_CHARS.contains(&c))
}

impl ProjectInfo {
    /// Reads and validates a project file.
    pub fn load(path: &Path) -> Result<Self, PackError> {
        let raw = fs::read(path).map_err(PackError::io_at(path))?;
        let project: ProjectInfo = serde_json::from_slice(&raw)?;
        project.validate()?;
        Ok(project)
    }

    pub fn save(&self, path: &Path) -> Result<(), PackError> {
        self.validate()?;
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).map_err(PackError::io_at(path))
    }

    pub fn validate(&self) -> Result<(), PackError> {
        if !is_project_name_valid(&self.name) {
            return Err(PackError::Config(format!("'Name' contains invalid characters: {:?}", self.name)));
        }
        if self.version == 0 || self.version > LATEST_VERSION {
            return Err(PackError::Config(format!(
                "unsupported project version {} (latest is {LATEST_VERSION})",
                self.version
            )));
        }
        Ok(())
    }

    /// Compiles `IgnoredPaths`, dropping blank entries.
    pub fn matcher(&self) -> Result<PathMatcher, PackError> {
        PathMatcher::compile(self.ignored_paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty()))
    }

    pub fn codec(&self) -> Result<BlockCodec, PackError> {
        self.compression.codec(self.compression_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ignore_the_log_file() {
        let project = ProjectInfo::default();
        let matcher = project.matcher().unwrap();
        assert!(matcher.matches("logs.dat"));
        assert!(matcher.matches("sub/app_logs.dat"));
        assert!(!matcher.matches("app.exe"));
        assert_eq!(project.codec().unwrap().coder_name(), "lzma");
    }

    #[test]
    fn name_validation() {
        assert!(is_project_name_valid("MyApp 2"));
        for bad in ["", "   ", "a/b", "a:b", "what?", "tab\tname"] {
            assert!(!is_project_name_valid(bad), "{bad:?}");
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        let project = ProjectInfo {
            name: "Game".into(),
            ignored_paths: vec!["*.pdb".into(), "saves/".into()],
            compression: CompressionFormat::Zstd,
            compression_level: Some(9),
            ..ProjectInfo::default()
        };
        project.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"IgnoredPaths\""));
        assert!(text.contains("\"zstd\""));
        assert_eq!(ProjectInfo::load(&path).unwrap(), project);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let project: ProjectInfo = serde_json::from_str(r#"{ "Name": "Tool" }"#).unwrap();
        assert_eq!(project.version, LATEST_VERSION);
        assert_eq!(project.ignored_paths, vec!["*logs.dat".to_string()]);
    }

    #[test]
    fn invalid_settings_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "Name": "bad|name" }"#).unwrap();
        assert!(matches!(ProjectInfo::load(&path), Err(PackError::Config(_))));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(ProjectInfo::load(&path), Err(PackError::Json(_))));

        let future = ProjectInfo { version: LATEST_VERSION + 1, ..ProjectInfo::default() };
        assert!(matches!(future.validate(), Err(PackError::Config(_))));
    }

    #[test]
    fn blank_patterns_are_ignored() {
        let project = ProjectInfo { ignored_paths: vec!["".into(), "  ".into()], ..ProjectInfo::default() };
        assert!(project.matcher().unwrap().is_empty());
    }
}
