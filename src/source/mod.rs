//! Project input capture
//!
//! Everything the pipeline reads from the host filesystem is captured here,
//! once, before the container engine is contacted. A missing manifest or
//! lockfile therefore fails the run without any engine call.

pub mod archive;
pub mod filter;
pub mod tree;

pub use archive::{read_archive, sha256_hex, ArchiveBuilder, ArchiveEntry};
pub use filter::SourceFilter;
pub use tree::{SourceEntry, SourceTree};

use crate::config::SitepackConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Required input {name} not found at {path}")]
    MissingInput { name: String, path: PathBuf },

    #[error("Source directory {0} does not exist or is not a directory")]
    NotADirectory(PathBuf),

    #[error("Failed to read {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to walk source tree: {0}")]
    Walk(String),

    #[error("Invalid source filter: {0}")]
    Filter(String),
}

/// A single captured file such as the manifest or lockfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// File name used inside containers
    pub name: String,
    pub contents: Vec<u8>,
    pub digest: String,
}

impl InputFile {
    /// Reads `path`; the in-container name is its final component.
    pub fn read(path: &Path) -> Result<Self, LoadError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        if !path.is_file() {
            return Err(LoadError::MissingInput {
                name,
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read(path).map_err(|e| LoadError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(Self::from_bytes(name, contents))
    }

    pub fn from_bytes(name: impl Into<String>, contents: Vec<u8>) -> Self {
        let digest = sha256_hex(&contents);
        Self {
            name: name.into(),
            contents,
            digest,
        }
    }

    /// First 16 hex characters of the content digest.
    pub fn short_digest(&self) -> &str {
        &self.digest[..16]
    }
}

/// Manifest, lockfile and filtered source tree for one run.
#[derive(Debug, Clone)]
pub struct ProjectInputs {
    pub manifest: InputFile,
    pub lockfile: InputFile,
    pub source: SourceTree,
}

impl ProjectInputs {
    /// Captures all inputs named by the configuration.
    ///
    /// # Errors
    ///
    /// Fails with `LoadError::MissingInput` if the manifest or lockfile is
    /// absent, and `LoadError::NotADirectory` if the project root is.
    pub fn load(config: &SitepackConfig) -> Result<Self, LoadError> {
        let manifest = InputFile::read(&config.manifest_path())?;
        let lockfile = InputFile::read(&config.lockfile_path())?;

        let filter = SourceFilter::new(&config.project_dir, &config.include)
            .map_err(|e| LoadError::Filter(e.to_string()))?;
        let source = SourceTree::capture(&config.project_dir, &filter)?;

        info!(
            manifest = %manifest.name,
            lockfile = %lockfile.name,
            lockfile_digest = %lockfile.short_digest(),
            files = source.len(),
            bytes = source.total_bytes(),
            "Loaded project inputs"
        );

        Ok(Self {
            manifest,
            lockfile,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_project(dir: &TempDir, with_manifest: bool, with_lockfile: bool) {
        let root = dir.path();
        if with_manifest {
            fs::write(root.join("package.json"), r#"{"name":"blog"}"#).unwrap();
        }
        if with_lockfile {
            fs::write(root.join("bun.lock"), r#"{"lockfileVersion":1}"#).unwrap();
        }
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/index.md"), "# hello").unwrap();
    }

    #[test]
    fn test_load_complete_project() {
        let dir = TempDir::new().unwrap();
        create_project(&dir, true, true);
        let config = SitepackConfig::builtin(dir.path().to_path_buf());

        let inputs = ProjectInputs::load(&config).unwrap();
        assert_eq!(inputs.manifest.name, "package.json");
        assert_eq!(inputs.lockfile.name, "bun.lock");
        assert_eq!(inputs.source.len(), 1);
        assert_eq!(inputs.lockfile.short_digest().len(), 16);
    }

    #[test]
    fn test_missing_lockfile() {
        let dir = TempDir::new().unwrap();
        create_project(&dir, true, false);
        let config = SitepackConfig::builtin(dir.path().to_path_buf());

        match ProjectInputs::load(&config) {
            Err(LoadError::MissingInput { name, .. }) => assert_eq!(name, "bun.lock"),
            other => panic!("Expected MissingInput, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        create_project(&dir, false, true);
        let config = SitepackConfig::builtin(dir.path().to_path_buf());

        match ProjectInputs::load(&config) {
            Err(LoadError::MissingInput { name, .. }) => assert_eq!(name, "package.json"),
            other => panic!("Expected MissingInput, got {:?}", other),
        }
    }

    #[test]
    fn test_input_digest_changes_with_content() {
        let a = InputFile::from_bytes("bun.lock", b"one".to_vec());
        let b = InputFile::from_bytes("bun.lock", b"two".to_vec());
        assert_ne!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }
}
