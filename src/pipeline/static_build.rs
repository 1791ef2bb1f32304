//! Static site build stage and its output.

use super::build_env::{BuildEnvironment, WORKDIR};
use super::container::{container_name, remove_quietly, run_to_completion};
use super::PipelineError;
use crate::engine::{ContainerEngine, ContainerSpec, EngineError};
use crate::progress::Stage;
use crate::source::archive::{read_archive, sha256_hex, ArchiveBuilder, ArchiveEntry};
use crate::source::ProjectInputs;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

pub const BUILD_COMMAND: &[&str] = &["bun", "run", "build"];

/// Directory, relative to the workdir, the build writes the site to.
pub const OUTPUT_DIR: &str = "dist";

/// One generated file, path relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: String,
    pub mode: u32,
    pub contents: Vec<u8>,
}

/// A symbolic link in the output, target kept as the build wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSymlink {
    pub path: String,
    pub target: String,
}

/// The generated site, held in memory in canonical form.
///
/// The digest covers the canonical tar, so it only changes when a path,
/// mode, link target or byte of the site changes.
#[derive(Debug, Clone)]
pub struct StaticOutput {
    files: Vec<OutputFile>,
    symlinks: Vec<OutputSymlink>,
    archive: Vec<u8>,
    digest: String,
}

impl StaticOutput {
    /// Builds the canonical form from archive entries. Directories are
    /// implied by file paths and are dropped.
    pub fn from_entries(entries: Vec<ArchiveEntry>) -> Result<Self, PipelineError> {
        let mut files = Vec::new();
        let mut symlinks = Vec::new();
        for entry in entries {
            match entry {
                ArchiveEntry::File {
                    path,
                    mode,
                    contents,
                } => files.push(OutputFile {
                    path,
                    mode,
                    contents,
                }),
                ArchiveEntry::Symlink { path, target } => {
                    symlinks.push(OutputSymlink { path, target })
                }
                ArchiveEntry::Directory { .. } => {}
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        symlinks.sort_by(|a, b| a.path.cmp(&b.path));

        let archive = Self::pack(&files, &symlinks, None)?;
        let digest = format!("sha256:{}", sha256_hex(&archive));
        Ok(Self {
            files,
            symlinks,
            archive,
            digest,
        })
    }

    fn pack(
        files: &[OutputFile],
        symlinks: &[OutputSymlink],
        root: Option<&str>,
    ) -> Result<Vec<u8>, PipelineError> {
        let mut builder = match root {
            Some(root) => ArchiveBuilder::with_root(root).map_err(PipelineError::archive)?,
            None => ArchiveBuilder::new(),
        };
        for file in files {
            builder
                .add_file(&file.path, file.mode, file.contents.clone())
                .map_err(PipelineError::archive)?;
        }
        for link in symlinks {
            builder
                .add_symlink(&link.path, &link.target)
                .map_err(PipelineError::archive)?;
        }
        builder.finish().map_err(PipelineError::archive)
    }

    pub fn files(&self) -> &[OutputFile] {
        &self.files
    }

    pub fn symlinks(&self) -> &[OutputSymlink] {
        &self.symlinks
    }

    /// Files plus symlinks.
    pub fn len(&self) -> usize {
        self.files.len() + self.symlinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.symlinks.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.contents.len() as u64).sum()
    }

    /// Canonical tar with paths relative to the output directory.
    pub fn archive(&self) -> &[u8] {
        &self.archive
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Same content placed below `root`, for uploading into an image.
    pub fn archive_at(&self, root: &str) -> Result<Vec<u8>, PipelineError> {
        Self::pack(&self.files, &self.symlinks, Some(root))
    }

    /// Writes the site into `dir`, creating it if needed. Existing files
    /// with the same paths are overwritten; nothing is deleted.
    pub fn export(&self, dir: &Path) -> Result<(), PipelineError> {
        for file in &self.files {
            let target = dir.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
            }
            std::fs::write(&target, &file.contents).map_err(|e| write_error(&target, e))?;
            set_mode(&target, file.mode)?;
        }
        for link in &self.symlinks {
            let target = dir.join(&link.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
            }
            if target.symlink_metadata().is_ok() {
                std::fs::remove_file(&target).map_err(|e| write_error(&target, e))?;
            }
            write_symlink(&link.target, &target)?;
        }
        info!(
            dir = %dir.display(),
            files = self.files.len(),
            symlinks = self.symlinks.len(),
            "Exported static output"
        );
        Ok(())
    }

    /// Writes the canonical tar to `path`, gzipped when the name ends in
    /// `.gz` or `.tgz`.
    pub fn export_archive(&self, path: &Path) -> Result<(), PipelineError> {
        let name = path.to_string_lossy();
        let bytes = if name.ends_with(".gz") || name.ends_with(".tgz") {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&self.archive)
                .map_err(|e| write_error(path, e))?;
            encoder.finish().map_err(|e| write_error(path, e))?
        } else {
            self.archive.clone()
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
        }
        std::fs::write(path, bytes).map_err(|e| write_error(path, e))?;
        info!(path = %path.display(), "Wrote static output archive");
        Ok(())
    }
}

fn write_error(path: &Path, error: std::io::Error) -> PipelineError {
    PipelineError::Write {
        path: path.display().to_string(),
        error: error.to_string(),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), PipelineError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| write_error(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), PipelineError> {
    Ok(())
}

#[cfg(unix)]
fn write_symlink(target: &str, link: &Path) -> Result<(), PipelineError> {
    std::os::unix::fs::symlink(target, link).map_err(|e| write_error(link, e))
}

#[cfg(not(unix))]
fn write_symlink(target: &str, link: &Path) -> Result<(), PipelineError> {
    tracing::warn!(link = %link.display(), target, "Symlinks are not exported on this platform");
    Ok(())
}

/// Overlays the source tree onto the build environment, runs the build and
/// collects the output directory.
pub async fn build_static<E>(
    engine: &E,
    env: &BuildEnvironment,
    inputs: &ProjectInputs,
) -> Result<StaticOutput, PipelineError>
where
    E: ContainerEngine + ?Sized,
{
    let mut source = ArchiveBuilder::with_root(WORKDIR).map_err(PipelineError::archive)?;
    for entry in inputs.source.entries() {
        source
            .add_file(&entry.path, entry.mode, entry.contents.clone())
            .map_err(PipelineError::archive)?;
    }
    let source = source.finish().map_err(PipelineError::archive)?;

    let spec = ContainerSpec {
        name: container_name(Stage::Build),
        image: env.image.clone(),
        working_dir: Some(WORKDIR.to_string()),
        cmd: BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    let output_path = format!("{}/{}", WORKDIR, OUTPUT_DIR);

    info!(
        image = %env.image,
        files = inputs.source.len(),
        command = %BUILD_COMMAND.join(" "),
        "Building static site"
    );

    let container = engine.create_container(&spec).await?;
    debug!(container = %container, name = %spec.name, "Created build container");

    let result = async {
        engine.upload(&container, "/", source).await?;
        run_to_completion(engine, Stage::Build, &container).await?;
        match engine.download(&container, &output_path).await {
            Ok(bytes) => Ok::<_, PipelineError>(bytes),
            Err(EngineError::NotFound(_)) => Err(PipelineError::MissingOutput {
                stage: Stage::Build,
                path: output_path.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }
    .await;
    remove_quietly(engine, &container).await;
    let downloaded = result?;

    let entries = read_archive(&downloaded, Some(OUTPUT_DIR)).map_err(PipelineError::archive)?;
    let output = StaticOutput::from_entries(entries)?;
    if output.is_empty() {
        return Err(PipelineError::MissingOutput {
            stage: Stage::Build,
            path: output_path,
        });
    }

    info!(
        files = output.len(),
        bytes = output.total_bytes(),
        digest = %output.digest(),
        "Static site built"
    );
    Ok(output)
}
