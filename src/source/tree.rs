use super::archive::{normalize_mode, sha256_hex, ArchiveBuilder, FILE_MODE};
use super::filter::SourceFilter;
use super::LoadError;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// One captured file, path relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: String,
    pub mode: u32,
    pub contents: Vec<u8>,
}

/// Immutable snapshot of the allow-listed part of the project.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
    entries: Vec<SourceEntry>,
}

impl SourceTree {
    /// Walks `root` and reads every file the filter admits.
    ///
    /// Ignore files (`.gitignore`, `.ignore`) are not consulted: the
    /// allow-list alone decides what is captured, so the snapshot does not
    /// depend on the developer's git setup.
    pub fn capture(root: &Path, filter: &SourceFilter) -> Result<Self, LoadError> {
        if !root.is_dir() {
            return Err(LoadError::NotADirectory(root.to_path_buf()));
        }

        debug!(root = %root.display(), include = ?filter.include(), "Capturing source tree");

        let prune = filter.clone();
        let prune_root = root.to_path_buf();
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .overrides(filter.overrides())
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir || entry.depth() == 0 {
                    return true;
                }
                entry
                    .path()
                    .strip_prefix(&prune_root)
                    .map(|rel| prune.allows(rel, true))
                    .unwrap_or(false)
            })
            .build();

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| LoadError::Walk(e.to_string()))?;
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() {
                debug!(path = %entry.path().display(), "Skipping symlink");
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| LoadError::Walk(e.to_string()))?;
            if !filter.allows(relative, false) {
                continue;
            }

            let contents = std::fs::read(entry.path()).map_err(|e| LoadError::Read {
                path: entry.path().to_path_buf(),
                error: e.to_string(),
            })?;
            let mode = entry
                .metadata()
                .map(|m| file_mode(&m))
                .unwrap_or(FILE_MODE);

            let path = to_unix(relative);
            trace!(path = %path, size = contents.len(), "Captured");
            entries.push(SourceEntry {
                path,
                mode,
                contents,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(files = entries.len(), "Source tree captured");

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.contents.len() as u64).sum()
    }

    /// Content hash over paths, modes and bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.path.as_bytes());
            hasher.update([0]);
            hasher.update(entry.mode.to_be_bytes());
            hasher.update(sha256_hex(&entry.contents).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Canonical tar of the tree, ready to upload onto the build workdir.
    pub fn to_archive(&self) -> anyhow::Result<Vec<u8>> {
        let mut builder = ArchiveBuilder::new();
        for entry in &self.entries {
            builder.add_file(&entry.path, entry.mode, entry.contents.clone())?;
        }
        builder.finish()
    }
}

fn to_unix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    normalize_mode(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    normalize_mode(FILE_MODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_INCLUDE;
    use crate::source::archive::read_archive;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, path: &str, contents: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }

    fn create_site(dir: &TempDir) {
        let root = dir.path();
        write(root, "package.json", "{}");
        write(root, "bun.lock", "{}");
        write(root, "astro.config.mjs", "export default {}");
        write(root, "tsconfig.json", "{}");
        write(root, "src/pages/index.astro", "<h1>hi</h1>");
        write(root, "src/content/post.md", "# post");
        write(root, "public/favicon.svg", "<svg/>");
        write(root, "node_modules/astro/index.js", "ignored");
        write(root, "dist/index.html", "stale");
        write(root, ".envrc", "secret");
    }

    fn default_filter(root: &Path) -> SourceFilter {
        let include: Vec<String> = DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect();
        SourceFilter::new(root, &include).unwrap()
    }

    #[test]
    fn test_capture_respects_allow_list() {
        let dir = TempDir::new().unwrap();
        create_site(&dir);

        let tree = SourceTree::capture(dir.path(), &default_filter(dir.path())).unwrap();
        let paths: Vec<&str> = tree.entries().iter().map(|e| e.path.as_str()).collect();

        assert_eq!(
            paths,
            vec![
                "astro.config.mjs",
                "public/favicon.svg",
                "src/content/post.md",
                "src/pages/index.astro",
                "tsconfig.json",
            ]
        );
    }

    #[test]
    fn test_capture_ignores_gitignore() {
        let dir = TempDir::new().unwrap();
        create_site(&dir);
        write(dir.path(), ".gitignore", "src/\n");

        let tree = SourceTree::capture(dir.path(), &default_filter(dir.path())).unwrap();
        assert!(tree.entries().iter().any(|e| e.path.starts_with("src/")));
    }

    #[test]
    fn test_capture_missing_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let result = SourceTree::capture(&missing, &default_filter(&missing));
        assert!(matches!(result, Err(LoadError::NotADirectory(_))));
    }

    #[test]
    fn test_archive_ignores_mtimes() {
        let dir = TempDir::new().unwrap();
        create_site(&dir);
        let filter = default_filter(dir.path());

        let first = SourceTree::capture(dir.path(), &filter).unwrap();
        filetime::set_file_mtime(
            dir.path().join("src/pages/index.astro"),
            FileTime::from_unix_time(1_000_000, 0),
        )
        .unwrap();
        let second = SourceTree::capture(dir.path(), &filter).unwrap();

        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.to_archive().unwrap(), second.to_archive().unwrap());
    }

    #[test]
    fn test_digest_tracks_content() {
        let dir = TempDir::new().unwrap();
        create_site(&dir);
        let filter = default_filter(dir.path());

        let before = SourceTree::capture(dir.path(), &filter).unwrap();
        write(dir.path(), "src/content/post.md", "# edited");
        let after = SourceTree::capture(dir.path(), &filter).unwrap();

        assert_ne!(before.digest(), after.digest());
    }

    #[test]
    fn test_archive_round_trips_paths() {
        let dir = TempDir::new().unwrap();
        create_site(&dir);
        let tree = SourceTree::capture(dir.path(), &default_filter(dir.path())).unwrap();

        let entries = read_archive(&tree.to_archive().unwrap(), None).unwrap();
        assert!(entries
            .iter()
            .any(|e| e.path() == "src/pages/index.astro"));
        assert!(!entries.iter().any(|e| e.path().starts_with("node_modules")));
    }
}
