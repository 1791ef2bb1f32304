//! Deterministic tar archives
//!
//! Every archive sitepack hands to the container engine is produced here.
//! Entries are sorted by path, parent directories are emitted explicitly,
//! and ownership and timestamps are zeroed, so the same logical content
//! always produces the same bytes.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use tracing::trace;

pub const FILE_MODE: u32 = 0o644;
pub const EXEC_MODE: u32 = 0o755;
pub const DIR_MODE: u32 = 0o755;

/// A single file or directory inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    File {
        path: String,
        mode: u32,
        contents: Vec<u8>,
    },
    Directory {
        path: String,
    },
    /// `target` is kept verbatim, relative or absolute.
    Symlink {
        path: String,
        target: String,
    },
}

impl ArchiveEntry {
    pub fn path(&self) -> &str {
        match self {
            ArchiveEntry::File { path, .. }
            | ArchiveEntry::Directory { path }
            | ArchiveEntry::Symlink { path, .. } => path,
        }
    }
}

enum Pending {
    Dir,
    File(u32, Vec<u8>),
    Symlink(String),
}

/// Collects entries and writes them as a canonical tar.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    root: Option<String>,
    files: BTreeMap<String, (u32, Vec<u8>)>,
    symlinks: BTreeMap<String, String>,
    dirs: BTreeMap<String, ()>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places every entry below `root`. Directories at or above `root` are
    /// not emitted; the engine creates missing parents on extraction and
    /// existing system directories keep their ownership and mode.
    pub fn with_root(root: &str) -> Result<Self> {
        Ok(Self {
            root: Some(normalize(root)?),
            ..Self::default()
        })
    }

    fn place(&self, path: &str) -> Result<String> {
        let path = normalize(path)?;
        Ok(match &self.root {
            Some(root) => format!("{}/{}", root, path),
            None => path,
        })
    }

    fn add_parents(&mut self, path: &str) {
        let floor = self.root.as_ref().map(|r| r.len()).unwrap_or(0);
        for parent in parents(path) {
            if parent.len() > floor {
                self.dirs.insert(parent, ());
            }
        }
    }

    /// Adds a file at a relative, `/`-separated path. A later add for the
    /// same path replaces the earlier one.
    pub fn add_file(&mut self, path: &str, mode: u32, contents: Vec<u8>) -> Result<()> {
        let path = self.place(path)?;
        self.add_parents(&path);
        self.symlinks.remove(&path);
        self.files.insert(path, (mode, contents));
        Ok(())
    }

    /// Adds a symbolic link at `path` pointing to `target`.
    pub fn add_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        if target.is_empty() {
            bail!("Symlink {} has an empty target", path);
        }
        let path = self.place(path)?;
        self.add_parents(&path);
        self.files.remove(&path);
        self.symlinks.insert(path, target.to_string());
        Ok(())
    }

    pub fn add_dir(&mut self, path: &str) -> Result<()> {
        let path = self.place(path)?;
        self.add_parents(&path);
        self.dirs.insert(path, ());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.symlinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.symlinks.is_empty()
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let mut ordered: BTreeMap<String, Pending> = BTreeMap::new();
        for (dir, _) in self.dirs {
            if !self.files.contains_key(&dir) && !self.symlinks.contains_key(&dir) {
                ordered.insert(format!("{}/", dir), Pending::Dir);
            }
        }
        for (path, (mode, contents)) in self.files {
            ordered.insert(path, Pending::File(mode, contents));
        }
        for (path, target) in self.symlinks {
            ordered.insert(path, Pending::Symlink(target));
        }

        let mut builder = tar::Builder::new(Vec::new());
        builder.mode(tar::HeaderMode::Deterministic);

        for (path, entry) in ordered {
            let mut header = tar::Header::new_gnu();
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);

            match entry {
                Pending::File(mode, contents) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_mode(mode);
                    header.set_size(contents.len() as u64);
                    builder
                        .append_data(&mut header, &path, contents.as_slice())
                        .with_context(|| format!("Failed to append {}", path))?;
                }
                Pending::Symlink(target) => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_mode(0o777);
                    header.set_size(0);
                    builder
                        .append_link(&mut header, &path, &target)
                        .with_context(|| format!("Failed to append {}", path))?;
                }
                Pending::Dir => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(DIR_MODE);
                    header.set_size(0);
                    builder
                        .append_data(&mut header, &path, std::io::empty())
                        .with_context(|| format!("Failed to append {}", path))?;
                }
            }
            trace!(path = %path, "Archived entry");
        }

        builder.into_inner().context("Failed to finish archive")
    }
}

/// Reads every file, directory and symlink from a tar stream.
///
/// With `strip_prefix`, only entries below that top-level directory are
/// returned, with the prefix removed. The prefix directory itself is dropped.
/// Hard links become regular files carrying their target's contents; the
/// target must appear earlier in the stream. Any other entry type is an
/// error.
pub fn read_archive(bytes: &[u8], strip_prefix: Option<&str>) -> Result<Vec<ArchiveEntry>> {
    let mut archive = tar::Archive::new(bytes);
    let mut entries = Vec::new();

    for entry in archive.entries().context("Failed to read archive")? {
        let mut entry = entry.context("Failed to read archive entry")?;
        let raw_path = entry
            .path()
            .context("Archive entry has an invalid path")?
            .to_string_lossy()
            .to_string();

        let Some(path) = relative_to(&raw_path, strip_prefix) else {
            continue;
        };
        if path.is_empty() {
            continue;
        }

        match entry.header().entry_type() {
            tar::EntryType::Directory => entries.push(ArchiveEntry::Directory { path }),
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let mode = entry.header().mode().unwrap_or(FILE_MODE);
                let mut contents = Vec::new();
                entry
                    .read_to_end(&mut contents)
                    .with_context(|| format!("Failed to read {}", path))?;
                entries.push(ArchiveEntry::File {
                    path,
                    mode: normalize_mode(mode),
                    contents,
                });
            }
            tar::EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .context("Archive entry has an invalid link target")?
                    .with_context(|| format!("Symlink {} has no target", path))?
                    .to_string_lossy()
                    .to_string();
                entries.push(ArchiveEntry::Symlink { path, target });
            }
            tar::EntryType::Link => {
                let raw_target = entry
                    .link_name()
                    .context("Archive entry has an invalid link target")?
                    .with_context(|| format!("Hard link {} has no target", path))?
                    .to_string_lossy()
                    .to_string();
                let linked = relative_to(&raw_target, strip_prefix).and_then(|target| {
                    entries.iter().find_map(|e| match e {
                        ArchiveEntry::File {
                            path, mode, contents,
                        } if *path == target => Some((*mode, contents.clone())),
                        _ => None,
                    })
                });
                let Some((mode, contents)) = linked else {
                    bail!(
                        "Hard link {} points to {}, which is not an earlier file in the archive",
                        path,
                        raw_target
                    );
                };
                trace!(path = %path, target = %raw_target, "Resolved hard link");
                entries.push(ArchiveEntry::File {
                    path,
                    mode,
                    contents,
                });
            }
            tar::EntryType::XGlobalHeader => {
                trace!(path = %path, "Skipping pax global header");
            }
            other => {
                bail!("Unsupported archive entry {} of type {:?}", path, other);
            }
        }
    }

    Ok(entries)
}

/// Lowercase hex sha256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Collapses permission bits to the two modes sitepack writes.
pub fn normalize_mode(mode: u32) -> u32 {
    if mode & 0o111 != 0 {
        EXEC_MODE
    } else {
        FILE_MODE
    }
}

fn normalize(path: &str) -> Result<String> {
    let trimmed = path.trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() {
        bail!("Archive path must not be empty");
    }
    if trimmed.split('/').any(|part| part == ".." || part.is_empty()) {
        bail!("Archive path must be relative and normalized: {}", path);
    }
    Ok(trimmed.to_string())
}

/// Path below `strip_prefix`, or the whole path without one. `None` when the
/// entry lies outside the prefix.
fn relative_to(raw_path: &str, strip_prefix: Option<&str>) -> Option<String> {
    let trimmed = raw_path.trim_start_matches("./").trim_end_matches('/');
    match strip_prefix {
        Some(prefix) => {
            let prefix = prefix.trim_end_matches('/');
            if trimmed == prefix {
                return Some(String::new());
            }
            trimmed
                .strip_prefix(prefix)
                .filter(|rest| rest.starts_with('/'))
                .map(|rest| rest.trim_start_matches('/').to_string())
        }
        None => Some(trimmed.to_string()),
    }
}

fn parents(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.split('/').collect();
    (1..parts.len()).map(|i| parts[..i].join("/")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_bytes() {
        let mut a = ArchiveBuilder::new();
        a.add_file("b.txt", FILE_MODE, b"b".to_vec()).unwrap();
        a.add_file("dir/a.txt", FILE_MODE, b"a".to_vec()).unwrap();

        let mut b = ArchiveBuilder::new();
        b.add_file("dir/a.txt", FILE_MODE, b"a".to_vec()).unwrap();
        b.add_file("b.txt", FILE_MODE, b"b".to_vec()).unwrap();

        assert_eq!(a.finish().unwrap(), b.finish().unwrap());
    }

    #[test]
    fn test_parent_directories_are_emitted() {
        let mut builder = ArchiveBuilder::new();
        builder
            .add_file("a/b/c.html", FILE_MODE, b"<p>".to_vec())
            .unwrap();
        let bytes = builder.finish().unwrap();

        let entries = read_archive(&bytes, None).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["a", "a/b", "a/b/c.html"]);
    }

    #[test]
    fn test_rooted_builder_skips_system_parents() {
        let mut builder = ArchiveBuilder::with_root("var/www/html").unwrap();
        builder
            .add_file("posts/one/index.html", FILE_MODE, b"1".to_vec())
            .unwrap();
        builder.add_file("index.html", FILE_MODE, b"0".to_vec()).unwrap();
        let bytes = builder.finish().unwrap();

        let entries = read_archive(&bytes, None).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path()).collect();
        assert_eq!(
            paths,
            vec![
                "var/www/html/index.html",
                "var/www/html/posts",
                "var/www/html/posts/one",
                "var/www/html/posts/one/index.html",
            ]
        );
    }

    #[test]
    fn test_strip_prefix() {
        let mut builder = ArchiveBuilder::new();
        builder
            .add_file("dist/index.html", FILE_MODE, b"hi".to_vec())
            .unwrap();
        builder
            .add_file("other/skip.txt", FILE_MODE, b"x".to_vec())
            .unwrap();
        let bytes = builder.finish().unwrap();

        let entries = read_archive(&bytes, Some("dist")).unwrap();
        assert_eq!(
            entries,
            vec![ArchiveEntry::File {
                path: "index.html".to_string(),
                mode: FILE_MODE,
                contents: b"hi".to_vec(),
            }]
        );
    }

    /// Tar shaped like an engine download of `dist`: the first name of a
    /// multiply-linked file is stored in full, later names as hard links.
    fn linked_download() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_mode(DIR_MODE);
        dir.set_size(0);
        builder.append_data(&mut dir, "dist/", std::io::empty()).unwrap();

        let mut file = tar::Header::new_gnu();
        file.set_entry_type(tar::EntryType::Regular);
        file.set_mode(FILE_MODE);
        file.set_size(5);
        builder
            .append_data(&mut file, "dist/index.html", &b"<h1/>"[..])
            .unwrap();

        let mut hard = tar::Header::new_gnu();
        hard.set_entry_type(tar::EntryType::Link);
        hard.set_size(0);
        builder
            .append_link(&mut hard, "dist/404.html", "dist/index.html")
            .unwrap();

        let mut soft = tar::Header::new_gnu();
        soft.set_entry_type(tar::EntryType::Symlink);
        soft.set_mode(0o777);
        soft.set_size(0);
        builder
            .append_link(&mut soft, "dist/latest.html", "index.html")
            .unwrap();

        builder.into_inner().unwrap()
    }

    #[test]
    fn test_hard_links_become_files() {
        let entries = read_archive(&linked_download(), Some("dist")).unwrap();
        assert!(entries.contains(&ArchiveEntry::File {
            path: "404.html".to_string(),
            mode: FILE_MODE,
            contents: b"<h1/>".to_vec(),
        }));
    }

    #[test]
    fn test_symlinks_are_kept() {
        let entries = read_archive(&linked_download(), Some("dist")).unwrap();
        assert!(entries.contains(&ArchiveEntry::Symlink {
            path: "latest.html".to_string(),
            target: "index.html".to_string(),
        }));
    }

    #[test]
    fn test_dangling_hard_link_is_an_error() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut hard = tar::Header::new_gnu();
        hard.set_entry_type(tar::EntryType::Link);
        hard.set_size(0);
        builder
            .append_link(&mut hard, "dist/404.html", "dist/missing.html")
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        let err = read_archive(&bytes, Some("dist")).unwrap_err();
        assert!(err.to_string().contains("404.html"));
    }

    #[test]
    fn test_unsupported_entry_is_an_error() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut fifo = tar::Header::new_gnu();
        fifo.set_entry_type(tar::EntryType::Fifo);
        fifo.set_size(0);
        builder
            .append_data(&mut fifo, "dist/pipe", std::io::empty())
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        assert!(read_archive(&bytes, Some("dist")).is_err());
    }

    #[test]
    fn test_builder_writes_symlinks() {
        let mut builder = ArchiveBuilder::new();
        builder
            .add_file("posts/a.html", FILE_MODE, b"a".to_vec())
            .unwrap();
        builder.add_symlink("posts/latest.html", "a.html").unwrap();
        assert_eq!(builder.len(), 2);
        let bytes = builder.finish().unwrap();

        let entries = read_archive(&bytes, None).unwrap();
        assert_eq!(
            entries.last(),
            Some(&ArchiveEntry::Symlink {
                path: "posts/latest.html".to_string(),
                target: "a.html".to_string(),
            })
        );
        assert!(ArchiveBuilder::new().add_symlink("x", "").is_err());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let mut builder = ArchiveBuilder::new();
        assert!(builder
            .add_file("../etc/passwd", FILE_MODE, Vec::new())
            .is_err());
        assert!(builder.add_file("", FILE_MODE, Vec::new()).is_err());
    }

    #[test]
    fn test_mode_normalization() {
        assert_eq!(normalize_mode(0o600), FILE_MODE);
        assert_eq!(normalize_mode(0o700), EXEC_MODE);
        assert_eq!(normalize_mode(0o775), EXEC_MODE);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
