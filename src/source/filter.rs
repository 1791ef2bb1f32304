//! Allow-list filtering of the project tree
//!
//! Only the listed paths are copied into the build. An entry ending in `/`
//! selects a directory and everything below it; any other entry selects a
//! single root-relative path (globs are accepted too, e.g. `*.config.mjs`).

use anyhow::{Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SourceFilter {
    include: Vec<String>,
    overrides: Override,
}

impl SourceFilter {
    /// Builds a filter rooted at `root` from allow-list entries.
    pub fn new(root: &Path, include: &[String]) -> Result<Self> {
        let mut builder = OverrideBuilder::new(root);

        for entry in include {
            let trimmed = entry.trim().trim_start_matches("./").trim_start_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            let base = trimmed.trim_end_matches('/');
            // Ancestors and the entry itself let the walker descend; the
            // trailing `/**` admits the contents.
            let parts: Vec<&str> = base.split('/').collect();
            for depth in 1..parts.len() {
                builder
                    .add(&format!("/{}", parts[..depth].join("/")))
                    .with_context(|| format!("Invalid include pattern: {}", entry))?;
            }
            builder
                .add(&format!("/{}", base))
                .with_context(|| format!("Invalid include pattern: {}", entry))?;
            builder
                .add(&format!("/{}/**", base))
                .with_context(|| format!("Invalid include pattern: {}", entry))?;
        }

        let overrides = builder.build().context("Failed to build source filter")?;

        Ok(Self {
            include: include.to_vec(),
            overrides,
        })
    }

    /// True when a root-relative path is part of the source tree.
    pub fn allows(&self, relative: &Path, is_dir: bool) -> bool {
        self.overrides.matched(relative, is_dir).is_whitelist()
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub(crate) fn overrides(&self) -> Override {
        self.overrides.clone()
    }
}
