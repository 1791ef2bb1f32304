//! Output formatting for command results
//!
//! Results are printed on stdout as JSON, YAML or plain text; logs go to
//! stderr.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::SitepackConfig;
use crate::pipeline::{BuildEnvironment, PackagedImage, PublishedImage, StaticOutput};

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
    /// Human-readable formatted text
    Human,
}

/// Serializable view of a built site.
#[derive(Debug, Clone, Serialize)]
pub struct StaticOutputSummary {
    pub digest: String,
    pub files: usize,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
}

impl StaticOutputSummary {
    pub fn new(output: &StaticOutput) -> Self {
        Self {
            digest: output.digest().to_string(),
            files: output.len(),
            bytes: output.total_bytes(),
            exported_to: None,
            archive: None,
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn structured<T: Serialize>(&self, value: &T, what: &str) -> Result<String> {
        match self.format {
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .with_context(|| format!("Failed to serialize {} to YAML", what)),
            OutputFormat::Json | OutputFormat::Human => serde_json::to_string_pretty(value)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
        }
    }

    pub fn format_environment(&self, env: &BuildEnvironment) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(env, "build environment");
        }
        let mut out = String::new();
        out.push_str(&format!("Build environment: {}\n", env.image));
        out.push_str(&format!("  Key: {}\n", env.env_key));
        out.push_str(&format!("  Cache volume: {}\n", env.cache_volume));
        if env.reused {
            out.push_str("  Reused existing image\n");
        }
        Ok(out)
    }

    pub fn format_static_output(&self, summary: &StaticOutputSummary) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(summary, "static output");
        }
        let mut out = String::new();
        out.push_str(&format!(
            "Static site: {} files, {} bytes\n",
            summary.files, summary.bytes
        ));
        out.push_str(&format!("  Digest: {}\n", summary.digest));
        if let Some(dir) = &summary.exported_to {
            out.push_str(&format!("  Exported to: {}\n", dir));
        }
        if let Some(archive) = &summary.archive {
            out.push_str(&format!("  Archive: {}\n", archive));
        }
        Ok(out)
    }

    pub fn format_packaged(&self, image: &PackagedImage) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(image, "packaged image");
        }
        let mut out = String::new();
        out.push_str(&format!("Image: {}\n", image.image));
        out.push_str(&format!("  Id: {}\n", image.id));
        out.push_str(&format!("  Exposes: {}\n", image.exposed_ports.join(", ")));
        out.push_str(&format!("  Site digest: {}\n", image.site_digest));
        if image.reused {
            out.push_str("  Reused existing image\n");
        }
        Ok(out)
    }

    pub fn format_published(&self, published: &PublishedImage) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(published, "published image");
        }
        Ok(format!(
            "Published {}:{}\n  Reference: {}\n",
            published.repository, published.tag, published.reference
        ))
    }

    pub fn format_config(&self, config: &SitepackConfig) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(config.to_string()),
            _ => {
                let map: BTreeMap<String, String> = config.to_display_map().into_iter().collect();
                self.structured(&map, "config")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn environment() -> BuildEnvironment {
        BuildEnvironment {
            image: "sitepack-env:0123456789abcdef".to_string(),
            env_key: "0123456789abcdef".repeat(4),
            cache_volume: "sitepack-bun-fedcba9876543210".to_string(),
            reused: true,
        }
    }

    fn published() -> PublishedImage {
        PublishedImage {
            repository: "ghcr.io/kgb33/blog.kgb33.dev".to_string(),
            tag: "latest".to_string(),
            digest: "sha256:abc".to_string(),
            reference: "ghcr.io/kgb33/blog.kgb33.dev@sha256:abc".to_string(),
        }
    }

    #[test]
    fn test_environment_human() {
        let out = OutputFormatter::new(OutputFormat::Human)
            .format_environment(&environment())
            .unwrap();
        assert!(out.contains("sitepack-env:0123456789abcdef"));
        assert!(out.contains("Reused existing image"));
    }

    #[test]
    fn test_environment_json() {
        let out = OutputFormatter::new(OutputFormat::Json)
            .format_environment(&environment())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["cache_volume"], "sitepack-bun-fedcba9876543210");
        assert_eq!(value["reused"], true);
    }

    #[test]
    fn test_published_yaml() {
        let out = OutputFormatter::new(OutputFormat::Yaml)
            .format_published(&published())
            .unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(
            value["reference"].as_str(),
            Some("ghcr.io/kgb33/blog.kgb33.dev@sha256:abc")
        );
    }

    #[test]
    fn test_static_summary_skips_unset_paths() {
        let summary = StaticOutputSummary {
            digest: "sha256:1".to_string(),
            files: 2,
            bytes: 10,
            exported_to: None,
            archive: Some("site.tar".to_string()),
        };
        let out = OutputFormatter::new(OutputFormat::Json)
            .format_static_output(&summary)
            .unwrap();
        assert!(!out.contains("exported_to"));
        assert!(out.contains("site.tar"));
    }

    #[test]
    fn test_config_formats() {
        let config = SitepackConfig::builtin(PathBuf::from("/srv/blog"));

        let human = OutputFormatter::new(OutputFormat::Human)
            .format_config(&config)
            .unwrap();
        assert!(human.contains("Sitepack Configuration:"));

        let json = OutputFormatter::new(OutputFormat::Json)
            .format_config(&config)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["port"], "1313");
        assert_eq!(value["repository"], "ghcr.io/kgb33/blog.kgb33.dev");
    }
}
