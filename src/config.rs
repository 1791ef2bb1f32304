//! Configuration management for sitepack
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `SITEPACK_*` environment variables. CLI flags are applied last by the
//! command handlers.
//!
//! # Environment Variables
//!
//! - `SITEPACK_BUILD_IMAGE`: build runtime image - default: "oven/bun:1"
//! - `SITEPACK_SERVER_IMAGE`: web server image - default: "caddy"
//! - `SITEPACK_PORT`: port exposed by the packaged image - default: "1313"
//! - `SITEPACK_REGISTRY`: registry host - default: "ghcr.io"
//! - `SITEPACK_REGISTRY_USER`: registry user - default: "KGB33"
//! - `SITEPACK_REPOSITORY`: target repository - default: "ghcr.io/kgb33/blog.kgb33.dev"
//! - `SITEPACK_TAG`: tag pushed on publish - default: "latest"
//! - `SITEPACK_CACHE_STRATEGY`: dependency cache naming (content|fixed) - default: "content"
//! - `SITEPACK_REUSE_ENV`: reuse an existing build environment image (true|false) - default: "true"
//! - `SITEPACK_ENGINE_TIMEOUT`: container engine request timeout in seconds - default: "600"
//! - `SITEPACK_LOG_LEVEL`: logging level - default: "info"
//!
//! The registry token is deliberately not part of this struct; see
//! [`crate::secret::RegistryCredential`].
//!
//! # Example
//!
//! ```no_run
//! use sitepack::SitepackConfig;
//! use std::path::Path;
//!
//! let config = SitepackConfig::load(Path::new("."), None).expect("config");
//! config.validate().expect("Invalid configuration");
//! println!("{}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_BUILD_IMAGE: &str = "oven/bun:1";
pub const DEFAULT_SERVER_IMAGE: &str = "caddy";
pub const DEFAULT_PORT: u16 = 1313;
pub const DEFAULT_REGISTRY: &str = "ghcr.io";
pub const DEFAULT_REGISTRY_USER: &str = "KGB33";
pub const DEFAULT_REPOSITORY: &str = "ghcr.io/kgb33/blog.kgb33.dev";
pub const DEFAULT_TAG: &str = "latest";
pub const DEFAULT_SOURCE_LABEL: &str = "https://github.com/kgb33/blog.kgb33.dev";
pub const DEFAULT_MANIFEST: &str = "package.json";
pub const DEFAULT_LOCKFILE: &str = "bun.lock";
pub const DEFAULT_CADDYFILE: &str = "Caddyfile";
pub const CONFIG_FILE_NAME: &str = "sitepack.toml";

/// Paths copied into the build context; everything else in the project is ignored.
pub const DEFAULT_INCLUDE: &[&str] = &["src/", "public/", "astro.config.mjs", "tsconfig.json"];

const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Explicitly requested config file does not exist
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    /// Config file could not be read
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    /// Failed to parse an environment value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// How the dependency cache volume is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// One volume per lockfile content hash.
    Content,
    /// A single shared volume named `bun`.
    Fixed,
}

impl CacheStrategy {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_lowercase().as_str() {
            "content" => Ok(CacheStrategy::Content),
            "fixed" => Ok(CacheStrategy::Fixed),
            other => Err(ConfigError::ParseError {
                field: "SITEPACK_CACHE_STRATEGY".to_string(),
                error: format!("unknown strategy '{}', expected content or fixed", other),
            }),
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStrategy::Content => write!(f, "content"),
            CacheStrategy::Fixed => write!(f, "fixed"),
        }
    }
}

/// Optional overrides read from `sitepack.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub manifest: Option<PathBuf>,
    pub lockfile: Option<PathBuf>,
    pub caddyfile: Option<PathBuf>,
    pub include: Option<Vec<String>>,
    pub build_image: Option<String>,
    pub server_image: Option<String>,
    pub port: Option<u16>,
    pub registry: Option<String>,
    pub registry_user: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub source_label: Option<String>,
    pub cache_strategy: Option<CacheStrategy>,
    pub reuse_environment: Option<bool>,
    pub engine_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

/// Main configuration structure for sitepack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SitepackConfig {
    /// Project root; relative input paths resolve against it
    pub project_dir: PathBuf,

    /// Package manifest, relative to `project_dir`
    pub manifest: PathBuf,

    /// Lockfile, relative to `project_dir`
    pub lockfile: PathBuf,

    /// Web server configuration file, relative to `project_dir`
    pub caddyfile: PathBuf,

    /// Allow-list of project paths copied into the build
    pub include: Vec<String>,

    /// Base image for dependency install and build
    pub build_image: String,

    /// Base image for the packaged site
    pub server_image: String,

    /// Single port exposed by the packaged image
    pub port: u16,

    /// Registry host used for authentication
    pub registry: String,

    /// Registry user name
    pub registry_user: String,

    /// Repository the packaged image is pushed to
    pub repository: String,

    /// Tag pushed on publish
    pub tag: String,

    /// Value of the `org.opencontainers.image.source` label
    pub source_label: String,

    /// Dependency cache volume naming
    pub cache_strategy: CacheStrategy,

    /// Skip the install when an environment image for the same inputs exists
    pub reuse_environment: bool,

    /// Container engine request timeout in seconds
    pub engine_timeout_secs: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SitepackConfig {
    /// Built-in defaults layered with `SITEPACK_*` environment variables.
    ///
    /// Unparseable environment values fall back to the built-in default;
    /// use [`SitepackConfig::load`] to surface them as errors instead.
    fn default() -> Self {
        let builtin = Self::builtin(PathBuf::from("."));
        let mut config = builtin.clone();
        match config.apply_env(|key| env::var(key).ok()) {
            Ok(()) => config,
            Err(_) => builtin,
        }
    }
}

impl SitepackConfig {
    /// Built-in defaults with no file or environment applied.
    pub fn builtin(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            lockfile: PathBuf::from(DEFAULT_LOCKFILE),
            caddyfile: PathBuf::from(DEFAULT_CADDYFILE),
            include: DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect(),
            build_image: DEFAULT_BUILD_IMAGE.to_string(),
            server_image: DEFAULT_SERVER_IMAGE.to_string(),
            port: DEFAULT_PORT,
            registry: DEFAULT_REGISTRY.to_string(),
            registry_user: DEFAULT_REGISTRY_USER.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
            tag: DEFAULT_TAG.to_string(),
            source_label: DEFAULT_SOURCE_LABEL.to_string(),
            cache_strategy: CacheStrategy::Content,
            reuse_environment: true,
            engine_timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    /// Loads configuration for a project.
    ///
    /// `config_file` must exist when given. Without it, `sitepack.toml` in
    /// `project_dir` is used if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable or invalid,
    /// or if an environment value cannot be parsed.
    pub fn load(project_dir: &Path, config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::builtin(project_dir.to_path_buf());

        let file_path = match config_file {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path.into())),
            Some(path) => Some(path.to_path_buf()),
            None => {
                let implicit = project_dir.join(CONFIG_FILE_NAME);
                implicit.is_file().then_some(implicit)
            }
        };

        if let Some(path) = file_path {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                path: path.clone(),
                error: e.to_string(),
            })?;
            let file: FileConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                error: e.to_string(),
            })?;
            config.apply_file(file);
        }

        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Overlays values present in a parsed config file.
    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.manifest {
            self.manifest = v;
        }
        if let Some(v) = file.lockfile {
            self.lockfile = v;
        }
        if let Some(v) = file.caddyfile {
            self.caddyfile = v;
        }
        if let Some(v) = file.include {
            self.include = v;
        }
        if let Some(v) = file.build_image {
            self.build_image = v;
        }
        if let Some(v) = file.server_image {
            self.server_image = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
        if let Some(v) = file.registry {
            self.registry = v;
        }
        if let Some(v) = file.registry_user {
            self.registry_user = v;
        }
        if let Some(v) = file.repository {
            self.repository = v;
        }
        if let Some(v) = file.tag {
            self.tag = v;
        }
        if let Some(v) = file.source_label {
            self.source_label = v;
        }
        if let Some(v) = file.cache_strategy {
            self.cache_strategy = v;
        }
        if let Some(v) = file.reuse_environment {
            self.reuse_environment = v;
        }
        if let Some(v) = file.engine_timeout_secs {
            self.engine_timeout_secs = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v.to_lowercase();
        }
    }

    /// Overlays `SITEPACK_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SITEPACK_BUILD_IMAGE") {
            self.build_image = v;
        }
        if let Some(v) = lookup("SITEPACK_SERVER_IMAGE") {
            self.server_image = v;
        }
        if let Some(v) = lookup("SITEPACK_PORT") {
            self.port = parse_field("SITEPACK_PORT", &v)?;
        }
        if let Some(v) = lookup("SITEPACK_REGISTRY") {
            self.registry = v;
        }
        if let Some(v) = lookup("SITEPACK_REGISTRY_USER") {
            self.registry_user = v;
        }
        if let Some(v) = lookup("SITEPACK_REPOSITORY") {
            self.repository = v;
        }
        if let Some(v) = lookup("SITEPACK_TAG") {
            self.tag = v;
        }
        if let Some(v) = lookup("SITEPACK_CACHE_STRATEGY") {
            self.cache_strategy = CacheStrategy::parse(&v)?;
        }
        if let Some(v) = lookup("SITEPACK_REUSE_ENV") {
            self.reuse_environment = parse_field("SITEPACK_REUSE_ENV", &v)?;
        }
        if let Some(v) = lookup("SITEPACK_ENGINE_TIMEOUT") {
            self.engine_timeout_secs = parse_field("SITEPACK_ENGINE_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("SITEPACK_LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        Ok(())
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "Port must be non-zero".to_string(),
            ));
        }

        if self.engine_timeout_secs == 0 || self.engine_timeout_secs > 3600 {
            return Err(ConfigError::ValidationFailed(
                "Engine timeout must be between 1 second and 1 hour".to_string(),
            ));
        }

        for (field, value) in [
            ("build_image", &self.build_image),
            ("server_image", &self.server_image),
            ("registry", &self.registry),
            ("registry_user", &self.registry_user),
            ("repository", &self.repository),
            ("tag", &self.tag),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }

        if !self.repository.starts_with(&format!("{}/", self.registry)) {
            return Err(ConfigError::ValidationFailed(format!(
                "Repository {} is not hosted on registry {}",
                self.repository, self.registry
            )));
        }

        if self.include.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Source allow-list must name at least one path".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.project_dir.join(&self.manifest)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.project_dir.join(&self.lockfile)
    }

    pub fn caddyfile_path(&self) -> PathBuf {
        self.project_dir.join(&self.caddyfile)
    }

    /// Converts configuration to a display map for output formatting
    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        map.insert(
            "project_dir".to_string(),
            self.project_dir.display().to_string(),
        );
        map.insert("manifest".to_string(), self.manifest.display().to_string());
        map.insert("lockfile".to_string(), self.lockfile.display().to_string());
        map.insert("caddyfile".to_string(), self.caddyfile.display().to_string());
        map.insert("include".to_string(), self.include.join(","));
        map.insert("build_image".to_string(), self.build_image.clone());
        map.insert("server_image".to_string(), self.server_image.clone());
        map.insert("port".to_string(), self.port.to_string());
        map.insert("registry".to_string(), self.registry.clone());
        map.insert("registry_user".to_string(), self.registry_user.clone());
        map.insert("repository".to_string(), self.repository.clone());
        map.insert("tag".to_string(), self.tag.clone());
        map.insert("cache_strategy".to_string(), self.cache_strategy.to_string());
        map.insert(
            "reuse_environment".to_string(),
            self.reuse_environment.to_string(),
        );
        map.insert(
            "engine_timeout_secs".to_string(),
            self.engine_timeout_secs.to_string(),
        );
        map.insert("log_level".to_string(), self.log_level.clone());

        map
    }
}

fn parse_field<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
        field: field.to_string(),
        error: e.to_string(),
    })
}

impl fmt::Display for SitepackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sitepack Configuration:")?;
        writeln!(f, "  Project: {}", self.project_dir.display())?;
        writeln!(f, "  Manifest: {}", self.manifest.display())?;
        writeln!(f, "  Lockfile: {}", self.lockfile.display())?;
        writeln!(f, "  Caddyfile: {}", self.caddyfile.display())?;
        writeln!(f, "  Include: {}", self.include.join(", "))?;
        writeln!(f, "  Build Image: {}", self.build_image)?;
        writeln!(f, "  Server Image: {}", self.server_image)?;
        writeln!(f, "  Port: {}", self.port)?;
        writeln!(f, "  Registry: {} (user {})", self.registry, self.registry_user)?;
        writeln!(f, "  Repository: {}:{}", self.repository, self.tag)?;
        writeln!(f, "  Cache Strategy: {}", self.cache_strategy)?;
        writeln!(f, "  Reuse Environment: {}", self.reuse_environment)?;
        writeln!(f, "  Engine Timeout: {}s", self.engine_timeout_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_builtin_defaults() {
        let config = SitepackConfig::builtin(PathBuf::from("/site"));

        assert_eq!(config.build_image, "oven/bun:1");
        assert_eq!(config.server_image, "caddy");
        assert_eq!(config.port, 1313);
        assert_eq!(config.registry, "ghcr.io");
        assert_eq!(config.registry_user, "KGB33");
        assert_eq!(config.repository, "ghcr.io/kgb33/blog.kgb33.dev");
        assert_eq!(config.cache_strategy, CacheStrategy::Content);
        assert_eq!(config.manifest_path(), PathBuf::from("/site/package.json"));
        assert_eq!(config.lockfile_path(), PathBuf::from("/site/bun.lock"));
        assert_eq!(config.caddyfile_path(), PathBuf::from("/site/Caddyfile"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_variable_parsing() {
        let mut config = SitepackConfig::builtin(PathBuf::from("."));
        config
            .apply_env(lookup(&[
                ("SITEPACK_PORT", "8080"),
                ("SITEPACK_CACHE_STRATEGY", "FIXED"),
                ("SITEPACK_REUSE_ENV", "false"),
                ("SITEPACK_ENGINE_TIMEOUT", "30"),
                ("SITEPACK_LOG_LEVEL", "DEBUG"),
                ("SITEPACK_TAG", "v2"),
            ]))
            .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.cache_strategy, CacheStrategy::Fixed);
        assert!(!config.reuse_environment);
        assert_eq!(config.engine_timeout_secs, 30);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.tag, "v2");
    }

    #[test]
    fn test_invalid_environment_value() {
        let mut config = SitepackConfig::builtin(PathBuf::from("."));
        let result = config.apply_env(lookup(&[("SITEPACK_PORT", "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));

        let result = config.apply_env(lookup(&[("SITEPACK_CACHE_STRATEGY", "lru")]));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    #[serial]
    fn test_default_reads_process_environment() {
        let _guards = vec![
            EnvGuard::set("SITEPACK_SERVER_IMAGE", "caddy:2-alpine"),
            EnvGuard::set("SITEPACK_LOG_LEVEL", "warn"),
        ];

        let config = SitepackConfig::default();
        assert_eq!(config.server_image, "caddy:2-alpine");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    #[serial]
    fn test_load_reads_implicit_config_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
lockfile = "bun.lockb"
include = ["src/", "content/"]
cache_strategy = "fixed"
port = 8080
"#,
        )
        .unwrap();

        let config = SitepackConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.lockfile, PathBuf::from("bun.lockb"));
        assert_eq!(config.include, vec!["src/", "content/"]);
        assert_eq!(config.cache_strategy, CacheStrategy::Fixed);
        assert_eq!(config.port, 8080);
    }

    #[test]
    #[serial]
    fn test_load_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "registry_token = \"nope\"\n").unwrap();

        let result = SitepackConfig::load(dir.path(), Some(&path));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let result = SitepackConfig::load(dir.path(), Some(&missing));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_configuration_validation_invalid_port() {
        let mut config = SitepackConfig::builtin(PathBuf::from("."));
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configuration_validation_repository_outside_registry() {
        let mut config = SitepackConfig::builtin(PathBuf::from("."));
        config.repository = "docker.io/kgb33/blog".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configuration_validation_invalid_log_level() {
        let mut config = SitepackConfig::builtin(PathBuf::from("."));
        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_display() {
        let config = SitepackConfig::builtin(PathBuf::from("."));
        let display = format!("{}", config);
        assert!(display.contains("Sitepack Configuration:"));
        assert!(display.contains("ghcr.io/kgb33/blog.kgb33.dev:latest"));
        assert!(display.contains("Port: 1313"));
    }
}
