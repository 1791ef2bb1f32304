//! Structured logging setup for sitepack
//!
//! Logs always go to stderr so that command results printed on stdout can be
//! piped. Console output is the default; JSON output is available for CI.
//!
//! # Example
//!
//! ```no_run
//! use sitepack::util::logging;
//!
//! // Initialize from SITEPACK_LOG_LEVEL / SITEPACK_LOG_JSON
//! logging::init_from_env();
//!
//! use tracing::{info, warn};
//! info!("Application started");
//! warn!(volume = "bun", "Cache volume is shared");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

pub const LOG_LEVEL_ENV: &str = "SITEPACK_LOG_LEVEL";
pub const LOG_JSON_ENV: &str = "SITEPACK_LOG_JSON";

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level for sitepack's own events
    pub level: Level,

    /// Use JSON output format
    pub use_json: bool,

    /// Include the module target (e.g., sitepack::pipeline) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with targets and source locations, for CI logs.
    pub fn ci() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
        }
    }
}

/// Parses a log level from a string, case-insensitively.
///
/// Returns `None` for anything that is not a tracing level name.
///
/// ```
/// use sitepack::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Some(Level::DEBUG));
/// assert_eq!(parse_level("loud"), None);
/// ```
pub fn parse_level(level_str: &str) -> Option<Level> {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("sitepack={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    // Engine client internals are noisy at debug.
    if env::var("RUST_LOG").is_err() {
        for quiet in ["bollard=warn", "hyper=warn", "hyper_util=warn", "h2=warn"] {
            if let Ok(directive) = quiet.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Initializes the logging system. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(atty::is(atty::Stream::Stderr))
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

/// Reads `SITEPACK_LOG_LEVEL` and `SITEPACK_LOG_JSON`.
///
/// An unknown level falls back to INFO with a note on stderr; logging is
/// not up yet at that point.
pub fn config_from_env() -> LoggingConfig {
    let level = match env::var(LOG_LEVEL_ENV) {
        Ok(value) => parse_level(&value).unwrap_or_else(|| {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                value
            );
            Level::INFO
        }),
        Err(_) => Level::INFO,
    };

    let use_json = env::var(LOG_JSON_ENV)
        .map(|v| parse_bool(&v))
        .unwrap_or(false);

    LoggingConfig {
        level,
        use_json,
        ..Default::default()
    }
}

pub fn init_from_env() {
    init_logging(config_from_env());
}
