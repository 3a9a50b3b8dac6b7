//! Structured logging setup for suitey
//!
//! Logging goes through the `tracing` ecosystem and is always written to
//! stderr, so that stdout stays free for plans and reports that other tools
//! may consume.
//!
//! # Example
//!
//! ```no_run
//! use suitey::util::logging;
//!
//! logging::init_logging(logging::LoggingConfig::from_env());
//!
//! tracing::info!(step = "compile", "Launching container");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Noisy dependencies that are clamped to `warn` unless `RUST_LOG` says otherwise
const QUIET_TARGETS: &[&str] = &["bollard", "hyper", "hyper_util", "h2"];

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level for suitey's own targets
    pub level: Level,

    /// Emit one JSON object per line instead of human-readable text
    pub use_json: bool,

    /// Include the module target (e.g. `suitey::executor`)
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    /// Include thread ids and names; useful when several step workers log at once
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    /// Reads `SUITEY_LOG_LEVEL` and `SUITEY_LOG_JSON`
    ///
    /// `RUST_LOG` is still honoured for per-target filtering at init time.
    pub fn from_env() -> Self {
        let level = env::var("SUITEY_LOG_LEVEL")
            .map(|v| parse_level(&v))
            .unwrap_or(Level::INFO);
        let use_json = env::var("SUITEY_LOG_JSON")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);
        Self {
            level,
            use_json,
            ..Default::default()
        }
    }
}

/// Parses a log level from a string, falling back to `INFO`
///
/// ```
/// use suitey::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// assert_eq!(parse_level("chatty"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn directive(spec: &str) -> Option<Directive> {
    spec.parse().ok()
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env();
        if let Some(own) = directive(&format!("suitey={}", config.level)) {
            filter = filter.add_directive(own);
        }

        if env::var("RUST_LOG").is_err() {
            for target in QUIET_TARGETS {
                if let Some(quiet) = directive(&format!("{}=warn", target)) {
                    filter = filter.add_directive(quiet);
                }
            }
        }

        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_thread_names(config.include_thread_ids);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    });
}
