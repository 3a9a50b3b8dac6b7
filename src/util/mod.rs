//! Utility modules for suitey
//!
//! - Structured logging setup
//! - The flat `key=value` format used at external boundaries

pub mod kv;
pub mod logging;

pub use logging::{init_logging, parse_level, LoggingConfig};
