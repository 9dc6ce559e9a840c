//! Telemetry module for logging and metrics.
//!
//! Provides:
//! - Logging configuration and initialization
//! - Per-link control-plane counters

mod logging;
mod metrics;

pub use logging::{init_logging, is_known_format, parse_level, LogConfig, LogFormat};
pub use metrics::{Counter, LinkStats};
