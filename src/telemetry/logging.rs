//! Logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the `[log]` section of the config
//! file picks the level and output format (pretty, compact or json).

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// `[log]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// error, warn, info, debug or trace
    pub level: String,
    /// pretty, compact or json
    pub format: String,
    /// Log packet traces from the control protocols
    pub packets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            packets: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter directive for the configured level
    pub fn directive(&self) -> String {
        let level = parse_level(&self.level).as_str().to_lowercase();
        if self.packets {
            // Packet traces are debug events under the protocol modules
            format!("{},pppcp::control=debug,pppcp::auth=debug", level)
        } else {
            level
        }
    }
}

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }

    fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
        match self {
            LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
            LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// Calling it twice is harmless: the second subscriber is dropped.
///
/// ```ignore
/// init_logging(None);
///
/// let config = LogConfig { level: "debug".into(), format: "json".into(), packets: true };
/// init_logging(Some(&config));
/// ```
pub fn init_logging(config: Option<&LogConfig>) {
    let filter = match (std::env::var("RUST_LOG"), config) {
        (Ok(_), _) => EnvFilter::from_default_env(),
        (Err(_), Some(cfg)) => EnvFilter::new(cfg.directive()),
        (Err(_), None) => EnvFilter::new("info"),
    };
    let format = config
        .and_then(|c| LogFormat::from_name(&c.format))
        .unwrap_or(LogFormat::Pretty);

    let subscriber = tracing_subscriber::registry().with(format.layer().with_filter(filter));
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Unknown names fall back to info
pub fn parse_level(level: &str) -> Level {
    level.to_lowercase().parse().unwrap_or(Level::INFO)
}

/// Known output formats
pub fn is_known_format(format: &str) -> bool {
    LogFormat::from_name(format).is_some()
}
