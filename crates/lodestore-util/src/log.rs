//! Logging setup using tracing.
//!
//! Binaries call [`init`] once at startup. Library crates only emit events.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events are filtered by the configured level.
const CRATES: &[&str] = &["lodestore", "lodestore_storage", "lodestore_util"];

/// Parse a level name, also accepting `warning`.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "warning" => Some(Level::WARN),
        other => Level::from_str(other).ok(),
    }
}

/// How the CLI wants its events reported.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Write events to stderr. Without it nothing is printed.
    pub print: bool,
    pub level: Level,
    /// Add source file and line to each event.
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            print: false,
            level: Level::WARN,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Config used by `--verbose`.
    pub fn verbose() -> Self {
        Self {
            print: true,
            level: Level::DEBUG,
            ..Self::default()
        }
    }

    /// `EnvFilter` directives applying `level` to every lodestore crate.
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        CRATES
            .iter()
            .map(|krate| format!("{krate}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Later calls are
/// ignored.
pub fn init(config: LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.print {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
    } else {
        registry.try_init()
    };

    if let Err(e) = installed {
        tracing::debug!(error = %e, "Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" INFO "), Some(Level::INFO));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_default_is_quiet() {
        let config = LogConfig::default();
        assert!(!config.print);
        assert_eq!(config.level, Level::WARN);
    }

    #[test]
    fn test_filter_directive_covers_all_crates() {
        let directive = LogConfig::verbose().filter_directive();
        assert_eq!(
            directive,
            "lodestore=debug,lodestore_storage=debug,lodestore_util=debug"
        );
    }
}
