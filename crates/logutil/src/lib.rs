//! Utilities for logging.

use std::io;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

/// Output format for the global logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Configure the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_level` when set. Errors if a
/// global subscriber was already installed.
pub fn configure_global_logger(
    default_level: Level,
    format: LogFormat,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let builder = SubscriberBuilder::default()
        .with_env_filter(env_filter(default_level))
        .with_writer(io::stderr);

    match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}

/// Install a subscriber for tests.
///
/// Safe to call from every test, only the first call does anything.
pub fn init_test() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = SubscriberBuilder::default()
            .with_env_filter(env_filter(Level::DEBUG))
            .with_test_writer()
            .try_init();
    });
}

fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string().to_lowercase()))
}
