use propwise_core::config::{LogFormat, LoggingConfig};
use tracing::Level;

/// Install the global subscriber. Logs go to stderr so stdout stays a clean JSON payload.
///
/// A second call is a no-op, which keeps repeated in-process command runs (tests) safe.
pub fn init_logging(config: &LoggingConfig) {
    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
