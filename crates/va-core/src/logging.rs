//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `level` when set. Fails if a global subscriber is
/// already installed or the filter does not parse.
pub fn init_tracing(
    level: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}

/// [`init_tracing`] with the level and format from `settings`.
pub fn init_from_settings(
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(&settings.log_level, settings.json_logs)
}
