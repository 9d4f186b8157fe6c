use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::LoggingConfig;

/// Filter from `RUST_LOG` when it is set, otherwise from the configured level.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Install the global subscriber: JSON lines for production, pretty output for development.
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter = build_env_filter(level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
            .wrap_err("Failed to install JSON tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install console tracing subscriber")?;
    }

    tracing::info!(level, json = json_format, "lectern logging initialized");
    Ok(())
}

pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    init_tracing_with_config(&config.level, config.json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_directives() {
        assert!(build_env_filter("info,lectern=debug").is_ok());
    }

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init_tracing_with_config("debug", true);
        assert!(init_tracing_with_config("debug", false).is_err());
    }
}
