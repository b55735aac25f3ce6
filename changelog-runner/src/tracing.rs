//!
//! Module to initialize tracing logs.
//!
//! Logs are initialized from the `[logging]` section of the config file, unless
//! `RUST_LOG` is set. This way config file errors can still be logged when the
//! config file can't be read, with the default level.
//!

use crate::ConfigToml;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor `[logging]` say otherwise.
pub const DEFAULT_ENV_FILTER: &str = "changelog_runner=info,changelog_engine=info";

/// Initialize tracing logger based on the values defined in the config file.
pub fn init_tracing_logs_with_config_if_set(config: &ConfigToml) -> anyhow::Result<()> {
    let config = match &config.logging {
        Some(config) => config,
        None => return Ok(()),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new("");
        filter = filter.add_directive(config.level.to_owned().into());
        for filter_str in &config.module_levels {
            filter = filter.add_directive(filter_str.to_owned().into());
        }
        filter
    });
    init_with_filter(env_filter)
}

/// Initialize tracing logger with an explicit [EnvFilter] directive string.
pub fn init_tracing_logs_with_filter(filter: &str) -> anyhow::Result<()> {
    init_with_filter(EnvFilter::try_new(filter)?)
}

/// Initialize tracing logger from the config file at `path`.
/// If the file can't be read, or sets no `[logging]`, `RUST_LOG` or the default filter is used.
pub fn init_tracing_logs_if_set(path: Option<&Path>) -> anyhow::Result<()> {
    let config = match path.map(ConfigToml::from_file) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            eprintln!("Failed to read config from file: {}", e);
            ConfigToml::default()
        }
        None => ConfigToml::default(),
    };
    if config.logging.is_some() {
        return init_tracing_logs_with_config_if_set(&config);
    }
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_ENV_FILTER));
    init_with_filter(env_filter)
}

fn init_with_filter(env_filter: EnvFilter) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
    Ok(())
}
