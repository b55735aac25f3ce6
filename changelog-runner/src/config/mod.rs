//!
//! Configuration of the changelog runner.
//!
mod changeset_config;
mod config_toml;
mod config_tree;
mod connection_string;
mod log_level;

pub use changeset_config::{ChangesetConfig, ChangesetPlan, CHANGESETS_KEY, CONFIG_PREFIX};
pub use config_toml::{
    ConfigReadError, ConfigToml, DataSourceToml, LoggingToml, ResourcesToml, DEFAULT_CONFIG,
    SAMPLE_CONFIG,
};
pub use config_tree::ConfigTree;
pub use connection_string::{ConnectionString, ConnectionStringError};
pub use log_level::{LevelParseError, LogLevel, TargetLevel};
