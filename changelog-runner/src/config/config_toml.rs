//! Configuration file for the changelog runner.
//!
//! All default values live exclusively in `config.default.toml`.
//! This module embeds that file at compile-time, parses it once,
//! and lets callers optionally layer their own TOML on top.
//!
//! Sections the runner does not type (like `[org.seedstack.liquibase]`) are kept
//! as a free-form tree and read through [`ConfigTree`].

use super::{
    changeset_config::{ChangesetPlan, CONFIG_PREFIX},
    config_tree::ConfigTree,
    ConnectionString, LogLevel, TargetLevel,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug, fs, path::Path, path::PathBuf, str::FromStr};

/// Embedded copy of the default configuration (single source of truth for defaults)
pub const DEFAULT_CONFIG: &str = include_str!("config.default.toml");

/// Example configuration file
pub const SAMPLE_CONFIG: &str = include_str!("../../config.sample.toml");

/// Error that can occur when reading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigReadError {
    /// The file did not exist or could not be read.
    #[error("config file not found: {0}")]
    ConfigFileNotFound(#[from] std::io::Error),
    /// The TOML was syntactically invalid.
    #[error("config file is not valid TOML: {0}")]
    ConfigFileNotValid(#[from] toml::de::Error),
    /// Failed to merge defaults with overrides.
    #[error("failed to merge embedded and user TOML: {0}")]
    ConfigMergeError(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoggingToml {
    pub level: LogLevel,
    #[serde(default)]
    pub module_levels: Vec<TargetLevel>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_s() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DataSourceToml {
    pub url: ConnectionString,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_s")]
    pub acquire_timeout_s: u64,
}

impl DataSourceToml {
    pub fn new(url: ConnectionString) -> Self {
        Self {
            url,
            max_connections: default_max_connections(),
            acquire_timeout_s: default_acquire_timeout_s(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ResourcesToml {
    /// Directory relative changelog paths are resolved against.
    pub base_dir: PathBuf,
    /// Additional directories searched after `base_dir`.
    pub search_paths: Vec<PathBuf>,
}

/// The overall runner configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigToml {
    /// Log levels. Tracing is left alone when unset.
    pub logging: Option<LoggingToml>,
    /// Where changelogs are looked up on disk.
    pub resources: ResourcesToml,
    /// Named datasources the changesets refer to.
    pub datasources: BTreeMap<String, DataSourceToml>,
    /// Every other section, kept as is.
    #[serde(flatten)]
    pub other: toml::Table,
}

impl Default for ConfigToml {
    fn default() -> Self {
        ConfigToml::from_str(DEFAULT_CONFIG).expect("Embedded config.default.toml must be valid")
    }
}

impl ConfigToml {
    /// Read and parse a configuration file, overlaying it on top of the embedded defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigReadError> {
        let raw = fs::read_to_string(path)?;
        Self::from_str_with_defaults(&raw)
    }

    /// Parse a raw TOML string, overlaying it on top of the embedded defaults.
    pub fn from_str_with_defaults(raw: &str) -> Result<Self, ConfigReadError> {
        let default_val: toml::Value = DEFAULT_CONFIG
            .parse()
            .expect("embedded defaults invalid TOML");
        let user_val: toml::Value = raw.parse()?;
        let merged_val = serde_toml_merge::merge(default_val, user_val)
            .map_err(|e| ConfigReadError::ConfigMergeError(e.to_string()))?;
        Ok(merged_val.try_into()?)
    }

    /// The untyped sections as a dotted path tree.
    pub fn tree(&self) -> ConfigTree {
        ConfigTree::new(self.other.clone())
    }

    /// The changesets configured under `org.seedstack.liquibase`.
    pub fn changeset_plan(&self) -> ChangesetPlan {
        ChangesetPlan::from_tree(&self.tree().subset(CONFIG_PREFIX))
    }

    /// Render the embedded sample config but comment out every value,
    /// producing a handy template for end-users.
    pub fn sample_string() -> String {
        SAMPLE_CONFIG
            .lines()
            .map(|line| {
                let trimmed = line.trim_start();
                let is_comment = trimmed.starts_with('#');
                if !is_comment && !trimmed.is_empty() {
                    format!("# {}", line)
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}

impl FromStr for ConfigToml {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let c = ConfigToml::default();
        assert_eq!(c.logging, None);
        assert_eq!(c.resources.base_dir, PathBuf::from("."));
        assert!(c.resources.search_paths.is_empty());
        assert!(c.datasources.is_empty());
        assert!(c.changeset_plan().is_empty());
    }

    #[test]
    fn test_sample_config_parses() {
        let c = ConfigToml::from_str_with_defaults(SAMPLE_CONFIG).expect("sample must be valid");
        assert_eq!(c.datasources.len(), 2);
        let reporting = &c.datasources["reporting"];
        assert_eq!(reporting.max_connections, 5);
        assert_eq!(reporting.acquire_timeout_s, 30);
        let logging = c.logging.as_ref().expect("sample sets logging");
        assert_eq!(logging.module_levels.len(), 2);

        let plan = c.changeset_plan();
        let names: Vec<_> = plan.iter().map(|cs| cs.name.as_str()).collect();
        assert_eq!(names, vec!["main", "reporting"]);
        assert_eq!(plan.changesets[0].contexts, "prod");
        assert!(!plan.changesets[1].fail_on_error);
    }

    #[test]
    fn test_sample_string_is_all_comments() {
        let sample = ConfigToml::sample_string();
        let parsed: ConfigToml = ConfigToml::from_str_with_defaults(&sample).unwrap();
        assert_eq!(parsed, ConfigToml::default());
    }

    #[test]
    fn test_user_values_override_defaults() {
        let c = ConfigToml::from_str_with_defaults(
            r#"
[resources]
base_dir = "/srv/app"

[datasources.main]
url = "mysql://root@localhost:3306/app"
max_connections = 1
"#,
        )
        .unwrap();
        assert_eq!(c.resources.base_dir, PathBuf::from("/srv/app"));
        assert!(c.resources.search_paths.is_empty());
        assert_eq!(c.datasources["main"].max_connections, 1);
        assert_eq!(c.datasources["main"].url.scheme(), "mysql");
    }

    #[test]
    fn test_invalid_datasource_url() {
        let result = ConfigToml::from_str_with_defaults(
            "[datasources.main]\nurl = \"oracle://localhost/app\"\n",
        );
        assert!(matches!(result, Err(ConfigReadError::ConfigFileNotValid(_))));
    }
}
