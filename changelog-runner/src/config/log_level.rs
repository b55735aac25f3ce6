//! Log level values of the `[logging]` config section.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::{Directive, LevelFilter};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LevelParseError {
    #[error("invalid log level [{0}], expected one of trace, debug, info, warn, error or off")]
    Level(String),
    #[error("invalid module log level [{0}], expected `<module>=<level>`")]
    Target(String),
}

/// The global log level, for example `info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogLevel(pub LevelFilter);

impl Default for LogLevel {
    fn default() -> Self {
        Self(LevelFilter::INFO)
    }
}

impl FromStr for LogLevel {
    type Err = LevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<LevelFilter>()
            .map(Self)
            .map_err(|_| LevelParseError::Level(s.to_string()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = LevelParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.to_string()
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<LogLevel> for Directive {
    fn from(level: LogLevel) -> Self {
        level.0.into()
    }
}

/// The level of a single module, for example `changelog_engine=debug`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetLevel(pub Directive);

impl FromStr for TargetLevel {
    type Err = LevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LevelParseError::Target(s.to_string());
        let (module, level) = s.trim().split_once('=').ok_or_else(invalid)?;
        if module.trim().is_empty() || level.trim().parse::<LevelFilter>().is_err() {
            return Err(invalid());
        }
        s.trim().parse().map(Self).map_err(|_| invalid())
    }
}

impl TryFrom<String> for TargetLevel {
    type Error = LevelParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetLevel> for String {
    fn from(level: TargetLevel) -> Self {
        level.to_string()
    }
}

impl Display for TargetLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TargetLevel> for Directive {
    fn from(level: TargetLevel) -> Self {
        level.0
    }
}
