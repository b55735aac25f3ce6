//!
//! Failures of a changeset application and the fatal startup error.
//!

use std::fmt::Display;

use changelog_engine::EngineError;

use crate::datasource::ConnectionError;

/// Why a single changeset could not be applied.
///
/// The orchestrator treats every kind the same way, only `failOnError` decides
/// whether a failure is fatal.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// The datasource is unknown or no connection could be opened.
    #[error(transparent)]
    ConnectionResolution(#[from] ConnectionError),
    /// The changelog, or a file it includes, could not be found or read.
    #[error("failed to load changelog: {0}")]
    ResourceLoad(#[source] EngineError),
    /// The engine rejected or failed to apply the changelog.
    #[error("failed to apply changelog: {0}")]
    MigrationExecution(#[source] EngineError),
}

impl From<EngineError> for ApplyError {
    fn from(error: EngineError) -> Self {
        if error.is_resource_error() {
            ApplyError::ResourceLoad(error)
        } else {
            ApplyError::MigrationExecution(error)
        }
    }
}

impl From<sqlx::Error> for ApplyError {
    fn from(error: sqlx::Error) -> Self {
        ApplyError::MigrationExecution(EngineError::Database(error))
    }
}

/// Classification codes of fatal startup errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A changeset with `failOnError = true` could not be applied.
    ApplyChanges,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ApplyChanges => "ERROR_APPLY_CHANGES",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fatal error aborting startup. Carries the changelog and datasource as context.
#[derive(Debug, thiserror::Error)]
#[error("[{code}] changes of changeset [{changeset}] could not be applied (changelog: {changelog}, datasource: {datasource}): {source}")]
pub struct ChangelogError {
    pub code: ErrorCode,
    pub changeset: String,
    pub changelog: String,
    pub datasource: String,
    #[source]
    pub source: ApplyError,
}

impl ChangelogError {
    pub fn apply_changes(
        changeset: impl Into<String>,
        changelog: impl Into<String>,
        datasource: impl Into<String>,
        source: ApplyError,
    ) -> Self {
        Self {
            code: ErrorCode::ApplyChanges,
            changeset: changeset.into(),
            changelog: changelog.into(),
            datasource: datasource.into(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Context fields attached to the error, in display order.
    pub fn context(&self) -> [(&'static str, &str); 2] {
        [
            ("changelog", self.changelog.as_str()),
            ("datasource", self.datasource.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_are_classified() {
        let missing = EngineError::ResourceNotFound {
            path: "db/a.yaml".to_string(),
            searched: "filesystem".to_string(),
        };
        assert!(matches!(ApplyError::from(missing), ApplyError::ResourceLoad(_)));

        let parse = EngineError::Parse {
            path: "db/a.yaml".to_string(),
            message: "bad".to_string(),
        };
        assert!(matches!(
            ApplyError::from(parse),
            ApplyError::MigrationExecution(_)
        ));

        let unsupported = EngineError::UnsupportedDatabase("Oracle".to_string());
        assert!(matches!(
            ApplyError::from(unsupported),
            ApplyError::MigrationExecution(_)
        ));
    }

    #[test]
    fn test_changelog_error_context() {
        let error = ChangelogError::apply_changes(
            "dept",
            "db/dept.yaml",
            "ds1",
            ApplyError::ConnectionResolution(ConnectionError::UnknownDataSource("ds1".to_string())),
        );
        assert_eq!(error.code(), ErrorCode::ApplyChanges);
        assert_eq!(error.code().to_string(), "ERROR_APPLY_CHANGES");
        assert_eq!(
            error.context(),
            [("changelog", "db/dept.yaml"), ("datasource", "ds1")]
        );
        let message = error.to_string();
        assert!(message.starts_with("[ERROR_APPLY_CHANGES]"));
        assert!(message.contains("unknown datasource [ds1]"));
    }
}
