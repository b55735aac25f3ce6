//!
//! Applies a single configured changeset to its datasource.
//!
//! One connection per application, one transaction per engine call. The connection
//! is released exactly once on every path: through [Database::close] once the
//! database exists, directly otherwise.
//!

use std::sync::Arc;

use async_trait::async_trait;
use changelog_engine::{
    CompositeResourceAccessor, Connection, Contexts, Database, EngineError, MigrationEngine,
    PendingChangeSet, UpdateReport,
};

use crate::{
    config::ChangesetConfig,
    datasource::{ConnectionError, ConnectionSource},
    error::ApplyError,
};

/// Result of applying one changeset.
#[derive(Debug)]
pub enum MigrationOutcome {
    /// Every pending change set ran and the transaction was committed.
    Applied(UpdateReport),
    /// Nothing of the update is left in the database.
    Failed {
        cause: ApplyError,
        datasource: String,
        changelog: String,
    },
}

impl MigrationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MigrationOutcome::Applied(_))
    }
}

/// One engine call inside the applier's transaction.
#[async_trait]
trait EngineCall: Send + Sync {
    type Output: Send;
    /// Commit the transaction after a successful call, roll back otherwise.
    const COMMIT: bool;

    async fn call(
        &self,
        engine: &dyn MigrationEngine,
        changelog: &str,
        resources: &CompositeResourceAccessor,
        database: &mut Database,
        contexts: &Contexts,
    ) -> Result<Self::Output, EngineError>;
}

struct Update;

#[async_trait]
impl EngineCall for Update {
    type Output = UpdateReport;
    const COMMIT: bool = true;

    async fn call(
        &self,
        engine: &dyn MigrationEngine,
        changelog: &str,
        resources: &CompositeResourceAccessor,
        database: &mut Database,
        contexts: &Contexts,
    ) -> Result<UpdateReport, EngineError> {
        engine.update(changelog, resources, database, contexts).await
    }
}

struct Status;

#[async_trait]
impl EngineCall for Status {
    type Output = Vec<PendingChangeSet>;
    const COMMIT: bool = false;

    async fn call(
        &self,
        engine: &dyn MigrationEngine,
        changelog: &str,
        resources: &CompositeResourceAccessor,
        database: &mut Database,
        contexts: &Contexts,
    ) -> Result<Vec<PendingChangeSet>, EngineError> {
        engine.status(changelog, resources, database, contexts).await
    }
}

/// Drives the migration engine for one [ChangesetConfig] at a time.
#[derive(Clone)]
pub struct ChangelogApplier {
    engine: Arc<dyn MigrationEngine>,
    resources: Arc<CompositeResourceAccessor>,
}

impl std::fmt::Debug for ChangelogApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangelogApplier")
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

async fn release_connection(connection: Box<dyn Connection>, datasource: &str) {
    if let Err(e) = connection.close().await {
        tracing::warn!(
            "Failed to close the connection to the datasource [{}]: {}",
            datasource,
            e
        );
    }
}

impl ChangelogApplier {
    pub fn new(
        engine: Arc<dyn MigrationEngine>,
        resources: Arc<CompositeResourceAccessor>,
    ) -> Self {
        Self { engine, resources }
    }

    pub fn resources(&self) -> &CompositeResourceAccessor {
        &self.resources
    }

    /// Apply the changelog of `config` and commit, or roll everything back.
    pub async fn apply(
        &self,
        config: &ChangesetConfig,
        source: &dyn ConnectionSource,
    ) -> MigrationOutcome {
        tracing::info!(
            "Apply changelog [{}] to the datasource [{}]",
            config.changelog,
            config.datasource
        );
        match self.execute(config, source, Update).await {
            Ok(report) => MigrationOutcome::Applied(report),
            Err(cause) => MigrationOutcome::Failed {
                cause,
                datasource: config.datasource.clone(),
                changelog: config.changelog.clone(),
            },
        }
    }

    /// The change sets [ChangelogApplier::apply] would run. The transaction is always
    /// rolled back.
    pub async fn pending(
        &self,
        config: &ChangesetConfig,
        source: &dyn ConnectionSource,
    ) -> Result<Vec<PendingChangeSet>, ApplyError> {
        self.execute(config, source, Status).await
    }

    async fn execute<C: EngineCall>(
        &self,
        config: &ChangesetConfig,
        source: &dyn ConnectionSource,
        call: C,
    ) -> Result<C::Output, ApplyError> {
        let mut connection = source.get(&config.datasource).await?;

        if let Err(e) = connection.begin().await {
            release_connection(connection, &config.datasource).await;
            return Err(ConnectionError::Transaction {
                name: config.datasource.clone(),
                source: e,
            }
            .into());
        }

        let mut database = match Database::new(connection) {
            Ok(database) => database,
            Err(e) => {
                let (error, connection) = e.into_parts();
                release_connection(connection, &config.datasource).await;
                return Err(error.into());
            }
        };

        let result = self.run(config, &call, &mut database).await;

        if let Err(e) = database.close().await {
            tracing::warn!(
                "Failed to close the connection to the datasource [{}]: {}",
                config.datasource,
                e
            );
        }
        result
    }

    /// Run the engine and end the transaction. Never closes the database.
    async fn run<C: EngineCall>(
        &self,
        config: &ChangesetConfig,
        call: &C,
        database: &mut Database,
    ) -> Result<C::Output, ApplyError> {
        let contexts = Contexts::parse(&config.contexts);
        let result = call
            .call(
                self.engine.as_ref(),
                &config.changelog,
                &self.resources,
                database,
                &contexts,
            )
            .await;

        match result {
            Ok(output) if C::COMMIT => {
                database.commit().await?;
                Ok(output)
            }
            Ok(output) => {
                if let Err(e) = database.rollback().await {
                    tracing::warn!(
                        "Failed to roll back the status check on the datasource [{}]: {}",
                        config.datasource,
                        e
                    );
                }
                Ok(output)
            }
            Err(error) => {
                if let Err(e) = database.rollback().await {
                    tracing::warn!(
                        "Failed to roll back changes of [{}] on the datasource [{}]: {}",
                        config.changelog,
                        config.datasource,
                        e
                    );
                }
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        changeset, count_rows, resources, table_exists, CountingSource, SqliteFile,
        BROKEN_CHANGELOG, DEPT_CHANGELOG,
    };
    use changelog_engine::ChangelogEngine;

    fn applier(files: &[(&str, &'static str)]) -> ChangelogApplier {
        ChangelogApplier::new(Arc::new(ChangelogEngine::new()), Arc::new(resources(files)))
    }

    #[tokio::test]
    async fn test_apply_commits_and_closes_once() {
        let db = SqliteFile::new();
        let source = CountingSource::new().with("ds1", db.url());
        let applier = applier(&[("db/dept.yaml", DEPT_CHANGELOG)]);

        let outcome = applier
            .apply(&changeset("dept", "ds1", "db/dept.yaml"), &source)
            .await;
        let MigrationOutcome::Applied(report) = outcome else {
            panic!("expected Applied, got {:?}", outcome);
        };
        assert_eq!(report.executed.len(), 1);
        assert_eq!(source.closes(), 1);
        assert_eq!(source.gets(), 1);
        assert_eq!(count_rows(&db.url(), "DEPARTMENT").await, 0);
    }

    #[tokio::test]
    async fn test_second_apply_runs_nothing() {
        let db = SqliteFile::new();
        let source = CountingSource::new().with("ds1", db.url());
        let applier = applier(&[("db/dept.yaml", DEPT_CHANGELOG)]);
        let config = changeset("dept", "ds1", "db/dept.yaml");

        assert!(applier.apply(&config, &source).await.is_applied());
        let MigrationOutcome::Applied(report) = applier.apply(&config, &source).await else {
            panic!("second apply must succeed");
        };
        assert!(report.is_up_to_date());
        assert_eq!(report.statements, 0);
        assert_eq!(source.closes(), 2);
    }

    #[tokio::test]
    async fn test_unknown_datasource_fails_without_connection() {
        let source = CountingSource::new();
        let applier = applier(&[]);
        let outcome = applier
            .apply(&changeset("dept", "missing", "db/dept.yaml"), &source)
            .await;
        match outcome {
            MigrationOutcome::Failed {
                cause: ApplyError::ConnectionResolution(ConnectionError::UnknownDataSource(name)),
                datasource,
                changelog,
            } => {
                assert_eq!(name, "missing");
                assert_eq!(datasource, "missing");
                assert_eq!(changelog, "db/dept.yaml");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(source.closes(), 0);
    }

    #[tokio::test]
    async fn test_missing_changelog_is_a_resource_failure() {
        let db = SqliteFile::new();
        let source = CountingSource::new().with("ds1", db.url());
        let applier = applier(&[]);
        let outcome = applier
            .apply(&changeset("dept", "ds1", "db/missing.yaml"), &source)
            .await;
        assert!(matches!(
            outcome,
            MigrationOutcome::Failed {
                cause: ApplyError::ResourceLoad(_),
                ..
            }
        ));
        assert_eq!(source.closes(), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_rolls_back() {
        let db = SqliteFile::new();
        let source = CountingSource::new().with("ds1", db.url());
        let applier = applier(&[("db/broken.sql", BROKEN_CHANGELOG)]);
        let outcome = applier
            .apply(&changeset("broken", "ds1", "db/broken.sql"), &source)
            .await;
        assert!(matches!(
            outcome,
            MigrationOutcome::Failed {
                cause: ApplyError::MigrationExecution(_),
                ..
            }
        ));
        assert_eq!(source.closes(), 1);

        assert!(
            !table_exists(&db.url(), "PARTIAL").await,
            "the partial table must be rolled back"
        );
    }

    #[tokio::test]
    async fn test_unsupported_backend_closes_raw_connection() {
        let db = SqliteFile::new();
        let source = CountingSource::new()
            .with("ds1", db.url())
            .with_backend_name("Oracle");
        let applier = applier(&[("db/dept.yaml", DEPT_CHANGELOG)]);
        let outcome = applier
            .apply(&changeset("dept", "ds1", "db/dept.yaml"), &source)
            .await;
        assert!(matches!(
            outcome,
            MigrationOutcome::Failed {
                cause: ApplyError::MigrationExecution(changelog_engine::EngineError::UnsupportedDatabase(_)),
                ..
            }
        ));
        assert_eq!(source.closes(), 1);
    }

    #[tokio::test]
    async fn test_begin_failure_closes_raw_connection() {
        let db = SqliteFile::new();
        let source = CountingSource::new()
            .with("ds1", db.url())
            .failing_begin();
        let applier = applier(&[("db/dept.yaml", DEPT_CHANGELOG)]);
        let outcome = applier
            .apply(&changeset("dept", "ds1", "db/dept.yaml"), &source)
            .await;
        assert!(matches!(
            outcome,
            MigrationOutcome::Failed {
                cause: ApplyError::ConnectionResolution(ConnectionError::Transaction { .. }),
                ..
            }
        ));
        assert_eq!(source.closes(), 1);
    }

    #[tokio::test]
    async fn test_pending_never_changes_the_database() {
        let db = SqliteFile::new();
        let source = CountingSource::new().with("ds1", db.url());
        let applier = applier(&[("db/dept.yaml", DEPT_CHANGELOG)]);
        let config = changeset("dept", "ds1", "db/dept.yaml");

        let pending = applier.pending(&config, &source).await.unwrap();
        assert_eq!(pending.len(), 1);
        // Still pending: nothing was committed by the status check.
        assert_eq!(applier.pending(&config, &source).await.unwrap().len(), 1);
        assert_eq!(source.closes(), 2);

        assert!(applier.apply(&config, &source).await.is_applied());
        assert!(applier.pending(&config, &source).await.unwrap().is_empty());
    }
}
