use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    changelog::{ChangeLog, ChangeSet, ChangeSetId},
    contexts::Contexts,
    database::Database,
    error::EngineError,
    history::{History, RanChangeSet},
    resource::CompositeResourceAccessor,
};

/// Why a change set is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingReason {
    /// Never ran before.
    New,
    /// Ran before, but its content changed and it is marked `runOnChange`.
    Changed,
    /// Ran before and is marked `runAlways`.
    RunAlways,
}

impl std::fmt::Display for PendingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingReason::New => write!(f, "new"),
            PendingReason::Changed => write!(f, "changed"),
            PendingReason::RunAlways => write!(f, "run always"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingChangeSet {
    pub id: ChangeSetId,
    pub reason: PendingReason,
    pub description: String,
}

/// What an update did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// Path of the root changelog.
    pub changelog: String,
    /// Id stored with every change set recorded by this update.
    pub deployment_id: String,
    /// Change sets that ran for the first time.
    pub executed: Vec<ChangeSetId>,
    /// Change sets that ran again because of `runAlways` or `runOnChange`.
    pub reran: Vec<ChangeSetId>,
    /// Change sets filtered out by contexts or dbms.
    pub skipped: Vec<ChangeSetId>,
    pub already_ran: Vec<ChangeSetId>,
    /// Number of statements sent to the database, bookkeeping excluded.
    pub statements: usize,
}

impl UpdateReport {
    /// Whether the update had nothing to do.
    pub fn is_up_to_date(&self) -> bool {
        self.executed.is_empty() && self.reran.is_empty()
    }
}

/// Applies changelogs to a database.
///
/// Implementations run inside the transaction of the caller and never commit or
/// roll back on their own.
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    /// Run every pending change set of `changelog` that matches `contexts`.
    async fn update(
        &self,
        changelog: &str,
        accessor: &CompositeResourceAccessor,
        database: &mut Database,
        contexts: &Contexts,
    ) -> Result<UpdateReport, EngineError>;

    /// List the change sets an update with the same arguments would run.
    async fn status(
        &self,
        changelog: &str,
        accessor: &CompositeResourceAccessor,
        database: &mut Database,
        contexts: &Contexts,
    ) -> Result<Vec<PendingChangeSet>, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    Skip,
    AlreadyRan,
    Run(PendingReason),
}

/// The engine over the `DATABASECHANGELOG` bookkeeping tables.
#[derive(Debug, Clone)]
pub struct ChangelogEngine {
    locked_by: String,
}

impl Default for ChangelogEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangelogEngine {
    pub fn new() -> Self {
        Self {
            locked_by: format!("{} (pid {})", env!("CARGO_PKG_NAME"), std::process::id()),
        }
    }

    /// Name written to the lock table while an update runs.
    pub fn with_locked_by(mut self, locked_by: impl Into<String>) -> Self {
        self.locked_by = locked_by.into();
        self
    }

    /// Decide what to do with every change set. Fails before anything ran if a
    /// recorded checksum no longer matches.
    fn plan<'a>(
        changelog: &'a ChangeLog,
        ran: &HashMap<ChangeSetId, RanChangeSet>,
        database: &Database,
        contexts: &Contexts,
    ) -> Result<Vec<(&'a ChangeSet, Action)>, EngineError> {
        let mut plan = Vec::with_capacity(changelog.change_sets().len());
        for change_set in changelog.change_sets() {
            let action = match ran.get(&change_set.id) {
                None => Action::Run(PendingReason::New),
                Some(entry) => {
                    let recorded = entry.checksum.as_deref();
                    let modified = recorded.is_some_and(|recorded| recorded != change_set.checksum());
                    if modified && change_set.run_on_change {
                        Action::Run(PendingReason::Changed)
                    } else if modified
                        && !recorded.is_some_and(|recorded| change_set.accepts_checksum(recorded))
                    {
                        return Err(EngineError::ChecksumMismatch {
                            change_set: change_set.id.clone(),
                            recorded: recorded.unwrap_or_default().to_string(),
                            computed: change_set.checksum().to_string(),
                        });
                    } else if change_set.run_always {
                        Action::Run(PendingReason::RunAlways)
                    } else {
                        Action::AlreadyRan
                    }
                }
            };
            let action = match action {
                Action::Run(_)
                    if !change_set.matches_contexts(contexts)
                        || !change_set.runs_on(database.dialect()) =>
                {
                    Action::Skip
                }
                action => action,
            };
            plan.push((change_set, action));
        }
        Ok(plan)
    }

    async fn run_change_set(
        database: &mut Database,
        change_set: &ChangeSet,
    ) -> Result<usize, EngineError> {
        let dialect = database.dialect();
        let mut count = 0;
        for change in &change_set.changes {
            for statement in change.statements(dialect) {
                tracing::debug!("Executing [{}] for change set [{}]", statement, change_set.id);
                database
                    .execute(&statement)
                    .await
                    .map_err(|source| EngineError::ChangeSetFailed {
                        change_set: change_set.id.clone(),
                        statement: statement.clone(),
                        source,
                    })?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn apply(
        &self,
        changelog: &ChangeLog,
        database: &mut Database,
        contexts: &Contexts,
    ) -> Result<UpdateReport, EngineError> {
        let ran = History::ran_change_sets(database).await?;
        let plan = Self::plan(changelog, &ran, database, contexts)?;

        let deployment_id: String = uuid::Uuid::new_v4().simple().to_string().chars().take(10).collect();
        let mut order = ran.values().map(|entry| entry.order).max().unwrap_or(0);
        let mut report = UpdateReport {
            changelog: changelog.path().to_string(),
            deployment_id: deployment_id.clone(),
            ..Default::default()
        };
        for (change_set, action) in plan {
            match action {
                Action::Skip => report.skipped.push(change_set.id.clone()),
                Action::AlreadyRan => report.already_ran.push(change_set.id.clone()),
                Action::Run(reason) => {
                    report.statements += Self::run_change_set(database, change_set).await?;
                    match reason {
                        PendingReason::New => {
                            order += 1;
                            History::mark_executed(database, change_set, order, &deployment_id)
                                .await?;
                            report.executed.push(change_set.id.clone());
                        }
                        PendingReason::Changed | PendingReason::RunAlways => {
                            History::mark_reran(database, change_set, &deployment_id).await?;
                            report.reran.push(change_set.id.clone());
                        }
                    }
                    tracing::info!("Change set [{}] ran successfully", change_set.id);
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl MigrationEngine for ChangelogEngine {
    async fn update(
        &self,
        changelog: &str,
        accessor: &CompositeResourceAccessor,
        database: &mut Database,
        contexts: &Contexts,
    ) -> Result<UpdateReport, EngineError> {
        let changelog = ChangeLog::load(changelog, accessor)?;
        History::ensure_tables(database).await?;
        History::acquire_lock(database, &self.locked_by).await?;
        let report = match self.apply(&changelog, database, contexts).await {
            Ok(report) => report,
            Err(e) => {
                // Fails on backends that abort the transaction on error. The
                // rollback of the caller undoes the lock there.
                if let Err(release) = History::release_lock(database).await {
                    tracing::debug!("Could not release the changelog lock after a failure: {release}");
                }
                return Err(e);
            }
        };
        History::release_lock(database).await?;

        if report.is_up_to_date() {
            tracing::info!("Changelog [{}] is up to date", report.changelog);
        } else {
            tracing::info!(
                "Applied changelog [{}]: {} executed, {} reran, {} skipped",
                report.changelog,
                report.executed.len(),
                report.reran.len(),
                report.skipped.len()
            );
        }
        Ok(report)
    }

    async fn status(
        &self,
        changelog: &str,
        accessor: &CompositeResourceAccessor,
        database: &mut Database,
        contexts: &Contexts,
    ) -> Result<Vec<PendingChangeSet>, EngineError> {
        let changelog = ChangeLog::load(changelog, accessor)?;
        History::ensure_tables(database).await?;
        let ran = History::ran_change_sets(database).await?;
        let plan = Self::plan(&changelog, &ran, database, contexts)?;
        Ok(plan
            .into_iter()
            .filter_map(|(change_set, action)| match action {
                Action::Run(reason) => Some(PendingChangeSet {
                    id: change_set.id.clone(),
                    reason,
                    description: change_set.description(),
                }),
                Action::Skip | Action::AlreadyRan => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connection::Connection, resource::EmbeddedResourceAccessor, SqlConnection};
    use sqlx::Row;

    const DEPARTMENT: &str = r#"
databaseChangeLog:
  - changeSet:
      id: 1
      author: alice
      changes:
        - createTable:
            tableName: DEPARTMENT
            columns:
              - column:
                  name: ID
                  type: INTEGER
                  constraints:
                    primaryKey: true
              - column:
                  name: NAME
                  type: VARCHAR(255)
  - changeSet:
      id: 2
      author: alice
      context: test
      changes:
        - insert:
            tableName: DEPARTMENT
            columns:
              - column:
                  name: ID
                  valueNumeric: 1
              - column:
                  name: NAME
                  value: Research
"#;

    async fn database() -> Database {
        let connection = SqlConnection::connect("sqlite::memory:").await.unwrap();
        Database::new(Box::new(connection)).unwrap()
    }

    fn resources(files: &[(&str, &'static str)]) -> CompositeResourceAccessor {
        let mut embedded = EmbeddedResourceAccessor::new();
        for (path, content) in files {
            embedded.insert(path, content);
        }
        CompositeResourceAccessor::new().with(embedded)
    }

    async fn count(database: &mut Database, query: &str) -> i64 {
        let row = database.fetch_optional(query).await.unwrap().unwrap();
        row.try_get::<i64, _>(0).unwrap()
    }

    async fn table_exists(database: &mut Database, table: &str) -> bool {
        let query = format!("SELECT name FROM sqlite_master WHERE type='table' AND name='{table}'");
        database.fetch_optional(&query).await.unwrap().is_some()
    }

    #[tokio::test]
    async fn test_update_then_nothing_pending() {
        let resources = resources(&[("changelog.yaml", DEPARTMENT)]);
        let mut db = database().await;
        let engine = ChangelogEngine::new();

        let report = engine
            .update("changelog.yaml", &resources, &mut db, &Contexts::default())
            .await
            .unwrap();
        assert_eq!(report.executed.len(), 2);
        assert_eq!(report.statements, 2);
        assert_eq!(report.deployment_id.len(), 10);
        assert_eq!(count(&mut db, "SELECT COUNT(*) FROM DEPARTMENT").await, 1);

        let report = engine
            .update("changelog.yaml", &resources, &mut db, &Contexts::default())
            .await
            .unwrap();
        assert!(report.is_up_to_date());
        assert_eq!(report.statements, 0);
        assert_eq!(report.already_ran.len(), 2);
        assert_eq!(count(&mut db, "SELECT COUNT(*) FROM DATABASECHANGELOG").await, 2);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_contexts_filter_change_sets() {
        let resources = resources(&[("changelog.yaml", DEPARTMENT)]);
        let mut db = database().await;
        let engine = ChangelogEngine::new();

        let report = engine
            .update("changelog.yaml", &resources, &mut db, &Contexts::parse("prod"))
            .await
            .unwrap();
        assert_eq!(report.executed.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(count(&mut db, "SELECT COUNT(*) FROM DEPARTMENT").await, 0);

        let pending = engine
            .status("changelog.yaml", &resources, &mut db, &Contexts::parse("test"))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id.id, "2");
        assert_eq!(pending[0].reason, PendingReason::New);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_modified_change_set_is_rejected_before_anything_runs() {
        let mut db = database().await;
        let engine = ChangelogEngine::new();
        let before = resources(&[(
            "changelog.sql",
            "--liquibase formatted sql\n--changeset a:1\nCREATE TABLE T (ID INT);\n",
        )]);
        engine
            .update("changelog.sql", &before, &mut db, &Contexts::default())
            .await
            .unwrap();

        let after = resources(&[(
            "changelog.sql",
            "--liquibase formatted sql\n--changeset a:1\nCREATE TABLE T (ID BIGINT);\n--changeset a:2\nCREATE TABLE U (ID INT);\n",
        )]);
        let err = engine
            .update("changelog.sql", &after, &mut db, &Contexts::default())
            .await
            .expect_err("Checksum must not match");
        assert!(matches!(err, EngineError::ChecksumMismatch { .. }));
        assert!(!table_exists(&mut db, "U").await, "Change set 2 must not run");

        let accepted = resources(&[(
            "changelog.sql",
            "--liquibase formatted sql\n--changeset a:1\n--validCheckSum: ANY\nCREATE TABLE T (ID BIGINT);\n",
        )]);
        let report = engine
            .update("changelog.sql", &accepted, &mut db, &Contexts::default())
            .await
            .expect("validCheckSum ANY accepts the change");
        assert!(report.is_up_to_date());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_on_change_and_run_always() {
        let mut db = database().await;
        let engine = ChangelogEngine::new();
        let first = resources(&[(
            "changelog.sql",
            "--liquibase formatted sql\n\
             --changeset a:view runOnChange:true\nCREATE VIEW V AS SELECT 1 AS X;\n\
             --changeset a:stamp runAlways:true\nCREATE TABLE IF NOT EXISTS S (ID INT);\n",
        )]);
        let report = engine
            .update("changelog.sql", &first, &mut db, &Contexts::default())
            .await
            .unwrap();
        assert_eq!(report.executed.len(), 2);

        let report = engine
            .update("changelog.sql", &first, &mut db, &Contexts::default())
            .await
            .unwrap();
        assert_eq!(report.reran, vec![ChangeSetId::new("stamp", "a", "changelog.sql")]);
        assert_eq!(report.already_ran.len(), 1);

        let changed = resources(&[(
            "changelog.sql",
            "--liquibase formatted sql\n\
             --changeset a:view runOnChange:true\nDROP VIEW V;\nCREATE VIEW V AS SELECT 2 AS X;\n\
             --changeset a:stamp runAlways:true\nCREATE TABLE IF NOT EXISTS S (ID INT);\n",
        )]);
        let report = engine
            .update("changelog.sql", &changed, &mut db, &Contexts::default())
            .await
            .unwrap();
        assert_eq!(report.reran.len(), 2);
        assert_eq!(count(&mut db, "SELECT X FROM V").await, 2);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_change_set_rolls_back_with_the_caller() {
        let resources = resources(&[(
            "changelog.sql",
            "--liquibase formatted sql\n--changeset a:1\nCREATE TABLE T (ID INT);\n--changeset a:2\nINSERT INTO MISSING VALUES (1);\n",
        )]);
        let mut connection = SqlConnection::connect("sqlite::memory:").await.unwrap();
        connection.begin().await.unwrap();
        let mut db = Database::new(Box::new(connection)).unwrap();

        let err = ChangelogEngine::new()
            .update("changelog.sql", &resources, &mut db, &Contexts::default())
            .await
            .expect_err("Insert into a missing table fails");
        match &err {
            EngineError::ChangeSetFailed {
                change_set,
                statement,
                ..
            } => {
                assert_eq!(change_set.id, "2");
                assert_eq!(statement, "INSERT INTO MISSING VALUES (1)");
            }
            other => panic!("unexpected error {:?}", other),
        }
        db.rollback().await.unwrap();

        assert!(!table_exists(&mut db, "T").await, "Change set 1 must be rolled back");
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dbms_filter() {
        let resources = resources(&[(
            "changelog.sql",
            "--liquibase formatted sql\n--changeset a:1 dbms:postgresql\nCREATE TABLE P (ID INT);\n--changeset a:2 dbms:sqlite\nCREATE TABLE S (ID INT);\n",
        )]);
        let mut db = database().await;
        let report = ChangelogEngine::new()
            .update("changelog.sql", &resources, &mut db, &Contexts::default())
            .await
            .unwrap();
        assert_eq!(report.skipped, vec![ChangeSetId::new("1", "a", "changelog.sql")]);
        assert_eq!(report.executed, vec![ChangeSetId::new("2", "a", "changelog.sql")]);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_held_lock_fails_the_update() {
        let resources = resources(&[("changelog.yaml", DEPARTMENT)]);
        let mut db = database().await;
        History::ensure_tables(&mut db).await.unwrap();
        History::acquire_lock(&mut db, "other host").await.unwrap();

        let err = ChangelogEngine::new()
            .update("changelog.yaml", &resources, &mut db, &Contexts::default())
            .await
            .expect_err("Lock is held");
        assert!(matches!(err, EngineError::LockUnavailable { locked_by } if locked_by == "other host"));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_changelog_is_a_resource_error() {
        let mut db = database().await;
        let err = ChangelogEngine::new()
            .update("missing.yaml", &resources(&[]), &mut db, &Contexts::default())
            .await
            .expect_err("Changelog does not exist");
        assert!(err.is_resource_error());
        db.close().await.unwrap();
    }
}
