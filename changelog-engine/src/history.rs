use std::collections::HashMap;

use sea_query::{ColumnDef, Expr, Iden, Index, Order, Query, Table};
use sqlx::Row;

use crate::{
    changelog::{ChangeSet, ChangeSetId},
    database::Database,
    error::EngineError,
};

/// The table that keeps track of which change sets have been applied.
pub const CHANGELOG_TABLE: &str = "DATABASECHANGELOG";
/// The single row table used to keep two updates from running at the same time.
pub const CHANGELOG_LOCK_TABLE: &str = "DATABASECHANGELOGLOCK";

const LOCK_ID: i32 = 1;
/// Length of the VARCHAR columns.
const TEXT_LEN: u32 = 255;

#[derive(Iden)]
#[iden = "DATABASECHANGELOG"]
enum ChangeLogTable {
    Table,
    #[iden = "ID"]
    Id,
    #[iden = "AUTHOR"]
    Author,
    #[iden = "FILENAME"]
    Filename,
    #[iden = "DATEEXECUTED"]
    DateExecuted,
    #[iden = "ORDEREXECUTED"]
    OrderExecuted,
    #[iden = "EXECTYPE"]
    ExecType,
    #[iden = "CHECKSUM"]
    Checksum,
    #[iden = "DESCRIPTION"]
    Description,
    #[iden = "COMMENTS"]
    Comments,
    #[iden = "CONTEXTS"]
    Contexts,
    #[iden = "DEPLOYMENT_ID"]
    DeploymentId,
}

#[derive(Iden)]
#[iden = "DATABASECHANGELOGLOCK"]
enum LockTable {
    Table,
    #[iden = "ID"]
    Id,
    #[iden = "LOCKED"]
    Locked,
    #[iden = "LOCKGRANTED"]
    LockGranted,
    #[iden = "LOCKEDBY"]
    LockedBy,
}

/// How a change set was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecType {
    Executed,
    Reran,
}

impl ExecType {
    fn as_str(&self) -> &'static str {
        match self {
            ExecType::Executed => "EXECUTED",
            ExecType::Reran => "RERAN",
        }
    }
}

/// A row of the changelog table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RanChangeSet {
    pub id: ChangeSetId,
    pub checksum: Option<String>,
    pub order: i64,
    pub exec_type: String,
}

fn truncate(text: &str) -> String {
    text.chars().take(TEXT_LEN as usize).collect()
}

/// Reads and writes the bookkeeping tables.
pub(crate) struct History;

impl History {
    /// Creates both bookkeeping tables if they don't exist yet.
    pub async fn ensure_tables(database: &mut Database) -> Result<(), EngineError> {
        let dialect = database.dialect();
        let changelog = Table::create()
            .table(ChangeLogTable::Table)
            .if_not_exists()
            .col(ColumnDef::new(ChangeLogTable::Id).string_len(TEXT_LEN).not_null())
            .col(ColumnDef::new(ChangeLogTable::Author).string_len(TEXT_LEN).not_null())
            .col(ColumnDef::new(ChangeLogTable::Filename).string_len(TEXT_LEN).not_null())
            .col(
                ColumnDef::new(ChangeLogTable::DateExecuted)
                    .date_time()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ChangeLogTable::OrderExecuted)
                    .big_integer()
                    .not_null(),
            )
            .col(ColumnDef::new(ChangeLogTable::ExecType).string_len(10).not_null())
            .col(ColumnDef::new(ChangeLogTable::Checksum).string_len(100).null())
            .col(ColumnDef::new(ChangeLogTable::Description).string_len(TEXT_LEN).null())
            .col(ColumnDef::new(ChangeLogTable::Comments).string_len(TEXT_LEN).null())
            .col(ColumnDef::new(ChangeLogTable::Contexts).string_len(TEXT_LEN).null())
            .col(ColumnDef::new(ChangeLogTable::DeploymentId).string_len(10).null())
            .primary_key(
                Index::create()
                    .col(ChangeLogTable::Id)
                    .col(ChangeLogTable::Author)
                    .col(ChangeLogTable::Filename),
            )
            .to_owned();
        let query = dialect.build_schema(changelog);
        database.execute(&query).await?;

        let lock = Table::create()
            .table(LockTable::Table)
            .if_not_exists()
            .col(ColumnDef::new(LockTable::Id).integer().not_null().primary_key())
            .col(ColumnDef::new(LockTable::Locked).integer().not_null().default(0i32))
            .col(ColumnDef::new(LockTable::LockGranted).date_time().null())
            .col(ColumnDef::new(LockTable::LockedBy).string_len(TEXT_LEN).null())
            .to_owned();
        let query = dialect.build_schema(lock);
        database.execute(&query).await?;
        Ok(())
    }

    /// Marks the changelog as locked by `locked_by`.
    /// Fails with [EngineError::LockUnavailable] if somebody else holds the lock.
    pub async fn acquire_lock(database: &mut Database, locked_by: &str) -> Result<(), EngineError> {
        let dialect = database.dialect();
        let statement = Query::select()
            .column(LockTable::Id)
            .from(LockTable::Table)
            .and_where(Expr::col(LockTable::Id).eq(LOCK_ID))
            .to_owned();
        let query = dialect.build_query(&statement);
        let exists = database.fetch_optional(&query).await?.is_some();
        if !exists {
            let statement = Query::insert()
                .into_table(LockTable::Table)
                .columns([LockTable::Id, LockTable::Locked])
                .values([LOCK_ID.into(), 0i32.into()])?
                .to_owned();
            let query = dialect.build_query(&statement);
            database.execute(&query).await?;
        }

        let statement = Query::update()
            .table(LockTable::Table)
            .values([
                (LockTable::Locked, 1i32.into()),
                (LockTable::LockGranted, Expr::current_timestamp().into()),
                (LockTable::LockedBy, locked_by.into()),
            ])
            .and_where(Expr::col(LockTable::Id).eq(LOCK_ID))
            .and_where(Expr::col(LockTable::Locked).eq(0i32))
            .to_owned();
        let query = dialect.build_query(&statement);
        if database.execute(&query).await? == 1 {
            tracing::debug!("Acquired changelog lock as [{}]", locked_by);
            return Ok(());
        }

        let statement = Query::select()
            .column(LockTable::LockedBy)
            .from(LockTable::Table)
            .and_where(Expr::col(LockTable::Id).eq(LOCK_ID))
            .to_owned();
        let query = dialect.build_query(&statement);
        let row = database.fetch_optional(&query).await?;
        let locked_by = row
            .and_then(|row| {
                row.try_get::<Option<String>, _>(LockTable::LockedBy.to_string().as_str())
                    .ok()
                    .flatten()
            })
            .unwrap_or_else(|| "unknown".to_string());
        Err(EngineError::LockUnavailable { locked_by })
    }

    pub async fn release_lock(database: &mut Database) -> Result<(), EngineError> {
        let statement = Query::update()
            .table(LockTable::Table)
            .values([
                (LockTable::Locked, 0i32.into()),
                (LockTable::LockGranted, Option::<String>::None.into()),
                (LockTable::LockedBy, Option::<String>::None.into()),
            ])
            .and_where(Expr::col(LockTable::Id).eq(LOCK_ID))
            .to_owned();
        let query = database.dialect().build_query(&statement);
        database.execute(&query).await?;
        Ok(())
    }

    /// Returns all recorded change sets, keyed by their identity.
    pub async fn ran_change_sets(
        database: &mut Database,
    ) -> Result<HashMap<ChangeSetId, RanChangeSet>, EngineError> {
        let statement = Query::select()
            .columns([
                ChangeLogTable::Id,
                ChangeLogTable::Author,
                ChangeLogTable::Filename,
                ChangeLogTable::Checksum,
                ChangeLogTable::OrderExecuted,
                ChangeLogTable::ExecType,
            ])
            .from(ChangeLogTable::Table)
            .order_by(ChangeLogTable::OrderExecuted, Order::Asc)
            .to_owned();
        let query = database.dialect().build_query(&statement);
        let rows = database.fetch_all(&query).await?;

        let mut ran = HashMap::with_capacity(rows.len());
        for row in rows {
            let id = ChangeSetId::new(
                row.try_get::<String, _>(ChangeLogTable::Id.to_string().as_str())?,
                row.try_get::<String, _>(ChangeLogTable::Author.to_string().as_str())?,
                row.try_get::<String, _>(ChangeLogTable::Filename.to_string().as_str())?,
            );
            let entry = RanChangeSet {
                checksum: row.try_get(ChangeLogTable::Checksum.to_string().as_str())?,
                order: row.try_get(ChangeLogTable::OrderExecuted.to_string().as_str())?,
                exec_type: row.try_get(ChangeLogTable::ExecType.to_string().as_str())?,
                id: id.clone(),
            };
            ran.insert(id, entry);
        }
        Ok(ran)
    }

    /// Records the first execution of a change set.
    pub async fn mark_executed(
        database: &mut Database,
        change_set: &ChangeSet,
        order: i64,
        deployment_id: &str,
    ) -> Result<(), EngineError> {
        let statement = Query::insert()
            .into_table(ChangeLogTable::Table)
            .columns([
                ChangeLogTable::Id,
                ChangeLogTable::Author,
                ChangeLogTable::Filename,
                ChangeLogTable::DateExecuted,
                ChangeLogTable::OrderExecuted,
                ChangeLogTable::ExecType,
                ChangeLogTable::Checksum,
                ChangeLogTable::Description,
                ChangeLogTable::Comments,
                ChangeLogTable::Contexts,
                ChangeLogTable::DeploymentId,
            ])
            .values([
                change_set.id.id.as_str().into(),
                change_set.id.author.as_str().into(),
                change_set.id.path.as_str().into(),
                Expr::current_timestamp().into(),
                order.into(),
                ExecType::Executed.as_str().into(),
                change_set.checksum().into(),
                truncate(&change_set.description()).into(),
                change_set.comment.as_deref().map(truncate).into(),
                truncate(change_set.contexts.as_str()).into(),
                deployment_id.into(),
            ])?
            .to_owned();
        let query = database.dialect().build_query(&statement);
        database.execute(&query).await?;
        Ok(())
    }

    /// Records another execution of an already recorded change set.
    pub async fn mark_reran(
        database: &mut Database,
        change_set: &ChangeSet,
        deployment_id: &str,
    ) -> Result<(), EngineError> {
        let statement = Query::update()
            .table(ChangeLogTable::Table)
            .values([
                (ChangeLogTable::DateExecuted, Expr::current_timestamp().into()),
                (ChangeLogTable::ExecType, ExecType::Reran.as_str().into()),
                (ChangeLogTable::Checksum, change_set.checksum().into()),
                (ChangeLogTable::DeploymentId, deployment_id.into()),
            ])
            .and_where(Expr::col(ChangeLogTable::Id).eq(change_set.id.id.as_str()))
            .and_where(Expr::col(ChangeLogTable::Author).eq(change_set.id.author.as_str()))
            .and_where(Expr::col(ChangeLogTable::Filename).eq(change_set.id.path.as_str()))
            .to_owned();
        let query = database.dialect().build_query(&statement);
        database.execute(&query).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        changelog::{Change, SqlChange},
        connection::SqlConnection,
    };

    async fn database() -> Database {
        let connection = SqlConnection::connect("sqlite::memory:").await.unwrap();
        Database::new(Box::new(connection)).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_tables_is_idempotent() {
        let mut db = database().await;
        History::ensure_tables(&mut db).await.unwrap();
        History::ensure_tables(&mut db).await.unwrap();
        assert!(History::ran_change_sets(&mut db).await.unwrap().is_empty());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_executed_and_reran() {
        let mut db = database().await;
        History::ensure_tables(&mut db).await.unwrap();
        let mut change_set = ChangeSet::new(
            ChangeSetId::new("1", "alice", "db/changelog.sql"),
            vec![Change::Sql(SqlChange::new("SELECT 1"))],
        );
        change_set.comment = Some("it's a comment".to_string());
        History::mark_executed(&mut db, &change_set, 1, "0123456789")
            .await
            .unwrap();

        let ran = History::ran_change_sets(&mut db).await.unwrap();
        let entry = ran.get(&change_set.id).expect("Change set should be recorded");
        assert_eq!(entry.checksum.as_deref(), Some(change_set.checksum()));
        assert_eq!(entry.order, 1);
        assert_eq!(entry.exec_type, "EXECUTED");

        History::mark_reran(&mut db, &change_set, "9876543210")
            .await
            .unwrap();
        let ran = History::ran_change_sets(&mut db).await.unwrap();
        assert_eq!(ran[&change_set.id].exec_type, "RERAN");
        assert_eq!(ran.len(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_cannot_be_acquired_twice() {
        let mut db = database().await;
        History::ensure_tables(&mut db).await.unwrap();
        History::acquire_lock(&mut db, "first").await.unwrap();
        let err = History::acquire_lock(&mut db, "second")
            .await
            .expect_err("Lock is already held");
        assert!(matches!(err, EngineError::LockUnavailable { locked_by } if locked_by == "first"));

        History::release_lock(&mut db).await.unwrap();
        History::acquire_lock(&mut db, "second").await.unwrap();
        db.close().await.unwrap();
    }
}
