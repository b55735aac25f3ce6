//! # changelog-engine
//!
//! Applies changelogs (ordered lists of change sets) to a SQL database and keeps
//! track of what has already been applied in a `DATABASECHANGELOG` table.
//!
//! The engine never opens or commits transactions itself. The caller hands it a
//! [Database] whose connection is already in manual transaction mode and decides
//! what to do with the transaction once [MigrationEngine::update] returns.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use changelog_engine::{
//!     ChangelogEngine, CompositeResourceAccessor, Connection, Contexts, Database,
//!     FileSystemResourceAccessor, MigrationEngine, SqlConnection,
//! };
//!
//! let mut connection = SqlConnection::connect("sqlite://app.db?mode=rwc").await?;
//! connection.begin().await?;
//! let mut database = Database::new(Box::new(connection)).map_err(|e| e.into_parts().0)?;
//!
//! let resources = CompositeResourceAccessor::new()
//!     .with(FileSystemResourceAccessor::current_dir());
//! let report = ChangelogEngine::new()
//!     .update("db/changelog.yaml", &resources, &mut database, &Contexts::default())
//!     .await?;
//! database.commit().await?;
//! database.close().await?;
//! println!("executed {} change sets", report.executed.len());
//! # Ok(())
//! # }
//! ```

mod changelog;
mod connection;
mod contexts;
mod database;
mod engine;
mod error;
mod history;
mod resource;
mod sql_splitter;

pub use changelog::{
    AddColumnChange, Change, ChangeLog, ChangeSet, ChangeSetId, ColumnConstraints, ColumnEntry,
    ColumnSpec, ColumnValue, CreateIndexChange, CreateTableChange, DropTableChange, InsertChange, SqlChange,
    SqlFileChange, CHECKSUM_VERSION,
};
pub use connection::{Connection, SqlConnection};
pub use contexts::{ContextExpression, Contexts};
pub use database::{Database, DatabaseInitError, Dialect};
pub use engine::{ChangelogEngine, MigrationEngine, PendingChangeSet, PendingReason, UpdateReport};
pub use error::EngineError;
pub use history::{CHANGELOG_LOCK_TABLE, CHANGELOG_TABLE};
pub use resource::{
    CallerResourceAccessor, CompositeResourceAccessor, EmbeddedResourceAccessor,
    FileSystemResourceAccessor, Resource, ResourceAccessor,
};
pub use sql_splitter::{split_statements, strip_comments};
