use std::{fmt::Display, str::FromStr};

use sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryBuilder, QueryStatementWriter,
    SchemaStatementBuilder, SqliteQueryBuilder, Value,
};
use sqlx::{any::AnyRow, Executor};

use crate::{connection::Connection, error::EngineError};

/// SQL dialects the engine knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Map the backend name reported by a sqlx `Any` connection to a dialect.
    pub fn from_backend_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite" => Some(Dialect::Sqlite),
            "postgresql" | "postgres" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::MySql),
            _ => None,
        }
    }

    /// Short name used in `dbms` attributes of change sets.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgresql",
            Dialect::MySql => "mysql",
        }
    }

    /// Render `value` as an escaped SQL literal of this dialect.
    pub fn literal(&self, value: &Value) -> String {
        match self {
            Dialect::Sqlite => SqliteQueryBuilder.value_to_string(value),
            Dialect::Postgres => PostgresQueryBuilder.value_to_string(value),
            Dialect::MySql => MysqlQueryBuilder.value_to_string(value),
        }
    }

    /// Render a schema statement (CREATE TABLE, ...) for this dialect.
    pub fn build_schema<S: SchemaStatementBuilder>(&self, statement: S) -> String {
        match self {
            Dialect::Sqlite => statement.to_string(SqliteQueryBuilder),
            Dialect::Postgres => statement.to_string(PostgresQueryBuilder),
            Dialect::MySql => statement.to_string(MysqlQueryBuilder),
        }
    }

    /// Render a query with its values inlined for this dialect.
    pub fn build_query<S: QueryStatementWriter>(&self, statement: &S) -> String {
        match self {
            Dialect::Sqlite => statement.to_string(SqliteQueryBuilder),
            Dialect::Postgres => statement.to_string(PostgresQueryBuilder),
            Dialect::MySql => statement.to_string(MysqlQueryBuilder),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_backend_name(s.trim()).ok_or_else(|| format!("unknown dbms [{}]", s))
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Returned by [Database::new] when no dialect matches the connection.
/// The connection is handed back so the caller can close it.
pub struct DatabaseInitError {
    error: EngineError,
    connection: Box<dyn Connection>,
}

impl DatabaseInitError {
    pub fn error(&self) -> &EngineError {
        &self.error
    }

    pub fn into_parts(self) -> (EngineError, Box<dyn Connection>) {
        (self.error, self.connection)
    }
}

impl std::fmt::Debug for DatabaseInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseInitError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Display for DatabaseInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// The engine's view of a database: a connection plus its detected dialect.
///
/// Owns the connection. Closing the database closes the connection, so the
/// connection must never be closed on its own once a `Database` exists.
pub struct Database {
    connection: Box<dyn Connection>,
    dialect: Dialect,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Wrap a connection, detecting the dialect from its backend name.
    pub fn new(connection: Box<dyn Connection>) -> Result<Self, DatabaseInitError> {
        match Dialect::from_backend_name(connection.backend_name()) {
            Some(dialect) => Ok(Self {
                connection,
                dialect,
            }),
            None => Err(DatabaseInitError {
                error: EngineError::UnsupportedDatabase(connection.backend_name().to_string()),
                connection,
            }),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Run `sql`, which may hold several statements, and return the number of affected rows.
    pub(crate) async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        let executor = self.connection.executor().await?;
        let result = executor.execute(sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn fetch_optional(&mut self, sql: &str) -> Result<Option<AnyRow>, sqlx::Error> {
        let executor = self.connection.executor().await?;
        executor.fetch_optional(sqlx::query(sql)).await
    }

    pub(crate) async fn fetch_all(&mut self, sql: &str) -> Result<Vec<AnyRow>, sqlx::Error> {
        let executor = self.connection.executor().await?;
        executor.fetch_all(sqlx::query(sql)).await
    }

    pub async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.connection.commit().await
    }

    pub async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.connection.rollback().await
    }

    /// Close the database together with its connection.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.connection.close().await
    }
}
