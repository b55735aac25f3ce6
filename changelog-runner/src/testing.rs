//!
//! Helpers for tests of the runner and of applications embedding it.
//!

use std::{
    collections::BTreeMap,
    io::Write,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use changelog_engine::{
    CompositeResourceAccessor, Connection, EmbeddedResourceAccessor, SqlConnection,
};
use futures_util::future::BoxFuture;
use sqlx::{AnyConnection, Executor, Row};
use tracing_subscriber::fmt::MakeWriter;

use crate::{
    config::ChangesetConfig,
    datasource::{ConnectionError, ConnectionSource},
};

/// Creates an empty `DEPARTMENT` table.
pub const DEPT_CHANGELOG: &str = r#"
databaseChangeLog:
  - changeSet:
      id: create-department
      author: runner
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
"#;

/// [DEPT_CHANGELOG] as an XML changelog.
pub const DEPT_XML_CHANGELOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<databaseChangeLog xmlns="http://www.liquibase.org/xml/ns/dbchangelog">
    <changeSet id="create-department" author="runner">
        <createTable tableName="DEPARTMENT">
            <column name="ID" type="INTEGER">
                <constraints primaryKey="true"/>
            </column>
            <column name="NAME" type="VARCHAR(255)"/>
        </createTable>
    </changeSet>
</databaseChangeLog>
"#;

/// Creates `EMPLOYEE` with one row, as a formatted SQL changelog.
pub const EMPLOYEE_CHANGELOG: &str = "--liquibase formatted sql

--changeset runner:create-employee
CREATE TABLE EMPLOYEE (ID INTEGER PRIMARY KEY, NAME VARCHAR(255));
INSERT INTO EMPLOYEE (ID, NAME) VALUES (1, 'Ada');
";

/// Creates `PARTIAL`, then fails on the second change set.
pub const BROKEN_CHANGELOG: &str = "--liquibase formatted sql

--changeset runner:create-partial
CREATE TABLE PARTIAL (ID INTEGER);

--changeset runner:broken
INSERT INTO TABLE_THAT_DOES_NOT_EXIST (ID) VALUES (1);
";

/// A changeset entry with empty contexts and `failOnError = true`.
pub fn changeset(name: &str, datasource: &str, changelog: &str) -> ChangesetConfig {
    ChangesetConfig {
        name: name.to_string(),
        datasource: datasource.to_string(),
        changelog: changelog.to_string(),
        contexts: String::new(),
        fail_on_error: true,
    }
}

/// Resources served from memory only.
pub fn resources(files: &[(&str, &'static str)]) -> CompositeResourceAccessor {
    let mut embedded = EmbeddedResourceAccessor::new();
    for (path, content) in files {
        embedded.insert(path, content);
    }
    CompositeResourceAccessor::new().with(embedded)
}

/// A SQLite database file in a temporary directory, removed on drop.
pub struct SqliteFile {
    dir: tempfile::TempDir,
}

impl Default for SqliteFile {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteFile {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn url(&self) -> String {
        format!(
            "sqlite://{}?mode=rwc",
            self.dir.path().join("test.db").display()
        )
    }
}

/// Run a query returning a single integer on a fresh connection.
pub async fn scalar(url: &str, query: &str) -> i64 {
    let mut connection = SqlConnection::connect(url)
        .await
        .expect("failed to connect");
    let row = connection
        .executor()
        .await
        .expect("failed to check out the connection")
        .fetch_one(query)
        .await
        .expect("query failed");
    let value: i64 = row.try_get(0).expect("not an integer");
    Box::new(connection)
        .close()
        .await
        .expect("failed to close");
    value
}

pub async fn count_rows(url: &str, table: &str) -> i64 {
    scalar(url, &format!("SELECT COUNT(*) FROM {}", table)).await
}

/// Whether a table exists in a SQLite database.
pub async fn table_exists(url: &str, table: &str) -> bool {
    scalar(
        url,
        &format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{}'",
            table
        ),
    )
    .await
        == 1
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicUsize,
    closes: AtomicUsize,
}

/// A [Connection] reporting every close to its source.
struct CountingConnection {
    inner: SqlConnection,
    backend_name: Option<String>,
    fail_begin: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl Connection for CountingConnection {
    fn backend_name(&self) -> &str {
        match &self.backend_name {
            Some(name) => name.as_str(),
            None => self.inner.backend_name(),
        }
    }

    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        if self.fail_begin {
            return Err(sqlx::Error::Protocol("begin refused".to_string()));
        }
        self.inner.begin().await
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.inner.rollback().await
    }

    async fn executor(&mut self) -> Result<&mut AnyConnection, sqlx::Error> {
        self.inner.executor().await
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), sqlx::Error>> {
        let this = *self;
        this.counters.closes.fetch_add(1, Ordering::SeqCst);
        Box::new(this.inner).close()
    }
}

/// [ConnectionSource] opening a standalone connection per request and counting
/// requests and closes.
#[derive(Clone, Default)]
pub struct CountingSource {
    urls: BTreeMap<String, String>,
    backend_name: Option<String>,
    fail_begin: bool,
    counters: Arc<Counters>,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, url: impl Into<String>) -> Self {
        self.urls.insert(name.to_string(), url.into());
        self
    }

    /// Report this backend name instead of the driver's.
    pub fn with_backend_name(mut self, name: &str) -> Self {
        self.backend_name = Some(name.to_string());
        self
    }

    /// Make every `begin` call fail.
    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn gets(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionSource for CountingSource {
    async fn get(&self, datasource: &str) -> Result<Box<dyn Connection>, ConnectionError> {
        let url = self
            .urls
            .get(datasource)
            .ok_or_else(|| ConnectionError::UnknownDataSource(datasource.to_string()))?;
        let inner = SqlConnection::connect(url)
            .await
            .map_err(|source| ConnectionError::Acquire {
                name: datasource.to_string(),
                source,
            })?;
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingConnection {
            inner,
            backend_name: self.backend_name.clone(),
            fail_begin: self.fail_begin,
            counters: self.counters.clone(),
        }))
    }
}

/// Collects formatted log lines written by a test subscriber.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a subscriber writing into this capture on the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().expect("log capture poisoned");
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Captured lines logged at `level`, e.g. `WARN`.
    pub fn lines_at(&self, level: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(level))
            .map(str::to_string)
            .collect()
    }
}

pub struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().expect("log capture poisoned");
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: self.buffer.clone(),
        }
    }
}
