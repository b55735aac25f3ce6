use sea_query::Value;
use serde::Serialize;

use crate::{database::Dialect, sql_splitter};

/// A literal or computed value of a column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnValue {
    /// A string, rendered as a quoted SQL literal.
    Text(String),
    /// A number. Integers go through the dialect, other finite numbers are
    /// checked when the changelog is loaded and rendered as written.
    Numeric(String),
    Boolean(bool),
    /// A SQL expression, rendered as is. For example `CURRENT_TIMESTAMP`.
    Computed(String),
}

impl ColumnValue {
    fn render(&self, dialect: Dialect) -> String {
        match self {
            ColumnValue::Text(text) => dialect.literal(&Value::from(text.as_str())),
            ColumnValue::Numeric(number) => match number.parse::<i64>() {
                Ok(integer) => dialect.literal(&Value::from(integer)),
                Err(_) => number.clone(),
            },
            ColumnValue::Boolean(value) => dialect.literal(&Value::from(*value)),
            ColumnValue::Computed(expression) => expression.clone(),
        }
    }

    /// A numeric value, refused unless it is a finite number.
    pub fn numeric(number: &str) -> Result<Self, String> {
        let number = number.trim();
        match number.parse::<f64>() {
            Ok(parsed) if parsed.is_finite() => Ok(ColumnValue::Numeric(number.to_string())),
            _ => Err(format!("[{}] is not a number", number)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConstraints {
    pub primary_key: bool,
    pub nullable: bool,
    pub unique: bool,
}

impl Default for ColumnConstraints {
    fn default() -> Self {
        Self {
            primary_key: false,
            nullable: true,
            unique: false,
        }
    }
}

/// A column definition of `createTable` and `addColumn`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: String,
    pub default: Option<ColumnValue>,
    pub auto_increment: bool,
    pub constraints: ColumnConstraints,
}

impl ColumnSpec {
    /// `name type [constraints]`. `inline_primary_key` renders the primary key
    /// constraint on the column itself.
    fn render(&self, dialect: Dialect, inline_primary_key: bool) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type);
        let primary_key = inline_primary_key && self.constraints.primary_key;
        if self.auto_increment {
            match dialect {
                Dialect::Postgres => sql.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
                Dialect::MySql => sql.push_str(" AUTO_INCREMENT"),
                // Only valid on an inline INTEGER PRIMARY KEY, rendered below.
                Dialect::Sqlite => {}
            }
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.render(dialect));
        }
        if !self.constraints.nullable || self.constraints.primary_key {
            sql.push_str(" NOT NULL");
        }
        if self.constraints.unique && !primary_key {
            sql.push_str(" UNIQUE");
        }
        if primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.auto_increment && dialect == Dialect::Sqlite {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        sql
    }
}

/// A column of an `insert` change together with its value. `None` inserts `NULL`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnEntry {
    pub name: String,
    pub value: Option<ColumnValue>,
}

/// Raw SQL, optionally split into several statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlChange {
    pub sql: String,
    pub split_statements: bool,
    pub strip_comments: bool,
    pub end_delimiter: Option<String>,
}

impl SqlChange {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            split_statements: true,
            strip_comments: false,
            end_delimiter: None,
        }
    }
}

fn sql_statements(
    sql: &str,
    split: bool,
    strip_comments: bool,
    end_delimiter: Option<&str>,
) -> Vec<String> {
    let sql = if strip_comments {
        sql_splitter::strip_comments(sql)
    } else {
        sql.to_string()
    };
    if split {
        sql_splitter::split_statements(&sql, end_delimiter.unwrap_or(";"))
    } else {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            vec![]
        } else {
            vec![trimmed.to_string()]
        }
    }
}

/// Collapse all runs of whitespace so reformatting does not change a checksum.
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Raw SQL read from a separate file when the changelog is loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlFileChange {
    /// Resolved path of the file.
    pub path: String,
    /// Content of the file.
    pub sql: String,
    pub split_statements: bool,
    pub strip_comments: bool,
    pub end_delimiter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableChange {
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropTableChange {
    pub table_name: String,
    pub cascade_constraints: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddColumnChange {
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIndexChange {
    pub index_name: String,
    pub table_name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertChange {
    pub table_name: String,
    pub columns: Vec<ColumnEntry>,
}

/// A single change of a change set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Change {
    Sql(SqlChange),
    SqlFile(SqlFileChange),
    CreateTable(CreateTableChange),
    DropTable(DropTableChange),
    AddColumn(AddColumnChange),
    CreateIndex(CreateIndexChange),
    Insert(InsertChange),
}

impl Change {
    /// Name of the change type as written in changelogs.
    pub fn name(&self) -> &'static str {
        match self {
            Change::Sql(_) => "sql",
            Change::SqlFile(_) => "sqlFile",
            Change::CreateTable(_) => "createTable",
            Change::DropTable(_) => "dropTable",
            Change::AddColumn(_) => "addColumn",
            Change::CreateIndex(_) => "createIndex",
            Change::Insert(_) => "insert",
        }
    }

    /// Short description stored in the `DESCRIPTION` column.
    pub fn description(&self) -> String {
        match self {
            Change::Sql(_) => "sql".to_string(),
            Change::SqlFile(change) => format!("sqlFile path={}", change.path),
            Change::CreateTable(change) => format!("createTable tableName={}", change.table_name),
            Change::DropTable(change) => format!("dropTable tableName={}", change.table_name),
            Change::AddColumn(change) => format!("addColumn tableName={}", change.table_name),
            Change::CreateIndex(change) => format!(
                "createIndex indexName={}, tableName={}",
                change.index_name, change.table_name
            ),
            Change::Insert(change) => format!("insert tableName={}", change.table_name),
        }
    }

    /// The statements this change runs on `dialect`, in order.
    pub fn statements(&self, dialect: Dialect) -> Vec<String> {
        match self {
            Change::Sql(change) => sql_statements(
                &change.sql,
                change.split_statements,
                change.strip_comments,
                change.end_delimiter.as_deref(),
            ),
            Change::SqlFile(change) => sql_statements(
                &change.sql,
                change.split_statements,
                change.strip_comments,
                change.end_delimiter.as_deref(),
            ),
            Change::CreateTable(change) => vec![create_table(change, dialect)],
            Change::DropTable(change) => {
                let mut sql = format!("DROP TABLE {}", change.table_name);
                if change.cascade_constraints && dialect == Dialect::Postgres {
                    sql.push_str(" CASCADE");
                }
                vec![sql]
            }
            Change::AddColumn(change) => change
                .columns
                .iter()
                .map(|column| {
                    format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        change.table_name,
                        column.render(dialect, true)
                    )
                })
                .collect(),
            Change::CreateIndex(change) => vec![format!(
                "CREATE {}INDEX {} ON {} ({})",
                if change.unique { "UNIQUE " } else { "" },
                change.index_name,
                change.table_name,
                change.columns.join(", ")
            )],
            Change::Insert(change) => {
                let names = change
                    .columns
                    .iter()
                    .map(|column| column.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let values = change
                    .columns
                    .iter()
                    .map(|column| match &column.value {
                        Some(value) => value.render(dialect),
                        None => "NULL".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    change.table_name, names, values
                )]
            }
        }
    }

    /// The text a change set checksum is computed over.
    pub(crate) fn checksum_input(&self) -> String {
        match self {
            Change::Sql(change) => normalize_sql(&change.sql),
            Change::SqlFile(change) => normalize_sql(&change.sql),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

fn create_table(change: &CreateTableChange, dialect: Dialect) -> String {
    let primary_keys = change
        .columns
        .iter()
        .filter(|column| column.constraints.primary_key)
        .map(|column| column.name.as_str())
        .collect::<Vec<_>>();
    let inline_primary_key = primary_keys.len() == 1;
    let mut definitions = change
        .columns
        .iter()
        .map(|column| column.render(dialect, inline_primary_key))
        .collect::<Vec<_>>();
    if primary_keys.len() > 1 {
        definitions.push(format!("PRIMARY KEY ({})", primary_keys.join(", ")));
    }
    format!(
        "CREATE TABLE {} ({})",
        change.table_name,
        definitions.join(", ")
    )
}
