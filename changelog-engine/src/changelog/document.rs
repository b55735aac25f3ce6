//! Serde model of YAML and JSON changelogs.
//!
//! ```yaml
//! databaseChangeLog:
//!   - include:
//!       file: common.yaml
//!       relativeToChangelogFile: true
//!   - changeSet:
//!       id: 1
//!       author: alice
//!       context: "!test"
//!       changes:
//!         - createTable:
//!             tableName: DEPARTMENT
//!             columns:
//!               - column:
//!                   name: ID
//!                   type: INTEGER
//!                   constraints:
//!                     primaryKey: true
//! ```

use std::collections::BTreeMap;

use serde::{de::IgnoredAny, Deserialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChangeLogDocument {
    pub database_change_log: Vec<EntryDocument>,
}

/// One list item of `databaseChangeLog`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EntryDocument {
    pub change_set: Option<ChangeSetDocument>,
    pub include: Option<IncludeDocument>,
    /// `property`, `preConditions` and friends. Not supported, only reported.
    #[serde(flatten)]
    pub other: BTreeMap<String, IgnoredAny>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct IncludeDocument {
    pub file: String,
    #[serde(default)]
    pub relative_to_changelog_file: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChangeSetDocument {
    pub id: Scalar,
    pub author: String,
    #[serde(alias = "contexts")]
    pub context: Option<String>,
    #[serde(default)]
    pub run_always: bool,
    #[serde(default)]
    pub run_on_change: bool,
    pub comment: Option<String>,
    pub dbms: Option<String>,
    pub valid_check_sum: Option<OneOrMany>,
    #[serde(default)]
    pub changes: Vec<ChangeDocument>,
}

/// A YAML scalar that is read as text, whatever its YAML type.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(super) enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Text(text) => write!(f, "{}", text),
            Scalar::Integer(number) => write!(f, "{}", number),
            Scalar::Float(number) => write!(f, "{}", number),
            Scalar::Boolean(value) => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(super) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// One list item of `changes`. Exactly one field is expected to be set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChangeDocument {
    pub sql: Option<SqlDocument>,
    pub sql_file: Option<SqlFileDocument>,
    pub create_table: Option<TableColumnsDocument>,
    pub drop_table: Option<DropTableDocument>,
    pub add_column: Option<TableColumnsDocument>,
    pub create_index: Option<CreateIndexDocument>,
    pub insert: Option<TableColumnsDocument>,
    #[serde(flatten)]
    pub other: BTreeMap<String, IgnoredAny>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum SqlDocument {
    Text(String),
    Full(SqlBodyDocument),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SqlBodyDocument {
    pub sql: String,
    pub split_statements: Option<bool>,
    pub strip_comments: Option<bool>,
    pub end_delimiter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SqlFileDocument {
    pub path: String,
    #[serde(default)]
    pub relative_to_changelog_file: bool,
    pub split_statements: Option<bool>,
    pub strip_comments: Option<bool>,
    pub end_delimiter: Option<String>,
}

/// `createTable`, `addColumn` and `insert`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TableColumnsDocument {
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<ColumnItemDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DropTableDocument {
    pub table_name: String,
    #[serde(default)]
    pub cascade_constraints: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateIndexDocument {
    pub index_name: String,
    pub table_name: String,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub columns: Vec<ColumnItemDocument>,
}

/// `- column: {...}`
#[derive(Debug, Deserialize)]
pub(super) struct ColumnItemDocument {
    pub column: ColumnDocument,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ColumnDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: Option<String>,
    pub value: Option<Scalar>,
    pub value_numeric: Option<Scalar>,
    pub value_boolean: Option<bool>,
    pub value_computed: Option<String>,
    pub default_value: Option<Scalar>,
    pub default_value_numeric: Option<Scalar>,
    pub default_value_boolean: Option<bool>,
    pub default_value_computed: Option<String>,
    #[serde(default)]
    pub auto_increment: bool,
    pub constraints: Option<ConstraintsDocument>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConstraintsDocument {
    pub primary_key: Option<bool>,
    pub nullable: Option<bool>,
    pub unique: Option<bool>,
}

pub(super) fn from_yaml(content: &str) -> Result<ChangeLogDocument, String> {
    serde_yaml::from_str(content).map_err(|e| e.to_string())
}

pub(super) fn from_json(content: &str) -> Result<ChangeLogDocument, String> {
    serde_json::from_str(content).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_document() {
        let document = from_yaml(
            r#"
databaseChangeLog:
  - property:
      name: x
  - include:
      file: other.yaml
  - changeSet:
      id: 1
      author: alice
      validCheckSum: ANY
      changes:
        - sql: SELECT 1
        - sql:
            sql: SELECT 2
            splitStatements: false
        - insert:
            tableName: T
            columns:
              - column:
                  name: A
                  value: 42
"#,
        )
        .unwrap();
        let entries = document.database_change_log;
        assert_eq!(entries.len(), 3);
        assert!(entries[0].other.contains_key("property"));
        assert_eq!(entries[1].include.as_ref().unwrap().file, "other.yaml");
        assert!(!entries[1].include.as_ref().unwrap().relative_to_changelog_file);

        let change_set = entries[2].change_set.as_ref().unwrap();
        assert_eq!(change_set.id.to_string(), "1");
        assert_eq!(
            change_set.valid_check_sum.clone().unwrap().into_vec(),
            vec!["ANY"]
        );
        assert_eq!(change_set.changes.len(), 3);
        assert!(matches!(change_set.changes[0].sql, Some(SqlDocument::Text(_))));
        assert!(matches!(change_set.changes[1].sql, Some(SqlDocument::Full(_))));
        let insert = change_set.changes[2].insert.as_ref().unwrap();
        assert_eq!(
            insert.columns[0].column.value.as_ref().unwrap().to_string(),
            "42"
        );
    }

    #[test]
    fn test_json_document() {
        let document = from_json(
            r#"{"databaseChangeLog": [{"changeSet": {"id": "a", "author": "bob", "contexts": "test",
                "changes": [{"dropTable": {"tableName": "T", "cascadeConstraints": true}}]}}]}"#,
        )
        .unwrap();
        let change_set = document.database_change_log[0].change_set.as_ref().unwrap();
        assert_eq!(change_set.context.as_deref(), Some("test"));
        assert!(change_set.changes[0].drop_table.as_ref().unwrap().cascade_constraints);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        assert!(from_yaml("changeSets: []").is_err());
    }
}
