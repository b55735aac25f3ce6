//! Changelogs and the change sets they are made of.
//!
//! A changelog is loaded through a [CompositeResourceAccessor], following
//! `include` entries depth first. The resulting [ChangeLog] is a flat, ordered
//! list of [ChangeSet]s.

mod change;
mod document;
mod formatted_sql;
mod xml;

use std::{collections::HashSet, fmt::Display};

use sha2::{Digest, Sha256};

pub use change::{
    AddColumnChange, Change, ColumnConstraints, ColumnEntry, ColumnSpec, ColumnValue,
    CreateIndexChange, CreateTableChange, DropTableChange, InsertChange, SqlChange,
    SqlFileChange,
};
use document::{
    ChangeDocument, ChangeSetDocument, ColumnDocument, ColumnItemDocument, EntryDocument,
    SqlDocument,
};

use crate::{
    contexts::{ContextExpression, Contexts},
    database::Dialect,
    error::EngineError,
    resource::CompositeResourceAccessor,
};

/// Version prefix of stored checksums.
pub const CHECKSUM_VERSION: u32 = 1;

/// Identity of a change set. The path is the changelog file that declares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeSetId {
    pub id: String,
    pub author: String,
    pub path: String,
}

impl ChangeSetId {
    pub fn new(id: impl Into<String>, author: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            path: path.into(),
        }
    }
}

impl Display for ChangeSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}::{}", self.path, self.id, self.author)
    }
}

/// A unit of change that is applied at most once, unless it says otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub id: ChangeSetId,
    pub contexts: ContextExpression,
    pub run_always: bool,
    pub run_on_change: bool,
    pub comment: Option<String>,
    /// Lowercase dbms names. Names starting with `!` exclude a database.
    pub dbms: Vec<String>,
    pub valid_checksums: Vec<String>,
    pub changes: Vec<Change>,
    checksum: String,
}

impl ChangeSet {
    pub fn new(id: ChangeSetId, changes: Vec<Change>) -> Self {
        let mut change_set = Self {
            id,
            contexts: ContextExpression::default(),
            run_always: false,
            run_on_change: false,
            comment: None,
            dbms: vec![],
            valid_checksums: vec![],
            changes,
            checksum: String::new(),
        };
        change_set.checksum = change_set.compute_checksum();
        change_set
    }

    fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for change in &self.changes {
            hasher.update(change.checksum_input().as_bytes());
            hasher.update(b"\n");
        }
        format!("{}:{}", CHECKSUM_VERSION, hex::encode(hasher.finalize()))
    }

    /// `<version>:<sha256 hex>` over the content of all changes.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Whether `checksum`, recorded for an earlier run, is accepted for this change set.
    pub fn accepts_checksum(&self, checksum: &str) -> bool {
        checksum == self.checksum
            || self.valid_checksums.iter().any(|valid| {
                valid.eq_ignore_ascii_case("ANY") || valid.eq_ignore_ascii_case(checksum)
            })
    }

    /// Whether this change set applies to `dialect`.
    pub fn runs_on(&self, dialect: Dialect) -> bool {
        let matches = |name: &str| {
            name == "all" || Dialect::from_backend_name(name) == Some(dialect)
        };
        let (excluded, included): (Vec<&String>, Vec<&String>) =
            self.dbms.iter().partition(|name| name.starts_with('!'));
        if excluded
            .iter()
            .any(|name| matches(name.trim_start_matches('!')))
        {
            return false;
        }
        included.is_empty() || included.iter().any(|name| matches(name.as_str()))
    }

    /// Whether this change set runs under the runtime `contexts`.
    pub fn matches_contexts(&self, contexts: &Contexts) -> bool {
        self.contexts.matches(contexts)
    }

    /// Description stored with the change set, built from its changes.
    pub fn description(&self) -> String {
        self.changes
            .iter()
            .map(Change::description)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A fully loaded changelog with its includes resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLog {
    path: String,
    change_sets: Vec<ChangeSet>,
}

impl ChangeLog {
    /// Load the changelog at `path` and every changelog it includes.
    pub fn load(path: &str, accessor: &CompositeResourceAccessor) -> Result<Self, EngineError> {
        let path = normalize_path(path);
        let mut loader = Loader {
            accessor,
            stack: vec![],
            seen: HashSet::new(),
            change_sets: vec![],
        };
        loader.load(&path)?;
        Ok(Self {
            path,
            change_sets: loader.change_sets,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn change_sets(&self) -> &[ChangeSet] {
        &self.change_sets
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Format {
    Xml,
    Yaml,
    Json,
    FormattedSql,
}

impl Format {
    fn detect(path: &str) -> Option<Self> {
        let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match extension.as_str() {
            "xml" => Some(Format::Xml),
            "yaml" | "yml" => Some(Format::Yaml),
            "json" => Some(Format::Json),
            "sql" => Some(Format::FormattedSql),
            _ => None,
        }
    }
}

fn parse_entries(format: Format, content: &str) -> Result<Vec<EntryDocument>, String> {
    match format {
        Format::Xml => xml::from_xml(content).map(|document| document.database_change_log),
        Format::Yaml => document::from_yaml(content).map(|document| document.database_change_log),
        Format::Json => document::from_json(content).map(|document| document.database_change_log),
        Format::FormattedSql => {
            if !formatted_sql::is_formatted_sql(content) {
                return Err("missing `--liquibase formatted sql` header".to_string());
            }
            Ok(formatted_sql::parse(content)?
                .into_iter()
                .map(|change_set| EntryDocument {
                    change_set: Some(change_set),
                    include: None,
                    other: Default::default(),
                })
                .collect())
        }
    }
}

struct Loader<'a> {
    accessor: &'a CompositeResourceAccessor,
    /// Changelogs currently being loaded, to detect include cycles.
    stack: Vec<String>,
    seen: HashSet<ChangeSetId>,
    change_sets: Vec<ChangeSet>,
}

impl Loader<'_> {
    fn load(&mut self, path: &str) -> Result<(), EngineError> {
        if self.stack.iter().any(|loading| loading == path) {
            return Err(EngineError::IncludeCycle {
                path: path.to_string(),
            });
        }
        let parse_error = |message: String| EngineError::Parse {
            path: path.to_string(),
            message,
        };
        let resource = self.accessor.load(path)?;
        let format = Format::detect(path).ok_or_else(|| {
            parse_error(
                "unsupported changelog format, expected .xml, .yaml, .yml, .json or .sql"
                    .to_string(),
            )
        })?;
        tracing::debug!("Loading changelog [{}] from {}", path, resource.source);
        let entries = parse_entries(format, &resource.content).map_err(parse_error)?;

        self.stack.push(path.to_string());
        let result = entries
            .into_iter()
            .try_for_each(|entry| self.load_entry(path, entry));
        self.stack.pop();
        result
    }

    fn load_entry(&mut self, path: &str, entry: EntryDocument) -> Result<(), EngineError> {
        if let Some(include) = entry.include {
            let included = if include.relative_to_changelog_file {
                resolve_relative(path, &include.file)
            } else {
                normalize_path(&include.file)
            };
            self.load(&included)?;
        }
        if let Some(document) = entry.change_set {
            let change_set = self.convert_change_set(path, document)?;
            if !self.seen.insert(change_set.id.clone()) {
                return Err(EngineError::DuplicateChangeSet(change_set.id));
            }
            self.change_sets.push(change_set);
        }
        for key in entry.other.keys() {
            tracing::warn!("Ignoring unsupported changelog entry [{}] in [{}]", key, path);
        }
        Ok(())
    }

    fn convert_change_set(
        &self,
        path: &str,
        document: ChangeSetDocument,
    ) -> Result<ChangeSet, EngineError> {
        let id = ChangeSetId::new(document.id.to_string(), document.author, path);
        let expression = document.context.unwrap_or_default();
        let contexts =
            ContextExpression::parse(&expression).map_err(|message| EngineError::InvalidContexts {
                expression: expression.clone(),
                message,
            })?;
        let mut changes = Vec::with_capacity(document.changes.len());
        for change in document.changes {
            changes.push(self.convert_change(path, &id, change)?);
        }

        let mut change_set = ChangeSet::new(id, changes);
        change_set.contexts = contexts;
        change_set.run_always = document.run_always;
        change_set.run_on_change = document.run_on_change;
        change_set.comment = document.comment;
        change_set.dbms = document
            .dbms
            .map(|dbms| {
                dbms.split(',')
                    .map(|name| name.trim().to_lowercase())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        change_set.valid_checksums = document
            .valid_check_sum
            .map(|checksums| checksums.into_vec())
            .unwrap_or_default();
        Ok(change_set)
    }

    fn convert_change(
        &self,
        path: &str,
        id: &ChangeSetId,
        document: ChangeDocument,
    ) -> Result<Change, EngineError> {
        let invalid = |message: String| EngineError::InvalidChange {
            change_set: id.clone(),
            message,
        };
        let mut changes = Vec::new();
        if let Some(sql) = document.sql {
            changes.push(Change::Sql(match sql {
                SqlDocument::Text(sql) => SqlChange::new(sql),
                SqlDocument::Full(body) => SqlChange {
                    sql: body.sql,
                    split_statements: body.split_statements.unwrap_or(true),
                    strip_comments: body.strip_comments.unwrap_or(false),
                    end_delimiter: body.end_delimiter,
                },
            }));
        }
        if let Some(sql_file) = document.sql_file {
            let file = if sql_file.relative_to_changelog_file {
                resolve_relative(path, &sql_file.path)
            } else {
                normalize_path(&sql_file.path)
            };
            let resource = self.accessor.load(&file)?;
            changes.push(Change::SqlFile(SqlFileChange {
                path: file,
                sql: resource.content,
                split_statements: sql_file.split_statements.unwrap_or(true),
                strip_comments: sql_file.strip_comments.unwrap_or(false),
                end_delimiter: sql_file.end_delimiter,
            }));
        }
        if let Some(table) = document.create_table {
            let columns = column_specs(table.columns).map_err(&invalid)?;
            if columns.is_empty() {
                return Err(invalid(format!(
                    "createTable [{}] without columns",
                    table.table_name
                )));
            }
            changes.push(Change::CreateTable(CreateTableChange {
                table_name: table.table_name,
                columns,
            }));
        }
        if let Some(table) = document.drop_table {
            changes.push(Change::DropTable(DropTableChange {
                table_name: table.table_name,
                cascade_constraints: table.cascade_constraints,
            }));
        }
        if let Some(table) = document.add_column {
            let columns = column_specs(table.columns).map_err(&invalid)?;
            if columns.is_empty() {
                return Err(invalid(format!(
                    "addColumn on [{}] without columns",
                    table.table_name
                )));
            }
            changes.push(Change::AddColumn(AddColumnChange {
                table_name: table.table_name,
                columns,
            }));
        }
        if let Some(index) = document.create_index {
            if index.columns.is_empty() {
                return Err(invalid(format!(
                    "createIndex [{}] without columns",
                    index.index_name
                )));
            }
            changes.push(Change::CreateIndex(CreateIndexChange {
                index_name: index.index_name,
                table_name: index.table_name,
                unique: index.unique,
                columns: index
                    .columns
                    .into_iter()
                    .map(|item| item.column.name)
                    .collect(),
            }));
        }
        if let Some(insert) = document.insert {
            if insert.columns.is_empty() {
                return Err(invalid(format!(
                    "insert into [{}] without columns",
                    insert.table_name
                )));
            }
            changes.push(Change::Insert(InsertChange {
                table_name: insert.table_name,
                columns: insert
                    .columns
                    .into_iter()
                    .map(|item| {
                        Ok(ColumnEntry {
                            value: column_value(&item.column)?,
                            name: item.column.name,
                        })
                    })
                    .collect::<Result<_, String>>()
                    .map_err(&invalid)?,
            }));
        }
        if let Some(unknown) = document.other.keys().next() {
            return Err(invalid(format!("unsupported change type [{}]", unknown)));
        }
        match changes.len() {
            1 => Ok(changes.remove(0)),
            0 => Err(invalid("empty change".to_string())),
            _ => Err(invalid(
                "a change list item must hold exactly one change".to_string(),
            )),
        }
    }
}

fn column_value(column: &ColumnDocument) -> Result<Option<ColumnValue>, String> {
    if let Some(value) = &column.value {
        return Ok(Some(ColumnValue::Text(value.to_string())));
    }
    if let Some(value) = &column.value_numeric {
        return ColumnValue::numeric(&value.to_string())
            .map(Some)
            .map_err(|e| format!("column [{}]: {}", column.name, e));
    }
    if let Some(value) = column.value_boolean {
        return Ok(Some(ColumnValue::Boolean(value)));
    }
    Ok(column.value_computed.clone().map(ColumnValue::Computed))
}

fn default_value(column: &ColumnDocument) -> Result<Option<ColumnValue>, String> {
    if let Some(value) = &column.default_value {
        return Ok(Some(ColumnValue::Text(value.to_string())));
    }
    if let Some(value) = &column.default_value_numeric {
        return ColumnValue::numeric(&value.to_string())
            .map(Some)
            .map_err(|e| format!("default of column [{}]: {}", column.name, e));
    }
    if let Some(value) = column.default_value_boolean {
        return Ok(Some(ColumnValue::Boolean(value)));
    }
    Ok(column.default_value_computed.clone().map(ColumnValue::Computed))
}

fn column_specs(items: Vec<ColumnItemDocument>) -> Result<Vec<ColumnSpec>, String> {
    items
        .into_iter()
        .map(|item| {
            let column = item.column;
            let column_type = column
                .column_type
                .clone()
                .filter(|column_type| !column_type.trim().is_empty())
                .ok_or_else(|| format!("column [{}] has no type", column.name))?;
            let constraints = column.constraints.as_ref();
            let defaults = ColumnConstraints::default();
            Ok(ColumnSpec {
                default: default_value(&column)?,
                auto_increment: column.auto_increment,
                constraints: ColumnConstraints {
                    primary_key: constraints
                        .and_then(|c| c.primary_key)
                        .unwrap_or(defaults.primary_key),
                    nullable: constraints
                        .and_then(|c| c.nullable)
                        .unwrap_or(defaults.nullable),
                    unique: constraints.and_then(|c| c.unique).unwrap_or(defaults.unique),
                },
                column_type,
                name: column.name,
            })
        })
        .collect()
}

/// Collapse `.` and `..` segments and drop a `classpath:` prefix.
fn normalize_path(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_prefix("classpath:").unwrap_or(path);
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            segment => segments.push(segment),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Resolve `file` against the directory of the changelog at `changelog`.
fn resolve_relative(changelog: &str, file: &str) -> String {
    match changelog.rsplit_once('/') {
        Some((dir, _)) => normalize_path(&format!("{}/{}", dir, file)),
        None => normalize_path(file),
    }
}
