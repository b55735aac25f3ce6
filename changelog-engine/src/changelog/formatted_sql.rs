//! Formatted SQL changelogs.
//!
//! ```sql
//! --liquibase formatted sql
//!
//! --changeset alice:1 context:"prod and !eu" runOnChange:true
//! --comment: Departments
//! CREATE TABLE DEPARTMENT (ID INT PRIMARY KEY, NAME VARCHAR(255));
//! --rollback DROP TABLE DEPARTMENT;
//! ```
//!
//! Every `--changeset` header starts a change set holding one `sql` change made of
//! the lines up to the next header. `--rollback` lines are ignored.

use std::collections::BTreeMap;

use super::document::{
    ChangeDocument, ChangeSetDocument, OneOrMany, Scalar, SqlBodyDocument, SqlDocument,
};

const HEADER: &str = "liquibase formatted sql";

/// Whether `content` declares itself a formatted SQL changelog on its first non blank line.
pub(super) fn is_formatted_sql(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(comment_body)
        .map(|body| body.eq_ignore_ascii_case(HEADER))
        .unwrap_or(false)
}

/// `-- text` -> `text`
fn comment_body(line: &str) -> Option<&str> {
    line.trim().strip_prefix("--").map(str::trim)
}

/// The value of a `--keyword: value` line, or of a `--keyword value` line when
/// `allow_space` is set.
fn directive<'a>(line: &'a str, keyword: &str, allow_space: bool) -> Option<&'a str> {
    let body = comment_body(line)?;
    if !body
        .get(..keyword.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
    {
        return None;
    }
    let rest = &body[keyword.len()..];
    if rest.is_empty() && allow_space {
        return Some("");
    }
    if let Some(value) = rest.strip_prefix(':') {
        return Some(value.trim());
    }
    if allow_space && rest.starts_with(char::is_whitespace) {
        return Some(rest.trim());
    }
    None
}

/// Split a header into whitespace separated words. Double quotes group words.
fn words(header: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quoted = false;
    for c in header.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if quoted {
        return Err("unterminated quote in changeset header".to_string());
    }
    if !word.is_empty() {
        words.push(word);
    }
    Ok(words)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("invalid boolean [{}] for [{}]", value, key)),
    }
}

struct Pending {
    document: ChangeSetDocument,
    body: SqlBodyDocument,
    lines: Vec<String>,
}

impl Pending {
    fn from_header(header: &str) -> Result<Self, String> {
        let words = words(header)?;
        let mut words = words.into_iter();
        let identity = words
            .next()
            .ok_or_else(|| "changeset header without author:id".to_string())?;
        let (author, id) = identity
            .split_once(':')
            .filter(|(author, id)| !author.is_empty() && !id.is_empty())
            .ok_or_else(|| format!("invalid changeset identity [{}], expected author:id", identity))?;

        let mut document = ChangeSetDocument {
            id: Scalar::Text(id.to_string()),
            author: author.to_string(),
            context: None,
            run_always: false,
            run_on_change: false,
            comment: None,
            dbms: None,
            valid_check_sum: None,
            changes: vec![],
        };
        let mut body = SqlBodyDocument {
            sql: String::new(),
            split_statements: None,
            strip_comments: None,
            end_delimiter: None,
        };
        for word in words {
            let (key, value) = word
                .split_once(':')
                .ok_or_else(|| format!("invalid changeset attribute [{}]", word))?;
            match key {
                "context" | "contexts" => document.context = Some(value.to_string()),
                "runAlways" => document.run_always = parse_bool(key, value)?,
                "runOnChange" => document.run_on_change = parse_bool(key, value)?,
                "splitStatements" => body.split_statements = Some(parse_bool(key, value)?),
                "stripComments" => body.strip_comments = Some(parse_bool(key, value)?),
                "endDelimiter" => body.end_delimiter = Some(value.to_string()),
                "dbms" => document.dbms = Some(value.to_string()),
                // Attributes without meaning here, like failOnError or labels.
                _ => tracing::debug!("Ignoring changeset attribute [{}]", key),
            }
        }
        Ok(Self {
            document,
            body,
            lines: vec![],
        })
    }

    fn finish(mut self) -> ChangeSetDocument {
        self.body.sql = self.lines.join("\n").trim().to_string();
        self.document.changes.push(ChangeDocument {
            sql: Some(SqlDocument::Full(self.body)),
            sql_file: None,
            create_table: None,
            drop_table: None,
            add_column: None,
            create_index: None,
            insert: None,
            other: BTreeMap::new(),
        });
        self.document
    }

    fn add_valid_checksum(&mut self, checksum: &str) {
        let mut checksums = self
            .document
            .valid_check_sum
            .take()
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        checksums.push(checksum.to_string());
        self.document.valid_check_sum = Some(OneOrMany::Many(checksums));
    }
}

/// Parse a formatted SQL changelog into change set documents.
pub(super) fn parse(content: &str) -> Result<Vec<ChangeSetDocument>, String> {
    let mut change_sets = Vec::new();
    let mut current: Option<Pending> = None;
    let mut in_rollback_block = false;

    for (number, line) in content.lines().enumerate() {
        if let Some(header) = directive(line, "changeset", true) {
            if let Some(pending) = current.take() {
                change_sets.push(pending.finish());
            }
            current = Some(
                Pending::from_header(header)
                    .map_err(|message| format!("line {}: {}", number + 1, message))?,
            );
            in_rollback_block = false;
            continue;
        }
        if directive(line, "rollback", true).is_some() {
            continue;
        }
        if line.trim().starts_with("/* liquibase rollback") {
            in_rollback_block = true;
            continue;
        }
        if in_rollback_block {
            if line.trim().ends_with("*/") {
                in_rollback_block = false;
            }
            continue;
        }
        match current.as_mut() {
            Some(pending) => {
                if let Some(comment) = directive(line, "comment", false) {
                    pending.document.comment = Some(comment.to_string());
                } else if let Some(checksum) = directive(line, "validCheckSum", false) {
                    pending.add_valid_checksum(checksum);
                } else {
                    pending.lines.push(line.to_string());
                }
            }
            None => {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with("--") {
                    return Err(format!(
                        "line {}: SQL outside of a changeset",
                        number + 1
                    ));
                }
            }
        }
    }
    if let Some(pending) = current.take() {
        change_sets.push(pending.finish());
    }
    Ok(change_sets)
}
