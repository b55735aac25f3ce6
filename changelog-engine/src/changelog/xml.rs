//! XML changelogs.
//!
//! ```xml
//! <databaseChangeLog xmlns="http://www.liquibase.org/xml/ns/dbchangelog">
//!     <include file="common.xml" relativeToChangelogFile="true"/>
//!     <changeSet id="1" author="alice" context="!test">
//!         <createTable tableName="DEPARTMENT">
//!             <column name="ID" type="INTEGER">
//!                 <constraints primaryKey="true"/>
//!             </column>
//!         </createTable>
//!     </changeSet>
//! </databaseChangeLog>
//! ```
//!
//! The file is read into a small element tree first, which is then mapped onto
//! the documents shared with the YAML and JSON formats.

use std::collections::BTreeMap;

use quick_xml::{events::Event, Reader};
use serde::de::IgnoredAny;

use super::document::{
    ChangeDocument, ChangeLogDocument, ChangeSetDocument, ColumnDocument, ColumnItemDocument,
    ConstraintsDocument, CreateIndexDocument, DropTableDocument, EntryDocument, IncludeDocument,
    OneOrMany, Scalar, SqlBodyDocument, SqlDocument, SqlFileDocument, TableColumnsDocument,
};

const ROOT: &str = "databaseChangeLog";

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: BTreeMap<String, String>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.get(key).cloned()
    }

    fn required(&self, key: &str) -> Result<String, String> {
        self.attribute(key)
            .ok_or_else(|| format!("<{}> without a {} attribute", self.name, key))
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, String> {
        match self.attributes.get(key).map(|value| value.trim()) {
            None => Ok(None),
            Some(value) if value.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(value) if value.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(value) => Err(format!(
                "invalid boolean [{}] for {} of <{}>",
                value, key, self.name
            )),
        }
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Text content, `None` when blank.
    fn content(&self) -> Option<String> {
        let text = self.text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

fn local_name(name: &[u8]) -> Result<String, String> {
    std::str::from_utf8(name)
        .map(str::to_string)
        .map_err(|e| e.to_string())
}

/// Read `content` into an element tree and return its root.
fn read_tree(content: &str) -> Result<Element, String> {
    let mut reader = Reader::from_str(content);
    let mut stack: Vec<Element> = vec![];
    let mut root = None;

    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {}: {}", position, e))?;
        let opens = matches!(event, Event::Start(_));
        match event {
            Event::Start(start) | Event::Empty(start) => {
                let mut element = Element {
                    name: local_name(start.local_name().as_ref())?,
                    ..Default::default()
                };
                for attribute in start.attributes() {
                    let attribute = attribute.map_err(|e| e.to_string())?;
                    let value = attribute.unescape_value().map_err(|e| e.to_string())?;
                    element.attributes.insert(
                        local_name(attribute.key.local_name().as_ref())?,
                        value.into_owned(),
                    );
                }
                if opens {
                    stack.push(element);
                } else {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| "unbalanced closing tag".to_string())?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                if let Some(element) = stack.last_mut() {
                    element
                        .text
                        .push_str(&text.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(data) => {
                if let Some(element) = stack.last_mut() {
                    element
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if let Some(element) = stack.last() {
        return Err(format!("unclosed element <{}>", element.name));
    }
    root.ok_or_else(|| "empty document".to_string())
}

pub(super) fn from_xml(content: &str) -> Result<ChangeLogDocument, String> {
    let root = read_tree(content)?;
    if root.name != ROOT {
        return Err(format!("root element is <{}>, expected <{}>", root.name, ROOT));
    }
    let database_change_log = root
        .children
        .iter()
        .map(entry)
        .collect::<Result<_, _>>()?;
    Ok(ChangeLogDocument {
        database_change_log,
    })
}

fn entry(element: &Element) -> Result<EntryDocument, String> {
    let mut entry = EntryDocument {
        change_set: None,
        include: None,
        other: BTreeMap::new(),
    };
    match element.name.as_str() {
        "changeSet" => entry.change_set = Some(change_set(element)?),
        "include" => {
            entry.include = Some(IncludeDocument {
                file: element.required("file")?,
                relative_to_changelog_file: element
                    .flag("relativeToChangelogFile")?
                    .unwrap_or(false),
            })
        }
        other => {
            entry.other.insert(other.to_string(), IgnoredAny);
        }
    }
    Ok(entry)
}

fn change_set(element: &Element) -> Result<ChangeSetDocument, String> {
    let mut document = ChangeSetDocument {
        id: Scalar::Text(element.required("id")?),
        author: element.required("author")?,
        context: element
            .attribute("context")
            .or_else(|| element.attribute("contexts")),
        run_always: element.flag("runAlways")?.unwrap_or(false),
        run_on_change: element.flag("runOnChange")?.unwrap_or(false),
        comment: None,
        dbms: element.attribute("dbms"),
        valid_check_sum: None,
        changes: vec![],
    };
    let mut valid_check_sums = vec![];
    for child in &element.children {
        match child.name.as_str() {
            "comment" => document.comment = child.content(),
            "validCheckSum" => valid_check_sums.extend(child.content()),
            "rollback" => {}
            _ => document.changes.push(change(child)?),
        }
    }
    if !valid_check_sums.is_empty() {
        document.valid_check_sum = Some(OneOrMany::Many(valid_check_sums));
    }
    Ok(document)
}

fn empty_change() -> ChangeDocument {
    ChangeDocument {
        sql: None,
        sql_file: None,
        create_table: None,
        drop_table: None,
        add_column: None,
        create_index: None,
        insert: None,
        other: BTreeMap::new(),
    }
}

fn change(element: &Element) -> Result<ChangeDocument, String> {
    let mut change = empty_change();
    match element.name.as_str() {
        "sql" => {
            change.sql = Some(SqlDocument::Full(SqlBodyDocument {
                sql: element.content().unwrap_or_default(),
                split_statements: element.flag("splitStatements")?,
                strip_comments: element.flag("stripComments")?,
                end_delimiter: element.attribute("endDelimiter"),
            }))
        }
        "sqlFile" => {
            change.sql_file = Some(SqlFileDocument {
                path: element.required("path")?,
                relative_to_changelog_file: element
                    .flag("relativeToChangelogFile")?
                    .unwrap_or(false),
                split_statements: element.flag("splitStatements")?,
                strip_comments: element.flag("stripComments")?,
                end_delimiter: element.attribute("endDelimiter"),
            })
        }
        "createTable" => change.create_table = Some(table_columns(element)?),
        "addColumn" => change.add_column = Some(table_columns(element)?),
        "insert" => change.insert = Some(table_columns(element)?),
        "dropTable" => {
            change.drop_table = Some(DropTableDocument {
                table_name: element.required("tableName")?,
                cascade_constraints: element.flag("cascadeConstraints")?.unwrap_or(false),
            })
        }
        "createIndex" => {
            change.create_index = Some(CreateIndexDocument {
                index_name: element.required("indexName")?,
                table_name: element.required("tableName")?,
                unique: element.flag("unique")?.unwrap_or(false),
                columns: columns(element)?,
            })
        }
        other => {
            change.other.insert(other.to_string(), IgnoredAny);
        }
    }
    Ok(change)
}

fn table_columns(element: &Element) -> Result<TableColumnsDocument, String> {
    Ok(TableColumnsDocument {
        table_name: element.required("tableName")?,
        columns: columns(element)?,
    })
}

fn columns(element: &Element) -> Result<Vec<ColumnItemDocument>, String> {
    element
        .children_named("column")
        .map(|column| {
            Ok(ColumnItemDocument {
                column: column_document(column)?,
            })
        })
        .collect()
}

fn column_document(element: &Element) -> Result<ColumnDocument, String> {
    let text = |key: &str| element.attribute(key).map(Scalar::Text);
    let constraints = element
        .children_named("constraints")
        .next()
        .map(|constraints| {
            Ok::<_, String>(ConstraintsDocument {
                primary_key: constraints.flag("primaryKey")?,
                nullable: constraints.flag("nullable")?,
                unique: constraints.flag("unique")?,
            })
        })
        .transpose()?;
    Ok(ColumnDocument {
        name: element.required("name")?,
        column_type: element.attribute("type"),
        // `<column name="NAME">Research</column>` is a value as well.
        value: text("value").or_else(|| element.content().map(Scalar::Text)),
        value_numeric: text("valueNumeric"),
        value_boolean: element.flag("valueBoolean")?,
        value_computed: element.attribute("valueComputed"),
        default_value: text("defaultValue"),
        default_value_numeric: text("defaultValueNumeric"),
        default_value_boolean: element.flag("defaultValueBoolean")?,
        default_value_computed: element.attribute("defaultValueComputed"),
        auto_increment: element.flag("autoIncrement")?.unwrap_or(false),
        constraints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANGELOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<databaseChangeLog
        xmlns="http://www.liquibase.org/xml/ns/dbchangelog"
        xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
        xsi:schemaLocation="http://www.liquibase.org/xml/ns/dbchangelog dbchangelog.xsd">
    <property name="x" value="y"/>
    <include file="common.xml" relativeToChangelogFile="true"/>
    <changeSet id="1" author="alice" context="prod" runOnChange="true">
        <comment>Departments &amp; teams</comment>
        <validCheckSum>ANY</validCheckSum>
        <createTable tableName="DEPARTMENT">
            <column name="ID" type="INTEGER" autoIncrement="true">
                <constraints primaryKey="true" nullable="false"/>
            </column>
            <column name="NAME" type="VARCHAR(255)" defaultValue="none"/>
        </createTable>
        <rollback>
            <dropTable tableName="DEPARTMENT"/>
        </rollback>
    </changeSet>
    <changeSet id="2" author="alice">
        <insert tableName="DEPARTMENT">
            <column name="ID" valueNumeric="1"/>
            <column name="NAME">Research</column>
        </insert>
        <sql splitStatements="false"><![CDATA[UPDATE DEPARTMENT SET NAME = 'R&D' WHERE ID < 2]]></sql>
    </changeSet>
</databaseChangeLog>
"#;

    #[test]
    fn test_xml_document() {
        let entries = from_xml(CHANGELOG).unwrap().database_change_log;
        assert_eq!(entries.len(), 4);
        assert!(entries[0].other.contains_key("property"));
        let include = entries[1].include.as_ref().unwrap();
        assert_eq!(include.file, "common.xml");
        assert!(include.relative_to_changelog_file);

        let first = entries[2].change_set.as_ref().unwrap();
        assert_eq!(first.id.to_string(), "1");
        assert_eq!(first.context.as_deref(), Some("prod"));
        assert!(first.run_on_change);
        assert_eq!(first.comment.as_deref(), Some("Departments & teams"));
        assert_eq!(first.valid_check_sum.clone().unwrap().into_vec(), vec!["ANY"]);
        // The rollback block is not a change.
        assert_eq!(first.changes.len(), 1);
        let table = first.changes[0].create_table.as_ref().unwrap();
        assert_eq!(table.table_name, "DEPARTMENT");
        let id = &table.columns[0].column;
        assert!(id.auto_increment);
        let constraints = id.constraints.as_ref().unwrap();
        assert_eq!(constraints.primary_key, Some(true));
        assert_eq!(constraints.nullable, Some(false));
        assert_eq!(
            table.columns[1].column.default_value.as_ref().unwrap().to_string(),
            "none"
        );

        let second = entries[3].change_set.as_ref().unwrap();
        let insert = second.changes[0].insert.as_ref().unwrap();
        assert_eq!(
            insert.columns[0].column.value_numeric.as_ref().unwrap().to_string(),
            "1"
        );
        assert_eq!(
            insert.columns[1].column.value.as_ref().unwrap().to_string(),
            "Research"
        );
        match second.changes[1].sql.as_ref().unwrap() {
            SqlDocument::Full(body) => {
                assert_eq!(body.sql, "UPDATE DEPARTMENT SET NAME = 'R&D' WHERE ID < 2");
                assert_eq!(body.split_statements, Some(false));
            }
            SqlDocument::Text(_) => panic!("xml sql is always a full body"),
        }
    }

    #[test]
    fn test_invalid_xml() {
        assert!(from_xml("<changeLog/>").unwrap_err().contains("expected <databaseChangeLog>"));
        assert!(from_xml("<databaseChangeLog><changeSet id=\"1\">").is_err());
        assert!(from_xml("<databaseChangeLog><changeSet author=\"a\"/></databaseChangeLog>")
            .unwrap_err()
            .contains("id"));
        assert!(from_xml(
            "<databaseChangeLog><changeSet id=\"1\" author=\"a\" runAlways=\"maybe\"/></databaseChangeLog>"
        )
        .is_err());
    }
}
