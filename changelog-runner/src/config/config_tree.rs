//!
//! Dotted path access to free-form configuration tables.
//!
//! `a.b.c` resolves through nested tables (`[a.b] c = ...`) as well as through
//! keys that contain dots themselves (`[a] "b.c" = ...`).
//!

use toml::{Table, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    table: Table,
}

fn lookup<'a>(table: &'a Table, path: &str) -> Option<&'a Value> {
    if let Some(value) = table.get(path) {
        return Some(value);
    }
    // Try every split point, the longest literal key first.
    let mut split_points = path.match_indices('.').map(|(i, _)| i).collect::<Vec<_>>();
    split_points.reverse();
    for index in split_points {
        let (head, rest) = (&path[..index], &path[index + 1..]);
        if let Some(Value::Table(child)) = table.get(head) {
            if let Some(value) = lookup(child, rest) {
                return Some(value);
            }
        }
    }
    None
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Datetime(d) => Some(d.to_string()),
        Value::Array(_) | Value::Table(_) => None,
    }
}

impl ConfigTree {
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The subtree below `prefix`. Empty if there is none.
    pub fn subset(&self, prefix: &str) -> ConfigTree {
        match lookup(&self.table, prefix) {
            Some(Value::Table(table)) => ConfigTree::new(table.clone()),
            _ => ConfigTree::default(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.table, path)
    }

    /// A scalar value as a string. Numbers and booleans are converted.
    pub fn get_str(&self, path: &str) -> Option<String> {
        self.get(path).and_then(scalar_to_string)
    }

    /// A list, written either as an array or as a comma separated string.
    /// Entries are trimmed and empty entries dropped.
    pub fn get_list(&self, path: &str) -> Vec<String> {
        let raw: Vec<String> = match self.get(path) {
            Some(Value::Array(values)) => values.iter().filter_map(scalar_to_string).collect(),
            Some(value) => scalar_to_string(value)
                .map(|s| s.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            None => vec![],
        };
        raw.into_iter()
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect()
    }

    /// A boolean, written either as a TOML boolean or as `"true"`/`"false"`.
    /// `Err` carries the raw value when it is neither.
    pub fn get_bool(&self, path: &str) -> Result<Option<bool>, String> {
        match self.get(path) {
            None => Ok(None),
            Some(Value::Boolean(b)) => Ok(Some(*b)),
            Some(value) => {
                let raw = scalar_to_string(value).unwrap_or_else(|| value.to_string());
                match raw.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Some(true)),
                    "false" => Ok(Some(false)),
                    _ => Err(raw),
                }
            }
        }
    }
}

impl From<Table> for ConfigTree {
    fn from(table: Table) -> Self {
        Self::new(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(raw: &str) -> ConfigTree {
        ConfigTree::new(raw.parse::<Table>().unwrap())
    }

    #[test]
    fn test_nested_and_dotted_keys() {
        let tree = tree(
            r#"
[org.seedstack.liquibase]
changesets = "a, b"
changeset.a.datasource = "ds1"
"changeset.b.datasource" = "ds2"

[org.seedstack.liquibase.changeset.c]
datasource = "ds3"
"#,
        );
        let liquibase = tree.subset("org.seedstack.liquibase");
        assert!(!liquibase.is_empty());
        assert_eq!(liquibase.get_str("changeset.a.datasource").as_deref(), Some("ds1"));
        assert_eq!(liquibase.get_str("changeset.b.datasource").as_deref(), Some("ds2"));
        assert_eq!(liquibase.get_str("changeset.c.datasource").as_deref(), Some("ds3"));
        assert_eq!(liquibase.get_str("changeset.d.datasource"), None);
        assert!(tree.subset("org.missing").is_empty());
    }

    #[test]
    fn test_lists() {
        let tree = tree("a = \" x, ,y \"\nb = [\"x\", \" y \"]\nc = \"\"\n");
        assert_eq!(tree.get_list("a"), vec!["x", "y"]);
        assert_eq!(tree.get_list("b"), vec!["x", "y"]);
        assert!(tree.get_list("c").is_empty());
        assert!(tree.get_list("missing").is_empty());
    }

    #[test]
    fn test_booleans() {
        let tree = tree("a = false\nb = \"TRUE\"\nc = \"nope\"\nd = 1\n");
        assert_eq!(tree.get_bool("a"), Ok(Some(false)));
        assert_eq!(tree.get_bool("b"), Ok(Some(true)));
        assert_eq!(tree.get_bool("c"), Err("nope".to_string()));
        assert_eq!(tree.get_bool("d"), Err("1".to_string()));
        assert_eq!(tree.get_bool("missing"), Ok(None));
    }
}
