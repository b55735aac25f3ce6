use super::config_tree::ConfigTree;

/// Root of the changelog configuration in the configuration tree.
pub const CONFIG_PREFIX: &str = "org.seedstack.liquibase";
/// List of changeset identifiers, in the order they are applied.
pub const CHANGESETS_KEY: &str = "changesets";

/// One configured migration unit: which changelog goes to which datasource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetConfig {
    /// The identifier under `changeset.<name>`.
    pub name: String,
    /// Key into the datasource registry.
    pub datasource: String,
    /// Path of the changelog, resolved through the resource accessors.
    pub changelog: String,
    /// Comma separated execution contexts. Empty runs every change set.
    pub contexts: String,
    /// Abort startup when this changeset fails. Defaults to `true`.
    pub fail_on_error: bool,
}

impl ChangesetConfig {
    /// Read the entry `changeset.<name>` of the changelog subtree.
    ///
    /// Missing `datasource` and `changelog` keys are read as empty strings and fail
    /// later, when they are resolved.
    pub fn parse(tree: &ConfigTree, name: &str) -> Self {
        let key = |field: &str| format!("changeset.{}.{}", name, field);
        let fail_on_error = match tree.get_bool(&key("failOnError")) {
            Ok(value) => value.unwrap_or(true),
            Err(raw) => {
                tracing::warn!(
                    "Invalid failOnError value [{}] for changeset [{}], using true.",
                    raw,
                    name
                );
                true
            }
        };
        Self {
            name: name.to_string(),
            datasource: tree.get_str(&key("datasource")).unwrap_or_default(),
            changelog: tree.get_str(&key("changelog")).unwrap_or_default(),
            contexts: tree.get_str(&key("contexts")).unwrap_or_default(),
            fail_on_error,
        }
    }
}

/// All changesets to apply at startup, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesetPlan {
    pub changesets: Vec<ChangesetConfig>,
}

impl ChangesetPlan {
    /// Read the plan from the changelog subtree (the content of `org.seedstack.liquibase`).
    pub fn from_tree(tree: &ConfigTree) -> Self {
        let changesets = tree
            .get_list(CHANGESETS_KEY)
            .iter()
            .map(|name| ChangesetConfig::parse(tree, name))
            .collect();
        Self { changesets }
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangesetConfig> {
        self.changesets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(raw: &str) -> ChangesetPlan {
        let tree = ConfigTree::new(raw.parse::<toml::Table>().unwrap());
        ChangesetPlan::from_tree(&tree.subset(CONFIG_PREFIX))
    }

    #[test]
    fn test_plan_in_listed_order() {
        let plan = plan(
            r#"
[org.seedstack.liquibase]
changesets = "b, a"
changeset.a.datasource = "ds1"
changeset.a.changelog = "db/a.yaml"
changeset.a.contexts = "test"
changeset.b.datasource = "ds2"
changeset.b.changelog = "db/b.yaml"
changeset.b.failOnError = false
"#,
        );
        assert_eq!(plan.len(), 2);
        let b = &plan.changesets[0];
        assert_eq!(b.name, "b");
        assert_eq!(b.datasource, "ds2");
        assert!(!b.fail_on_error);
        let a = &plan.changesets[1];
        assert_eq!(a.changelog, "db/a.yaml");
        assert_eq!(a.contexts, "test");
        assert!(a.fail_on_error, "failOnError defaults to true");
    }

    #[test]
    fn test_missing_keys_parse_as_empty() {
        let plan = plan("[org.seedstack.liquibase]\nchangesets = [\"ghost\"]\n");
        assert_eq!(
            plan.changesets[0],
            ChangesetConfig {
                name: "ghost".to_string(),
                datasource: String::new(),
                changelog: String::new(),
                contexts: String::new(),
                fail_on_error: true,
            }
        );
    }

    #[test]
    fn test_invalid_fail_on_error_defaults_to_true() {
        let plan = plan(
            "[org.seedstack.liquibase]\nchangesets = \"a\"\nchangeset.a.failOnError = \"sometimes\"\n",
        );
        assert!(plan.changesets[0].fail_on_error);
    }

    #[test]
    fn test_empty_plan() {
        assert!(plan("").is_empty());
        assert!(plan("[org.seedstack.liquibase]\nchangesets = \" , \"\n").is_empty());
    }
}
