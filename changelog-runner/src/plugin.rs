//!
//! The changelog runner as a startup component of a host application.
//!
//! The host builds the plugin from its configuration, registers optional
//! integrations that must start after it, and calls [ChangelogPlugin::init] once
//! its datasources are ready.
//!

use std::sync::Arc;

use changelog_engine::{
    CallerResourceAccessor, ChangeLog, ChangelogEngine, CompositeResourceAccessor,
    EmbeddedResourceAccessor, EngineError, FileSystemResourceAccessor, MigrationEngine,
    PendingChangeSet,
};

use crate::{
    applier::ChangelogApplier,
    config::{ChangesetConfig, ChangesetPlan, ConfigToml},
    datasource::ConnectionSource,
    error::{ApplyError, ChangelogError},
    orchestrator::{apply_changesets, StartupReport},
};

/// Name the plugin is registered under.
pub const PLUGIN_NAME: &str = "seed-liquibase-plugin";

/// Components that must be initialized before the plugin.
pub const REQUIRED_COMPONENTS: [&str; 2] = ["datasource-registry", "application-config"];

/// Builds a [ChangelogPlugin] with custom resources or a custom engine.
pub struct ChangelogPluginBuilder {
    config: ConfigToml,
    embedded: EmbeddedResourceAccessor,
    lookup: Option<CallerResourceAccessor>,
    engine: Option<Arc<dyn MigrationEngine>>,
}

impl ChangelogPluginBuilder {
    /// Serve `content` for `path` before anything on disk.
    pub fn embedded(mut self, path: &str, content: &'static str) -> Self {
        self.embedded.insert(path, content);
        self
    }

    /// Replace the configured search paths with a lookup of the host application.
    pub fn lookup(mut self, lookup: CallerResourceAccessor) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn MigrationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Resources are looked up in embedded files, then below `resources.base_dir`,
    /// then through the caller lookup (the configured search paths by default).
    pub fn build(self) -> ChangelogPlugin {
        let lookup = self.lookup.unwrap_or_else(|| {
            CallerResourceAccessor::search_paths(self.config.resources.search_paths.clone())
        });
        let resources = CompositeResourceAccessor::new()
            .with(self.embedded)
            .with(FileSystemResourceAccessor::new(
                self.config.resources.base_dir.clone(),
            ))
            .with(lookup);
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(ChangelogEngine::new()));
        ChangelogPlugin {
            plan: self.config.changeset_plan(),
            applier: ChangelogApplier::new(engine, Arc::new(resources)),
            dependents: vec![],
        }
    }
}

/// Applies the configured changesets at startup.
#[derive(Debug)]
pub struct ChangelogPlugin {
    plan: ChangesetPlan,
    applier: ChangelogApplier,
    dependents: Vec<String>,
}

impl ChangelogPlugin {
    /// A plugin with default resources and the bundled engine.
    pub fn new(config: ConfigToml) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ConfigToml) -> ChangelogPluginBuilder {
        ChangelogPluginBuilder {
            config,
            embedded: EmbeddedResourceAccessor::new(),
            lookup: None,
            engine: None,
        }
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn required_components(&self) -> &'static [&'static str] {
        &REQUIRED_COMPONENTS
    }

    /// Register an integration that must start after the changelogs are applied,
    /// for example an ORM that validates the schema.
    pub fn register_dependent(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.dependents.contains(&name) {
            tracing::debug!("Component [{}] depends on {}", name, PLUGIN_NAME);
            self.dependents.push(name);
        }
    }

    pub fn dependent_components(&self) -> &[String] {
        &self.dependents
    }

    pub fn plan(&self) -> &ChangesetPlan {
        &self.plan
    }

    pub fn applier(&self) -> &ChangelogApplier {
        &self.applier
    }

    /// Run the startup sequence.
    pub async fn init(
        &self,
        source: &dyn ConnectionSource,
    ) -> Result<StartupReport, ChangelogError> {
        apply_changesets(&self.plan, source, &self.applier).await
    }

    /// Pending change sets of every configured changeset. Nothing is written.
    pub async fn status(
        &self,
        source: &dyn ConnectionSource,
    ) -> Vec<(ChangesetConfig, Result<Vec<PendingChangeSet>, ApplyError>)> {
        let mut statuses = Vec::with_capacity(self.plan.len());
        for config in self.plan.iter() {
            let pending = self.applier.pending(config, source).await;
            statuses.push((config.clone(), pending));
        }
        statuses
    }

    /// Load and parse every configured changelog without touching a database.
    pub fn validate(&self) -> Vec<(ChangesetConfig, Result<ChangeLog, EngineError>)> {
        self.plan
            .iter()
            .map(|config| {
                let changelog = ChangeLog::load(&config.changelog, self.applier.resources());
                (config.clone(), changelog)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{count_rows, CountingSource, SqliteFile, DEPT_CHANGELOG};

    fn config() -> ConfigToml {
        ConfigToml::from_str_with_defaults(
            r#"
[org.seedstack.liquibase]
changesets = "dept"
changeset.dept.datasource = "ds1"
changeset.dept.changelog = "classpath:db/dept.yaml"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_descriptor() {
        let mut plugin = ChangelogPlugin::new(config());
        assert_eq!(plugin.name(), "seed-liquibase-plugin");
        assert_eq!(
            plugin.required_components(),
            &["datasource-registry", "application-config"]
        );
        assert!(plugin.dependent_components().is_empty());
        plugin.register_dependent("jpa");
        plugin.register_dependent("jpa");
        assert_eq!(plugin.dependent_components(), &["jpa".to_string()]);
        assert_eq!(plugin.plan().len(), 1);
    }

    #[test]
    fn test_validate_resolves_embedded_changelogs() {
        let plugin = ChangelogPlugin::builder(config())
            .embedded("db/dept.yaml", DEPT_CHANGELOG)
            .build();
        let results = plugin.validate();
        assert_eq!(results.len(), 1);
        let changelog = results[0].1.as_ref().unwrap();
        assert_eq!(changelog.change_sets().len(), 1);

        let missing = ChangelogPlugin::new(config()).validate();
        assert!(missing[0].1.as_ref().unwrap_err().is_resource_error());
    }

    #[tokio::test]
    async fn test_init_then_status() {
        let db = SqliteFile::new();
        let source = CountingSource::new().with("ds1", db.url());
        let plugin = ChangelogPlugin::builder(config())
            .embedded("db/dept.yaml", DEPT_CHANGELOG)
            .build();

        let status = plugin.status(&source).await;
        assert_eq!(status[0].1.as_ref().unwrap().len(), 1);

        let report = plugin.init(&source).await.unwrap();
        assert!(report.is_fully_applied());
        assert_eq!(count_rows(&db.url(), "DEPARTMENT").await, 0);

        let status = plugin.status(&source).await;
        assert!(status[0].1.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_lookup_is_asked_last() {
        let plugin = ChangelogPlugin::builder(config())
            .lookup(CallerResourceAccessor::new("host", |path| {
                Ok((path == "db/dept.yaml").then(|| DEPT_CHANGELOG.to_string()))
            }))
            .build();
        assert_eq!(plugin.applier().resources().len(), 3);
        assert!(plugin.validate()[0].1.is_ok());
    }
}
