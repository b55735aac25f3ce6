//! # changelog-runner
//!
//! Applies the changelogs configured under `org.seedstack.liquibase` to their
//! datasources when an application starts.
//!
//! ```toml
//! [datasources.ds1]
//! url = "sqlite://app.db?mode=rwc"
//!
//! [org.seedstack.liquibase]
//! changesets = "dept"
//! changeset.dept.datasource = "ds1"
//! changeset.dept.changelog = "db/dept.yaml"
//! changeset.dept.failOnError = true
//! ```
//!
//! Changesets run sequentially in listed order, each on its own connection and in
//! its own transaction. A failing changeset aborts startup with a [ChangelogError]
//! unless its `failOnError` is `false`, in which case a warning is logged and the
//! next changeset runs.

mod applier;
pub mod config;
mod datasource;
mod error;
mod orchestrator;
mod plugin;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracing;

pub use applier::{ChangelogApplier, MigrationOutcome};
pub use config::{ChangesetConfig, ChangesetPlan, ConfigReadError, ConfigToml};
pub use datasource::{ConnectionError, ConnectionSource, DataSourceRegistry};
pub use error::{ApplyError, ChangelogError, ErrorCode};
pub use orchestrator::{apply_changesets, ChangesetResult, ChangesetState, StartupReport};
pub use plugin::{ChangelogPlugin, ChangelogPluginBuilder, PLUGIN_NAME, REQUIRED_COMPONENTS};
