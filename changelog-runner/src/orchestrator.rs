//!
//! The startup sequence: every configured changeset, in order, one at a time.
//!

use changelog_engine::UpdateReport;

use crate::{
    applier::{ChangelogApplier, MigrationOutcome},
    config::ChangesetPlan,
    datasource::ConnectionSource,
    error::{ApplyError, ChangelogError},
};

/// Final state of an attempted changeset.
#[derive(Debug)]
pub enum ChangesetState {
    Applied(UpdateReport),
    /// Failed with `failOnError = false`. Startup went on.
    FailedContinuing(ApplyError),
}

#[derive(Debug)]
pub struct ChangesetResult {
    pub name: String,
    pub changelog: String,
    pub datasource: String,
    pub state: ChangesetState,
}

/// Every changeset the startup sequence attempted, in order.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub changesets: Vec<ChangesetResult>,
}

impl StartupReport {
    pub fn applied(&self) -> impl Iterator<Item = &ChangesetResult> {
        self.changesets
            .iter()
            .filter(|result| matches!(result.state, ChangesetState::Applied(_)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &ChangesetResult> {
        self.changesets
            .iter()
            .filter(|result| matches!(result.state, ChangesetState::FailedContinuing(_)))
    }

    /// Whether every attempted changeset was applied.
    pub fn is_fully_applied(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Apply every changeset of `plan` in listed order.
///
/// A failed changeset with `failOnError = true` ends the sequence with a
/// [ChangelogError]; later changesets are never attempted. Other failures are
/// logged and skipped.
pub async fn apply_changesets(
    plan: &ChangesetPlan,
    source: &dyn ConnectionSource,
    applier: &ChangelogApplier,
) -> Result<StartupReport, ChangelogError> {
    let mut report = StartupReport::default();
    if plan.is_empty() {
        tracing::info!("No changesets configured, nothing to apply");
        return Ok(report);
    }

    for config in plan.iter() {
        let state = match applier.apply(config, source).await {
            MigrationOutcome::Applied(update) => {
                tracing::debug!(
                    "Changeset [{}] applied: {} executed, {} reran, {} already ran, {} skipped",
                    config.name,
                    update.executed.len(),
                    update.reran.len(),
                    update.already_ran.len(),
                    update.skipped.len()
                );
                ChangesetState::Applied(update)
            }
            MigrationOutcome::Failed {
                cause,
                datasource,
                changelog,
            } => {
                if config.fail_on_error {
                    return Err(ChangelogError::apply_changes(
                        &config.name,
                        changelog,
                        datasource,
                        cause,
                    ));
                }
                tracing::warn!(
                    error = %cause,
                    "Changes [{}] not fully applied to the datasource [{}].",
                    changelog,
                    datasource
                );
                ChangesetState::FailedContinuing(cause)
            }
        };
        report.changesets.push(ChangesetResult {
            name: config.name.clone(),
            changelog: config.changelog.clone(),
            datasource: config.datasource.clone(),
            state,
        });
    }

    tracing::info!(
        "Startup changesets done: {} applied, {} failed",
        report.applied().count(),
        report.failed().count()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        error::ErrorCode,
        testing::{changeset, resources, CountingSource, SqliteFile, DEPT_CHANGELOG},
    };
    use changelog_engine::ChangelogEngine;

    fn applier() -> ChangelogApplier {
        ChangelogApplier::new(
            Arc::new(ChangelogEngine::new()),
            Arc::new(resources(&[("db/dept.yaml", DEPT_CHANGELOG)])),
        )
    }

    #[tokio::test]
    async fn test_empty_plan_is_a_no_op() {
        let source = CountingSource::new();
        let report = apply_changesets(&ChangesetPlan::default(), &source, &applier())
            .await
            .unwrap();
        assert!(report.changesets.is_empty());
        assert!(report.is_fully_applied());
        assert_eq!(source.gets(), 0);
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_the_sequence() {
        let db = SqliteFile::new();
        let source = CountingSource::new().with("ds1", db.url());
        let plan = ChangesetPlan {
            changesets: vec![
                changeset("a", "ds1", "db/missing.yaml"),
                changeset("b", "ds1", "db/dept.yaml"),
            ],
        };
        let error = apply_changesets(&plan, &source, &applier())
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::ApplyChanges);
        assert_eq!(error.changeset, "a");
        assert_eq!(error.changelog, "db/missing.yaml");
        assert_eq!(error.datasource, "ds1");
        assert!(matches!(error.source, ApplyError::ResourceLoad(_)));
        // b was never attempted.
        assert_eq!(source.gets(), 1);
    }

    #[tokio::test]
    async fn test_non_fatal_failure_continues() {
        let db = SqliteFile::new();
        let source = CountingSource::new().with("ds1", db.url());
        let mut a = changeset("a", "nowhere", "db/dept.yaml");
        a.fail_on_error = false;
        let plan = ChangesetPlan {
            changesets: vec![a, changeset("b", "ds1", "db/dept.yaml")],
        };
        let report = apply_changesets(&plan, &source, &applier()).await.unwrap();
        assert_eq!(report.changesets.len(), 2);
        assert!(!report.is_fully_applied());
        assert_eq!(report.failed().next().map(|r| r.name.as_str()), Some("a"));
        assert_eq!(report.applied().next().map(|r| r.name.as_str()), Some("b"));
    }
}
