//! # Project Settings Repository
//!
//! Lookup of per-project error reporting settings. A missing row resolves to
//! [`ProjectErrorSettings::disabled`]. `upsert` exists for fixtures and
//! administration tooling; the engine itself never writes here.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::project_error_settings::{ActiveModel, Column, Entity as ProjectSettings};
use crate::settings::ProjectErrorSettings;

/// Repository for project error settings
pub struct ProjectSettingsRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ProjectSettingsRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Settings for `project_id`, or the disabled defaults when no row exists.
    pub async fn get(&self, project_id: Uuid) -> Result<ProjectErrorSettings, RepositoryError> {
        let row = ProjectSettings::find_by_id(project_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(row
            .map(ProjectErrorSettings::from)
            .unwrap_or_else(|| ProjectErrorSettings::disabled(project_id)))
    }

    /// Projects with reporting switched on, in stable order for sweeps.
    pub async fn list_enabled_project_ids(&self) -> Result<Vec<Uuid>, RepositoryError> {
        ProjectSettings::find()
            .select_only()
            .column(Column::ProjectId)
            .filter(Column::Enabled.eq(true))
            .order_by_asc(Column::ProjectId)
            .into_tuple::<Uuid>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Insert or replace the settings row for `settings.project_id`.
    pub async fn upsert(
        &self,
        settings: &ProjectErrorSettings,
        now: DateTime<Utc>,
    ) -> Result<ProjectErrorSettings, RepositoryError> {
        let max_issues_per_day = i32::try_from(settings.rate_limit.max_issues_per_day)
            .map_err(|_| RepositoryError::validation_error("max_issues_per_day out of range"))?;
        let min_occurrences = i32::try_from(settings.filters.min_occurrences)
            .map_err(|_| RepositoryError::validation_error("min_occurrences out of range"))?;
        let ts = now.fixed_offset();

        let row = ActiveModel {
            project_id: Set(settings.project_id),
            enabled: Set(settings.enabled),
            tracker_repository: Set(settings.issue_tracker.repository.clone()),
            tracker_token: Set(settings.issue_tracker.token.clone()),
            tracker_labels: Set(Some(JsonValue::from(settings.issue_tracker.labels.clone()))),
            create_issues: Set(settings.issue_tracker.create_issues),
            max_issues_per_day: Set(max_issues_per_day),
            min_occurrences: Set(min_occurrences),
            ignore_patterns: Set(Some(JsonValue::from(
                settings.filters.ignore_patterns.clone(),
            ))),
            status_codes: Set(Some(JsonValue::from(settings.filters.status_codes.clone()))),
            created_at: Set(ts),
            updated_at: Set(ts),
        };

        let stored = ProjectSettings::insert(row)
            .on_conflict(
                OnConflict::column(Column::ProjectId)
                    .update_columns([
                        Column::Enabled,
                        Column::TrackerRepository,
                        Column::TrackerToken,
                        Column::TrackerLabels,
                        Column::CreateIssues,
                        Column::MaxIssuesPerDay,
                        Column::MinOccurrences,
                        Column::IgnorePatterns,
                        Column::StatusCodes,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_with_returning(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        tracing::info!(
            project_id = %stored.project_id,
            enabled = stored.enabled,
            "Project error settings saved"
        );

        Ok(stored.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;
    use migration::{Migrator, MigratorTrait};

    async fn setup_db() -> DatabaseConnection {
        let db = connect("sqlite::memory:", 1).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    #[tokio::test]
    async fn missing_row_is_disabled() {
        let db = setup_db().await;
        let project = Uuid::new_v4();
        let settings = ProjectSettingsRepository::new(&db).get(project).await.unwrap();
        assert_eq!(settings, ProjectErrorSettings::disabled(project));
    }

    #[tokio::test]
    async fn upsert_round_trips_and_lists_enabled() {
        let db = setup_db().await;
        let repo = ProjectSettingsRepository::new(&db);

        let mut enabled = ProjectErrorSettings::disabled(Uuid::new_v4());
        enabled.enabled = true;
        enabled.issue_tracker.repository = Some("acme/web".to_string());
        enabled.issue_tracker.token = Some("ghp_x".to_string());
        enabled.issue_tracker.labels = vec!["bug".to_string()];
        enabled.filters.ignore_patterns = vec!["^ResizeObserver".to_string()];
        enabled.filters.status_codes = vec![500, 503];
        repo.upsert(&enabled, Utc::now()).await.unwrap();

        let disabled = ProjectErrorSettings::disabled(Uuid::new_v4());
        repo.upsert(&disabled, Utc::now()).await.unwrap();

        let loaded = repo.get(enabled.project_id).await.unwrap();
        assert_eq!(loaded, enabled);

        let ids = repo.list_enabled_project_ids().await.unwrap();
        assert_eq!(ids, vec![enabled.project_id]);

        enabled.enabled = false;
        repo.upsert(&enabled, Utc::now()).await.unwrap();
        assert!(repo.list_enabled_project_ids().await.unwrap().is_empty());
    }
}
