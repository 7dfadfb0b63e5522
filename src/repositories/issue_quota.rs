//! # Issue Quota Repository
//!
//! Per-project, per-UTC-day count of tracker issues created. A creation first
//! reserves a slot with an atomic increment; if the increment lands above the
//! cap the slot is released again. Callers release a reserved slot when the
//! tracker create call fails.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::issue_creation_counter::{ActiveModel, Column, Entity as IssueCreationCounter};

/// `YYYY-MM-DD` bucket key for a UTC instant.
pub fn day_bucket(at: DateTime<Utc>) -> String {
    at.date_naive().format("%Y-%m-%d").to_string()
}

/// Repository for the daily issue creation counters
pub struct IssueQuotaRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> IssueQuotaRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Claim one creation slot for the day containing `at`.
    ///
    /// Returns `false` (and leaves the counter unchanged) when the project has
    /// already used `max_per_day` slots.
    pub async fn try_reserve(
        &self,
        project_id: Uuid,
        at: DateTime<Utc>,
        max_per_day: u32,
    ) -> Result<bool, RepositoryError> {
        if max_per_day == 0 {
            return Ok(false);
        }

        let bucket = day_bucket(at);
        let row = ActiveModel {
            project_id: Set(project_id),
            day_bucket: Set(bucket.clone()),
            created_count: Set(1),
            updated_at: Set(at.fixed_offset()),
        };

        let counter = IssueCreationCounter::insert(row)
            .on_conflict(
                OnConflict::columns([Column::ProjectId, Column::DayBucket])
                    .value(
                        Column::CreatedCount,
                        Expr::col((IssueCreationCounter, Column::CreatedCount)).add(1),
                    )
                    .value(Column::UpdatedAt, Expr::cust("excluded.updated_at"))
                    .to_owned(),
            )
            .exec_with_returning(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if i64::from(counter.created_count) > i64::from(max_per_day) {
            self.release_bucket(project_id, &bucket).await?;
            tracing::debug!(
                project_id = %project_id,
                day = %bucket,
                max_per_day,
                "Daily issue creation quota exhausted"
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Return a slot claimed with [`try_reserve`](Self::try_reserve).
    pub async fn release(&self, project_id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.release_bucket(project_id, &day_bucket(at)).await
    }

    /// Issues created so far on `day`.
    pub async fn count_for_day(
        &self,
        project_id: Uuid,
        day: NaiveDate,
    ) -> Result<u32, RepositoryError> {
        let bucket = day.format("%Y-%m-%d").to_string();
        let counter = IssueCreationCounter::find_by_id((project_id, bucket))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(counter
            .map(|c| u32::try_from(c.created_count).unwrap_or(0))
            .unwrap_or(0))
    }

    async fn release_bucket(&self, project_id: Uuid, bucket: &str) -> Result<(), RepositoryError> {
        IssueCreationCounter::update_many()
            .col_expr(
                Column::CreatedCount,
                Expr::col(Column::CreatedCount).sub(1),
            )
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::DayBucket.eq(bucket))
            .filter(Column::CreatedCount.gt(0))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }
}
