//! # Error Record Repository
//!
//! Storage for deduplicated error records. The occurrence upsert is a single
//! `INSERT .. ON CONFLICT (project_id, fingerprint) DO UPDATE` statement, so
//! concurrent reports for the same fingerprint never lose an increment and
//! never produce a second row.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::intake::IncomingErrorReport;
use crate::models::error_record::{ActiveModel, Column, Entity as ErrorRecord, Model};
use crate::models::{ErrorType, IssueState};

/// Default page size for [`ErrorRecordRepository::list`].
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: u64 = 200;

/// Result of recording one occurrence.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub record: Model,
    /// True when this call inserted the row rather than incrementing it.
    pub inserted: bool,
}

/// Sort keys for record listings; always descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRecordSort {
    #[default]
    LastSeenAt,
    FirstSeenAt,
    OccurrenceCount,
}

impl ErrorRecordSort {
    fn column(self) -> Column {
        match self {
            ErrorRecordSort::LastSeenAt => Column::LastSeenAt,
            ErrorRecordSort::FirstSeenAt => Column::FirstSeenAt,
            ErrorRecordSort::OccurrenceCount => Column::OccurrenceCount,
        }
    }
}

/// Filters and pagination for listing a project's records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListErrorRecordsQuery {
    pub project_id: Uuid,
    pub error_type: Option<ErrorType>,
    pub issue_state: Option<IssueState>,
    #[serde(default)]
    pub sort: ErrorRecordSort,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ListErrorRecordsQuery {
    pub fn for_project(project_id: Uuid) -> Self {
        Self {
            project_id,
            error_type: None,
            issue_state: None,
            sort: ErrorRecordSort::default(),
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListErrorRecordsResponse {
    pub data: Vec<Model>,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

/// Repository for error record database operations
pub struct ErrorRecordRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ErrorRecordRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a record for `(project_id, fingerprint)` or atomically bump the
    /// existing one.
    ///
    /// On conflict the occurrence count is incremented in SQL, `last_seen_at`
    /// only moves forward, and stack trace, environment and metadata are
    /// replaced only when the new report carries them. Message, error code,
    /// URL, user and `first_seen_at` keep their first-seen values.
    pub async fn upsert_occurrence(
        &self,
        project_id: Uuid,
        fingerprint: &str,
        report: &IncomingErrorReport,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, RepositoryError> {
        if fingerprint.is_empty() {
            return Err(RepositoryError::validation_error("fingerprint must not be empty"));
        }

        let candidate_id = Uuid::new_v4();
        let ts = seen_at.fixed_offset();

        let record = ActiveModel {
            id: Set(candidate_id),
            project_id: Set(project_id),
            fingerprint: Set(fingerprint.to_string()),
            error_type: Set(report.error_type),
            error_code: Set(report.error_code.clone()),
            message: Set(report.message.clone()),
            stack_trace: Set(report.stack_trace.clone()),
            url: Set(report.url.clone()),
            user_id: Set(report.user_id.clone()),
            environment: Set(report.environment.clone()),
            metadata: Set(report.metadata.clone()),
            occurrence_count: Set(1),
            first_seen_at: Set(ts),
            last_seen_at: Set(ts),
            issue_number: Set(None),
            issue_state: Set(IssueState::None),
            created_at: Set(ts),
            updated_at: Set(ts),
        };

        let latest = match self.db.get_database_backend() {
            DatabaseBackend::Sqlite => "MAX",
            _ => "GREATEST",
        };

        let on_conflict = OnConflict::columns([Column::ProjectId, Column::Fingerprint])
            .value(
                Column::OccurrenceCount,
                Expr::col((ErrorRecord, Column::OccurrenceCount)).add(1),
            )
            .value(
                Column::LastSeenAt,
                Expr::cust(format!(
                    "{latest}(error_records.last_seen_at, excluded.last_seen_at)"
                )),
            )
            .value(
                Column::StackTrace,
                Expr::cust("COALESCE(excluded.stack_trace, error_records.stack_trace)"),
            )
            .value(
                Column::Environment,
                Expr::cust("COALESCE(excluded.environment, error_records.environment)"),
            )
            .value(
                Column::Metadata,
                Expr::cust("COALESCE(excluded.metadata, error_records.metadata)"),
            )
            .value(Column::UpdatedAt, Expr::cust("excluded.updated_at"))
            .to_owned();

        let stored = ErrorRecord::insert(record)
            .on_conflict(on_conflict)
            .exec_with_returning(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        let inserted = stored.id == candidate_id;
        if inserted {
            tracing::debug!(
                project_id = %project_id,
                record_id = %stored.id,
                fingerprint,
                "Created error record"
            );
        }

        Ok(UpsertOutcome {
            record: stored,
            inserted,
        })
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, RepositoryError> {
        ErrorRecord::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_fingerprint(
        &self,
        project_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Model>, RepositoryError> {
        ErrorRecord::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::Fingerprint.eq(fingerprint))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// List a project's records with optional filters, newest first by the
    /// chosen sort key.
    pub async fn list(
        &self,
        query: ListErrorRecordsQuery,
    ) -> Result<ListErrorRecordsResponse, RepositoryError> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.unwrap_or(0);

        let mut db_query = ErrorRecord::find().filter(Column::ProjectId.eq(query.project_id));

        if let Some(error_type) = query.error_type {
            db_query = db_query.filter(Column::ErrorType.eq(error_type));
        }

        if let Some(issue_state) = query.issue_state {
            db_query = db_query.filter(Column::IssueState.eq(issue_state));
        }

        let total = db_query
            .clone()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        let data = db_query
            .order_by_desc(query.sort.column())
            .order_by_asc(Column::Id)
            .offset(offset)
            .limit(limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(ListErrorRecordsResponse {
            data,
            pagination: PaginationInfo {
                total,
                limit,
                offset,
                has_more: offset + limit < total,
            },
        })
    }

    /// Point a record at a tracker issue.
    pub async fn link_issue(
        &self,
        id: Uuid,
        issue_number: i64,
        state: IssueState,
        now: DateTime<Utc>,
    ) -> Result<Model, RepositoryError> {
        let result = ErrorRecord::update_many()
            .col_expr(Column::IssueNumber, Expr::value(Some(issue_number)))
            .col_expr(Column::IssueState, Expr::value(state))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        self.reload_after_update(id, result.rows_affected).await
    }

    /// Change only the local issue state, leaving the linked number in place.
    pub async fn update_issue_state(
        &self,
        id: Uuid,
        state: IssueState,
        now: DateTime<Utc>,
    ) -> Result<Model, RepositoryError> {
        let result = ErrorRecord::update_many()
            .col_expr(Column::IssueState, Expr::value(state))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        self.reload_after_update(id, result.rows_affected).await
    }

    /// Drop the tracker linkage so the record is eligible for a new issue.
    pub async fn unlink_issue(&self, id: Uuid, now: DateTime<Utc>) -> Result<Model, RepositoryError> {
        let result = ErrorRecord::update_many()
            .col_expr(Column::IssueNumber, Expr::value(Option::<i64>::None))
            .col_expr(Column::IssueState, Expr::value(IssueState::None))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        self.reload_after_update(id, result.rows_affected).await
    }

    /// Records with no linked issue that have reached the creation threshold,
    /// most frequent first.
    pub async fn find_pending_issue_creation(
        &self,
        project_id: Uuid,
        min_occurrences: u32,
        limit: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        ErrorRecord::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::IssueState.eq(IssueState::None))
            .filter(Column::IssueNumber.is_null())
            .filter(Column::OccurrenceCount.gte(i64::from(min_occurrences)))
            .order_by_desc(Column::OccurrenceCount)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Records whose linked issue is open locally and whose last occurrence
    /// is at or before `cutoff`.
    pub async fn find_stale_issues(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        ErrorRecord::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::IssueState.eq(IssueState::Open))
            .filter(Column::IssueNumber.is_not_null())
            .filter(Column::LastSeenAt.lte(cutoff.fixed_offset()))
            .order_by_asc(Column::LastSeenAt)
            .limit(limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Whether another record of the project shares `issue_number` and has
    /// been seen after `cutoff`.
    pub async fn issue_has_active_sibling(
        &self,
        project_id: Uuid,
        issue_number: i64,
        exclude_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let active = ErrorRecord::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::IssueNumber.eq(issue_number))
            .filter(Column::Id.ne(exclude_id))
            .filter(Column::LastSeenAt.gt(cutoff.fixed_offset()))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(active > 0)
    }

    async fn reload_after_update(
        &self,
        id: Uuid,
        rows_affected: u64,
    ) -> Result<Model, RepositoryError> {
        if rows_affected == 0 {
            return Err(RepositoryError::not_found(format!("error record {id}")));
        }
        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(format!("error record {id}")))
    }
}
