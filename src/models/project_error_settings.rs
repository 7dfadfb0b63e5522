//! # Project Error Settings Model
//!
//! Per-project configuration consumed by intake and orchestration. The engine
//! only reads this table; writes come from administration tooling.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::ActiveModelBehavior;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "project_error_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub project_id: Uuid,

    pub enabled: bool,

    /// Target repository, `owner/name`
    pub tracker_repository: Option<String>,

    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text", nullable)]
    pub tracker_token: Option<String>,

    /// JSON array of label names applied to created issues
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub tracker_labels: Option<Json>,

    pub create_issues: bool,

    pub max_issues_per_day: i32,

    pub min_occurrences: i32,

    /// JSON array of regex sources matched against raw messages
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub ignore_patterns: Option<Json>,

    /// JSON array of allowed numeric status codes for server errors
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub status_codes: Option<Json>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
