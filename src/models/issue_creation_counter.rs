//! # Issue Creation Counter Model
//!
//! Day-bucketed count of tracker issues created per project, backing the
//! `max_issues_per_day` rate limit.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::ActiveModelBehavior;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "issue_creation_counters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub project_id: Uuid,

    /// UTC day, `YYYY-MM-DD`
    #[sea_orm(primary_key, auto_increment = false)]
    pub day_bucket: String,

    pub created_count: i32,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
