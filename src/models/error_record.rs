//! # Error Record Model
//!
//! The deduplicated unit of the engine: one row per `(project_id, fingerprint)`
//! carrying occurrence counters and the linkage to an external tracker issue.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::ActiveModelBehavior;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "error_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    /// Deterministic identity key, unique per project
    pub fingerprint: String,

    pub error_type: ErrorType,

    pub error_code: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub message: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub stack_trace: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub url: Option<String>,

    pub user_id: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub environment: Option<Json>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<Json>,

    /// Number of accepted reports for this fingerprint, never decreases
    pub occurrence_count: i64,

    pub first_seen_at: DateTimeWithTimeZone,

    pub last_seen_at: DateTimeWithTimeZone,

    /// External tracker issue number, if one is linked
    pub issue_number: Option<i64>,

    pub issue_state: IssueState,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Origin of a reported error
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    #[sea_orm(string_value = "client")]
    Client,
    #[sea_orm(string_value = "server")]
    Server,
}

impl ErrorType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorType::Client => "client",
            ErrorType::Server => "server",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local view of the linked tracker issue
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[sea_orm(string_value = "none")]
    #[default]
    None,
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "closed")]
    Closed,
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IssueState::None => "none",
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        })
    }
}
