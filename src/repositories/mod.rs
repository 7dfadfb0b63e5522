//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! triage tables. Each repository borrows a connection and is cheap to build
//! per call site.

pub mod error_record;
pub mod issue_quota;
pub mod project_settings;

pub use error_record::{
    ErrorRecordRepository, ErrorRecordSort, ListErrorRecordsQuery, ListErrorRecordsResponse,
    UpsertOutcome,
};
pub use issue_quota::IssueQuotaRepository;
pub use project_settings::ProjectSettingsRepository;
