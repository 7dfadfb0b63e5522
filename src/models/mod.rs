//! # Data Models
//!
//! SeaORM entities persisted by the triage engine.

pub mod error_record;
pub mod issue_creation_counter;
pub mod project_error_settings;

pub use error_record::{Entity as ErrorRecord, ErrorType, IssueState, Model as ErrorRecordModel};
pub use issue_creation_counter::Entity as IssueCreationCounter;
pub use project_error_settings::Entity as ProjectErrorSettingsEntity;
