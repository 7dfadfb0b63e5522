//! Database migrations for the triage engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_project_error_settings;
mod m2025_06_01_000002_create_error_records;
mod m2025_06_01_000003_create_issue_creation_counters;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_project_error_settings::Migration),
            Box::new(m2025_06_01_000002_create_error_records::Migration),
            Box::new(m2025_06_01_000003_create_issue_creation_counters::Migration),
        ]
    }
}
