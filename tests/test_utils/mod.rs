//! Shared fixtures for integration tests.
//!
//! In-memory SQLite with migrations applied, project settings seeding, and a
//! fixed starting instant for clock-driven scenarios.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use triage::clock::ManualClock;
use triage::db::connect;
use triage::models::ErrorType;
use triage::intake::IncomingErrorReport;
use triage::orchestrator::{IssueOrchestrator, LifecyclePolicy};
use triage::repositories::ProjectSettingsRepository;
use triage::settings::ProjectErrorSettings;
use triage::tracker::{InMemoryTracker, SharedTrackerFactory};

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// A single pooled connection keeps every query on the same in-memory database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = connect("sqlite::memory:", 1).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-05-05T08:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Enabled project with a GitHub-style tracker configured and creation on.
pub fn tracked_settings(project_id: Uuid) -> ProjectErrorSettings {
    let mut settings = ProjectErrorSettings::disabled(project_id);
    settings.enabled = true;
    settings.issue_tracker.repository = Some("acme/storefront".to_string());
    settings.issue_tracker.token = Some("ghp_integration".to_string());
    settings.issue_tracker.labels = vec!["bug".to_string()];
    settings.issue_tracker.create_issues = true;
    settings
}

pub async fn seed_settings(db: &DatabaseConnection, settings: &ProjectErrorSettings) -> Result<()> {
    ProjectSettingsRepository::new(db)
        .upsert(settings, start_time())
        .await?;
    Ok(())
}

pub fn server_error(message: &str) -> IncomingErrorReport {
    IncomingErrorReport::new(ErrorType::Server, message)
        .with_error_code("500")
        .with_url("https://storefront.example.com/cart/123")
}

/// Orchestrator backed by an in-memory tracker on a manual clock.
pub fn memory_orchestrator(
    db: Arc<DatabaseConnection>,
    clock: &ManualClock,
) -> (Arc<IssueOrchestrator>, InMemoryTracker) {
    let tracker = InMemoryTracker::new(Arc::new(clock.clone()));
    let orchestrator = Arc::new(IssueOrchestrator::new(
        db,
        Arc::new(SharedTrackerFactory::new(Arc::new(tracker.clone()))),
        Arc::new(clock.clone()),
        LifecyclePolicy::default(),
    ));
    (orchestrator, tracker)
}
