//! # Intake Engine
//!
//! Synchronous half of the ingestion path: look up project settings, apply
//! the filtering policy, fingerprint the report and perform the atomic
//! deduplicating upsert. Nothing here talks to the issue tracker.

pub mod report;

pub use report::IncomingErrorReport;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use metrics::counter;
use regex::Regex;
use sea_orm::DatabaseConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::IntakeError;
use crate::fingerprint::generate_fingerprint;
use crate::models::{ErrorRecordModel, ErrorType};
use crate::repositories::{ErrorRecordRepository, ProjectSettingsRepository};
use crate::settings::ProjectErrorSettings;

/// Compiled ignore patterns kept across reports.
const PATTERN_CACHE_CAPACITY: usize = 512;

/// Successful result of [`IntakeEngine::process_error`].
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub record: ErrorRecordModel,
    /// The upsert inserted a new row.
    pub is_new: bool,
    /// The record now qualifies for a first tracker issue.
    pub should_create_issue: bool,
}

impl IntakeOutcome {
    /// Whether the orchestrator has anything to do for this outcome.
    pub fn needs_tracker_action(&self) -> bool {
        self.should_create_issue || self.record.issue_number.is_some()
    }
}

pub struct IntakeEngine {
    db: Arc<DatabaseConnection>,
    clock: Arc<dyn Clock>,
    /// Pattern source -> compiled regex, `None` for sources that fail to compile.
    patterns: Mutex<LruCache<String, Option<Regex>>>,
}

impl IntakeEngine {
    pub fn new(db: Arc<DatabaseConnection>, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(PATTERN_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            clock,
            patterns: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// True when the report must be dropped before it touches storage.
    ///
    /// Ignore patterns run against the raw message. Invalid patterns are
    /// logged once per cache residency and skipped.
    pub fn should_filter(&self, report: &IncomingErrorReport, settings: &ProjectErrorSettings) -> bool {
        if settings
            .filters
            .ignore_patterns
            .iter()
            .any(|pattern| self.pattern_matches(pattern, &report.message))
        {
            return true;
        }

        if report.error_type == ErrorType::Server && !settings.filters.status_codes.is_empty() {
            if let Some(code) = report.numeric_code() {
                return !settings.filters.status_codes.contains(&code);
            }
        }

        false
    }

    /// Accept one report for `project_id`.
    pub async fn process_error(
        &self,
        project_id: Uuid,
        report: &IncomingErrorReport,
    ) -> Result<IntakeOutcome, IntakeError> {
        let settings = ProjectSettingsRepository::new(&self.db)
            .get(project_id)
            .await
            .inspect_err(|_| {
                counter!("triage_reports_total", "outcome" => "error").increment(1);
            })?;

        if !settings.enabled {
            counter!("triage_reports_total", "outcome" => "disabled").increment(1);
            return Err(IntakeError::ReportingDisabled);
        }

        if self.should_filter(report, &settings) {
            debug!(project_id = %project_id, "Error report filtered by project policy");
            counter!("triage_reports_total", "outcome" => "filtered").increment(1);
            return Err(IntakeError::Filtered);
        }

        let fingerprint = generate_fingerprint(project_id, report);
        let upserted = ErrorRecordRepository::new(&self.db)
            .upsert_occurrence(project_id, &fingerprint, report, self.clock.now())
            .await
            .inspect_err(|err| {
                warn!(
                    project_id = %project_id,
                    fingerprint = %fingerprint,
                    error = %err,
                    "Failed to record error occurrence"
                );
                counter!("triage_reports_total", "outcome" => "error").increment(1);
            })?;

        let record = upserted.record;
        let should_create_issue = settings.can_create_issues()
            && record.issue_number.is_none()
            && record.occurrence_count >= i64::from(settings.filters.min_occurrences);

        let outcome = if upserted.inserted { "new" } else { "duplicate" };
        counter!("triage_reports_total", "outcome" => outcome).increment(1);
        debug!(
            project_id = %project_id,
            fingerprint = %record.fingerprint,
            occurrence_count = record.occurrence_count,
            is_new = upserted.inserted,
            should_create_issue,
            "Error report recorded"
        );

        Ok(IntakeOutcome {
            record,
            is_new: upserted.inserted,
            should_create_issue,
        })
    }

    fn pattern_matches(&self, source: &str, message: &str) -> bool {
        let mut cache = self
            .patterns
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        let compiled = cache.get_or_insert(source.to_string(), || match Regex::new(source) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(pattern = source, error = %err, "Skipping invalid ignore pattern");
                None
            }
        });

        compiled.as_ref().is_some_and(|regex| regex.is_match(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::connect;
    use chrono::{DateTime, Duration, Utc};
    use migration::{Migrator, MigratorTrait};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn setup() -> (Arc<DatabaseConnection>, ManualClock) {
        let db = connect("sqlite::memory:", 1).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        (Arc::new(db), ManualClock::new(t0()))
    }

    fn tracked_settings(project_id: Uuid, min_occurrences: u32) -> ProjectErrorSettings {
        let mut settings = ProjectErrorSettings::disabled(project_id);
        settings.enabled = true;
        settings.issue_tracker.repository = Some("acme/web".to_string());
        settings.issue_tracker.token = Some("ghp_test".to_string());
        settings.issue_tracker.create_issues = true;
        settings.filters.min_occurrences = min_occurrences;
        settings
    }

    async fn save(db: &DatabaseConnection, settings: &ProjectErrorSettings) {
        ProjectSettingsRepository::new(db)
            .upsert(settings, t0())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_when_reporting_disabled_or_missing() {
        let (db, clock) = setup().await;
        let engine = IntakeEngine::new(db.clone(), Arc::new(clock));
        let report = IncomingErrorReport::new(ErrorType::Client, "boom");

        let missing = engine.process_error(Uuid::new_v4(), &report).await;
        assert!(matches!(missing, Err(IntakeError::ReportingDisabled)));

        let project = Uuid::new_v4();
        save(&db, &ProjectErrorSettings::disabled(project)).await;
        let disabled = engine.process_error(project, &report).await;
        assert!(matches!(disabled, Err(IntakeError::ReportingDisabled)));
    }

    #[tokio::test]
    async fn ignore_pattern_short_circuits_storage() {
        let (db, clock) = setup().await;
        let project = Uuid::new_v4();
        let mut settings = tracked_settings(project, 1);
        settings.filters.ignore_patterns = vec!["(unclosed".to_string(), "^ResizeObserver".to_string()];
        save(&db, &settings).await;

        let engine = IntakeEngine::new(db.clone(), Arc::new(clock));
        let report = IncomingErrorReport::new(ErrorType::Client, "ResizeObserver loop limit exceeded");

        let result = engine.process_error(project, &report).await;
        assert!(matches!(result, Err(IntakeError::Filtered)));

        let fingerprint = generate_fingerprint(project, &report);
        let stored = ErrorRecordRepository::new(&db)
            .find_by_fingerprint(project, &fingerprint)
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn status_code_allow_list_applies_to_numeric_server_codes_only() {
        let (db, clock) = setup().await;
        let engine = IntakeEngine::new(db, Arc::new(clock));

        let mut settings = tracked_settings(Uuid::new_v4(), 1);
        settings.filters.status_codes = vec![500, 503];

        let allowed = IncomingErrorReport::new(ErrorType::Server, "x").with_error_code("503");
        let blocked = IncomingErrorReport::new(ErrorType::Server, "x").with_error_code("404");
        let symbolic = IncomingErrorReport::new(ErrorType::Server, "x").with_error_code("E_DB");
        let client = IncomingErrorReport::new(ErrorType::Client, "x").with_error_code("404");

        assert!(!engine.should_filter(&allowed, &settings));
        assert!(engine.should_filter(&blocked, &settings));
        assert!(!engine.should_filter(&symbolic, &settings));
        assert!(!engine.should_filter(&client, &settings));

        settings.filters.status_codes.clear();
        assert!(!engine.should_filter(&blocked, &settings));
    }

    #[tokio::test]
    async fn threshold_gates_issue_creation() {
        let (db, clock) = setup().await;
        let project = Uuid::new_v4();
        save(&db, &tracked_settings(project, 3)).await;

        let engine = IntakeEngine::new(db.clone(), Arc::new(clock.clone()));
        let report = IncomingErrorReport::new(ErrorType::Server, "Timeout at 0x7fAB12CD")
            .with_error_code("500");

        let first = engine.process_error(project, &report).await.unwrap();
        assert!(first.is_new);
        assert!(!first.should_create_issue);

        clock.advance(Duration::minutes(1));
        let second = engine
            .process_error(
                project,
                &IncomingErrorReport::new(ErrorType::Server, "Timeout at 0xDEADBEEF")
                    .with_error_code("500"),
            )
            .await
            .unwrap();
        assert!(!second.is_new);
        assert_eq!(second.record.id, first.record.id);
        assert!(!second.should_create_issue);

        clock.advance(Duration::minutes(1));
        let third = engine.process_error(project, &report).await.unwrap();
        assert_eq!(third.record.occurrence_count, 3);
        assert!(third.should_create_issue);
        assert_eq!(
            third.record.last_seen_at,
            (t0() + Duration::minutes(2)).fixed_offset()
        );
    }

    #[tokio::test]
    async fn linked_or_unconfigured_records_do_not_request_creation() {
        let (db, clock) = setup().await;
        let project = Uuid::new_v4();
        let mut settings = tracked_settings(project, 1);
        settings.issue_tracker.token = None;
        save(&db, &settings).await;

        let engine = IntakeEngine::new(db.clone(), Arc::new(clock));
        let report = IncomingErrorReport::new(ErrorType::Client, "boom");

        let outcome = engine.process_error(project, &report).await.unwrap();
        assert!(!outcome.should_create_issue);
        assert!(!outcome.needs_tracker_action());

        save(&db, &tracked_settings(project, 1)).await;
        ErrorRecordRepository::new(&db)
            .link_issue(outcome.record.id, 9, crate::models::IssueState::Open, t0())
            .await
            .unwrap();
        let linked = engine.process_error(project, &report).await.unwrap();
        assert!(!linked.should_create_issue);
        assert!(linked.needs_tracker_action());
    }
}
