//! # Issue Lifecycle Orchestrator
//!
//! Decides, per error record, which tracker transition to apply and keeps
//! the local `(issue_number, issue_state)` pair in step with the tracker.
//!
//! Per-record rules:
//!
//! * **unlinked**: look for an existing issue carrying the record's
//!   fingerprint marker and link it; otherwise attach to a recent open issue
//!   (project noise guard); otherwise create a new issue if the daily quota
//!   allows.
//! * **open**: post an occurrence comment unless the issue was touched within
//!   the comment cooldown.
//! * **closed**: left alone unless the record recurred after the close;
//!   reopen within the reopen window, otherwise unlink and fall through to
//!   the unlinked rules.
//!
//! The tracker's view of open/closed wins over the local copy.

pub mod content;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::{OrchestratorError, TrackerError};
use crate::models::{ErrorRecordModel, IssueState};
use crate::repositories::{ErrorRecordRepository, IssueQuotaRepository, ProjectSettingsRepository};
use crate::settings::ProjectErrorSettings;
use crate::tracker::{
    IssueListQuery, IssueTracker, NewIssue, TrackerFactory, TrackerIssue, TrackerIssueState,
};

/// Time windows that drive the lifecycle rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub reopen_window: Duration,
    pub stale_after: Duration,
    /// Per-issue cooldown between occurrence comments.
    pub comment_cooldown: Duration,
    /// Look-back for the project-level noise guard.
    pub noise_guard_window: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

impl From<&LifecycleConfig> for LifecyclePolicy {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            reopen_window: Duration::days(i64::from(config.reopen_window_days)),
            stale_after: Duration::days(i64::from(config.stale_days)),
            comment_cooldown: Duration::minutes(i64::from(config.comment_cooldown_minutes)),
            noise_guard_window: Duration::hours(i64::from(config.noise_guard_hours)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueOperation {
    Created,
    Updated,
    Reopened,
    Skipped,
}

impl IssueOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            IssueOperation::Created => "created",
            IssueOperation::Updated => "updated",
            IssueOperation::Reopened => "reopened",
            IssueOperation::Skipped => "skipped",
        }
    }
}

/// Diagnostic outcome of one orchestration pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub issue_number: Option<i64>,
    pub issue_url: Option<String>,
    pub operation: IssueOperation,
    pub message: Option<String>,
}

impl OrchestrationResult {
    fn with_issue(operation: IssueOperation, issue: &TrackerIssue, message: impl Into<String>) -> Self {
        Self {
            issue_number: Some(issue.number),
            issue_url: Some(issue.url.clone()),
            operation,
            message: Some(message.into()),
        }
    }

    fn skipped(issue: Option<&TrackerIssue>, message: impl Into<String>) -> Self {
        Self {
            issue_number: issue.map(|i| i.number),
            issue_url: issue.map(|i| i.url.clone()),
            operation: IssueOperation::Skipped,
            message: Some(message.into()),
        }
    }
}

/// Tally of one sweep over a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: u64,
    pub acted: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl SweepReport {
    pub fn merge(&mut self, other: &SweepReport) {
        self.examined += other.examined;
        self.acted += other.acted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Everything a single pass needs, resolved once.
struct Context<'a> {
    record: ErrorRecordModel,
    settings: &'a ProjectErrorSettings,
    tracker: &'a dyn IssueTracker,
}

pub struct IssueOrchestrator {
    db: Arc<DatabaseConnection>,
    trackers: Arc<dyn TrackerFactory>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
}

impl IssueOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        trackers: Arc<dyn TrackerFactory>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            db,
            trackers,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Run the lifecycle rules for one record.
    ///
    /// `Ok(None)` when the project has no tracker integration configured.
    #[instrument(skip(self))]
    pub async fn process(
        &self,
        record_id: Uuid,
    ) -> Result<Option<OrchestrationResult>, OrchestratorError> {
        let records = ErrorRecordRepository::new(&self.db);
        let Some(record) = records.find_by_id(record_id).await? else {
            error!(record_id = %record_id, "Error record missing during orchestration");
            return Ok(Some(OrchestrationResult::skipped(None, "Error record not found")));
        };

        let settings = ProjectSettingsRepository::new(&self.db)
            .get(record.project_id)
            .await?;
        let Some(tracker) = self.trackers.for_project(&settings)? else {
            return Ok(None);
        };

        let result = self
            .apply(Context {
                record,
                settings: &settings,
                tracker: tracker.as_ref(),
            })
            .await;

        match &result {
            Ok(outcome) => {
                counter!("triage_orchestration_total", "operation" => outcome.operation.as_str())
                    .increment(1);
            }
            Err(err) => {
                counter!("triage_orchestration_failures_total").increment(1);
                warn!(error = %err, transient = err.is_transient(), "Orchestration failed");
            }
        }

        result.map(Some)
    }

    /// Proactively open issues for records that crossed the threshold without
    /// one (for example while the daily quota was exhausted).
    #[instrument(skip(self))]
    pub async fn create_pending_issues(
        &self,
        project_id: Uuid,
        limit: u64,
    ) -> Result<SweepReport, OrchestratorError> {
        let settings = ProjectSettingsRepository::new(&self.db).get(project_id).await?;
        let mut report = SweepReport::default();
        if !settings.can_create_issues() {
            return Ok(report);
        }
        let Some(tracker) = self.trackers.for_project(&settings)? else {
            return Ok(report);
        };

        let pending = ErrorRecordRepository::new(&self.db)
            .find_pending_issue_creation(project_id, settings.filters.min_occurrences, limit)
            .await?;

        for record in pending {
            report.examined += 1;
            let record_id = record.id;
            let fingerprint = record.fingerprint.clone();
            let outcome = self
                .apply(Context {
                    record,
                    settings: &settings,
                    tracker: tracker.as_ref(),
                })
                .await;

            match outcome {
                Ok(result) if result.operation == IssueOperation::Skipped => {
                    report.skipped += 1;
                    sweep_item("pending", "skipped");
                    debug!(record_id = %record_id, message = ?result.message, "Pending record skipped");
                }
                Ok(result) => {
                    report.acted += 1;
                    sweep_item("pending", result.operation.as_str());
                }
                Err(err) => {
                    report.failed += 1;
                    sweep_item("pending", "failed");
                    error!(
                        record_id = %record_id,
                        fingerprint = %fingerprint,
                        error = %err,
                        "Failed to create pending issue"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Close open issues whose record has been silent for the staleness window.
    ///
    /// An issue shared by grouped records is only closed once all of them are
    /// silent. Never reopens anything.
    #[instrument(skip(self))]
    pub async fn close_stale_issues(
        &self,
        project_id: Uuid,
        limit: u64,
    ) -> Result<SweepReport, OrchestratorError> {
        let settings = ProjectSettingsRepository::new(&self.db).get(project_id).await?;
        let mut report = SweepReport::default();
        let Some(tracker) = self.trackers.for_project(&settings)? else {
            return Ok(report);
        };

        let cutoff = self.clock.now() - self.policy.stale_after;
        let stale = ErrorRecordRepository::new(&self.db)
            .find_stale_issues(project_id, cutoff, limit)
            .await?;

        for record in stale {
            report.examined += 1;
            let record_id = record.id;
            match self.close_stale(&record, tracker.as_ref(), cutoff).await {
                Ok(true) => {
                    report.acted += 1;
                    sweep_item("stale", "closed");
                }
                Ok(false) => {
                    report.skipped += 1;
                    sweep_item("stale", "skipped");
                }
                Err(err) => {
                    report.failed += 1;
                    sweep_item("stale", "failed");
                    error!(
                        record_id = %record_id,
                        issue_number = ?record.issue_number,
                        error = %err,
                        "Failed to auto-close stale issue"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn apply(&self, ctx: Context<'_>) -> Result<OrchestrationResult, OrchestratorError> {
        match (ctx.record.issue_number, ctx.record.issue_state) {
            (Some(number), IssueState::Open | IssueState::Closed) => {
                self.handle_linked(ctx, number).await
            }
            _ => self.handle_unlinked(ctx).await,
        }
    }

    async fn handle_linked(
        &self,
        ctx: Context<'_>,
        number: i64,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let records = ErrorRecordRepository::new(&self.db);
        let issue = match ctx.tracker.get_issue(number).await {
            Ok(issue) => issue,
            Err(TrackerError::NotFound(_)) => {
                warn!(
                    record_id = %ctx.record.id,
                    issue_number = number,
                    "Linked issue no longer exists; unlinking"
                );
                let record = records.unlink_issue(ctx.record.id, self.clock.now()).await?;
                return self.handle_unlinked(Context { record, ..ctx }).await;
            }
            Err(err) => return Err(err.into()),
        };

        match issue.state {
            TrackerIssueState::Open => {
                if ctx.record.issue_state != IssueState::Open {
                    records
                        .update_issue_state(ctx.record.id, IssueState::Open, self.clock.now())
                        .await?;
                }
                self.comment_on_open(&ctx, &issue).await
            }
            TrackerIssueState::Closed => {
                let record = if ctx.record.issue_state != IssueState::Closed {
                    records
                        .update_issue_state(ctx.record.id, IssueState::Closed, self.clock.now())
                        .await?
                } else {
                    ctx.record
                };
                self.handle_closed(Context { record, ..ctx }, issue).await
            }
        }
    }

    async fn comment_on_open(
        &self,
        ctx: &Context<'_>,
        issue: &TrackerIssue,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let last_seen = ctx.record.last_seen_at.with_timezone(&Utc);
        if last_seen - issue.updated_at < self.policy.comment_cooldown {
            debug!(
                issue_number = issue.number,
                fingerprint = %ctx.record.fingerprint,
                "Noise guard: issue updated recently"
            );
            return Ok(OrchestrationResult::skipped(
                Some(issue),
                format!(
                    "Noise guard: issue updated within the last {} minutes",
                    self.policy.comment_cooldown.num_minutes()
                ),
            ));
        }

        ctx.tracker
            .add_comment(issue.number, &content::occurrence_comment(&ctx.record))
            .await?;
        info!(
            issue_number = issue.number,
            fingerprint = %ctx.record.fingerprint,
            operation = "updated",
            "Posted occurrence comment"
        );
        Ok(OrchestrationResult::with_issue(
            IssueOperation::Updated,
            issue,
            "Occurrence comment posted",
        ))
    }

    async fn handle_closed(
        &self,
        ctx: Context<'_>,
        issue: TrackerIssue,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let closed_at = issue.closed_at.unwrap_or(issue.updated_at);
        let recurred_at = ctx.record.last_seen_at.with_timezone(&Utc);

        if recurred_at <= closed_at {
            return Ok(Self::not_recurred(&ctx, &issue));
        }
        if !self.within_reopen_window(closed_at, recurred_at) {
            info!(
                issue_number = issue.number,
                fingerprint = %ctx.record.fingerprint,
                "Closed issue is past the reopen window; treating record as unlinked"
            );
            let record = ErrorRecordRepository::new(&self.db)
                .unlink_issue(ctx.record.id, self.clock.now())
                .await?;
            return self.handle_unlinked(Context { record, ..ctx }).await;
        }

        self.reopen(&ctx, issue, closed_at).await
    }

    async fn reopen(
        &self,
        ctx: &Context<'_>,
        issue: TrackerIssue,
        closed_at: DateTime<Utc>,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let reopened = ctx
            .tracker
            .update_issue_state(issue.number, TrackerIssueState::Open)
            .await?;
        ErrorRecordRepository::new(&self.db)
            .link_issue(ctx.record.id, reopened.number, IssueState::Open, self.clock.now())
            .await?;
        ctx.tracker
            .add_comment(reopened.number, &content::reopen_comment(&ctx.record, closed_at))
            .await?;

        info!(
            issue_number = reopened.number,
            fingerprint = %ctx.record.fingerprint,
            operation = "reopened",
            "Reopened recurring issue"
        );
        Ok(OrchestrationResult::with_issue(
            IssueOperation::Reopened,
            &reopened,
            "Issue reopened after recurrence",
        ))
    }

    /// Closed issue whose record has no occurrence after the close.
    fn not_recurred(ctx: &Context<'_>, issue: &TrackerIssue) -> OrchestrationResult {
        debug!(
            issue_number = issue.number,
            fingerprint = %ctx.record.fingerprint,
            "Issue closed after the last occurrence; leaving it closed"
        );
        OrchestrationResult::skipped(Some(issue), "No recurrence since the issue was closed")
    }

    async fn handle_unlinked(
        &self,
        ctx: Context<'_>,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let settings = ctx.settings;
        if !settings.issue_tracker.create_issues {
            return Ok(OrchestrationResult::skipped(None, "Issue creation disabled"));
        }
        let min = i64::from(settings.filters.min_occurrences);
        if ctx.record.occurrence_count < min {
            return Ok(OrchestrationResult::skipped(
                None,
                format!(
                    "Below occurrence threshold ({}/{})",
                    ctx.record.occurrence_count, min
                ),
            ));
        }

        let records = ErrorRecordRepository::new(&self.db);
        let now = self.clock.now();

        if let Some(existing) = self.find_marked_issue(&ctx).await? {
            return match existing.state {
                TrackerIssueState::Open => {
                    records
                        .link_issue(ctx.record.id, existing.number, IssueState::Open, now)
                        .await?;
                    info!(
                        issue_number = existing.number,
                        fingerprint = %ctx.record.fingerprint,
                        "Linked existing issue found by fingerprint"
                    );
                    Ok(OrchestrationResult::with_issue(
                        IssueOperation::Updated,
                        &existing,
                        "Linked existing issue",
                    ))
                }
                TrackerIssueState::Closed => {
                    let closed_at = existing.closed_at.unwrap_or(existing.updated_at);
                    let record = records
                        .link_issue(ctx.record.id, existing.number, IssueState::Closed, now)
                        .await?;
                    let ctx = Context { record, ..ctx };
                    if ctx.record.last_seen_at.with_timezone(&Utc) <= closed_at {
                        return Ok(Self::not_recurred(&ctx, &existing));
                    }
                    self.reopen(&ctx, existing, closed_at).await
                }
            };
        }

        if let Some(recent) = self.find_recent_open_issue(&ctx).await? {
            ctx.tracker
                .add_comment(recent.number, &content::grouped_occurrence_comment(&ctx.record))
                .await?;
            records
                .link_issue(ctx.record.id, recent.number, IssueState::Open, now)
                .await?;
            info!(
                issue_number = recent.number,
                fingerprint = %ctx.record.fingerprint,
                "Noise guard: grouped occurrence into recent open issue"
            );
            return Ok(OrchestrationResult::with_issue(
                IssueOperation::Updated,
                &recent,
                "Grouped into recent open issue",
            ));
        }

        self.create_issue(&ctx, now).await
    }

    async fn create_issue(
        &self,
        ctx: &Context<'_>,
        now: DateTime<Utc>,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let project_id = ctx.record.project_id;
        let max_per_day = ctx.settings.rate_limit.max_issues_per_day;
        let quota = IssueQuotaRepository::new(&self.db);

        if !quota.try_reserve(project_id, now, max_per_day).await? {
            info!(
                project_id = %project_id,
                fingerprint = %ctx.record.fingerprint,
                max_per_day,
                "Daily issue limit reached; skipping creation"
            );
            return Ok(OrchestrationResult::skipped(
                None,
                format!("Daily issue limit ({max_per_day}) reached"),
            ));
        }

        let new_issue = NewIssue {
            title: content::issue_title(&ctx.record),
            body: content::issue_body(&ctx.record),
            labels: ctx.settings.issue_tracker.labels.clone(),
        };

        let created = match ctx.tracker.create_issue(new_issue).await {
            Ok(issue) => issue,
            Err(err) => {
                if let Err(release_err) = quota.release(project_id, now).await {
                    warn!(error = %release_err, "Failed to release issue quota slot");
                }
                return Err(err.into());
            }
        };

        ErrorRecordRepository::new(&self.db)
            .link_issue(ctx.record.id, created.number, IssueState::Open, self.clock.now())
            .await?;

        info!(
            project_id = %project_id,
            issue_number = created.number,
            fingerprint = %ctx.record.fingerprint,
            operation = "created",
            "Created tracker issue"
        );
        Ok(OrchestrationResult::with_issue(
            IssueOperation::Created,
            &created,
            "Issue created",
        ))
    }

    /// Issue whose body carries this record's fingerprint marker.
    ///
    /// Closed issues past the reopen window are ignored so a long-closed
    /// issue is never resurrected; open issues win over closed ones.
    async fn find_marked_issue(
        &self,
        ctx: &Context<'_>,
    ) -> Result<Option<TrackerIssue>, OrchestratorError> {
        let now = self.clock.now();
        let hits = ctx.tracker.search_issues(&ctx.record.fingerprint).await?;

        let best = hits
            .into_iter()
            .filter(|issue| {
                issue
                    .body
                    .as_deref()
                    .and_then(content::extract_fingerprint)
                    .is_some_and(|fp| fp == ctx.record.fingerprint)
            })
            .filter(|issue| match issue.state {
                TrackerIssueState::Open => true,
                TrackerIssueState::Closed => self
                    .within_reopen_window(issue.closed_at.unwrap_or(issue.updated_at), now),
            })
            .max_by_key(|issue| (issue.state == TrackerIssueState::Open, issue.updated_at));

        Ok(best)
    }

    /// Most recent engine-created open issue within the noise guard window.
    async fn find_recent_open_issue(
        &self,
        ctx: &Context<'_>,
    ) -> Result<Option<TrackerIssue>, OrchestratorError> {
        let query = IssueListQuery {
            labels: ctx.settings.issue_tracker.labels.clone(),
            state: Some(TrackerIssueState::Open),
            created_since: Some(self.clock.now() - self.policy.noise_guard_window),
            limit: Some(20),
        };

        let recent = ctx
            .tracker
            .list_issues(&query)
            .await?
            .into_iter()
            .filter(|issue| {
                issue
                    .body
                    .as_deref()
                    .and_then(content::extract_fingerprint)
                    .is_some()
            })
            .max_by_key(|issue| issue.created_at);

        Ok(recent)
    }

    async fn close_stale(
        &self,
        record: &ErrorRecordModel,
        tracker: &dyn IssueTracker,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, OrchestratorError> {
        let Some(number) = record.issue_number else {
            return Ok(false);
        };
        let records = ErrorRecordRepository::new(&self.db);

        // Grouped records share an issue; it stays open while any of them fires.
        if records
            .issue_has_active_sibling(record.project_id, number, record.id, cutoff)
            .await?
        {
            debug!(
                record_id = %record.id,
                issue_number = number,
                "Shared issue still has an active record; not closing"
            );
            return Ok(false);
        }

        let issue = match tracker.get_issue(number).await {
            Ok(issue) => issue,
            Err(TrackerError::NotFound(_)) => {
                warn!(record_id = %record.id, issue_number = number, "Stale issue vanished; unlinking");
                records.unlink_issue(record.id, self.clock.now()).await?;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        if issue.state == TrackerIssueState::Open {
            tracker
                .add_comment(
                    number,
                    &content::auto_close_comment(record, self.policy.stale_after),
                )
                .await?;
            tracker
                .update_issue_state(number, TrackerIssueState::Closed)
                .await?;
        }

        records
            .update_issue_state(record.id, IssueState::Closed, self.clock.now())
            .await?;
        info!(
            record_id = %record.id,
            issue_number = number,
            already_closed = issue.state == TrackerIssueState::Closed,
            "Auto-closed stale issue"
        );
        Ok(issue.state == TrackerIssueState::Open)
    }

    fn within_reopen_window(&self, closed_at: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        at - closed_at <= self.policy.reopen_window
    }
}

fn sweep_item(sweep: &'static str, outcome: &'static str) {
    counter!("triage_sweep_items_total", "sweep" => sweep, "outcome" => outcome).increment(1);
}
