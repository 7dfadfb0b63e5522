//! # Sweep Scheduler
//!
//! Periodic background pass over every enabled project: open issues for
//! records that crossed the threshold without one, then close issues whose
//! error has gone quiet. A failing project is logged and counted; the rest of
//! the tick carries on.

use std::sync::Arc;

use metrics::histogram;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::SweepConfig;
use crate::error::OrchestratorError;
use crate::orchestrator::{IssueOrchestrator, SweepReport};
use crate::repositories::ProjectSettingsRepository;

/// Totals for one pass over one or more projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub projects: u64,
    pub failed_projects: u64,
    pub pending: SweepReport,
    pub stale: SweepReport,
}

impl SweepSummary {
    fn absorb(&mut self, pending: &SweepReport, stale: &SweepReport) {
        self.projects += 1;
        self.pending.merge(pending);
        self.stale.merge(stale);
    }
}

/// Background sweep service.
pub struct SweepScheduler {
    db: Arc<DatabaseConnection>,
    orchestrator: Arc<IssueOrchestrator>,
    config: SweepConfig,
}

impl SweepScheduler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orchestrator: Arc<IssueOrchestrator>,
        config: SweepConfig,
    ) -> Self {
        Self {
            db,
            orchestrator,
            config,
        }
    }

    /// Run the sweep loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        info!(
            interval_seconds = self.config.interval_seconds,
            batch_size = self.config.batch_size,
            "Starting sweep scheduler"
        );
        let tick_interval = self.config.interval();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sweep scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    if let Err(err) = self.run_once().await {
                        error!(error = %err, "Sweep tick failed");
                    }
                }
            }
        }

        info!("Sweep scheduler stopped");
        Ok(())
    }

    /// One pass over every enabled project.
    pub async fn run_once(&self) -> Result<SweepSummary, OrchestratorError> {
        let started = Instant::now();
        let project_ids = ProjectSettingsRepository::new(&self.db)
            .list_enabled_project_ids()
            .await?;

        let mut summary = SweepSummary::default();
        for project_id in project_ids {
            match self.sweep_project(project_id).await {
                Ok((pending, stale)) => summary.absorb(&pending, &stale),
                Err(err) => {
                    summary.failed_projects += 1;
                    error!(project_id = %project_id, error = %err, "Sweep failed for project");
                }
            }
        }

        histogram!("triage_sweep_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        debug!(
            projects = summary.projects,
            failed_projects = summary.failed_projects,
            created = summary.pending.acted,
            closed = summary.stale.acted,
            failed_records = summary.pending.failed + summary.stale.failed,
            "Sweep tick completed"
        );
        Ok(summary)
    }

    /// One pass over a single project, enabled or not.
    pub async fn run_project(&self, project_id: Uuid) -> Result<SweepSummary, OrchestratorError> {
        let (pending, stale) = self.sweep_project(project_id).await?;
        let mut summary = SweepSummary::default();
        summary.absorb(&pending, &stale);
        Ok(summary)
    }

    async fn sweep_project(
        &self,
        project_id: Uuid,
    ) -> Result<(SweepReport, SweepReport), OrchestratorError> {
        let pending = self
            .orchestrator
            .create_pending_issues(project_id, self.config.batch_size)
            .await?;
        let stale = self
            .orchestrator
            .close_stale_issues(project_id, self.config.batch_size)
            .await?;
        Ok((pending, stale))
    }
}
