//! Ingestion facade: record the report synchronously, hand tracker work to
//! the dispatcher.

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::dispatch::{OrchestrationDispatcher, OrchestrationJob};
use crate::error::IntakeError;
use crate::intake::{IncomingErrorReport, IntakeEngine};

/// What a caller learns after submitting a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ReportOutcome {
    #[serde(rename_all = "camelCase")]
    Accepted {
        record_id: Uuid,
        fingerprint: String,
        occurrence_count: i64,
        is_new: bool,
        /// A tracker job was queued for this report.
        dispatched: bool,
    },
    /// Dropped by the project's filters. Still a successful submission.
    Filtered,
}

pub struct ErrorPipeline {
    intake: Arc<IntakeEngine>,
    dispatcher: OrchestrationDispatcher,
}

impl ErrorPipeline {
    pub fn new(intake: Arc<IntakeEngine>, dispatcher: OrchestrationDispatcher) -> Self {
        Self { intake, dispatcher }
    }

    /// Returns as soon as the occurrence is stored; orchestration runs later.
    ///
    /// Fails with [`IntakeError::ReportingDisabled`] for disabled projects.
    #[instrument(skip(self, report), fields(error_type = %report.error_type))]
    pub async fn report(
        &self,
        project_id: Uuid,
        report: &IncomingErrorReport,
    ) -> Result<ReportOutcome, IntakeError> {
        let outcome = match self.intake.process_error(project_id, report).await {
            Ok(outcome) => outcome,
            Err(IntakeError::Filtered) => return Ok(ReportOutcome::Filtered),
            Err(err) => return Err(err),
        };

        let dispatched = outcome.needs_tracker_action()
            && self.dispatcher.dispatch(OrchestrationJob {
                record_id: outcome.record.id,
                project_id,
                fingerprint: outcome.record.fingerprint.clone(),
            });

        Ok(ReportOutcome::Accepted {
            record_id: outcome.record.id,
            fingerprint: outcome.record.fingerprint,
            occurrence_count: outcome.record.occurrence_count,
            is_new: outcome.is_new,
            dispatched,
        })
    }
}
