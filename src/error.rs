//! # Error Handling
//!
//! Error taxonomy for the triage engine. Configuration rejections and policy
//! filtering are named intake outcomes; tracker failures carry enough shape
//! for the dispatcher to decide whether a retry is worthwhile.

use thiserror::Error;

/// Errors raised by the repository layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl RepositoryError {
    /// Adapter for `map_err` on SeaORM calls.
    pub fn database_error(err: sea_orm::DbErr) -> Self {
        tracing::debug!(error = ?err, "Database operation failed");
        Self::Database(err)
    }

    pub fn validation_error<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound(message.into())
    }
}

/// Named outcomes of `process_error` that are not a successful upsert.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Project has error reporting switched off (or no settings row).
    #[error("error reporting is disabled for this project")]
    ReportingDisabled,
    /// Report matched an ignore pattern or a disallowed status code. Callers
    /// treat this as an accepted submission.
    #[error("error report filtered by project policy")]
    Filtered,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IntakeError {
    /// Stable code for logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            IntakeError::ReportingDisabled => "REPORTING_DISABLED",
            IntakeError::Filtered => "FILTERED",
            IntakeError::Repository(_) => "INTERNAL_ERROR",
        }
    }
}

/// Failures talking to an external issue tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("tracker rate limited the request (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    #[error("tracker issue #{0} not found")]
    NotFound(i64),
    #[error("tracker request timed out")]
    Timeout,
    #[error("network error talking to tracker: {0}")]
    Network(String),
    #[error("malformed tracker response: {0}")]
    Malformed(String),
    #[error("tracker misconfigured: {0}")]
    Configuration(String),
}

impl TrackerError {
    /// Transient failures are worth retrying; the rest will fail again as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Timeout
            | TrackerError::Network(_)
            | TrackerError::RateLimited { .. } => true,
            TrackerError::Http { status, .. } => *status >= 500,
            TrackerError::NotFound(_)
            | TrackerError::Malformed(_)
            | TrackerError::Configuration(_) => false,
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrackerError::Timeout
        } else if err.is_decode() {
            TrackerError::Malformed(err.to_string())
        } else {
            TrackerError::Network(err.to_string())
        }
    }
}

/// Failures while driving an issue lifecycle transition.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl OrchestratorError {
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::Tracker(err) => err.is_transient(),
            OrchestratorError::Repository(RepositoryError::Database(_)) => true,
            OrchestratorError::Repository(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_error_transience() {
        assert!(TrackerError::Timeout.is_transient());
        assert!(TrackerError::RateLimited { retry_after: Some(30) }.is_transient());
        assert!(
            TrackerError::Http {
                status: 502,
                body: "bad gateway".to_string()
            }
            .is_transient()
        );
        assert!(
            !TrackerError::Http {
                status: 422,
                body: "validation failed".to_string()
            }
            .is_transient()
        );
        assert!(!TrackerError::NotFound(12).is_transient());
    }

    #[test]
    fn orchestrator_error_delegates_transience() {
        let err: OrchestratorError = TrackerError::Network("reset".to_string()).into();
        assert!(err.is_transient());

        let err: OrchestratorError = RepositoryError::not_found("record").into();
        assert!(!err.is_transient());
    }

    #[test]
    fn intake_error_codes() {
        assert_eq!(IntakeError::ReportingDisabled.code(), "REPORTING_DISABLED");
        assert_eq!(IntakeError::Filtered.code(), "FILTERED");
    }
}
