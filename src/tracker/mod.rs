//! # Issue Tracker Capability
//!
//! The orchestrator only talks to trackers through [`IssueTracker`]. Any
//! backend implementing the six operations is substitutable; GitHub is the
//! production implementation and [`InMemoryTracker`] backs tests and dry runs.

pub mod github;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::settings::ProjectErrorSettings;

pub use github::GitHubTracker;
pub use memory::InMemoryTracker;

/// Remote issue state as the tracker reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerIssueState {
    Open,
    Closed,
}

impl TrackerIssueState {
    pub const fn as_str(self) -> &'static str {
        match self {
            TrackerIssueState::Open => "open",
            TrackerIssueState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerIssue {
    pub number: i64,
    pub url: String,
    pub title: String,
    pub body: Option<String>,
    pub state: TrackerIssueState,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Structured listing filter; all present conditions must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueListQuery {
    /// Issues must carry every label listed.
    pub labels: Vec<String>,
    pub state: Option<TrackerIssueState>,
    pub created_since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(&self, issue: NewIssue) -> Result<TrackerIssue, TrackerError>;

    /// `TrackerError::NotFound` when the number does not exist.
    async fn get_issue(&self, number: i64) -> Result<TrackerIssue, TrackerError>;

    async fn update_issue_state(
        &self,
        number: i64,
        state: TrackerIssueState,
    ) -> Result<TrackerIssue, TrackerError>;

    async fn add_comment(&self, number: i64, body: &str) -> Result<(), TrackerError>;

    /// Free-text search over titles and bodies, any state.
    async fn search_issues(&self, text: &str) -> Result<Vec<TrackerIssue>, TrackerError>;

    async fn list_issues(&self, query: &IssueListQuery) -> Result<Vec<TrackerIssue>, TrackerError>;
}

/// Resolves the tracker to use for a project.
pub trait TrackerFactory: Send + Sync {
    /// `Ok(None)` when the project has no usable tracker configuration.
    fn for_project(
        &self,
        settings: &ProjectErrorSettings,
    ) -> Result<Option<Arc<dyn IssueTracker>>, TrackerError>;
}

/// Builds a [`GitHubTracker`] per project from its repository and token.
#[derive(Debug, Clone)]
pub struct GitHubTrackerFactory {
    client: reqwest::Client,
    api_base: String,
}

impl GitHubTrackerFactory {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(github::USER_AGENT)
            .build()
            .map_err(|err| TrackerError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }
}

impl TrackerFactory for GitHubTrackerFactory {
    fn for_project(
        &self,
        settings: &ProjectErrorSettings,
    ) -> Result<Option<Arc<dyn IssueTracker>>, TrackerError> {
        let tracker = &settings.issue_tracker;
        let (Some(repository), Some(token)) = (&tracker.repository, &tracker.token) else {
            return Ok(None);
        };
        if !tracker.is_configured() {
            return Ok(None);
        }

        let github = GitHubTracker::new(
            self.client.clone(),
            &self.api_base,
            repository.trim(),
            token.trim(),
        )?;
        Ok(Some(Arc::new(github)))
    }
}

/// Hands out one shared tracker to every configured project.
#[derive(Clone)]
pub struct SharedTrackerFactory {
    tracker: Arc<dyn IssueTracker>,
}

impl SharedTrackerFactory {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

impl TrackerFactory for SharedTrackerFactory {
    fn for_project(
        &self,
        settings: &ProjectErrorSettings,
    ) -> Result<Option<Arc<dyn IssueTracker>>, TrackerError> {
        if settings.tracker_configured() {
            Ok(Some(self.tracker.clone()))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn configured() -> ProjectErrorSettings {
        let mut settings = ProjectErrorSettings::disabled(Uuid::new_v4());
        settings.enabled = true;
        settings.issue_tracker.repository = Some("acme/web".to_string());
        settings.issue_tracker.token = Some("ghp_test".to_string());
        settings
    }

    #[test]
    fn github_factory_requires_repository_and_token() {
        let factory =
            GitHubTrackerFactory::new("https://api.github.com", Duration::from_secs(5)).unwrap();
        assert!(factory.for_project(&configured()).unwrap().is_some());

        let mut missing_token = configured();
        missing_token.issue_tracker.token = None;
        assert!(factory.for_project(&missing_token).unwrap().is_none());

        let mut bad_repo = configured();
        bad_repo.issue_tracker.repository = Some("not-a-repo".to_string());
        assert!(matches!(
            factory.for_project(&bad_repo),
            Err(TrackerError::Configuration(_))
        ));
    }

    #[test]
    fn shared_factory_checks_configuration() {
        let factory = SharedTrackerFactory::new(Arc::new(InMemoryTracker::default()));
        assert!(factory.for_project(&configured()).unwrap().is_some());
        assert!(
            factory
                .for_project(&ProjectErrorSettings::disabled(Uuid::new_v4()))
                .unwrap()
                .is_none()
        );
    }
}
