//! In-process tracker used by tests and local dry runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{IssueListQuery, IssueTracker, NewIssue, TrackerIssue, TrackerIssueState};
use crate::clock::{Clock, SystemClock};
use crate::error::TrackerError;

#[derive(Default)]
struct State {
    next_number: i64,
    issues: BTreeMap<i64, TrackerIssue>,
    comments: BTreeMap<i64, Vec<String>>,
    /// Remaining calls that fail with a network error.
    failures_pending: u32,
    calls: u64,
}

/// Issue store held entirely in memory.
///
/// Timestamps come from the injected clock so time-windowed rules can be
/// driven from a `ManualClock`.
#[derive(Clone)]
pub struct InMemoryTracker {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_number: 1,
                ..State::default()
            })),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Fail the next `count` calls with a transient network error.
    pub fn fail_next(&self, count: u32) {
        self.lock().failures_pending = count;
    }

    /// Insert a pre-existing issue, keeping numbering ahead of it.
    pub fn seed_issue(&self, issue: TrackerIssue) {
        let mut state = self.lock();
        state.next_number = state.next_number.max(issue.number + 1);
        state.issues.insert(issue.number, issue);
    }

    pub fn issue(&self, number: i64) -> Option<TrackerIssue> {
        self.lock().issues.get(&number).cloned()
    }

    pub fn issues(&self) -> Vec<TrackerIssue> {
        self.lock().issues.values().cloned().collect()
    }

    pub fn comments(&self, number: i64) -> Vec<String> {
        self.lock().comments.get(&number).cloned().unwrap_or_default()
    }

    /// Total operations attempted, including injected failures.
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    fn begin_call(&self) -> Result<MutexGuard<'_, State>, TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(TrackerError::Network("injected failure".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl IssueTracker for InMemoryTracker {
    async fn create_issue(&self, issue: NewIssue) -> Result<TrackerIssue, TrackerError> {
        let now = self.clock.now();
        let mut state = self.begin_call()?;
        let number = state.next_number;
        state.next_number += 1;

        let created = TrackerIssue {
            number,
            url: format!("memory://issues/{number}"),
            title: issue.title,
            body: Some(issue.body),
            state: TrackerIssueState::Open,
            labels: issue.labels,
            created_at: now,
            updated_at: now,
            closed_at: None,
        };
        state.issues.insert(number, created.clone());
        Ok(created)
    }

    async fn get_issue(&self, number: i64) -> Result<TrackerIssue, TrackerError> {
        let state = self.begin_call()?;
        state
            .issues
            .get(&number)
            .cloned()
            .ok_or(TrackerError::NotFound(number))
    }

    async fn update_issue_state(
        &self,
        number: i64,
        new_state: TrackerIssueState,
    ) -> Result<TrackerIssue, TrackerError> {
        let now = self.clock.now();
        let mut state = self.begin_call()?;
        let issue = state
            .issues
            .get_mut(&number)
            .ok_or(TrackerError::NotFound(number))?;

        if issue.state != new_state {
            issue.state = new_state;
            issue.closed_at = match new_state {
                TrackerIssueState::Closed => Some(now),
                TrackerIssueState::Open => None,
            };
        }
        issue.updated_at = now;
        Ok(issue.clone())
    }

    async fn add_comment(&self, number: i64, body: &str) -> Result<(), TrackerError> {
        let now = self.clock.now();
        let mut state = self.begin_call()?;
        let issue = state
            .issues
            .get_mut(&number)
            .ok_or(TrackerError::NotFound(number))?;
        issue.updated_at = now;
        state
            .comments
            .entry(number)
            .or_default()
            .push(body.to_string());
        Ok(())
    }

    async fn search_issues(&self, text: &str) -> Result<Vec<TrackerIssue>, TrackerError> {
        let state = self.begin_call()?;
        let needle = text.to_lowercase();
        Ok(state
            .issues
            .values()
            .filter(|issue| {
                issue.title.to_lowercase().contains(&needle)
                    || issue
                        .body
                        .as_deref()
                        .is_some_and(|body| body.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn list_issues(&self, query: &IssueListQuery) -> Result<Vec<TrackerIssue>, TrackerError> {
        let state = self.begin_call()?;
        let mut matches: Vec<TrackerIssue> = state
            .issues
            .values()
            .filter(|issue| query.state.is_none_or(|wanted| issue.state == wanted))
            .filter(|issue| {
                query
                    .created_since
                    .is_none_or(|since| issue.created_at >= since)
            })
            .filter(|issue| query.labels.iter().all(|label| issue.labels.contains(label)))
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            matches.truncate(limit as usize);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, Duration, Utc};

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn new_issue(title: &str, labels: &[&str]) -> NewIssue {
        NewIssue {
            title: title.to_string(),
            body: format!("body of {title}"),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn lifecycle_tracks_state_and_timestamps() {
        let clock = ManualClock::new(start());
        let tracker = InMemoryTracker::new(Arc::new(clock.clone()));

        let issue = tracker.create_issue(new_issue("boom", &["bug"])).await.unwrap();
        assert_eq!(issue.number, 1);

        clock.advance(Duration::hours(1));
        tracker.add_comment(1, "again").await.unwrap();
        assert_eq!(tracker.issue(1).unwrap().updated_at, start() + Duration::hours(1));

        let closed = tracker
            .update_issue_state(1, TrackerIssueState::Closed)
            .await
            .unwrap();
        assert_eq!(closed.closed_at, Some(start() + Duration::hours(1)));

        let reopened = tracker
            .update_issue_state(1, TrackerIssueState::Open)
            .await
            .unwrap();
        assert!(reopened.closed_at.is_none());
        assert_eq!(tracker.comments(1), vec!["again"]);

        assert!(matches!(
            tracker.get_issue(99).await,
            Err(TrackerError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn list_and_search_filters() {
        let clock = ManualClock::new(start());
        let tracker = InMemoryTracker::new(Arc::new(clock.clone()));

        tracker.create_issue(new_issue("old", &["bug"])).await.unwrap();
        clock.advance(Duration::hours(30));
        tracker
            .create_issue(new_issue("fresh", &["bug", "auto"]))
            .await
            .unwrap();

        let query = IssueListQuery {
            labels: vec!["bug".to_string()],
            state: Some(TrackerIssueState::Open),
            created_since: Some(clock.now() - Duration::hours(24)),
            limit: None,
        };
        let listed = tracker.list_issues(&query).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "fresh");

        let found = tracker.search_issues("BODY OF OLD").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].number, 1);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let tracker = InMemoryTracker::default();
        tracker.fail_next(1);
        let err = tracker.search_issues("x").await.unwrap_err();
        assert!(err.is_transient());
        assert!(tracker.search_issues("x").await.is_ok());
        assert_eq!(tracker.call_count(), 2);
    }
}
