//! # Project Error Settings
//!
//! Typed, read-only view over a `project_error_settings` row. A project with no
//! row gets [`ProjectErrorSettings::disabled`], which rejects all intake.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::models::project_error_settings::Model as SettingsModel;

/// Default cap on issue creations per project and UTC day.
pub const DEFAULT_MAX_ISSUES_PER_DAY: u32 = 10;

/// Default occurrence threshold before a first issue is created.
pub const DEFAULT_MIN_OCCURRENCES: u32 = 1;

/// Connection details for the project's issue tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueTrackerConfig {
    /// `owner/name`
    pub repository: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub create_issues: bool,
}

impl IssueTrackerConfig {
    /// True when both a target repository and a credential are present.
    pub fn is_configured(&self) -> bool {
        let has_repo = self
            .repository
            .as_deref()
            .is_some_and(|repo| !repo.trim().is_empty());
        let has_token = self
            .token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty());
        has_repo && has_token
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub max_issues_per_day: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_issues_per_day: DEFAULT_MAX_ISSUES_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    pub min_occurrences: u32,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Allow-list for server errors carrying a numeric code; empty allows all.
    #[serde(default)]
    pub status_codes: Vec<u16>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_occurrences: DEFAULT_MIN_OCCURRENCES,
            ignore_patterns: Vec::new(),
            status_codes: Vec::new(),
        }
    }
}

/// Per-project error reporting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectErrorSettings {
    pub project_id: Uuid,
    pub enabled: bool,
    pub issue_tracker: IssueTrackerConfig,
    pub rate_limit: RateLimitSettings,
    pub filters: FilterSettings,
}

impl ProjectErrorSettings {
    /// Settings used when a project has no row: reporting disabled.
    pub fn disabled(project_id: Uuid) -> Self {
        Self {
            project_id,
            enabled: false,
            issue_tracker: IssueTrackerConfig::default(),
            rate_limit: RateLimitSettings::default(),
            filters: FilterSettings::default(),
        }
    }

    pub fn tracker_configured(&self) -> bool {
        self.issue_tracker.is_configured()
    }

    /// Creation requires an enabled flag and a usable tracker.
    pub fn can_create_issues(&self) -> bool {
        self.issue_tracker.create_issues && self.tracker_configured()
    }
}

impl From<SettingsModel> for ProjectErrorSettings {
    fn from(model: SettingsModel) -> Self {
        let labels = string_list(model.tracker_labels.as_ref(), "tracker_labels");
        let ignore_patterns = string_list(model.ignore_patterns.as_ref(), "ignore_patterns");
        let status_codes = status_code_list(model.status_codes.as_ref());

        Self {
            project_id: model.project_id,
            enabled: model.enabled,
            issue_tracker: IssueTrackerConfig {
                repository: model.tracker_repository,
                token: model.tracker_token,
                labels,
                create_issues: model.create_issues,
            },
            rate_limit: RateLimitSettings {
                max_issues_per_day: u32::try_from(model.max_issues_per_day).unwrap_or(0),
            },
            filters: FilterSettings {
                min_occurrences: u32::try_from(model.min_occurrences)
                    .unwrap_or(DEFAULT_MIN_OCCURRENCES)
                    .max(1),
                ignore_patterns,
                status_codes,
            },
        }
    }
}

fn string_list(value: Option<&JsonValue>, field: &'static str) -> Vec<String> {
    match value {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::to_string)
            .collect(),
        Some(other) => {
            warn!(field, value = ?other, "Expected JSON array of strings; ignoring");
            Vec::new()
        }
    }
}

/// Accepts numbers or numeric strings; anything outside `u16` is dropped.
fn status_code_list(value: Option<&JsonValue>) -> Vec<u16> {
    let Some(JsonValue::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
            JsonValue::String(s) => s.trim().parse::<u16>().ok(),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn model() -> SettingsModel {
        SettingsModel {
            project_id: Uuid::new_v4(),
            enabled: true,
            tracker_repository: Some("acme/web".to_string()),
            tracker_token: Some("ghp_test".to_string()),
            tracker_labels: Some(serde_json::json!(["bug", "auto"])),
            create_issues: true,
            max_issues_per_day: 5,
            min_occurrences: 3,
            ignore_patterns: Some(serde_json::json!(["^ResizeObserver"])),
            status_codes: Some(serde_json::json!([500, "502", "bogus", 70000])),
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn converts_model_into_settings() {
        let settings = ProjectErrorSettings::from(model());
        assert!(settings.enabled);
        assert!(settings.can_create_issues());
        assert_eq!(settings.issue_tracker.labels, vec!["bug", "auto"]);
        assert_eq!(settings.rate_limit.max_issues_per_day, 5);
        assert_eq!(settings.filters.min_occurrences, 3);
        assert_eq!(settings.filters.status_codes, vec![500, 502]);
    }

    #[test]
    fn missing_token_means_tracker_not_configured() {
        let mut raw = model();
        raw.tracker_token = Some("   ".to_string());
        let settings = ProjectErrorSettings::from(raw);
        assert!(!settings.tracker_configured());
        assert!(!settings.can_create_issues());
    }

    #[test]
    fn disabled_defaults() {
        let settings = ProjectErrorSettings::disabled(Uuid::nil());
        assert!(!settings.enabled);
        assert_eq!(settings.filters.min_occurrences, DEFAULT_MIN_OCCURRENCES);
        assert_eq!(
            settings.rate_limit.max_issues_per_day,
            DEFAULT_MAX_ISSUES_PER_DAY
        );
    }
}
