//! Issue titles, bodies and comments written to the tracker.
//!
//! Every issue body ends with a fingerprint marker so the record can be
//! re-linked from a search hit even after the title is edited or wrapped.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use regex::Regex;

use crate::fingerprint::url_path;
use crate::models::ErrorRecordModel;

pub const MAX_TITLE_CHARS: usize = 100;
const MAX_STACK_LINES: usize = 50;
const MAX_STACK_CHARS: usize = 4_000;

static FINGERPRINT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*triage:fingerprint\s*=\s*([A-Za-z0-9:_-]+)\s*-->")
        .expect("fingerprint marker pattern compiles")
});

/// HTML comment that tags an issue body with its record's fingerprint.
pub fn fingerprint_marker(fingerprint: &str) -> String {
    format!("<!-- triage:fingerprint={fingerprint} -->")
}

/// Fingerprint embedded in `body`, if any.
pub fn extract_fingerprint(body: &str) -> Option<String> {
    FINGERPRINT_MARKER
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `[<type>] <first message line>`, capped at [`MAX_TITLE_CHARS`].
pub fn issue_title(record: &ErrorRecordModel) -> String {
    let first_line = record
        .message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("(no message)");
    let title = format!("[{}] {}", record.error_type, first_line);
    truncate_chars(&title, MAX_TITLE_CHARS)
}

pub fn issue_body(record: &ErrorRecordModel) -> String {
    let mut body = String::new();
    body.push_str("## Error report\n\n");
    body.push_str("| Field | Value |\n|---|---|\n");
    body.push_str(&format!("| Type | {} |\n", record.error_type));
    body.push_str(&format!(
        "| Code | {} |\n",
        record.error_code.as_deref().unwrap_or("unknown")
    ));
    if let Some(url) = record.url.as_deref() {
        body.push_str(&format!("| URL path | `{}` |\n", url_path(url)));
    }
    body.push_str(&format!("| Occurrences | {} |\n", record.occurrence_count));
    body.push_str(&format!(
        "| First seen | {} |\n",
        timestamp(record.first_seen_at.with_timezone(&Utc))
    ));
    body.push_str(&format!(
        "| Last seen | {} |\n",
        timestamp(record.last_seen_at.with_timezone(&Utc))
    ));

    body.push_str("\n### Message\n\n");
    body.push_str(&fenced(&record.message));

    if let Some(stack) = record.stack_trace.as_deref().filter(|s| !s.trim().is_empty()) {
        body.push_str("\n### Stack trace\n\n");
        body.push_str(&fenced(&truncate_stack(stack)));
    }

    body.push('\n');
    body.push_str(&fingerprint_marker(&record.fingerprint));
    body.push('\n');
    body
}

pub fn occurrence_comment(record: &ErrorRecordModel) -> String {
    format!(
        "This error occurred again.\n\n- Occurrences: {}\n- Last seen: {}",
        record.occurrence_count,
        timestamp(record.last_seen_at.with_timezone(&Utc))
    )
}

pub fn reopen_comment(record: &ErrorRecordModel, closed_at: DateTime<Utc>) -> String {
    let recurred = record.last_seen_at.with_timezone(&Utc);
    format!(
        "Reopening: this error recurred {} after the issue was closed.\n\n- Occurrences: {}\n- Last seen: {}",
        human_duration(recurred - closed_at),
        record.occurrence_count,
        timestamp(recurred)
    )
}

pub fn auto_close_comment(record: &ErrorRecordModel, stale_after: Duration) -> String {
    format!(
        "Closing automatically: no occurrences in the last {}.\n\n- Occurrences: {}\n- Last seen: {}\n\nThe issue will be reopened if the error comes back.",
        human_duration(stale_after),
        record.occurrence_count,
        timestamp(record.last_seen_at.with_timezone(&Utc))
    )
}

/// Comment attached to a recent open issue instead of opening a new one.
pub fn grouped_occurrence_comment(record: &ErrorRecordModel) -> String {
    let first_line = record.message.lines().next().unwrap_or_default().trim();
    format!(
        "A related error was reported while this issue is open and has been grouped here.\n\n- Error: `{}`\n- Type: {}\n- Occurrences: {}\n- Fingerprint: `{}`",
        truncate_chars(first_line, MAX_TITLE_CHARS).replace('`', "'"),
        record.error_type,
        record.occurrence_count,
        record.fingerprint
    )
}

fn fenced(text: &str) -> String {
    format!("```text\n{}\n```\n", text.replace("```", "'''"))
}

fn truncate_stack(stack: &str) -> String {
    let lines: Vec<&str> = stack.lines().take(MAX_STACK_LINES + 1).collect();
    let mut out = lines
        .iter()
        .take(MAX_STACK_LINES)
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    let mut truncated = lines.len() > MAX_STACK_LINES;
    if out.chars().count() > MAX_STACK_CHARS {
        out = out.chars().take(MAX_STACK_CHARS).collect();
        truncated = true;
    }
    if truncated {
        out.push_str("\n... (truncated)");
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn human_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    match minutes {
        m if m >= 48 * 60 => format!("{} days", m / (24 * 60)),
        m if m >= 120 => format!("{} hours", m / 60),
        m => format!("{m} minutes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorType, IssueState};
    use uuid::Uuid;

    fn record(message: &str) -> ErrorRecordModel {
        let seen = DateTime::parse_from_rfc3339("2025-02-03T04:05:06Z").unwrap();
        ErrorRecordModel {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            fingerprint: "9f1c2b3a:server:500:1a2b3c4d:orders-id".to_string(),
            error_type: ErrorType::Server,
            error_code: Some("500".to_string()),
            message: message.to_string(),
            stack_trace: Some("at a\nat b".to_string()),
            url: Some("https://shop.example.com/orders/42".to_string()),
            user_id: None,
            environment: None,
            metadata: None,
            occurrence_count: 7,
            first_seen_at: seen,
            last_seen_at: seen,
            issue_number: None,
            issue_state: IssueState::None,
            created_at: seen,
            updated_at: seen,
        }
    }

    #[test]
    fn title_uses_first_line_and_truncates() {
        assert_eq!(
            issue_title(&record("\n  Timeout talking to db\nsecond line")),
            "[server] Timeout talking to db"
        );

        let long = issue_title(&record(&"é".repeat(300)));
        assert_eq!(long.chars().count(), MAX_TITLE_CHARS);
        assert!(long.ends_with("..."));
    }

    #[test]
    fn body_embeds_recoverable_marker() {
        let r = record("boom");
        let body = issue_body(&r);
        assert!(body.contains("| Occurrences | 7 |"));
        assert!(body.contains("`/orders/:id`"));
        assert!(body.contains("### Stack trace"));
        assert_eq!(extract_fingerprint(&body).as_deref(), Some(r.fingerprint.as_str()));
    }

    #[test]
    fn marker_survives_wrapping_and_edits() {
        let wrapped = "Edited by a human.\n\n<!--\n  triage:fingerprint = abc:server:unknown:deadbeef:unknown\n-->\ntrailing";
        assert_eq!(
            extract_fingerprint(wrapped).as_deref(),
            Some("abc:server:unknown:deadbeef:unknown")
        );
        assert_eq!(extract_fingerprint("no marker here"), None);
    }

    #[test]
    fn long_stack_is_truncated() {
        let mut r = record("boom");
        r.stack_trace = Some((0..200).map(|i| format!("at frame{i}")).collect::<Vec<_>>().join("\n"));
        let body = issue_body(&r);
        assert!(body.contains("at frame49"));
        assert!(!body.contains("at frame50\n"));
        assert!(body.contains("(truncated)"));
    }

    #[test]
    fn comment_bodies_mention_counts() {
        let r = record("boom");
        assert!(occurrence_comment(&r).contains("Occurrences: 7"));
        assert!(auto_close_comment(&r, Duration::days(7)).contains("7 days"));
        let closed = r.last_seen_at.with_timezone(&Utc) - Duration::hours(3);
        assert!(reopen_comment(&r, closed).contains("3 hours"));
        assert!(grouped_occurrence_comment(&r).contains(&r.fingerprint));
    }
}
