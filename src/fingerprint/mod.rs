//! # Fingerprinting
//!
//! Pure functions that turn a raw error report into a stable identity key.
//! Nothing here touches storage or the network.
//!
//! A fingerprint has five `:`-separated components:
//!
//! ```text
//! <project prefix>:<error type>:<error code>:<message hash>:<url path>
//! ```
//!
//! Each component is passed through [`sanitize`].

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::intake::IncomingErrorReport;

/// Maximum length of a single sanitized fingerprint component.
pub const MAX_COMPONENT_LEN: usize = 50;

/// Placeholder for absent error codes and URLs.
pub const UNKNOWN_COMPONENT: &str = "unknown";

/// One substitution applied by [`normalize`].
pub struct NormalizationRule {
    pub name: &'static str,
    pattern: Regex,
    replacement: &'static str,
    /// Reapply until the text stops changing (for overlapping matches).
    until_stable: bool,
}

impl NormalizationRule {
    fn new(
        name: &'static str,
        pattern: &str,
        replacement: &'static str,
        until_stable: bool,
    ) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("normalization pattern compiles"),
            replacement,
            until_stable,
        }
    }

    fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let mut current = self.pattern.replace_all(input, self.replacement);
        if self.until_stable {
            loop {
                let next = self.pattern.replace_all(&current, self.replacement);
                if next == current {
                    break;
                }
                current = Cow::Owned(next.into_owned());
            }
        }
        current
    }
}

/// Substitution table, applied in order.
///
/// The timestamp rule accepts `N` in the minute and second slots because the
/// colon-number rule runs first and rewrites `12:30:45)` to `12:N:N)`.
pub static NORMALIZATION_RULES: LazyLock<Vec<NormalizationRule>> = LazyLock::new(|| {
    vec![
        NormalizationRule::new("line_number", r"(?i)\bline\s+\d+", "line N", false),
        NormalizationRule::new("colon_number", r":\d+([:)])", ":N$1", true),
        NormalizationRule::new("hex_address", r"(?i)\b0x[0-9a-f]+\b", "0xADDR", false),
        NormalizationRule::new(
            "timestamp",
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:(?:\d{2}|N)(?::(?:\d{2}|N))?(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            "TIMESTAMP",
            false,
        ),
        NormalizationRule::new(
            "uuid",
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            "UUID",
            false,
        ),
        NormalizationRule::new("whitespace", r"\s+", " ", false),
    ]
});

static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("uuid segment pattern compiles")
});

/// Strip run-specific values from a message so equivalent errors hash alike.
///
/// ```
/// use triage::fingerprint::normalize;
///
/// assert_eq!(
///     normalize("Timeout at 0x7fAB12CD, line 42, id 123e4567-e89b-12d3-a456-426614174000"),
///     "timeout at 0xaddr, line n, id uuid"
/// );
/// ```
pub fn normalize(message: &str) -> String {
    let mut text = message.to_string();
    for rule in NORMALIZATION_RULES.iter() {
        let replaced = match rule.apply(&text) {
            Cow::Borrowed(_) => continue,
            Cow::Owned(replaced) => replaced,
        };
        text = replaced;
    }
    text.trim().to_lowercase()
}

/// First 8 hex characters of the SHA-256 digest of `input`.
///
/// Short by choice; unique in practice within one project, not globally.
pub fn hash8(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(8);
    encoded
}

/// Route-like path of `url` with identifier segments collapsed to `:id`.
///
/// Unparseable input (including relative URLs) falls back to `hash8(url)`.
pub fn url_path(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return hash8(url);
    };

    let segments: Vec<&str> = parsed
        .path()
        .split('/')
        .map(|segment| {
            if is_identifier_segment(segment) {
                ":id"
            } else {
                segment
            }
        })
        .collect();

    let path = segments.join("/");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_identifier_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    segment.bytes().all(|b| b.is_ascii_digit()) || UUID_SEGMENT.is_match(segment)
}

/// Lower-case, map anything outside `[a-z0-9-]` to `-`, collapse dash runs,
/// trim dashes and truncate to [`MAX_COMPONENT_LEN`].
pub fn sanitize(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    let mut last_dash = false;

    for ch in component.chars().flat_map(char::to_lowercase) {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '-'
        };
        if mapped == '-' {
            if last_dash {
                continue;
            }
            last_dash = true;
        } else {
            last_dash = false;
        }
        out.push(mapped);
    }

    let mut trimmed = out.trim_matches('-').to_string();
    // Output is ASCII, so byte truncation is char-safe.
    trimmed.truncate(MAX_COMPONENT_LEN);
    trimmed
}

/// Deterministic identity for a report within a project.
///
/// Depends only on the project, error type, error code, normalized message
/// and URL path; never on wall-clock time or call order.
pub fn generate_fingerprint(project_id: Uuid, report: &IncomingErrorReport) -> String {
    let project = project_id.to_string();
    let project_prefix = &project[..8];

    let code = report
        .error_code
        .as_deref()
        .filter(|code| !code.trim().is_empty())
        .unwrap_or(UNKNOWN_COMPONENT);

    let message_hash = hash8(&normalize(&report.message));

    let path = report
        .url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .map(url_path)
        .unwrap_or_else(|| UNKNOWN_COMPONENT.to_string());

    [
        sanitize(project_prefix),
        sanitize(report.error_type.as_str()),
        sanitize(code),
        sanitize(&message_hash),
        sanitize(&path),
    ]
    .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorType;

    fn project() -> Uuid {
        Uuid::parse_str("9f1c2b3a-0000-4000-8000-000000000001").unwrap()
    }

    #[test]
    fn normalizes_documented_example() {
        let first = normalize(
            "Timeout at 0x7fAB12CD, line 42, id 123e4567-e89b-12d3-a456-426614174000",
        );
        let second = normalize(
            "Timeout at 0xDEADBEEF, line 42, id 00000000-1111-2222-3333-444444444444",
        );
        assert_eq!(first, "timeout at 0xaddr, line n, id uuid");
        assert_eq!(first, second);
    }

    #[test]
    fn normalizes_stack_positions() {
        assert_eq!(
            normalize("at render (app.js:120:17)"),
            normalize("at render (app.js:98:3)")
        );
        assert_eq!(normalize("at render (app.js:120:17)"), "at render (app.js:n:n)");
    }

    #[test]
    fn normalizes_timestamps() {
        let a = normalize("job failed at 2024-03-01T10:15:42.123Z after retry");
        let b = normalize("job failed at 2025-11-30 23:59:01+02:00 after retry");
        assert_eq!(a, "job failed at timestamp after retry");
        assert_eq!(a, b);
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(normalize("  Cannot\tread \n property  "), "cannot read property");
    }

    #[test]
    fn hash8_is_short_hex() {
        let hash = hash8("timeout at 0xaddr");
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash8("timeout at 0xaddr"));
    }

    #[test]
    fn url_path_collapses_identifiers() {
        assert_eq!(
            url_path("https://app.example.com/orders/1234/items/123e4567-e89b-12d3-a456-426614174000/?page=2"),
            "/orders/:id/items/:id"
        );
        assert_eq!(url_path("https://app.example.com/"), "/");
        assert_eq!(url_path("https://app.example.com/v2/users"), "/v2/users");
    }

    #[test]
    fn url_path_falls_back_to_hash() {
        assert_eq!(url_path("/relative/path"), hash8("/relative/path"));
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize("/Orders/:id/"), "orders-id");
        assert_eq!(sanitize("E_CHUNK__LOAD"), "e-chunk-load");
        assert_eq!(sanitize(&"x".repeat(80)).len(), MAX_COMPONENT_LEN);
        assert_eq!(sanitize("Ünïcode"), "n-code");
    }

    #[test]
    fn fingerprint_is_deterministic_across_dynamic_values() {
        let a = IncomingErrorReport::new(
            ErrorType::Server,
            "Timeout at 0x7fAB12CD, line 42, id 123e4567-e89b-12d3-a456-426614174000",
        )
        .with_error_code("500")
        .with_url("https://api.example.com/orders/42");
        let b = IncomingErrorReport::new(
            ErrorType::Server,
            "Timeout at 0x1, line 42, id 00000000-1111-2222-3333-444444444444",
        )
        .with_error_code("500")
        .with_url("https://api.example.com/orders/77");

        let fp = generate_fingerprint(project(), &a);
        assert_eq!(fp, generate_fingerprint(project(), &b));

        let parts: Vec<&str> = fp.split(':').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "9f1c2b3a");
        assert_eq!(parts[1], "server");
        assert_eq!(parts[2], "500");
        assert_eq!(parts[3], hash8("timeout at 0xaddr, line n, id uuid"));
        assert_eq!(parts[4], "orders-id");
    }

    #[test]
    fn fingerprint_uses_unknown_for_missing_parts() {
        let report = IncomingErrorReport::new(ErrorType::Client, "Script error.");
        let fp = generate_fingerprint(project(), &report);
        assert!(fp.starts_with("9f1c2b3a:client:unknown:"));
        assert!(fp.ends_with(":unknown"));
    }

    #[test]
    fn fingerprint_distinguishes_error_type_and_code() {
        let client = IncomingErrorReport::new(ErrorType::Client, "boom");
        let server = IncomingErrorReport::new(ErrorType::Server, "boom");
        let coded = IncomingErrorReport::new(ErrorType::Server, "boom").with_error_code("502");

        let fps = [
            generate_fingerprint(project(), &client),
            generate_fingerprint(project(), &server),
            generate_fingerprint(project(), &coded),
        ];
        assert_ne!(fps[0], fps[1]);
        assert_ne!(fps[1], fps[2]);
    }
}
