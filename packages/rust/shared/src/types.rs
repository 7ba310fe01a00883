//! Core domain types flowing through the fetch → map → store pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP status reserved for "transport failure, no response".
pub const STATUS_NO_RESPONSE: u16 = 0;

/// The only status the pipeline treats as a successful fetch.
pub const STATUS_OK: u16 = 200;

// ---------------------------------------------------------------------------
// FetchTarget
// ---------------------------------------------------------------------------

/// One URL to retrieve. Identity is the string itself; cloning is cheap so
/// each spawned fetch task can own its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchTarget(Arc<str>);

impl FetchTarget {
    pub fn new(url: impl Into<Arc<str>>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FetchTarget {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for FetchTarget {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl std::fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// FetchOutcome
// ---------------------------------------------------------------------------

/// Result of one Fetch Unit execution that got a response.
///
/// A non-200 outcome always carries empty `title` and `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    /// The URL that was requested.
    pub url: String,
    /// Extracted title (bounded).
    pub title: String,
    /// Extracted body text (bounded).
    pub content: String,
    /// HTTP status of the final response.
    pub status: u16,
    /// When the fetch completed.
    pub fetched_at: DateTime<Utc>,
}

impl FetchOutcome {
    /// Outcome for a response whose status was not 200.
    pub fn http_error(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            content: String::new(),
            status,
            fetched_at: Utc::now(),
        }
    }

    /// Whether this outcome counts as a successful fetch.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

// ---------------------------------------------------------------------------
// PersistableRecord / StoredArticle
// ---------------------------------------------------------------------------

/// A row ready to be upserted, keyed by `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistableRecord {
    /// Truncated title.
    pub title: String,
    /// Untruncated URL, the natural unique key.
    pub url: String,
    /// Truncated content.
    pub content: String,
    /// Caller-supplied source label (e.g. `quotes`).
    pub source: String,
    /// When the underlying fetch completed.
    pub fetched_at: DateTime<Utc>,
}

/// The persisted form of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArticle {
    /// Store-assigned identifier.
    pub id: i64,
    pub title: String,
    pub url: String,
    pub content: String,
    pub source: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Set on first insert, never updated.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Aggregate counters for one pipeline invocation.
///
/// `success + failed == total` and `stored <= success` always hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub stored: usize,
}

/// Grouped counts over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_articles: u64,
    /// Source label → row count, ordered by label.
    pub by_source: BTreeMap<String, u64>,
    pub database_path: String,
}

// ---------------------------------------------------------------------------
// Text bounding
// ---------------------------------------------------------------------------

/// Truncate `text` to at most `max_chars` characters.
///
/// Counts Unicode scalar values, so a cut never lands inside a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_long_text_to_exact_cap() {
        let text = "a".repeat(2500);
        assert_eq!(truncate_chars(&text, 2000).chars().count(), 2000);
    }

    #[test]
    fn truncate_preserves_short_text() {
        assert_eq!(truncate_chars("short", 2000), "short");
        assert_eq!(truncate_chars("", 10), "");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let text = "문서제목입니다";
        let cut = truncate_chars(text, 3);
        assert_eq!(cut, "문서제");
        assert_eq!(cut.chars().count(), 3);
    }

    #[test]
    fn http_error_outcome_is_empty() {
        let outcome = FetchOutcome::http_error("https://example.com/missing", 404);
        assert!(!outcome.is_success());
        assert!(outcome.title.is_empty());
        assert!(outcome.content.is_empty());
        assert_eq!(outcome.status, 404);
    }

    #[test]
    fn fetch_target_serializes_as_plain_string() {
        let target = FetchTarget::from("https://example.com/a");
        let json = serde_json::to_string(&target).expect("serialize");
        assert_eq!(json, r#""https://example.com/a""#);
        assert_eq!(target.to_string(), "https://example.com/a");
    }

    #[test]
    fn statistics_serialize_flat() {
        let stats = BatchStatistics {
            total: 3,
            success: 2,
            failed: 1,
            stored: 2,
        };
        let json = serde_json::to_value(stats).expect("serialize");
        assert_eq!(json["total"], 3);
        assert_eq!(json["stored"], 2);
    }
}
