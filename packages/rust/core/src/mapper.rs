//! Outcome → record mapping.

use articlepipe_shared::{FetchOutcome, LimitsConfig, PersistableRecord, truncate_chars};

/// Default cap on stored titles, in characters.
pub const RECORD_TITLE_CHARS: usize = 200;

/// Default cap on stored content, in characters.
pub const RECORD_CONTENT_CHARS: usize = 2000;

/// Turns a successful [`FetchOutcome`] into a [`PersistableRecord`].
///
/// Pure and total: the url is kept verbatim, title and content are cut to
/// the configured character caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMapper {
    pub title_chars: usize,
    pub content_chars: usize,
}

impl Default for RecordMapper {
    fn default() -> Self {
        Self {
            title_chars: RECORD_TITLE_CHARS,
            content_chars: RECORD_CONTENT_CHARS,
        }
    }
}

impl From<&LimitsConfig> for RecordMapper {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            title_chars: limits.title_chars,
            content_chars: limits.content_chars,
        }
    }
}

impl RecordMapper {
    pub fn map(&self, outcome: &FetchOutcome, source: &str) -> PersistableRecord {
        PersistableRecord {
            title: truncate_chars(&outcome.title, self.title_chars),
            url: outcome.url.clone(),
            content: truncate_chars(&outcome.content, self.content_chars),
            source: source.to_string(),
            fetched_at: outcome.fetched_at,
        }
    }
}
