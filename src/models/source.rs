// Source descriptors and fetched items
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// RSS/Atom feed, fetched and filtered by the lookback window.
    Rss,
    /// Single article page, scraped whole (on-demand flow).
    Article,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub source_id: String,
    pub kind: SourceKind,
    pub locator: String,
    pub lookback_days: i64,
}

impl SourceDescriptor {
    pub fn rss(source_id: impl Into<String>, url: impl Into<String>, lookback_days: i64) -> Self {
        Self {
            source_id: source_id.into(),
            kind: SourceKind::Rss,
            locator: url.into(),
            lookback_days,
        }
    }

    pub fn article(url: impl Into<String>) -> Self {
        let locator = url.into();
        Self {
            source_id: "article".to_string(),
            kind: SourceKind::Article,
            locator,
            lookback_days: 0,
        }
    }
}

/// One fetched unit. Discarded after the run unless an external collaborator
/// archives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub source_id: String,
    pub source_kind: SourceKind,
    pub title: String,
    pub body: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    /// Normalized-title hash used for near-duplicate detection.
    pub fingerprint: String,
    pub category: Option<Category>,
}

/// Per-source fetch failure, surfaced for observability instead of failing
/// the aggregation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceError {
    pub source_id: String,
    pub message: String,
}
