// Source aggregator - concurrent multi-source fetch with per-source isolation
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::dedup;
use crate::models::{SourceDescriptor, SourceError, SourceItem, SourceKind};

const MAX_ENTRIES_PER_FEED: usize = 30;
const MAX_ARTICLE_BODY_CHARS: usize = 5000;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref WS_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref TITLE_RE: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
    static ref PARAGRAPH_RE: Regex = Regex::new(r"(?is)<p[^>]*>(.*?)</p>").unwrap();
    static ref SCRIPT_RE: Regex = Regex::new(
        r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<nav[^>]*>.*?</nav>|<header[^>]*>.*?</header>|<footer[^>]*>.*?</footer>"
    )
    .unwrap();
}

/// Remove markup and collapse whitespace.
pub fn clean_html(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, " ");
    WS_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Items plus per-source errors. Errors are observability data, never a
/// reason to fail the run.
#[derive(Debug, Default)]
pub struct AggregateOutcome {
    pub items: Vec<SourceItem>,
    pub errors: Vec<SourceError>,
}

/// Pluggable aggregation seam so the orchestrator can be driven without
/// network access.
#[async_trait::async_trait]
pub trait ItemSource: Send + Sync {
    async fn collect(&self, sources: &[SourceDescriptor]) -> AggregateOutcome;
}

/// Fetches every descriptor concurrently, each under its own timeout, and
/// offloads feed parsing to the blocking pool so one source's parse cannot
/// delay another's network wait.
pub struct SourceAggregator {
    client: Client,
    fetch_timeout: Duration,
}

impl SourceAggregator {
    pub fn new(fetch_timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent("briefing-engine/0.1")
            .timeout(fetch_timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            fetch_timeout,
        }
    }

    async fn fetch_one(&self, src: SourceDescriptor) -> Result<Vec<SourceItem>, SourceError> {
        let source_id = src.source_id.clone();
        let err = move |message: String| SourceError {
            source_id: source_id.clone(),
            message,
        };

        let response = tokio::time::timeout(self.fetch_timeout, self.client.get(&src.locator).send())
            .await
            .map_err(|_| err(format!("timed out after {:?}", self.fetch_timeout)))?
            .map_err(|e| err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(err(format!("HTTP {}", response.status())));
        }

        let body = response.text().await.map_err(|e| err(e.to_string()))?;

        // CPU-bound parsing happens off the async path.
        let parsed = tokio::task::spawn_blocking(move || match src.kind {
            SourceKind::Rss => parse_feed(&src, &body),
            SourceKind::Article => Ok(extract_article(&src, &body)),
        })
        .await
        .map_err(|e| err(format!("parse task panicked: {}", e)))?;

        parsed
    }
}

#[async_trait::async_trait]
impl ItemSource for SourceAggregator {
    async fn collect(&self, sources: &[SourceDescriptor]) -> AggregateOutcome {
        let outcome = fan_out(sources.to_vec(), |src| self.fetch_one(src)).await;
        info!(
            items = outcome.items.len(),
            failed_sources = outcome.errors.len(),
            "aggregation finished"
        );
        outcome
    }
}

/// Dispatch one fetch future per source and gather results. A slow or failing
/// source only costs its own timeout; the others complete independently.
pub async fn fan_out<F, Fut>(sources: Vec<SourceDescriptor>, fetch: F) -> AggregateOutcome
where
    F: Fn(SourceDescriptor) -> Fut,
    Fut: Future<Output = Result<Vec<SourceItem>, SourceError>>,
{
    let futures: Vec<_> = sources.into_iter().map(&fetch).collect();
    let results = join_all(futures).await;

    let mut outcome = AggregateOutcome::default();
    for result in results {
        match result {
            Ok(items) => outcome.items.extend(items),
            Err(e) => {
                warn!(source_id = %e.source_id, error = %e.message, "source fetch failed");
                outcome.errors.push(e);
            }
        }
    }
    outcome
}

fn parse_feed(src: &SourceDescriptor, body: &str) -> Result<Vec<SourceItem>, SourceError> {
    let feed = feed_rs::parser::parse(body.as_bytes()).map_err(|e| SourceError {
        source_id: src.source_id.clone(),
        message: format!("feed parse failed: {}", e),
    })?;

    let cutoff = Utc::now() - ChronoDuration::days(src.lookback_days);
    let fetched_at = Utc::now();
    let mut items = Vec::new();

    for entry in feed.entries.into_iter().take(MAX_ENTRIES_PER_FEED) {
        let published: DateTime<Utc> = entry
            .published
            .or(entry.updated)
            .unwrap_or(fetched_at);
        if published < cutoff {
            continue;
        }

        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());
        let url = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();
        let raw_body = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .unwrap_or_default();

        items.push(SourceItem {
            source_id: src.source_id.clone(),
            source_kind: SourceKind::Rss,
            fingerprint: dedup::fingerprint(&title),
            title,
            body: clean_html(&raw_body),
            url,
            published_at: published,
            fetched_at,
            category: None,
        });
    }

    Ok(items)
}

/// Crude readability pass for a single article page: drop script/style/nav
/// blocks, then join the paragraph texts.
fn extract_article(src: &SourceDescriptor, html: &str) -> Vec<SourceItem> {
    let pruned = SCRIPT_RE.replace_all(html, " ");

    let title = TITLE_RE
        .captures(&pruned)
        .and_then(|c| c.get(1))
        .map(|m| clean_html(m.as_str()))
        .unwrap_or_else(|| src.locator.clone());

    let mut body = PARAGRAPH_RE
        .captures_iter(&pruned)
        .filter_map(|c| c.get(1))
        .map(|m| clean_html(m.as_str()))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if body.len() > MAX_ARTICLE_BODY_CHARS {
        let mut cut = MAX_ARTICLE_BODY_CHARS;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    let now = Utc::now();
    vec![SourceItem {
        source_id: src.source_id.clone(),
        source_kind: SourceKind::Article,
        fingerprint: dedup::fingerprint(&title),
        title,
        body,
        url: src.locator.clone(),
        published_at: now,
        fetched_at: now,
        category: None,
    }]
}
