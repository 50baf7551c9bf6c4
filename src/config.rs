// src/config.rs
use std::env;
use std::time::Duration;

use crate::error::EngineError;
use crate::models::SourceDescriptor;
use crate::orchestrator::EngineConfig;

const DEFAULT_LOOKBACK_DAYS: i64 = 7;
const DEFAULT_MAX_REVISIONS: u32 = 3;

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: String,

    pub completion_api_key: String,
    pub completion_base_url: String,
    pub completion_model: String,

    pub video_api_key: String,
    pub video_base_url: String,
    pub video_avatar_id: String,
    pub video_voice_id: String,

    pub publish_api_key: String,
    pub publish_base_url: String,
    pub platforms: Vec<String>,

    pub notify_webhook_url: Option<String>,

    pub sources: Vec<SourceDescriptor>,
    pub fetch_timeout: Duration,
    pub max_revisions: u32,
    pub engine: EngineConfig,
}

fn required(key: &str) -> Result<String, EngineError> {
    env::var(key).map_err(|_| EngineError::Config(format!("{} must be set", key)))
}

fn optional_secs(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Settings {
    pub fn from_env() -> Result<Self, EngineError> {
        let platforms = env::var("PUBLISH_PLATFORMS")
            .unwrap_or_else(|_| "instagram,tiktok,youtube".to_string())
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let lookback_days = env::var("SOURCE_LOOKBACK_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LOOKBACK_DAYS);

        let mut engine = EngineConfig::default();
        if let Some(threshold) = env::var("DEDUP_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            engine.dedup_threshold = threshold;
        }
        engine.video_poll_interval = optional_secs("VIDEO_POLL_INTERVAL_SECS", 10);
        engine.video_poll_budget = optional_secs("VIDEO_POLL_BUDGET_SECS", 600);

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            completion_api_key: required("COMPLETION_API_KEY")?,
            completion_base_url: env::var("COMPLETION_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            completion_model: env::var("COMPLETION_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),

            video_api_key: required("VIDEO_API_KEY")?,
            video_base_url: env::var("VIDEO_BASE_URL")
                .unwrap_or_else(|_| "https://api.heygen.com".to_string()),
            video_avatar_id: required("VIDEO_AVATAR_ID")?,
            video_voice_id: required("VIDEO_VOICE_ID")?,

            publish_api_key: required("PUBLISH_API_KEY")?,
            publish_base_url: env::var("PUBLISH_BASE_URL")
                .unwrap_or_else(|_| "https://backend.blotato.com/v2".to_string()),
            platforms,

            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),

            sources: Self::sources_from_env(lookback_days),
            fetch_timeout: optional_secs("SOURCE_FETCH_TIMEOUT_SECS", 20),
            max_revisions: env::var("MAX_REVISIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_REVISIONS),
            engine,
        })
    }

    /// Feed list: `RSS_SOURCES` as `id=url` pairs separated by `;`, falling
    /// back to a stock regional/business/tech mix.
    fn sources_from_env(lookback_days: i64) -> Vec<SourceDescriptor> {
        if let Ok(raw) = env::var("RSS_SOURCES") {
            let parsed: Vec<SourceDescriptor> = raw
                .split(';')
                .filter_map(|pair| {
                    let (id, url) = pair.split_once('=')?;
                    let id = id.trim();
                    let url = url.trim();
                    if id.is_empty() || url.is_empty() {
                        return None;
                    }
                    Some(SourceDescriptor::rss(id, url, lookback_days))
                })
                .collect();
            if !parsed.is_empty() {
                return parsed;
            }
            tracing::warn!("RSS_SOURCES set but unparseable, using defaults");
        }

        vec![
            SourceDescriptor::rss(
                "bbc_world",
                "https://feeds.bbci.co.uk/news/world/rss.xml",
                lookback_days,
            ),
            SourceDescriptor::rss(
                "reuters_business",
                "https://feeds.reuters.com/reuters/businessNews",
                lookback_days,
            ),
            SourceDescriptor::rss(
                "techcrunch",
                "https://techcrunch.com/feed/",
                lookback_days,
            ),
            SourceDescriptor::rss(
                "verge_ai",
                "https://www.theverge.com/rss/ai-artificial-intelligence/index.xml",
                lookback_days,
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    #[test]
    fn source_pairs_parse_into_descriptors() {
        let raw = "alpha=https://a.example/feed; beta=https://b.example/rss";
        let parsed: Vec<SourceDescriptor> = raw
            .split(';')
            .filter_map(|pair| {
                let (id, url) = pair.split_once('=')?;
                Some(SourceDescriptor::rss(id.trim(), url.trim(), 7))
            })
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].source_id, "alpha");
        assert_eq!(parsed[1].locator, "https://b.example/rss");
        assert_eq!(parsed[0].kind, SourceKind::Rss);
    }
}
