// Multi-platform publish service
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::EngineError;

pub const DEFAULT_HASHTAGS: [&str; 6] = [
    "WeeklyBriefing",
    "SEANews",
    "TechNews",
    "AINews",
    "BusinessNews",
    "NewsRoundup",
];

/// Posts one video to one platform. Invoked once per configured platform per
/// run; failures are recorded per platform, never escalated to the run.
#[async_trait]
pub trait PublishService: Send + Sync {
    async fn post(
        &self,
        platform: &str,
        video_url: &str,
        caption: &str,
    ) -> Result<String, EngineError>;
}

/// Blotato-style posting API client.
pub struct SocialPublishClient {
    client: Client,
    api_key: String,
    base_url: String,
    hashtags: Vec<String>,
}

#[derive(Deserialize)]
struct PostResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

fn platform_caption_limit(platform: &str) -> usize {
    match platform {
        "instagram" => 2200,
        "tiktok" => 4000,
        "youtube" => 100,
        "linkedin" => 3000,
        "twitter" => 280,
        _ => 2000,
    }
}

/// Fit the caption to the platform's limit, truncating body text before
/// sacrificing hashtags.
pub fn adapt_caption(caption: &str, hashtags: &[String], platform: &str) -> String {
    let hashtag_str = hashtags
        .iter()
        .take(10)
        .map(|t| format!("#{}", t))
        .collect::<Vec<_>>()
        .join(" ");
    let full = format!("{}\n\n{}", caption, hashtag_str);

    let max_len = platform_caption_limit(platform);
    if full.len() <= max_len {
        return full;
    }

    let reserved = hashtag_str.len() + 10;
    let available = max_len.saturating_sub(reserved);
    let mut cut = available.min(caption.len());
    while cut > 0 && !caption.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...\n\n{}", &caption[..cut], hashtag_str)
}

impl SocialPublishClient {
    pub fn new(api_key: String, base_url: String, hashtags: Vec<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            hashtags,
        }
    }
}

#[async_trait]
impl PublishService for SocialPublishClient {
    async fn post(
        &self,
        platform: &str,
        video_url: &str,
        caption: &str,
    ) -> Result<String, EngineError> {
        let content = adapt_caption(caption, &self.hashtags, platform);

        let response = self
            .client
            .post(format!("{}/posts", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "platform": platform,
                "content": content,
                "media_url": video_url,
            }))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| EngineError::service("publish", e))?;

        if !response.status().is_success() {
            return Err(EngineError::Service {
                service: "publish",
                message: format!("{} returned HTTP {}", platform, response.status()),
            });
        }

        let parsed: PostResponse = response
            .json()
            .await
            .map_err(|e| EngineError::service("publish", e))?;

        Ok(parsed.url.or(parsed.id).unwrap_or_default())
    }
}
