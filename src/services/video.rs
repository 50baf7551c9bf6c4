// Avatar video generation service
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::info;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoJobStatus {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct VideoPoll {
    pub status: VideoJobStatus,
    pub url: Option<String>,
    pub error: Option<String>,
}

/// External avatar rendering. Submission is not idempotent on the provider
/// side, so callers must check for an existing job ref before calling
/// `submit` again.
#[async_trait]
pub trait VideoService: Send + Sync {
    async fn submit(&self, script: &str) -> Result<String, EngineError>;
    async fn poll(&self, job_ref: &str) -> Result<VideoPoll, EngineError>;
}

/// HeyGen-style client: one POST to enqueue the render, then status polling.
pub struct AvatarVideoClient {
    client: Client,
    api_key: String,
    base_url: String,
    avatar_id: String,
    voice_id: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    data: SubmitData,
}

#[derive(Deserialize)]
struct SubmitData {
    video_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    data: StatusData,
}

#[derive(Deserialize)]
struct StatusData {
    status: String,
    video_url: Option<String>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoOptions {
    pub aspect_ratio: String,
    pub background_color: String,
    pub speed: f32,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            // Vertical, for short-form platforms.
            aspect_ratio: "9:16".to_string(),
            background_color: "#1a1a2e".to_string(),
            speed: 1.0,
        }
    }
}

impl AvatarVideoClient {
    pub fn new(api_key: String, base_url: String, avatar_id: String, voice_id: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            avatar_id,
            voice_id,
        }
    }

    fn dimensions(aspect_ratio: &str) -> (u32, u32) {
        match aspect_ratio {
            "9:16" => (1080, 1920),
            "16:9" => (1920, 1080),
            _ => (1080, 1080),
        }
    }
}

#[async_trait]
impl VideoService for AvatarVideoClient {
    async fn submit(&self, script: &str) -> Result<String, EngineError> {
        let options = VideoOptions::default();
        let (width, height) = Self::dimensions(&options.aspect_ratio);

        let payload = json!({
            "video_inputs": [{
                "character": {
                    "type": "avatar",
                    "avatar_id": self.avatar_id,
                    "avatar_style": "normal"
                },
                "voice": {
                    "type": "text",
                    "input_text": script,
                    "voice_id": self.voice_id,
                    "speed": options.speed
                },
                "background": {
                    "type": "color",
                    "value": options.background_color
                }
            }],
            "dimension": { "width": width, "height": height },
            "aspect_ratio": options.aspect_ratio
        });

        let response = self
            .client
            .post(format!("{}/v2/video/generate", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| EngineError::service("video", e))?;

        if !response.status().is_success() {
            return Err(EngineError::Service {
                service: "video",
                message: format!("submit returned HTTP {}", response.status()),
            });
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| EngineError::service("video", e))?;

        info!(job_ref = %parsed.data.video_id, "🎬 video render submitted");
        Ok(parsed.data.video_id)
    }

    async fn poll(&self, job_ref: &str) -> Result<VideoPoll, EngineError> {
        let response = self
            .client
            .get(format!("{}/v1/video_status.get", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .query(&[("video_id", job_ref)])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| EngineError::service("video", e))?;

        if !response.status().is_success() {
            return Err(EngineError::Service {
                service: "video",
                message: format!("status returned HTTP {}", response.status()),
            });
        }

        let parsed: StatusResponse = response
            .json()
            .await
            .map_err(|e| EngineError::service("video", e))?;

        let status = match parsed.data.status.as_str() {
            "completed" => VideoJobStatus::Ready,
            "failed" => VideoJobStatus::Failed,
            // "pending" | "processing" and anything unknown stay pending.
            _ => VideoJobStatus::Pending,
        };

        Ok(VideoPoll {
            status,
            url: parsed.data.video_url,
            error: parsed.data.error.map(|e| e.to_string()),
        })
    }
}
