// Completion service - classification, segment synthesis, captions
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::EngineError;
use crate::models::{Category, SourceItem};

/// Fallible, retryable text completion backend. No semantic guarantees are
/// assumed beyond returning text or an error.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Assign exactly one category to each item, in input order.
    async fn classify(&self, items: &[SourceItem]) -> Result<Vec<Category>, EngineError>;

    /// Produce one bounded-length script segment for a category.
    async fn synthesize(
        &self,
        category: Category,
        items: &[SourceItem],
        style_directive: &str,
    ) -> Result<String, EngineError>;

    /// Produce the social caption for a compiled script.
    async fn caption(
        &self,
        summaries: &[(Category, String)],
        period_key: &str,
    ) -> Result<String, EngineError>;
}

const CLASSIFY_CONCURRENCY: usize = 4;

const CLASSIFY_PROMPT: &str = "Classify this news item into exactly one category: \
local, business, or ai_tech. Reply with the category name only.\n\n\
TITLE: {title}\nBODY: {body}\nSOURCE: {source}";

const SYNTHESIZE_PROMPT: &str = "{style}\n\nWrite the {category} segment of this week's \
briefing from the stories below. 3-5 key points, conversational anchor voice, \
90-150 words.\n\n{stories}{feedback}\n\nSegment text:";

const CAPTION_PROMPT: &str = "Write a social media caption for a news briefing video \
covering period {period}. Engaging, under 200 characters before hashtags.\n\n{summaries}\n\nCaption:";

/// OpenAI-compatible chat-completions client with exponential-backoff retry
/// on transient failures.
pub struct HttpCompletionService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl HttpCompletionService {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    fn retry_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, EngineError> {
        // Retry connection errors, timeouts, 429 and 5xx; auth and request
        // errors are permanent and fail immediately.
        let operation = || async {
            let request = ChatRequest {
                model: &self.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                temperature,
            };

            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&request)
                .timeout(Duration::from_secs(60))
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("completion connection error (retrying): {}", e);
                        backoff::Error::transient(EngineError::service("completion", e))
                    } else {
                        backoff::Error::permanent(EngineError::service("completion", e))
                    }
                })?;

            let status = response.status();
            if status_is_transient(status) {
                tracing::warn!("completion returned HTTP {} (retrying)", status);
                return Err(backoff::Error::transient(EngineError::Service {
                    service: "completion",
                    message: format!("HTTP {}", status),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(EngineError::Service {
                    service: "completion",
                    message: format!("HTTP {}", status),
                }));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| backoff::Error::permanent(EngineError::service("completion", e)))?;

            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| {
                    backoff::Error::permanent(EngineError::Service {
                        service: "completion",
                        message: "empty choices".to_string(),
                    })
                })
        };

        backoff::future::retry(Self::retry_policy(), operation).await
    }

    async fn classify_one(&self, item: &SourceItem) -> Result<Category, EngineError> {
        let body: String = item.body.chars().take(500).collect();
        let prompt = CLASSIFY_PROMPT
            .replace("{title}", &item.title)
            .replace("{body}", &body)
            .replace("{source}", &item.source_id);

        // Low temperature for classification.
        let answer = self.complete(&prompt, 0.2).await?;
        Ok(parse_category(&answer))
    }
}

/// Worth another attempt: rate limiting and server-side errors. Everything
/// else (auth, bad request) will fail the same way every time.
fn status_is_transient(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Map a model reply onto the closed category set. Unrecognized replies fall
/// back to local, matching how ambiguous regional stories are bucketed.
pub fn parse_category(answer: &str) -> Category {
    let normalized = answer.trim().to_lowercase();
    if normalized.contains("business") {
        Category::Business
    } else if normalized.contains("ai") || normalized.contains("tech") {
        Category::AiTech
    } else {
        Category::Local
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn classify(&self, items: &[SourceItem]) -> Result<Vec<Category>, EngineError> {
        // Bounded fan-out; buffered keeps results in input order.
        let futures: Vec<_> = items.iter().map(|item| self.classify_one(item)).collect();
        let categories = stream::iter(futures)
            .buffered(CLASSIFY_CONCURRENCY)
            .try_collect::<Vec<_>>()
            .await?;

        debug!(items = items.len(), "classification complete");
        Ok(categories)
    }

    async fn synthesize(
        &self,
        category: Category,
        items: &[SourceItem],
        style_directive: &str,
    ) -> Result<String, EngineError> {
        let stories = items
            .iter()
            .map(|i| {
                let body: String = i.body.chars().take(400).collect();
                format!("- {} ({}): {}", i.title, i.source_id, body)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = SYNTHESIZE_PROMPT
            .replace("{style}", style_directive)
            .replace("{category}", category.header())
            .replace("{stories}", &stories)
            .replace("{feedback}", "");

        self.complete(&prompt, 0.7).await
    }

    async fn caption(
        &self,
        summaries: &[(Category, String)],
        period_key: &str,
    ) -> Result<String, EngineError> {
        let lines = summaries
            .iter()
            .map(|(cat, text)| {
                let head: String = text.chars().take(150).collect();
                format!("{}: {}", cat.header(), head)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = CAPTION_PROMPT
            .replace("{period}", period_key)
            .replace("{summaries}", &lines);

        self.complete(&prompt, 0.6).await
    }
}
