// Shared test doubles for driving the orchestrator without external services.
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use briefing_engine::aggregator::{AggregateOutcome, ItemSource};
use briefing_engine::checkpoint::MemoryStore;
use briefing_engine::dedup;
use briefing_engine::error::EngineError;
use briefing_engine::models::{Category, SourceDescriptor, SourceItem, SourceKind};
use briefing_engine::orchestrator::{
    EngineConfig, Orchestrator, RejectEdge, Topology, TopologyTable,
};
use briefing_engine::services::notify::GateNotification;
use briefing_engine::services::video::{VideoJobStatus, VideoPoll};
use briefing_engine::services::{
    CompletionService, NotificationChannel, PublishService, VideoService,
};

pub fn item(source_id: &str, title: &str, hours_ago: i64) -> SourceItem {
    let now = Utc::now();
    SourceItem {
        source_id: source_id.to_string(),
        source_kind: SourceKind::Rss,
        title: title.to_string(),
        body: format!("Details about {}.", title),
        url: format!(
            "https://{}.example/{}",
            source_id,
            title.to_lowercase().replace(' ', "-")
        ),
        published_at: now - ChronoDuration::hours(hours_ago),
        fetched_at: now,
        fingerprint: dedup::fingerprint(title),
        category: None,
    }
}

/// Twelve items across three sources, two of which are near-duplicate
/// phrasings of the same story.
pub fn default_items() -> Vec<SourceItem> {
    vec![
        item("city_desk", "Council Approves Riverfront Park Plan", 30),
        item("city_desk", "Transit Strike Enters Second Week", 28),
        item("city_desk", "Local Hospital Opens New Wing", 26),
        item("city_desk", "School Board Votes On New Budget", 24),
        item("wire_biz", "Regional Bank Reports Record Business Earnings", 22),
        item("wire_biz", "Business Startup Raises Series B Funding", 20),
        item("wire_biz", "Retail Business Chains Announce Merger", 18),
        item("wire_biz", "Business Earnings Beat Market Expectations", 16),
        item("tech_wire", "AI Lab Releases Open Weights Model", 14),
        item("tech_wire", "New AI Chip Doubles Inference Speed", 12),
        item("tech_wire", "AI Assistant Reaches Million Users", 10),
        // Near-duplicate of the open-weights story from a second source.
        item("tech_wire_alt", "AI Lab releases open-weights model!", 8),
    ]
}

pub struct StaticItemSource {
    pub items: Vec<SourceItem>,
    pub collect_count: AtomicUsize,
}

impl StaticItemSource {
    pub fn new(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            collect_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ItemSource for StaticItemSource {
    async fn collect(&self, _sources: &[SourceDescriptor]) -> AggregateOutcome {
        self.collect_count.fetch_add(1, Ordering::SeqCst);
        AggregateOutcome {
            items: self.items.clone(),
            errors: Vec::new(),
        }
    }
}

pub fn keyword_classify(items: &[SourceItem]) -> Vec<Category> {
    items
        .iter()
        .map(|i| {
            let title = i.title.to_lowercase();
            if title.contains("business") {
                Category::Business
            } else if title.contains("ai") {
                Category::AiTech
            } else {
                Category::Local
            }
        })
        .collect()
}

/// Keyword classifier plus canned synthesis; records every style directive so
/// tests can assert that revision feedback reaches the model.
#[derive(Default)]
pub struct MockCompletion {
    pub style_directives: Mutex<Vec<String>>,
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn classify(&self, items: &[SourceItem]) -> Result<Vec<Category>, EngineError> {
        Ok(keyword_classify(items))
    }

    async fn synthesize(
        &self,
        category: Category,
        items: &[SourceItem],
        style_directive: &str,
    ) -> Result<String, EngineError> {
        self.style_directives
            .lock()
            .unwrap()
            .push(style_directive.to_string());
        Ok(format!(
            "Tonight in {}: {} stories worth your time.",
            category,
            items.len()
        ))
    }

    async fn caption(
        &self,
        _summaries: &[(Category, String)],
        period_key: &str,
    ) -> Result<String, EngineError> {
        Ok(format!("Your briefing for {} #news #briefing", period_key))
    }
}

/// Classifies normally but errors out of one category's synthesis.
pub struct BrokenSynthesisCompletion {
    pub broken_category: Category,
}

#[async_trait]
impl CompletionService for BrokenSynthesisCompletion {
    async fn classify(&self, items: &[SourceItem]) -> Result<Vec<Category>, EngineError> {
        Ok(keyword_classify(items))
    }

    async fn synthesize(
        &self,
        category: Category,
        items: &[SourceItem],
        _style_directive: &str,
    ) -> Result<String, EngineError> {
        if category == self.broken_category {
            return Err(EngineError::Service {
                service: "completion",
                message: format!("HTTP 500 while writing the {} segment", category),
            });
        }
        Ok(format!("{}: {} stories.", category, items.len()))
    }

    async fn caption(
        &self,
        _summaries: &[(Category, String)],
        period_key: &str,
    ) -> Result<String, EngineError> {
        Ok(format!("Briefing for {}", period_key))
    }
}

/// Scripted video provider. Polls consume the queue; once empty, `fallback`
/// repeats forever.
pub struct MockVideo {
    pub submit_count: AtomicUsize,
    pub poll_count: AtomicUsize,
    polls: Mutex<VecDeque<VideoPoll>>,
    fallback: VideoPoll,
}

impl MockVideo {
    pub fn ready_immediately() -> Self {
        Self::with_polls(Vec::new(), ready_poll())
    }

    pub fn always_pending() -> Self {
        Self::with_polls(Vec::new(), pending_poll())
    }

    pub fn render_fails() -> Self {
        Self::with_polls(Vec::new(), render_failed_poll())
    }

    pub fn with_polls(polls: Vec<VideoPoll>, fallback: VideoPoll) -> Self {
        Self {
            submit_count: AtomicUsize::new(0),
            poll_count: AtomicUsize::new(0),
            polls: Mutex::new(polls.into()),
            fallback,
        }
    }
}

pub fn ready_poll() -> VideoPoll {
    VideoPoll {
        status: VideoJobStatus::Ready,
        url: Some("https://videos.example/render.mp4".to_string()),
        error: None,
    }
}

pub fn pending_poll() -> VideoPoll {
    VideoPoll {
        status: VideoJobStatus::Pending,
        url: None,
        error: None,
    }
}

pub fn render_failed_poll() -> VideoPoll {
    VideoPoll {
        status: VideoJobStatus::Failed,
        url: None,
        error: Some("render pipeline crashed".to_string()),
    }
}

#[async_trait]
impl VideoService for MockVideo {
    async fn submit(&self, _script: &str) -> Result<String, EngineError> {
        let n = self.submit_count.fetch_add(1, Ordering::SeqCst);
        Ok(format!("job-{}", n + 1))
    }

    async fn poll(&self, _job_ref: &str) -> Result<VideoPoll, EngineError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let next = self.polls.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Per-platform publish outcomes, with platforms in `failing` erroring out.
#[derive(Default)]
pub struct MockPublish {
    pub failing: Vec<String>,
    pub posts: Mutex<Vec<String>>,
}

impl MockPublish {
    pub fn failing_on(platforms: &[&str]) -> Self {
        Self {
            failing: platforms.iter().map(|p| p.to_string()).collect(),
            posts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PublishService for MockPublish {
    async fn post(
        &self,
        platform: &str,
        _video_url: &str,
        _caption: &str,
    ) -> Result<String, EngineError> {
        self.posts.lock().unwrap().push(platform.to_string());
        if self.failing.iter().any(|p| p == platform) {
            return Err(EngineError::Service {
                service: "publish",
                message: format!("{} rejected the upload", platform),
            });
        }
        Ok(format!("https://social.example/{}/post-1", platform))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<GateNotification>>,
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn notify(&self, note: &GateNotification) -> Result<(), EngineError> {
        self.sent.lock().unwrap().push(note.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub items: Arc<StaticItemSource>,
    pub completion: Arc<MockCompletion>,
    pub video: Arc<MockVideo>,
    pub publish: Arc<MockPublish>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Orchestrator,
}

pub fn weekly_topologies(max_revisions: u32) -> TopologyTable {
    let platforms = vec![
        "instagram".to_string(),
        "tiktok".to_string(),
        "youtube".to_string(),
    ];
    TopologyTable {
        weekly: Topology {
            sources: vec![SourceDescriptor::rss(
                "city_desk",
                "https://city.example/rss",
                7,
            )],
            platforms: platforms.clone(),
            script_reject: RejectEdge::Fail,
            video_reject: RejectEdge::Fail,
        },
        on_demand: Topology {
            sources: Vec::new(),
            platforms,
            script_reject: RejectEdge::Regenerate { max_revisions },
            video_reject: RejectEdge::Fail,
        },
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        dedup_threshold: 0.8,
        video_poll_interval: Duration::from_millis(100),
        video_poll_budget: Duration::from_millis(500),
    }
}

pub fn harness(video: MockVideo, publish: MockPublish) -> Harness {
    harness_with(default_items(), video, publish, weekly_topologies(3))
}

/// Harness with a custom completion backend; for the error-path tests the
/// typed `MockCompletion` handle is irrelevant.
pub fn harness_with_completion(
    completion: Arc<dyn CompletionService>,
    video: MockVideo,
    publish: MockPublish,
) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(StaticItemSource::new(default_items())),
        completion,
        Arc::new(video),
        Arc::new(publish),
        Arc::new(RecordingNotifier::default()),
        weekly_topologies(3),
        test_config(),
    );
    (orchestrator, store)
}

pub fn harness_with(
    items: Vec<SourceItem>,
    video: MockVideo,
    publish: MockPublish,
    topologies: TopologyTable,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let items = Arc::new(StaticItemSource::new(items));
    let completion = Arc::new(MockCompletion::default());
    let video = Arc::new(video);
    let publish = Arc::new(publish);
    let notifier = Arc::new(RecordingNotifier::default());

    let orchestrator = Orchestrator::new(
        store.clone(),
        items.clone(),
        completion.clone(),
        video.clone(),
        publish.clone(),
        notifier.clone(),
        topologies,
        test_config(),
    );

    Harness {
        store,
        items,
        completion,
        video,
        publish,
        notifier,
        orchestrator,
    }
}
