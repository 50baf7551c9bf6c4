// Orchestrator - owns the stage graph and every checkpointed transition
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::aggregator::ItemSource;
use crate::checkpoint::CheckpointStore;
use crate::dedup;
use crate::error::EngineError;
use crate::models::{
    ApprovalDecision, DecisionRecord, FailureReason, GateKind, PublishOutcome, PublishStatus,
    Run, RunKind, RunStage, SourceDescriptor, VersionedRun, VideoRef,
};
use crate::services::{
    CompletionService, GateNotification, NotificationChannel, PublishService, VideoJobStatus,
    VideoService,
};
use crate::synthesis;

/// Where a rejection at a gate sends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectEdge {
    /// Terminal failure with `FailureReason::Rejected`.
    Fail,
    /// Route back and regenerate, up to `max_revisions` times, then fail.
    Regenerate { max_revisions: u32 },
}

/// Per-run-kind wiring: which sources feed the run, which platforms receive
/// the published video, and what a rejection at each gate does.
#[derive(Debug, Clone)]
pub struct Topology {
    pub sources: Vec<SourceDescriptor>,
    pub platforms: Vec<String>,
    pub script_reject: RejectEdge,
    pub video_reject: RejectEdge,
}

#[derive(Debug, Clone)]
pub struct TopologyTable {
    pub weekly: Topology,
    pub on_demand: Topology,
}

impl TopologyTable {
    pub fn for_kind(&self, kind: RunKind) -> &Topology {
        match kind {
            RunKind::Weekly => &self.weekly,
            RunKind::OnDemand => &self.on_demand,
        }
    }
}

/// Tunables that are fixed per process, injectable for tests.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dedup_threshold: f64,
    pub video_poll_interval: Duration,
    pub video_poll_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: dedup::DEFAULT_SIMILARITY_THRESHOLD,
            video_poll_interval: Duration::from_secs(10),
            video_poll_budget: Duration::from_secs(600),
        }
    }
}

/// Deterministic run id for a (kind, period key) pair. Re-triggering the same
/// period lands on the same id, which is what makes triggers idempotent.
pub fn derive_run_id(kind: RunKind, period_key: &str) -> String {
    match kind {
        RunKind::Weekly => format!("weekly-{}", period_key),
        RunKind::OnDemand => {
            // Period key is the article URL; hash it into something key-safe.
            let digest = Sha256::digest(period_key.as_bytes());
            let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
            format!("ondemand-{}", &hex[..12])
        }
    }
}

/// Drives runs through the stage graph one checkpointed transition at a time.
/// Every collaborator sits behind a trait object so stages can be exercised
/// against in-memory doubles.
pub struct Orchestrator {
    store: Arc<dyn CheckpointStore>,
    items: Arc<dyn ItemSource>,
    completion: Arc<dyn CompletionService>,
    video: Arc<dyn VideoService>,
    publisher: Arc<dyn PublishService>,
    notifier: Arc<dyn NotificationChannel>,
    topologies: TopologyTable,
    config: EngineConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        items: Arc<dyn ItemSource>,
        completion: Arc<dyn CompletionService>,
        video: Arc<dyn VideoService>,
        publisher: Arc<dyn PublishService>,
        notifier: Arc<dyn NotificationChannel>,
        topologies: TopologyTable,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            items,
            completion,
            video,
            publisher,
            notifier,
            topologies,
            config,
        }
    }

    /// Latest persisted state of a run.
    pub async fn get_run(&self, run_id: &str) -> Result<Run, EngineError> {
        Ok(self
            .store
            .get(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?
            .run)
    }

    /// Trigger entry point. Idempotent per (kind, period key): an active run
    /// for the period is returned as-is, a completed run is returned as-is,
    /// and a failed run blocks the period until it is archived.
    pub async fn create_or_resume(
        &self,
        kind: RunKind,
        period_key: &str,
    ) -> Result<Run, EngineError> {
        if let Some(active) = self.store.find_active_by_period_key(period_key).await? {
            info!(
                run_id = %active.run.run_id,
                stage = %active.run.stage,
                "↩️ period already has an active run"
            );
            return self.drive(&active.run.run_id).await;
        }

        let run_id = derive_run_id(kind, period_key);
        let expected = match self.store.get(&run_id).await? {
            Some(latest) => match latest.run.stage {
                RunStage::Completed => return Ok(latest.run),
                RunStage::Failed => {
                    return Err(EngineError::PeriodBlocked(period_key.to_string()))
                }
                // Archived: a fresh attempt continues the same version chain.
                _ => latest.version,
            },
            None => 0,
        };

        let sources = match kind {
            RunKind::Weekly => self.topologies.weekly.sources.clone(),
            RunKind::OnDemand => vec![SourceDescriptor::article(period_key)],
        };
        let run = Run::new(run_id.clone(), kind, period_key.to_string(), sources);

        match self.store.put_if_version(expected, &run).await {
            Ok(_) => {
                info!(run_id = %run_id, kind = ?kind, "🚀 created run");
            }
            Err(EngineError::Conflict(_)) => {
                // Concurrent trigger won the insert; adopt its run.
                warn!(run_id = %run_id, "concurrent trigger created this run first");
            }
            Err(e) => return Err(e),
        }

        self.drive(&run_id).await
    }

    /// Feed a gate decision into a suspended run and drive it forward.
    pub async fn resume(
        &self,
        run_id: &str,
        decision: ApprovalDecision,
    ) -> Result<Run, EngineError> {
        let VersionedRun { mut run, version } = self
            .store
            .get(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        if !run.stage.is_gate() {
            return Err(EngineError::InvalidState {
                run_id: run_id.to_string(),
                stage: run.stage,
            });
        }

        info!(
            run_id = %run_id,
            stage = %run.stage,
            approved = decision.approved,
            "📨 gate decision received"
        );
        run.pending_decision = Some(decision);
        run.updated_at = chrono::Utc::now();
        self.store.put_if_version(version, &run).await?;

        self.drive(run_id).await
    }

    /// Move a terminal run to Archived, unblocking its period key.
    pub async fn archive(&self, run_id: &str) -> Result<Run, EngineError> {
        let VersionedRun { mut run, version } = self
            .store
            .get(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        match run.stage {
            RunStage::Failed | RunStage::Completed => {
                run.set_stage(RunStage::Archived);
                self.store.put_if_version(version, &run).await?;
                info!(run_id = %run_id, "🗄️ run archived");
                Ok(run)
            }
            stage => Err(EngineError::InvalidState {
                run_id: run_id.to_string(),
                stage,
            }),
        }
    }

    /// Advance repeatedly until the run suspends at a gate, reaches a
    /// terminal stage, or stops making progress.
    pub async fn drive(&self, run_id: &str) -> Result<Run, EngineError> {
        loop {
            let before = self.get_run(run_id).await?.stage;
            let run = self.advance(run_id).await?;
            if run.stage.is_terminal() {
                return Ok(run);
            }
            if run.stage.is_gate() && run.pending_decision.is_none() {
                return Ok(run);
            }
            if run.stage == before {
                return Ok(run);
            }
        }
    }

    /// Execute exactly one stage and checkpoint the result. Terminal runs and
    /// gates without a pending decision are no-ops. A stage error is itself
    /// checkpointed as a transition to Failed; losing a version race adopts
    /// the winner's state instead of retrying.
    pub async fn advance(&self, run_id: &str) -> Result<Run, EngineError> {
        let VersionedRun { mut run, mut version } = self
            .store
            .get(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        if run.stage.is_terminal() {
            return Ok(run);
        }
        if run.stage.is_gate() && run.pending_decision.is_none() {
            return Ok(run);
        }

        let stage = run.stage;
        info!(run_id = %run_id, stage = %stage, "▶️ advancing");

        match self.execute_stage(&mut run, &mut version).await {
            Ok(notification) => match self.store.put_if_version(version, &run).await {
                Ok(_) => {
                    if let Some(note) = notification {
                        if let Err(e) = self.notifier.notify(&note).await {
                            warn!(run_id = %run_id, error = %e, "notification delivery failed");
                        }
                    }
                    Ok(run)
                }
                Err(EngineError::Conflict(_)) => self.adopt_fresh(run_id).await,
                Err(e) => Err(e),
            },
            Err(EngineError::Conflict(_)) => self.adopt_fresh(run_id).await,
            Err(e) => {
                error!(run_id = %run_id, stage = %stage, error = %e, "stage failed");
                let reason = match &e {
                    EngineError::VideoTimeout(_) => FailureReason::VideoTimeout,
                    _ => FailureReason::StageError,
                };
                run.fail(reason, e.to_string());
                match self.store.put_if_version(version, &run).await {
                    Ok(_) => Ok(run),
                    Err(EngineError::Conflict(_)) => self.adopt_fresh(run_id).await,
                    Err(store_err) => Err(store_err),
                }
            }
        }
    }

    async fn adopt_fresh(&self, run_id: &str) -> Result<Run, EngineError> {
        warn!(run_id = %run_id, "lost checkpoint race, adopting newer state");
        self.get_run(run_id).await
    }

    async fn execute_stage(
        &self,
        run: &mut Run,
        version: &mut i32,
    ) -> Result<Option<GateNotification>, EngineError> {
        match run.stage {
            RunStage::Aggregating => self.run_aggregating(run).await,
            RunStage::Deduplicating => self.run_deduplicating(run),
            RunStage::Categorizing => self.run_categorizing(run).await,
            RunStage::Synthesizing => self.run_synthesizing(run).await,
            RunStage::AwaitingScriptApproval => self.run_script_gate(run),
            RunStage::GeneratingVideo => self.run_generating_video(run, version).await,
            RunStage::AwaitingVideoApproval => self.run_video_gate(run),
            RunStage::Publishing => self.run_publishing(run).await,
            // Guarded by advance; nothing to do.
            RunStage::Completed | RunStage::Failed | RunStage::Archived => Ok(None),
        }
    }

    async fn run_aggregating(&self, run: &mut Run) -> Result<Option<GateNotification>, EngineError> {
        let outcome = self.items.collect(&run.sources).await;
        info!(
            run_id = %run.run_id,
            items = outcome.items.len(),
            failed_sources = outcome.errors.len(),
            "📰 aggregation finished"
        );
        run.payload.items = outcome.items;
        run.payload.source_errors = outcome.errors;
        run.set_stage(RunStage::Deduplicating);
        Ok(None)
    }

    fn run_deduplicating(&self, run: &mut Run) -> Result<Option<GateNotification>, EngineError> {
        let before = run.payload.items.len();
        let items = std::mem::take(&mut run.payload.items);
        run.payload.items = dedup::collapse(items, self.config.dedup_threshold);
        info!(
            run_id = %run.run_id,
            before,
            after = run.payload.items.len(),
            "🔎 deduplicated"
        );
        run.set_stage(RunStage::Categorizing);
        Ok(None)
    }

    async fn run_categorizing(&self, run: &mut Run) -> Result<Option<GateNotification>, EngineError> {
        synthesis::assign_categories(self.completion.as_ref(), &mut run.payload.items).await?;
        run.set_stage(RunStage::Synthesizing);
        Ok(None)
    }

    async fn run_synthesizing(&self, run: &mut Run) -> Result<Option<GateNotification>, EngineError> {
        let feedback = run.payload.revision_feedback.clone();
        let segments = synthesis::synthesize_segments(
            self.completion.as_ref(),
            &run.payload.items,
            feedback.as_deref(),
        )
        .await?;
        let summaries = synthesis::category_summaries(&segments);
        let caption = self.completion.caption(&summaries, &run.period_key).await?;

        let script_version = run
            .payload
            .script
            .as_ref()
            .map(|s| s.version + 1)
            .unwrap_or(1);
        let script = synthesis::compile(&segments, caption, script_version);
        info!(
            run_id = %run.run_id,
            script_version,
            duration_secs = script.estimated_duration_secs,
            "📝 script compiled"
        );

        let summary = format!(
            "Script v{} ready for review ({}s estimated)",
            script.version, script.estimated_duration_secs
        );
        run.payload.segments = segments;
        run.payload.script = Some(script);
        run.pending_decision = None;
        run.set_stage(RunStage::AwaitingScriptApproval);

        Ok(Some(self.run_notification(run, summary, None)))
    }

    fn run_script_gate(&self, run: &mut Run) -> Result<Option<GateNotification>, EngineError> {
        let Some(decision) = run.pending_decision.take() else {
            return Ok(None);
        };
        self.record_decision(run, GateKind::Script, &decision);

        if decision.approved {
            if let Some(edits) = decision.edits.as_ref().filter(|e| !e.is_empty()) {
                synthesis::apply_edits(&mut run.payload.segments, edits);
                let (caption, next_version) = match run.payload.script.as_ref() {
                    Some(s) => (s.caption.clone(), s.version + 1),
                    None => (String::new(), 1),
                };
                run.payload.script = Some(synthesis::compile(
                    &run.payload.segments,
                    caption,
                    next_version,
                ));
                info!(run_id = %run.run_id, "✏️ reviewer edits applied");
            }
            run.payload.revision_feedback = None;
            run.set_stage(RunStage::GeneratingVideo);
            return Ok(None);
        }

        self.reject(
            run,
            GateKind::Script,
            decision.feedback,
            RunStage::Synthesizing,
        );
        Ok(None)
    }

    fn run_video_gate(&self, run: &mut Run) -> Result<Option<GateNotification>, EngineError> {
        let Some(decision) = run.pending_decision.take() else {
            return Ok(None);
        };
        self.record_decision(run, GateKind::Video, &decision);

        if decision.approved {
            run.set_stage(RunStage::Publishing);
            return Ok(None);
        }

        // A video regeneration discards the old job and re-renders.
        run.payload.video = None;
        self.reject(
            run,
            GateKind::Video,
            decision.feedback,
            RunStage::GeneratingVideo,
        );
        Ok(None)
    }

    fn record_decision(&self, run: &mut Run, gate: GateKind, decision: &ApprovalDecision) {
        run.payload.decisions.push(DecisionRecord {
            gate,
            approved: decision.approved,
            feedback: decision.feedback.clone(),
            decided_at: chrono::Utc::now(),
        });
    }

    /// Route a rejection along the configured edge for this run kind.
    fn reject(
        &self,
        run: &mut Run,
        gate: GateKind,
        feedback: Option<String>,
        regenerate_target: RunStage,
    ) {
        let topology = self.topologies.for_kind(run.kind);
        let edge = match gate {
            GateKind::Script => topology.script_reject,
            GateKind::Video => topology.video_reject,
        };
        let detail = feedback.clone().unwrap_or_else(|| "no feedback".to_string());

        match edge {
            RejectEdge::Fail => {
                run.fail(
                    FailureReason::Rejected,
                    format!("rejected at {}: {}", gate.stage(), detail),
                );
            }
            RejectEdge::Regenerate { max_revisions } => {
                if run.revision_count >= max_revisions {
                    run.fail(
                        FailureReason::Rejected,
                        format!(
                            "rejected at {} after {} revisions: {}",
                            gate.stage(),
                            run.revision_count,
                            detail
                        ),
                    );
                } else {
                    run.revision_count += 1;
                    run.payload.revision_feedback = feedback;
                    info!(
                        run_id = %run.run_id,
                        revision = run.revision_count,
                        "🔁 regenerating after rejection"
                    );
                    run.set_stage(regenerate_target);
                }
            }
        }
    }

    async fn run_generating_video(
        &self,
        run: &mut Run,
        version: &mut i32,
    ) -> Result<Option<GateNotification>, EngineError> {
        let script = run
            .payload
            .script
            .as_ref()
            .ok_or_else(|| EngineError::Stage {
                stage: RunStage::GeneratingVideo,
                message: "no compiled script to render".to_string(),
            })?
            .full_script
            .clone();

        // Checkpoint the job reference before the first poll so a crashed
        // advance resumes polling the same job instead of resubmitting.
        let job_ref = match run.payload.video.as_ref() {
            Some(video) => video.job_ref.clone(),
            None => {
                let job_ref = self.video.submit(&script).await?;
                info!(run_id = %run.run_id, job_ref = %job_ref, "🎬 video job submitted");
                run.payload.video = Some(VideoRef {
                    job_ref: job_ref.clone(),
                    url: None,
                    submitted_at: chrono::Utc::now(),
                });
                *version = self.store.put_if_version(*version, run).await?;
                job_ref
            }
        };

        let started = tokio::time::Instant::now();
        loop {
            let poll = self.video.poll(&job_ref).await?;
            match poll.status {
                VideoJobStatus::Ready => {
                    let url = poll.url.ok_or_else(|| EngineError::Stage {
                        stage: RunStage::GeneratingVideo,
                        message: "video reported ready without a URL".to_string(),
                    })?;
                    info!(run_id = %run.run_id, url = %url, "✅ video ready");
                    if let Some(video) = run.payload.video.as_mut() {
                        video.url = Some(url.clone());
                    }
                    run.pending_decision = None;
                    run.set_stage(RunStage::AwaitingVideoApproval);
                    let summary = "Video ready for review".to_string();
                    return Ok(Some(self.run_notification(run, summary, Some(url))));
                }
                VideoJobStatus::Failed => {
                    return Err(EngineError::Stage {
                        stage: RunStage::GeneratingVideo,
                        message: format!(
                            "video render failed: {}",
                            poll.error.unwrap_or_else(|| "no detail".to_string())
                        ),
                    });
                }
                VideoJobStatus::Pending => {
                    if started.elapsed() >= self.config.video_poll_budget {
                        return Err(EngineError::VideoTimeout(self.config.video_poll_budget));
                    }
                    tokio::time::sleep(self.config.video_poll_interval).await;
                }
            }
        }
    }

    async fn run_publishing(&self, run: &mut Run) -> Result<Option<GateNotification>, EngineError> {
        let video_url = run
            .payload
            .video
            .as_ref()
            .and_then(|v| v.url.clone())
            .ok_or_else(|| EngineError::Stage {
                stage: RunStage::Publishing,
                message: "no approved video URL to publish".to_string(),
            })?;
        let caption = run
            .payload
            .script
            .as_ref()
            .map(|s| s.caption.clone())
            .unwrap_or_default();

        let platforms = self.topologies.for_kind(run.kind).platforms.clone();
        let posts = platforms.iter().map(|platform| {
            let video_url = video_url.clone();
            let caption = caption.clone();
            async move {
                let result = self.publisher.post(platform, &video_url, &caption).await;
                (platform.clone(), result)
            }
        });

        // One platform failing never blocks the others or the run.
        run.payload.publish = join_all(posts)
            .await
            .into_iter()
            .map(|(platform, result)| match result {
                Ok(url) => PublishOutcome {
                    platform,
                    status: PublishStatus::Success,
                    url: Some(url).filter(|u| !u.is_empty()),
                    error: None,
                },
                Err(e) => {
                    warn!(platform = %platform, error = %e, "publish failed");
                    PublishOutcome {
                        platform,
                        status: PublishStatus::Failed,
                        url: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        let ok = run
            .payload
            .publish
            .iter()
            .filter(|o| o.status == PublishStatus::Success)
            .count();
        info!(
            run_id = %run.run_id,
            succeeded = ok,
            failed = run.payload.publish.len() - ok,
            "📣 publish fan-out finished"
        );
        run.set_stage(RunStage::Completed);

        let summary = format!(
            "Run complete: published to {}/{} platforms",
            ok,
            run.payload.publish.len()
        );
        Ok(Some(self.run_notification(run, summary, video_url.into())))
    }

    fn run_notification(
        &self,
        run: &Run,
        summary: String,
        video_url: Option<String>,
    ) -> GateNotification {
        GateNotification {
            run_id: run.run_id.clone(),
            stage: run.stage,
            resume_token: run.run_id.clone(),
            summary,
            video_url,
        }
    }
}
