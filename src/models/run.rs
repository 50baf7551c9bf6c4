// Run - the durable unit of work the orchestrator advances through the stage graph
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::source::{SourceDescriptor, SourceError, SourceItem};

/// Which pipeline topology a run follows. The stage order is the same for
/// both kinds; they differ in source set, platforms and the reject edge of
/// the script gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Weekly,
    OnDemand,
}

/// Closed set of pipeline stages. Transitions only happen through
/// `RunStage::next` plus the gate edges the orchestrator owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Aggregating,
    Deduplicating,
    Categorizing,
    Synthesizing,
    AwaitingScriptApproval,
    GeneratingVideo,
    AwaitingVideoApproval,
    Publishing,
    Completed,
    Failed,
    Archived,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Aggregating => "aggregating",
            RunStage::Deduplicating => "deduplicating",
            RunStage::Categorizing => "categorizing",
            RunStage::Synthesizing => "synthesizing",
            RunStage::AwaitingScriptApproval => "awaiting_script_approval",
            RunStage::GeneratingVideo => "generating_video",
            RunStage::AwaitingVideoApproval => "awaiting_video_approval",
            RunStage::Publishing => "publishing",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
            RunStage::Archived => "archived",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStage::Completed | RunStage::Failed | RunStage::Archived
        )
    }

    pub fn is_gate(&self) -> bool {
        matches!(
            self,
            RunStage::AwaitingScriptApproval | RunStage::AwaitingVideoApproval
        )
    }

    /// The forward edge of the stage graph. Gate approval edges and reject
    /// edges are routed by the orchestrator; everything else is fixed.
    pub fn next(&self) -> Option<RunStage> {
        match self {
            RunStage::Aggregating => Some(RunStage::Deduplicating),
            RunStage::Deduplicating => Some(RunStage::Categorizing),
            RunStage::Categorizing => Some(RunStage::Synthesizing),
            RunStage::Synthesizing => Some(RunStage::AwaitingScriptApproval),
            RunStage::AwaitingScriptApproval => Some(RunStage::GeneratingVideo),
            RunStage::GeneratingVideo => Some(RunStage::AwaitingVideoApproval),
            RunStage::AwaitingVideoApproval => Some(RunStage::Publishing),
            RunStage::Publishing => Some(RunStage::Completed),
            RunStage::Completed | RunStage::Failed | RunStage::Archived => None,
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed category set for classification and segment synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Local,
    Business,
    AiTech,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Local, Category::Business, Category::AiTech];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Local => "local",
            Category::Business => "business",
            Category::AiTech => "ai_tech",
        }
    }

    pub fn header(&self) -> &'static str {
        match self {
            Category::Local => "LOCAL",
            Category::Business => "BUSINESS",
            Category::AiTech => "AI TECH",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a segment in the compiled script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSlot {
    Intro,
    Local,
    Business,
    AiTech,
    Outro,
}

impl SegmentSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentSlot::Intro => "intro",
            SegmentSlot::Local => "local",
            SegmentSlot::Business => "business",
            SegmentSlot::AiTech => "ai_tech",
            SegmentSlot::Outro => "outro",
        }
    }

    pub fn header(&self) -> &'static str {
        match self {
            SegmentSlot::Intro => "INTRO",
            SegmentSlot::Local => "LOCAL",
            SegmentSlot::Business => "BUSINESS",
            SegmentSlot::AiTech => "AI TECH",
            SegmentSlot::Outro => "OUTRO",
        }
    }
}

impl From<Category> for SegmentSlot {
    fn from(c: Category) -> Self {
        match c {
            Category::Local => SegmentSlot::Local,
            Category::Business => SegmentSlot::Business,
            Category::AiTech => SegmentSlot::AiTech,
        }
    }
}

/// One synthesized block of anchor script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSegment {
    pub slot: SegmentSlot,
    pub content: String,
    pub estimated_duration_secs: u32,
}

impl ScriptSegment {
    pub fn new(slot: SegmentSlot, content: String) -> Self {
        // Rough anchor pacing: 150 words per minute.
        let words = content.split_whitespace().count() as u32;
        let estimated_duration_secs = (words * 60) / 150;
        Self {
            slot,
            content,
            estimated_duration_secs,
        }
    }
}

/// The compiled script the approval gate reviews and the video service reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledScript {
    pub version: u32,
    pub full_script: String,
    pub caption: String,
    pub estimated_duration_secs: u32,
}

/// External video job reference plus the URL once the job reports ready.
/// The job_ref is persisted before polling starts so a crashed advance can
/// resume polling instead of resubmitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRef {
    pub job_ref: String,
    pub url: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Pending,
    Success,
    Failed,
}

/// Per-platform result of the publish fan-out. Immutable once the publish
/// stage completes, failed entries included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub platform: String,
    pub status: PublishStatus,
    pub url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Script,
    Video,
}

impl GateKind {
    pub fn stage(&self) -> RunStage {
        match self {
            GateKind::Script => RunStage::AwaitingScriptApproval,
            GateKind::Video => RunStage::AwaitingVideoApproval,
        }
    }
}

/// Decision submitted through the resume entry point. Consumed exactly once
/// by the gate that is pending when it arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(default)]
    pub feedback: Option<String>,
    /// Per-segment text replacements keyed by slot name ("local", "business",
    /// "ai_tech"). Only honored on an approving script decision.
    #[serde(default)]
    pub edits: Option<HashMap<String, String>>,
}

/// Audit record of a consumed gate decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub gate: GateKind,
    pub approved: bool,
    pub feedback: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Unrecoverable error inside a non-gate stage.
    StageError,
    /// Video generation exceeded its wall-clock budget. Surfaced separately
    /// from a rejection so "service too slow" is distinguishable from
    /// "reviewer said no".
    VideoTimeout,
    /// Explicit rejection at a gate.
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: RunStage,
    pub reason: FailureReason,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: RunStage,
    pub entered_at: DateTime<Utc>,
}

/// Stage-scoped working data. Grows as the run moves forward; inspectable as
/// of the moment of failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPayload {
    pub items: Vec<SourceItem>,
    pub source_errors: Vec<SourceError>,
    pub segments: Vec<ScriptSegment>,
    pub script: Option<CompiledScript>,
    pub video: Option<VideoRef>,
    pub publish: Vec<PublishOutcome>,
    pub decisions: Vec<DecisionRecord>,
    /// Reviewer feedback carried into a regeneration pass (on-demand flow).
    pub revision_feedback: Option<String>,
}

/// One execution of the pipeline for a period key. Mutated only by the
/// orchestrator, one stage transition at a time; immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub kind: RunKind,
    pub period_key: String,
    pub stage: RunStage,
    pub sources: Vec<SourceDescriptor>,
    pub payload: RunPayload,
    pub pending_decision: Option<ApprovalDecision>,
    pub revision_count: u32,
    pub failure: Option<RunFailure>,
    pub stage_history: Vec<StageTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(
        run_id: String,
        kind: RunKind,
        period_key: String,
        sources: Vec<SourceDescriptor>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            kind,
            period_key,
            stage: RunStage::Aggregating,
            sources,
            payload: RunPayload::default(),
            pending_decision: None,
            revision_count: 0,
            failure: None,
            stage_history: vec![StageTransition {
                stage: RunStage::Aggregating,
                entered_at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_stage(&mut self, stage: RunStage) {
        let now = Utc::now();
        self.stage = stage;
        self.updated_at = now;
        self.stage_history.push(StageTransition {
            stage,
            entered_at: now,
        });
    }

    pub fn fail(&mut self, reason: FailureReason, message: impl Into<String>) {
        self.failure = Some(RunFailure {
            stage: self.stage,
            reason,
            message: message.into(),
            failed_at: Utc::now(),
        });
        self.set_stage(RunStage::Failed);
    }

    pub fn is_active(&self) -> bool {
        !self.stage.is_terminal()
    }
}

/// A run together with its checkpoint version, as loaded from the store.
#[derive(Debug, Clone)]
pub struct VersionedRun {
    pub run: Run,
    pub version: i32,
}
