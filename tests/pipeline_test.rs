// End-to-end orchestration tests against in-memory doubles.
mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use briefing_engine::checkpoint::CheckpointStore;
use briefing_engine::error::EngineError;
use briefing_engine::models::{
    ApprovalDecision, Category, FailureReason, PublishStatus, Run, RunKind, RunStage, SegmentSlot,
};
use briefing_engine::orchestrator::derive_run_id;

use common::{
    harness, harness_with, harness_with_completion, BrokenSynthesisCompletion, MockPublish,
    MockVideo,
};
use std::sync::Arc;

const WEEK: &str = "2026-W35";
const ARTICLE: &str = "https://city.example/riverfront-park";

fn approve() -> ApprovalDecision {
    ApprovalDecision {
        approved: true,
        feedback: None,
        edits: None,
    }
}

fn reject(feedback: &str) -> ApprovalDecision {
    ApprovalDecision {
        approved: false,
        feedback: Some(feedback.to_string()),
        edits: None,
    }
}

#[tokio::test]
async fn weekly_run_flows_to_the_script_gate() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());

    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    assert_eq!(run.stage, RunStage::AwaitingScriptApproval);
    assert_eq!(run.run_id, format!("weekly-{}", WEEK));
    // 12 aggregated, the near-duplicate open-weights story collapses.
    assert_eq!(run.payload.items.len(), 11);
    assert!(run.payload.items.iter().all(|i| i.category.is_some()));

    let script = run.payload.script.as_ref().unwrap();
    assert_eq!(script.version, 1);
    assert_eq!(run.payload.segments.len(), 5);
    assert_eq!(run.payload.segments[0].slot, SegmentSlot::Intro);
    assert_eq!(run.payload.segments[4].slot, SegmentSlot::Outro);
    assert!(script.full_script.contains("[BUSINESS]"));

    // No video work before approval.
    assert_eq!(h.video.submit_count.load(Ordering::SeqCst), 0);

    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].stage, RunStage::AwaitingScriptApproval);
    assert_eq!(sent[0].resume_token, run.run_id);
}

#[tokio::test]
async fn retriggering_a_suspended_period_is_a_no_op() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());

    let first = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();
    let versions_before = h.store.version_count(&first.run_id);
    let collects_before = h.items.collect_count.load(Ordering::SeqCst);

    let second = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.stage, RunStage::AwaitingScriptApproval);
    assert_eq!(h.store.version_count(&first.run_id), versions_before);
    assert_eq!(h.items.collect_count.load(Ordering::SeqCst), collects_before);
}

#[tokio::test]
async fn approval_renders_the_video_and_suspends_at_the_video_gate() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    let run = h.orchestrator.resume(&run.run_id, approve()).await.unwrap();

    assert_eq!(run.stage, RunStage::AwaitingVideoApproval);
    assert_eq!(h.video.submit_count.load(Ordering::SeqCst), 1);
    let video = run.payload.video.as_ref().unwrap();
    assert_eq!(video.job_ref, "job-1");
    assert_eq!(video.url.as_deref(), Some("https://videos.example/render.mp4"));

    let sent = h.notifier.sent.lock().unwrap();
    let last = sent.last().unwrap();
    assert_eq!(last.stage, RunStage::AwaitingVideoApproval);
    assert!(last.video_url.is_some());
}

#[tokio::test]
async fn reviewer_edits_are_recompiled_into_the_script() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    let mut edits = HashMap::new();
    edits.insert(
        "business".to_string(),
        "Markets were quiet this week.".to_string(),
    );
    let decision = ApprovalDecision {
        approved: true,
        feedback: None,
        edits: Some(edits),
    };

    let run = h.orchestrator.resume(&run.run_id, decision).await.unwrap();

    let script = run.payload.script.as_ref().unwrap();
    assert_eq!(script.version, 2);
    assert!(script.full_script.contains("Markets were quiet this week."));
    // Other slots untouched.
    assert!(script.full_script.contains("Tonight in local"));
}

#[tokio::test]
async fn weekly_script_rejection_fails_the_run() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    let run = h
        .orchestrator
        .resume(&run.run_id, reject("wrong tone"))
        .await
        .unwrap();

    assert_eq!(run.stage, RunStage::Failed);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.reason, FailureReason::Rejected);
    assert!(failure.message.contains("wrong tone"));
    assert_eq!(h.video.submit_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_broken_segment_fails_the_whole_synthesis() {
    let (orchestrator, _store) = harness_with_completion(
        Arc::new(BrokenSynthesisCompletion {
            broken_category: Category::Business,
        }),
        MockVideo::ready_immediately(),
        MockPublish::default(),
    );

    let run = orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    assert_eq!(run.stage, RunStage::Failed);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.reason, FailureReason::StageError);
    assert_eq!(failure.stage, RunStage::Synthesizing);
    // No partial synthesis survives into the payload.
    assert!(run.payload.segments.is_empty());
    assert!(run.payload.script.is_none());
}

#[tokio::test]
async fn provider_render_failure_is_a_stage_error_not_a_timeout() {
    let h = harness(MockVideo::render_fails(), MockPublish::default());
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    let run = h.orchestrator.resume(&run.run_id, approve()).await.unwrap();

    assert_eq!(run.stage, RunStage::Failed);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.reason, FailureReason::StageError);
    assert_eq!(failure.stage, RunStage::GeneratingVideo);
    assert!(failure.message.contains("render pipeline crashed"));
    // Job ref retained for inspection; nothing was published.
    assert_eq!(run.payload.video.as_ref().unwrap().job_ref, "job-1");
    assert!(h.publish.posts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn weekly_video_rejection_fails_without_publishing() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();
    let run = h.orchestrator.resume(&run.run_id, approve()).await.unwrap();
    assert_eq!(run.stage, RunStage::AwaitingVideoApproval);

    let run = h
        .orchestrator
        .resume(&run.run_id, reject("avatar looks off"))
        .await
        .unwrap();

    assert_eq!(run.stage, RunStage::Failed);
    assert_eq!(
        run.failure.as_ref().unwrap().reason,
        FailureReason::Rejected
    );
    assert!(h.publish.posts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn resume_outside_a_gate_is_rejected() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());
    let run = Run::new(
        "weekly-manual".to_string(),
        RunKind::Weekly,
        "manual".to_string(),
        Vec::new(),
    );
    h.store.put_if_version(0, &run).await.unwrap();

    let err = h
        .orchestrator
        .resume("weekly-manual", approve())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::InvalidState {
            stage: RunStage::Aggregating,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn video_stall_times_out_as_its_own_failure() {
    let h = harness(MockVideo::always_pending(), MockPublish::default());
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    let run = h.orchestrator.resume(&run.run_id, approve()).await.unwrap();

    assert_eq!(run.stage, RunStage::Failed);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.reason, FailureReason::VideoTimeout);
    // The job ref survives for inspection even after the timeout.
    assert_eq!(run.payload.video.as_ref().unwrap().job_ref, "job-1");
    assert!(h.video.poll_count.load(Ordering::SeqCst) >= 5);
}

#[tokio::test]
async fn one_failed_platform_does_not_block_completion() {
    let h = harness(
        MockVideo::ready_immediately(),
        MockPublish::failing_on(&["tiktok"]),
    );
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();
    let run = h.orchestrator.resume(&run.run_id, approve()).await.unwrap();
    assert_eq!(run.stage, RunStage::AwaitingVideoApproval);

    let run = h.orchestrator.resume(&run.run_id, approve()).await.unwrap();

    assert_eq!(run.stage, RunStage::Completed);
    assert_eq!(run.payload.publish.len(), 3);
    let by_platform: HashMap<_, _> = run
        .payload
        .publish
        .iter()
        .map(|o| (o.platform.as_str(), o))
        .collect();
    assert_eq!(by_platform["instagram"].status, PublishStatus::Success);
    assert_eq!(by_platform["youtube"].status, PublishStatus::Success);
    assert_eq!(by_platform["tiktok"].status, PublishStatus::Failed);
    assert!(by_platform["tiktok"].error.as_ref().unwrap().contains("tiktok"));
    assert!(by_platform["instagram"].url.is_some());
}

#[tokio::test]
async fn on_demand_rejection_regenerates_with_feedback_then_exhausts() {
    let h = harness_with(
        common::default_items(),
        MockVideo::ready_immediately(),
        MockPublish::default(),
        common::weekly_topologies(2),
    );
    let run = h
        .orchestrator
        .create_or_resume(RunKind::OnDemand, ARTICLE)
        .await
        .unwrap();
    assert_eq!(run.run_id, derive_run_id(RunKind::OnDemand, ARTICLE));
    assert_eq!(run.stage, RunStage::AwaitingScriptApproval);

    let run = h
        .orchestrator
        .resume(&run.run_id, reject("more energy"))
        .await
        .unwrap();

    // Rejection routed back through synthesis instead of failing.
    assert_eq!(run.stage, RunStage::AwaitingScriptApproval);
    assert_eq!(run.revision_count, 1);
    assert_eq!(run.payload.script.as_ref().unwrap().version, 2);
    {
        let directives = h.completion.style_directives.lock().unwrap();
        assert!(directives
            .iter()
            .any(|d| d.contains("more energy")));
    }

    let run = h
        .orchestrator
        .resume(&run.run_id, reject("still flat"))
        .await
        .unwrap();
    assert_eq!(run.revision_count, 2);
    assert_eq!(run.stage, RunStage::AwaitingScriptApproval);

    // Third rejection exceeds the revision allowance.
    let run = h
        .orchestrator
        .resume(&run.run_id, reject("give up"))
        .await
        .unwrap();
    assert_eq!(run.stage, RunStage::Failed);
    assert_eq!(
        run.failure.as_ref().unwrap().reason,
        FailureReason::Rejected
    );
}

#[tokio::test]
async fn failed_period_blocks_new_runs_until_archived() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();
    let run = h
        .orchestrator
        .resume(&run.run_id, reject("scrap it"))
        .await
        .unwrap();
    assert_eq!(run.stage, RunStage::Failed);

    let err = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PeriodBlocked(_)));

    let archived = h.orchestrator.archive(&run.run_id).await.unwrap();
    assert_eq!(archived.stage, RunStage::Archived);

    // Same period key now produces a fresh attempt on the same version chain.
    let fresh = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();
    assert_eq!(fresh.run_id, run.run_id);
    assert_eq!(fresh.stage, RunStage::AwaitingScriptApproval);
    assert_eq!(fresh.revision_count, 0);
    assert!(fresh.failure.is_none());
}

#[tokio::test]
async fn completed_period_returns_the_finished_run() {
    let h = harness(MockVideo::ready_immediately(), MockPublish::default());
    let run = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();
    let run = h.orchestrator.resume(&run.run_id, approve()).await.unwrap();
    let run = h.orchestrator.resume(&run.run_id, approve()).await.unwrap();
    assert_eq!(run.stage, RunStage::Completed);

    let versions = h.store.version_count(&run.run_id);
    let again = h
        .orchestrator
        .create_or_resume(RunKind::Weekly, WEEK)
        .await
        .unwrap();

    assert_eq!(again.stage, RunStage::Completed);
    assert_eq!(h.store.version_count(&run.run_id), versions);
    assert_eq!(h.video.submit_count.load(Ordering::SeqCst), 1);
}
