// Classifier/Synthesizer - category assignment and parallel segment synthesis
use std::collections::HashMap;

use crate::error::EngineError;
use crate::models::{Category, CompiledScript, RunStage, ScriptSegment, SegmentSlot, SourceItem};
use crate::services::CompletionService;

/// Persona/style directive shared by every synthesis call.
pub const ANCHOR_STYLE: &str = "You are the anchor of a weekly video briefing for a \
Southeast Asian tech and business audience. Warm, conversational, precise with \
facts; explain why each story matters to viewers in the region.";

const INTRO_TEXT: &str = "Hello and welcome to your weekly briefing. \
Here's what happened across the region this week.";

const OUTRO_TEXT: &str = "That's the roundup for this week. Thanks for watching, \
and see you in the next one. Stay informed!";

/// Cost cap: items past this index skip the completion call and default to
/// the local bucket.
const MAX_CLASSIFIED_ITEMS: usize = 50;
const MAX_ITEMS_PER_CATEGORY: usize = 15;

/// Assign exactly one category to every retained item.
pub async fn assign_categories(
    svc: &dyn CompletionService,
    items: &mut [SourceItem],
) -> Result<(), EngineError> {
    let capped = items.len().min(MAX_CLASSIFIED_ITEMS);
    let categories = svc.classify(&items[..capped]).await?;
    if categories.len() != capped {
        return Err(EngineError::Stage {
            stage: RunStage::Categorizing,
            message: format!(
                "classifier returned {} categories for {} items",
                categories.len(),
                capped
            ),
        });
    }

    for (item, category) in items.iter_mut().zip(categories) {
        item.category = Some(category);
    }
    for item in items.iter_mut().skip(capped) {
        item.category = Some(Category::Local);
    }
    Ok(())
}

fn items_for(items: &[SourceItem], category: Category) -> Vec<SourceItem> {
    items
        .iter()
        .filter(|i| i.category == Some(category))
        .take(MAX_ITEMS_PER_CATEGORY)
        .cloned()
        .collect()
}

/// Run the three per-category syntheses concurrently. They share no mutable
/// state; if any one fails the whole stage fails and no partial script is
/// carried forward.
pub async fn synthesize_segments(
    svc: &dyn CompletionService,
    items: &[SourceItem],
    revision_feedback: Option<&str>,
) -> Result<Vec<ScriptSegment>, EngineError> {
    let style = match revision_feedback {
        Some(feedback) => format!(
            "{}\n\nReviewer feedback to address in this revision: {}",
            ANCHOR_STYLE, feedback
        ),
        None => ANCHOR_STYLE.to_string(),
    };

    let local_items = items_for(items, Category::Local);
    let business_items = items_for(items, Category::Business);
    let ai_items = items_for(items, Category::AiTech);

    let (local, business, ai) = futures::try_join!(
        svc.synthesize(Category::Local, &local_items, &style),
        svc.synthesize(Category::Business, &business_items, &style),
        svc.synthesize(Category::AiTech, &ai_items, &style),
    )?;

    Ok(vec![
        ScriptSegment::new(SegmentSlot::Intro, INTRO_TEXT.to_string()),
        ScriptSegment::new(SegmentSlot::Local, local),
        ScriptSegment::new(SegmentSlot::Business, business),
        ScriptSegment::new(SegmentSlot::AiTech, ai),
        ScriptSegment::new(SegmentSlot::Outro, OUTRO_TEXT.to_string()),
    ])
}

/// Per-category summaries for caption generation.
pub fn category_summaries(segments: &[ScriptSegment]) -> Vec<(Category, String)> {
    segments
        .iter()
        .filter_map(|s| {
            let category = match s.slot {
                SegmentSlot::Local => Category::Local,
                SegmentSlot::Business => Category::Business,
                SegmentSlot::AiTech => Category::AiTech,
                _ => return None,
            };
            Some((category, s.content.clone()))
        })
        .collect()
}

/// Compile segments into the reviewable script text.
pub fn compile(segments: &[ScriptSegment], caption: String, version: u32) -> CompiledScript {
    let mut parts = Vec::with_capacity(segments.len() * 2);
    let mut total_duration = 0u32;

    for segment in segments {
        parts.push(format!("[{}]", segment.slot.header()));
        parts.push(segment.content.clone());
        parts.push(String::new());
        total_duration += segment.estimated_duration_secs;
    }

    CompiledScript {
        version,
        full_script: parts.join("\n"),
        caption,
        estimated_duration_secs: total_duration,
    }
}

/// Replace segment content with reviewer edits, keyed by slot name.
pub fn apply_edits(segments: &mut [ScriptSegment], edits: &HashMap<String, String>) {
    for segment in segments.iter_mut() {
        if let Some(replacement) = edits.get(segment.slot.as_str()) {
            *segment = ScriptSegment::new(segment.slot, replacement.clone());
        }
    }
}
