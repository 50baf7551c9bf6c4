// Deduplicator - collapse near-duplicate items across sources
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::models::SourceItem;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Case-fold, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex digest of the normalized title.
pub fn fingerprint(title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Token-overlap (Jaccard) similarity between two normalized titles.
pub fn similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

/// Drop items whose normalized title matches an already retained item above
/// the threshold. Items are compared oldest-first so the near-duplicate with
/// the earlier `published_at` wins; discovery order breaks ties. O(n^2) over
/// the run's item count, which is bounded by a handful of curated sources.
pub fn collapse(mut items: Vec<SourceItem>, threshold: f64) -> Vec<SourceItem> {
    items.sort_by_key(|item| item.published_at);

    let mut retained: Vec<SourceItem> = Vec::with_capacity(items.len());
    let mut retained_titles: Vec<String> = Vec::with_capacity(items.len());

    for item in items {
        let normalized = normalize_title(&item.title);
        let duplicate = retained_titles
            .iter()
            .any(|kept| similarity(kept, &normalized) >= threshold);

        if duplicate {
            tracing::debug!(
                source_id = %item.source_id,
                title = %item.title,
                "dropping near-duplicate item"
            );
            continue;
        }

        retained_titles.push(normalized);
        retained.push(item);
    }

    retained
}
