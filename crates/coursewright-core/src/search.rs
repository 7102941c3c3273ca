//! Scoring and ranking for the Document Index.
//!
//! Operates on document snapshots only; the [`DocumentIndex`](crate::index::DocumentIndex)
//! decides which mode to run and fetches the snapshots from its store.
//!
//! # Similarity mode
//!
//! 1. Skip documents without an embedding or failing the metadata filter.
//! 2. Score with cosine similarity against the query vector.
//! 3. Drop scores below the threshold.
//! 4. Sort by score (desc), id (asc). Truncate to `limit`.
//!
//! # Keyword mode
//!
//! For every query term (length > 2):
//! `3 × whole-word hits + 1 × substring hits + 5 if the title contains it`,
//! divided by `sqrt(word_count)`. Zero scores are dropped, then the same
//! sort and truncation apply.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use crate::embedding::cosine_similarity;
use crate::models::{
    IndexedDocument, Metadata, SearchMode, SearchResult, META_CHUNK_INDEX, META_SOURCE,
};
use crate::text::{count_substring, count_whole_word, excerpt};

/// Default minimum cosine similarity kept in similarity mode.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.1;

const WHOLE_WORD_WEIGHT: f64 = 3.0;
const SUBSTRING_WEIGHT: f64 = 1.0;
const TITLE_WEIGHT: f64 = 5.0;

/// Content prefix length used to dedupe materials without a source id.
const DEDUPE_PREFIX_CHARS: usize = 100;

/// Whether a document's metadata satisfies every filter entry.
///
/// An array filter value is a set-membership test; any other value must
/// equal the document's value exactly. Missing keys never match.
pub fn matches_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter.iter().all(|(key, expected)| match metadata.get(key) {
        None => false,
        Some(actual) => match expected {
            Value::Array(allowed) => allowed.contains(actual),
            other => other == actual,
        },
    })
}

/// Keyword relevance of one document for pre-tokenized query terms.
pub fn keyword_score(doc: &IndexedDocument, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let content = doc.content.to_lowercase();
    let title = doc.title().map(str::to_lowercase);

    let raw: f64 = terms
        .iter()
        .map(|term| {
            let whole = count_whole_word(&content, term) as f64;
            let partial = count_substring(&content, term) as f64;
            let in_title = title.as_deref().is_some_and(|t| t.contains(term.as_str()));
            WHOLE_WORD_WEIGHT * whole
                + SUBSTRING_WEIGHT * partial
                + if in_title { TITLE_WEIGHT } else { 0.0 }
        })
        .sum();

    raw / (doc.word_count().max(1) as f64).sqrt()
}

/// Rank embedded documents by cosine similarity to `query_vec`.
pub fn rank_by_similarity(
    docs: &[IndexedDocument],
    query_vec: &[f32],
    threshold: f64,
    filter: &Metadata,
    exclude_id: Option<&str>,
    limit: usize,
) -> Vec<SearchResult> {
    let scored = docs
        .iter()
        .filter(|d| exclude_id != Some(d.id.as_str()) && matches_filter(&d.metadata, filter))
        .filter_map(|d| {
            let embedding = d.embedding.as_deref()?;
            let sim = cosine_similarity(query_vec, embedding) as f64;
            (sim >= threshold).then_some((d, sim))
        })
        .collect();

    finish(scored, SearchMode::Similarity, "similarity", limit)
}

/// Rank documents by weighted keyword matching.
pub fn rank_by_keywords(
    docs: &[IndexedDocument],
    terms: &[String],
    filter: &Metadata,
    exclude_id: Option<&str>,
    limit: usize,
) -> Vec<SearchResult> {
    let scored = docs
        .iter()
        .filter(|d| exclude_id != Some(d.id.as_str()) && matches_filter(&d.metadata, filter))
        .filter_map(|d| {
            let score = keyword_score(d, terms);
            (score > 0.0).then_some((d, score))
        })
        .collect();

    finish(scored, SearchMode::Keyword, "keyword_score", limit)
}

/// Whether any document could take part in similarity ranking.
pub fn has_embedded_candidates(
    docs: &[IndexedDocument],
    filter: &Metadata,
    exclude_id: Option<&str>,
) -> bool {
    docs.iter().any(|d| {
        d.embedding.is_some()
            && exclude_id != Some(d.id.as_str())
            && matches_filter(&d.metadata, filter)
    })
}

fn finish(
    mut scored: Vec<(&IndexedDocument, f64)>,
    mode: SearchMode,
    score_key: &str,
    limit: usize,
) -> Vec<SearchResult> {
    scored.sort_by(|(a, sa), (b, sb)| by_score_desc(*sa, *sb).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(limit);
    scored
        .into_iter()
        .map(|(doc, score)| {
            let mut metadata = doc.metadata.clone();
            metadata.insert(score_key.to_string(), Value::from(score));
            SearchResult {
                id: doc.id.clone(),
                content: doc.content.clone(),
                metadata,
                score,
                mode,
            }
        })
        .collect()
}

fn by_score_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Composite dedupe key for retrieved materials.
///
/// `source#chunk_index` when a source is recorded, otherwise a content prefix.
pub fn material_key(result: &SearchResult) -> String {
    match result.metadata.get(META_SOURCE).and_then(Value::as_str) {
        Some(source) => {
            let chunk = result
                .metadata
                .get(META_CHUNK_INDEX)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            format!("{source}#{chunk}")
        }
        None => excerpt(&result.content, DEDUPE_PREFIX_CHARS),
    }
}

/// Merge several result batches into one ranked, deduplicated list.
///
/// Duplicates keep their best score. Output is sorted by score (desc) and
/// capped at `max`.
pub fn merge_materials(
    batches: impl IntoIterator<Item = Vec<SearchResult>>,
    max: usize,
) -> Vec<SearchResult> {
    let mut best: HashMap<String, SearchResult> = HashMap::new();
    for result in batches.into_iter().flatten() {
        let key = material_key(&result);
        match best.get(&key) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                best.insert(key, result);
            }
        }
    }

    let mut merged: Vec<SearchResult> = best.into_values().collect();
    merged.sort_by(|a, b| by_score_desc(a.score, b.score).then_with(|| a.id.cmp(&b.id)));
    merged.truncate(max);
    merged
}
