//! Chunk relevance ranking.
//!
//! Two strategies are provided:
//!
//! | Strategy | Used when |
//! |----------|-----------|
//! | [`rank_by_similarity`] | the fetch backend has an embedding model |
//! | [`rank_by_terms`] | fallback when no embedding relevance is available |

use crate::models::Chunk;

/// Cosine similarity between two vectors. Returns 0.0 for mismatched or
/// zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, na, nb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });
    let denom = na.sqrt() * nb.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Order chunks by descending similarity of their vectors to `query_vec`,
/// keeping at most `limit`. `vectors[i]` belongs to `chunks[i]`.
pub fn rank_by_similarity(
    chunks: Vec<Chunk>,
    vectors: &[Vec<f32>],
    query_vec: &[f32],
    limit: usize,
) -> Vec<Chunk> {
    let mut scored: Vec<(f32, Chunk)> = chunks
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let score = vectors
                .get(i)
                .map(|v| cosine_similarity(v, query_vec))
                .unwrap_or(0.0);
            (score, c)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(limit).map(|(_, c)| c).collect()
}

/// Distinct lower-cased query terms.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for t in query.split_whitespace() {
        let t = t
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if !t.is_empty() && !terms.contains(&t) {
            terms.push(t);
        }
    }
    terms
}

/// Number of distinct query terms present in `text` (case-insensitive
/// substring match).
pub fn term_score(text: &str, terms: &[String]) -> usize {
    let lower = text.to_lowercase();
    terms.iter().filter(|t| lower.contains(t.as_str())).count()
}

/// Rank chunks by distinct query-term coverage, keeping at most `limit`.
///
/// Input at or under the limit is returned unchanged. Ties keep their
/// original relative order.
pub fn rank_by_terms(chunks: Vec<Chunk>, query: &str, limit: usize) -> Vec<Chunk> {
    if chunks.len() <= limit {
        return chunks;
    }
    let terms = query_terms(query);
    let mut scored: Vec<(usize, Chunk)> = chunks
        .into_iter()
        .map(|c| (term_score(&c.text, &terms), c))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(limit);
    scored.into_iter().map(|(_, c)| c).collect()
}
