//! Hybrid score fusion.
//!
//! The engine runs vector and lexical retrieval, then hands both candidate
//! lists to [`fuse`]. Nothing here performs I/O.
//!
//! # Fusion Algorithm
//!
//! 1. Normalize lexical scores into `[0, 1]` by dividing by
//!    `max(max_score, 1)` ([`normalize_lexical`]). Vector scores are cosine
//!    similarities and are used as-is.
//! 2. Merge by point id: `score = vector × w_v + text × w_t`. A candidate
//!    missing from one list contributes `0` on that side.
//! 3. When vector retrieval failed, weights collapse to `w_v = 0, w_t = 1`.
//! 4. Stable sort by score (desc), so equal scores keep fusion order:
//!    vector candidates first, then lexical-only candidates.
//! 5. Truncate to the requested limit.
//!
//! Graph enrichment happens between steps 3 and 4 in the engine, because it
//! needs the link graph.

use std::collections::HashMap;

use crate::models::{MemorySearchResult, MemorySource};

/// Weights applied to the two retrieval paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub vector: f64,
    pub text: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            text: 0.3,
        }
    }
}

impl FusionWeights {
    /// Weights to use when the vector path is unavailable.
    pub fn degraded() -> Self {
        Self {
            vector: 0.0,
            text: 1.0,
        }
    }
}

/// A candidate from either retrieval path.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: u64,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub source: MemorySource,
    /// Raw score from the backend (cosine similarity or BM25).
    pub score: f64,
}

/// Divide each score by `max(max_score, 1)`.
pub fn normalize_lexical(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    let max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max)
        .max(1.0);
    candidates.iter().map(|c| (c, c.score / max)).collect()
}

/// Merge vector and lexical candidates into scored results.
///
/// The output is in fusion order and unsorted; see [`rank`].
pub fn fuse(
    vector: &[Candidate],
    lexical: &[Candidate],
    weights: FusionWeights,
    snippet_chars: usize,
) -> Vec<MemorySearchResult> {
    let text_scores: HashMap<u64, f64> = normalize_lexical(lexical)
        .into_iter()
        .map(|(c, s)| (c.id, s))
        .collect();
    let vector_scores: HashMap<u64, f64> = vector.iter().map(|c| (c.id, c.score)).collect();

    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();
    for cand in vector.iter().chain(lexical.iter()) {
        if !seen.insert(cand.id) {
            continue;
        }
        let v = vector_scores.get(&cand.id).copied().unwrap_or(0.0);
        let t = text_scores.get(&cand.id).copied().unwrap_or(0.0);
        results.push(MemorySearchResult {
            id: cand.id,
            file: cand.file.clone(),
            start_line: cand.start_line,
            end_line: cand.end_line,
            snippet: crate::models::truncate_chars(&cand.text, snippet_chars),
            score: v * weights.vector + t * weights.text,
            source: cand.source,
            related: None,
        });
    }
    results
}

/// Stable sort by score (desc) and truncate to `limit`.
pub fn rank(mut results: Vec<MemorySearchResult>, limit: usize) -> Vec<MemorySearchResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}

/// Number of lexical candidates fetched for a query returning `max_results`.
pub fn lexical_candidate_count(max_results: usize) -> usize {
    (max_results * 4).max(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: u64, score: f64) -> Candidate {
        Candidate {
            id,
            file: format!("vault/{}.md", id),
            start_line: 1,
            end_line: 1,
            text: format!("text {}", id),
            source: MemorySource::Vault,
            score,
        }
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_lexical(&[]).is_empty());
    }

    #[test]
    fn test_normalize_divides_by_max() {
        let c = vec![cand(1, 8.0), cand(2, 4.0), cand(3, 0.0)];
        let n: Vec<f64> = normalize_lexical(&c).iter().map(|(_, s)| *s).collect();
        assert_eq!(n, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_normalize_floor_of_one() {
        let c = vec![cand(1, 0.5), cand(2, 0.25)];
        let n: Vec<f64> = normalize_lexical(&c).iter().map(|(_, s)| *s).collect();
        assert_eq!(n, vec![0.5, 0.25]);

        let zeros = vec![cand(1, 0.0)];
        assert_eq!(normalize_lexical(&zeros)[0].1, 0.0);
    }

    #[test]
    fn test_fuse_weights() {
        let vector = vec![cand(1, 0.9), cand(2, 0.5)];
        let lexical = vec![cand(2, 10.0), cand(3, 5.0)];
        let fused = fuse(&vector, &lexical, FusionWeights::default(), 700);

        let scores: HashMap<u64, f64> = fused.iter().map(|r| (r.id, r.score)).collect();
        assert!((scores[&1] - 0.63).abs() < 1e-9);
        assert!((scores[&2] - (0.35 + 0.3)).abs() < 1e-9);
        assert!((scores[&3] - 0.15).abs() < 1e-9);
        assert_eq!(fused.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_degraded_equals_lexical() {
        let lexical = vec![cand(4, 9.0), cand(5, 3.0), cand(6, 3.0)];
        let fused = rank(fuse(&[], &lexical, FusionWeights::degraded(), 700), 10);

        let expected: Vec<(u64, f64)> = normalize_lexical(&lexical)
            .iter()
            .map(|(c, s)| (c.id, *s))
            .collect();
        let got: Vec<(u64, f64)> = fused.iter().map(|r| (r.id, r.score)).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_rank_stable_and_truncates() {
        let vector = vec![cand(1, 0.5), cand(2, 0.5), cand(3, 0.9)];
        let ranked = rank(fuse(&vector, &[], FusionWeights::default(), 700), 2);
        assert_eq!(ranked.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn test_snippet_truncated() {
        let mut c = cand(1, 1.0);
        c.text = "x".repeat(50);
        let fused = fuse(&[c], &[], FusionWeights::default(), 10);
        assert_eq!(fused[0].snippet.chars().count(), 11);
    }

    #[test]
    fn test_lexical_candidate_count() {
        assert_eq!(lexical_candidate_count(1), 10);
        assert_eq!(lexical_candidate_count(6), 24);
    }
}
