use schema_evolution_schemas::TypeCandidate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

use crate::detector::TypeStatistics;

/// Gates and result size for one "analyze" request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingCriteria {
    pub min_occurrences: usize,
    pub min_consistency: f64,
    pub limit: usize,
}

/// `0.4 * frequency + 0.3 * density + 0.3 * consistency`.
///
/// Frequency is not normalised, so on real data it dominates the score.
pub fn calculate_score(frequency: f64, density: f64, consistency: f64) -> f64 {
    0.4 * frequency + 0.3 * density + 0.3 * consistency
}

/// Unweighted mean of per-property consistency, 0.0 for a type with no properties
pub fn average_consistency(property_consistency: &BTreeMap<String, f64>) -> f64 {
    if property_consistency.is_empty() {
        return 0.0;
    }
    let sum: f64 = property_consistency.values().sum();
    sum / property_consistency.len() as f64
}

pub fn build_candidates(stats: &[TypeStatistics]) -> Vec<TypeCandidate> {
    stats
        .iter()
        .map(|s| {
            let consistency = average_consistency(&s.property_consistency);
            TypeCandidate {
                type_name: s.type_name.clone(),
                frequency: s.frequency,
                density: s.avg_density,
                consistency,
                score: calculate_score(s.frequency as f64, s.avg_density, consistency),
            }
        })
        .collect()
}

/// Keep candidates with `frequency >= min_occurrences` and `consistency >= min_consistency`
pub fn apply_thresholds(
    candidates: Vec<TypeCandidate>,
    min_occurrences: usize,
    min_consistency: f64,
) -> Vec<TypeCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.frequency >= min_occurrences && c.consistency >= min_consistency)
        .collect()
}

/// Highest score first; equal scores keep their incoming order
pub fn rank_candidates(mut candidates: Vec<TypeCandidate>, top_n: usize) -> Vec<TypeCandidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    candidates.truncate(top_n);
    candidates
}

pub fn analyze_candidates(stats: &[TypeStatistics], criteria: &RankingCriteria) -> Vec<TypeCandidate> {
    let candidates = build_candidates(stats);
    let total = candidates.len();
    let filtered = apply_thresholds(candidates, criteria.min_occurrences, criteria.min_consistency);

    debug!(
        "{} of {} type labels passed gates (min_occurrences={}, min_consistency={})",
        filtered.len(),
        total,
        criteria.min_occurrences,
        criteria.min_consistency
    );

    rank_candidates(filtered, criteria.limit)
}
