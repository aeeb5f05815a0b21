//! Embedding-similarity clustering, used as a corroborating signal that a
//! type label describes a cohesive group of entities.
//!
//! Clustering is greedy and seed-only: a cluster is opened by its first
//! unassigned entity and absorbs every later unassigned entity whose
//! similarity *to the seed* reaches the threshold. Two members of the same
//! cluster may therefore be less similar to each other than the threshold,
//! and an entity close to a non-seed member can still end up in its own
//! cluster. Cost is quadratic in the size of each type group.

use schema_evolution_schemas::DiscoveredEntity;
use schema_evolution_store::Database;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::Result;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;
pub const DEFAULT_MIN_CLUSTER_MEMBERS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCluster {
    pub type_name: String,
    pub seed_id: String,
    /// Unique ids of all members, seed first
    pub member_ids: Vec<String>,
}

impl EntityCluster {
    pub fn size(&self) -> usize {
        self.member_ids.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub type_name: String,
    pub cluster_count: usize,
    /// Cluster sizes, largest first
    pub cluster_sizes: Vec<usize>,
    pub clustered_entities: usize,
}

/// A cluster large enough to back a promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCandidate {
    pub type_name: String,
    pub size: usize,
    pub seed_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterReport {
    pub clusters: Vec<EntityCluster>,
    pub summaries: Vec<ClusterSummary>,
    pub candidates: Vec<ClusterCandidate>,
    /// Entities left out because they carry no usable embedding
    pub skipped_entities: usize,
}

/// Cosine similarity; 0.0 when either vector is empty, lengths differ, or a norm is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub struct SimilarityClusterer {
    threshold: f64,
    min_members: usize,
}

impl SimilarityClusterer {
    pub fn new(threshold: f64, min_members: usize) -> Self {
        Self {
            threshold,
            min_members,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Cluster one group of same-type entities. Callers pass only entities with usable embeddings.
    fn cluster_group(&self, type_name: &str, group: &[(&DiscoveredEntity, &[f32])]) -> Vec<EntityCluster> {
        let mut assigned = vec![false; group.len()];
        let mut clusters = Vec::new();

        for i in 0..group.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;

            let (seed, seed_vector) = group[i];
            let mut member_ids = vec![seed.unique_id.clone()];

            for j in (i + 1)..group.len() {
                if assigned[j] {
                    continue;
                }
                let (candidate, vector) = group[j];
                if cosine_similarity(seed_vector, vector) >= self.threshold {
                    assigned[j] = true;
                    member_ids.push(candidate.unique_id.clone());
                }
            }

            clusters.push(EntityCluster {
                type_name: type_name.to_string(),
                seed_id: seed.unique_id.clone(),
                member_ids,
            });
        }

        clusters
    }

    /// Cluster every type group separately, groups in order of first appearance
    pub fn cluster_entities(&self, entities: &[DiscoveredEntity]) -> (Vec<EntityCluster>, usize) {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<(&DiscoveredEntity, &[f32])>> = HashMap::new();
        let mut skipped = 0;

        for entity in entities {
            let Some(vector) = entity.usable_embedding() else {
                debug!("Skipping {} for clustering: no usable embedding", entity.unique_id);
                skipped += 1;
                continue;
            };
            let label = entity.type_category.as_str();
            groups
                .entry(label)
                .or_insert_with(|| {
                    order.push(label);
                    Vec::new()
                })
                .push((entity, vector));
        }

        let clusters = order
            .into_iter()
            .flat_map(|label| self.cluster_group(label, &groups[label]))
            .collect();

        (clusters, skipped)
    }

    /// Cluster counts and sizes per type label
    pub fn summarize(&self, clusters: &[EntityCluster]) -> Vec<ClusterSummary> {
        let mut summaries: Vec<ClusterSummary> = Vec::new();

        for cluster in clusters {
            match summaries.iter_mut().find(|s| s.type_name == cluster.type_name) {
                Some(summary) => {
                    summary.cluster_count += 1;
                    summary.cluster_sizes.push(cluster.size());
                    summary.clustered_entities += cluster.size();
                }
                None => summaries.push(ClusterSummary {
                    type_name: cluster.type_name.clone(),
                    cluster_count: 1,
                    cluster_sizes: vec![cluster.size()],
                    clustered_entities: cluster.size(),
                }),
            }
        }

        for summary in &mut summaries {
            summary.cluster_sizes.sort_unstable_by(|a, b| b.cmp(a));
        }

        summaries
    }

    /// Clusters with at least `min_members` members
    pub fn candidates(&self, clusters: &[EntityCluster]) -> Vec<ClusterCandidate> {
        clusters
            .iter()
            .filter(|c| c.size() >= self.min_members)
            .map(|c| ClusterCandidate {
                type_name: c.type_name.clone(),
                size: c.size(),
                seed_id: c.seed_id.clone(),
            })
            .collect()
    }

    pub fn report(&self, entities: &[DiscoveredEntity]) -> ClusterReport {
        let (clusters, skipped_entities) = self.cluster_entities(entities);
        let summaries = self.summarize(&clusters);
        let candidates = self.candidates(&clusters);

        ClusterReport {
            clusters,
            summaries,
            candidates,
            skipped_entities,
        }
    }

    pub fn analyze(&self, db: &Database) -> Result<ClusterReport> {
        let entities = db.list_discovered_entities()?;
        let report = self.report(&entities);

        info!(
            "Clustered {} entities into {} clusters ({} skipped without embeddings, {} candidates)",
            entities.len() - report.skipped_entities,
            report.clusters.len(),
            report.skipped_entities,
            report.candidates.len()
        );

        Ok(report)
    }
}

impl Default for SimilarityClusterer {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_MIN_CLUSTER_MEMBERS)
    }
}
