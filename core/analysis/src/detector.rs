use schema_evolution_schemas::{DiscoveredEntity, Relationship};
use schema_evolution_store::Database;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::error::Result;

/// Aggregated statistics for one type label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeStatistics {
    pub type_name: String,
    pub frequency: usize,
    pub total_relationships: usize,
    pub avg_density: f64,
    pub property_consistency: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityStats {
    pub total_relationships: usize,
    pub avg_density: f64,
}

/// Reads the whole store and aggregates it per type label
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, db: &Database) -> Result<Vec<TypeStatistics>> {
        let entities = db.list_discovered_entities()?;
        let relationships = db.list_relationships()?;

        info!(
            "Detecting patterns over {} entities and {} relationships",
            entities.len(),
            relationships.len()
        );

        Ok(detect_patterns(&entities, &relationships))
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Type labels in order of first appearance, with the entities carrying each
fn group_by_type(entities: &[DiscoveredEntity]) -> Vec<(&str, Vec<&DiscoveredEntity>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&DiscoveredEntity>)> = Vec::new();

    for entity in entities {
        let label = entity.type_category.as_str();
        match index.get(label) {
            Some(&slot) => groups[slot].1.push(entity),
            None => {
                index.insert(label, groups.len());
                groups.push((label, vec![entity]));
            }
        }
    }

    groups
}

/// Relationship endpoints per type; a self-loop touches its entity twice
pub fn calculate_relationship_density(
    entities: &[DiscoveredEntity],
    relationships: &[Relationship],
) -> HashMap<String, DensityStats> {
    let type_of: HashMap<i64, &str> = entities
        .iter()
        .map(|e| (e.id, e.type_category.as_str()))
        .collect();

    let mut totals: HashMap<&str, usize> = HashMap::new();
    for relationship in relationships {
        for endpoint in [&relationship.from, &relationship.to] {
            if !endpoint.is_discovered_entity() {
                continue;
            }
            if let Some(label) = type_of.get(&endpoint.id) {
                *totals.entry(*label).or_insert(0) += 1;
            }
        }
    }

    group_by_type(entities)
        .into_iter()
        .map(|(label, members)| {
            let total = totals.get(label).copied().unwrap_or(0);
            (
                label.to_string(),
                DensityStats {
                    total_relationships: total,
                    avg_density: total as f64 / members.len() as f64,
                },
            )
        })
        .collect()
}

/// Fraction of each type's entities that carry a given property key
pub fn calculate_property_consistency(
    entities: &[DiscoveredEntity],
) -> HashMap<String, BTreeMap<String, f64>> {
    group_by_type(entities)
        .into_iter()
        .map(|(label, members)| (label.to_string(), consistency_for(&members)))
        .collect()
}

fn consistency_for(members: &[&DiscoveredEntity]) -> BTreeMap<String, f64> {
    let mut presence: BTreeMap<String, usize> = BTreeMap::new();
    for entity in members {
        for key in entity.properties.keys() {
            *presence.entry(key.clone()).or_insert(0) += 1;
        }
    }

    let total = members.len() as f64;
    presence
        .into_iter()
        .map(|(key, count)| (key, count as f64 / total))
        .collect()
}

/// Per-type frequency, density and property consistency, in order of first appearance
pub fn detect_patterns(
    entities: &[DiscoveredEntity],
    relationships: &[Relationship],
) -> Vec<TypeStatistics> {
    let densities = calculate_relationship_density(entities, relationships);

    let stats: Vec<TypeStatistics> = group_by_type(entities)
        .into_iter()
        .map(|(label, members)| {
            let density = densities.get(label).copied().unwrap_or(DensityStats {
                total_relationships: 0,
                avg_density: 0.0,
            });
            TypeStatistics {
                type_name: label.to_string(),
                frequency: members.len(),
                total_relationships: density.total_relationships,
                avg_density: density.avg_density,
                property_consistency: consistency_for(&members),
            }
        })
        .collect();

    debug!("Detected {} distinct type labels", stats.len());
    stats
}
