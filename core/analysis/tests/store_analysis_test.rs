use schema_evolution_analysis::{
    analyze_candidates, calculate_score, AnalysisError, PatternDetector, RankingCriteria,
    SchemaInferrer, SimilarityClusterer,
};
use schema_evolution_schemas::{EntityRef, NewDiscoveredEntity, PropertyMap, PropertyType};
use schema_evolution_store::Database;
use serde_json::json;
use tempfile::TempDir;

fn add(
    db: &Database,
    type_category: &str,
    properties: serde_json::Value,
    embedding: Option<Vec<f32>>,
) -> i64 {
    db.insert_discovered_entity(&NewDiscoveredEntity {
        unique_id: None,
        type_category: type_category.to_string(),
        name: format!("{} entity", type_category),
        properties: serde_json::from_value(properties).unwrap(),
        embedding,
        confidence: 0.8,
    })
    .unwrap()
    .id
}

/// Analysis pipeline over a real store: detect, rank, cluster, infer
#[test]
fn test_analysis_over_store() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(temp_dir.path().join("store.db")).unwrap();

    let mut people = Vec::new();
    for i in 0..6 {
        people.push(add(
            &db,
            "Person",
            json!({"email": format!("p{}@example.com", i), "name": format!("P{}", i), "age": 30 + i}),
            Some(vec![1.0, 0.1 * i as f32]),
        ));
    }
    let acme = add(&db, "Company", json!({"domain": "acme.io"}), None);
    for i in 0..2 {
        add(&db, "Note", json!({"body": format!("note {}", i)}), Some(vec![0.0, 1.0]));
    }

    for person in &people {
        db.insert_relationship(
            "works_at",
            &EntityRef::discovered(*person),
            &EntityRef::discovered(acme),
            0.9,
            &PropertyMap::new(),
        )
        .unwrap();
    }

    let stats = PatternDetector::new().analyze(&db).unwrap();
    let labels: Vec<&str> = stats.iter().map(|s| s.type_name.as_str()).collect();
    assert_eq!(labels, vec!["Person", "Company", "Note"]);
    assert_eq!(stats[0].avg_density, 1.0);
    assert_eq!(stats[1].total_relationships, 6);
    assert_eq!(stats[1].avg_density, 6.0);

    let criteria = RankingCriteria {
        min_occurrences: 5,
        min_consistency: 0.6,
        limit: 10,
    };
    let ranked = analyze_candidates(&stats, &criteria);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].type_name, "Person");
    assert_eq!(ranked[0].score, calculate_score(6.0, 1.0, 1.0));

    let report = SimilarityClusterer::default().analyze(&db).unwrap();
    assert_eq!(report.skipped_entities, 1);
    assert!(report
        .candidates
        .iter()
        .any(|c| c.type_name == "Person" && c.size >= 3));
    assert!(report.clusters.iter().all(|c| c.type_name != "Company"));

    let schema = SchemaInferrer::new().infer_from_store(&db, "Person").unwrap();
    assert_eq!(schema.properties["age"].data_type, PropertyType::Integer);
    assert!(schema.properties["email"].required);
    assert_eq!(schema.required_properties().count(), 3);

    let err = SchemaInferrer::new().infer_from_store(&db, "Ghost").unwrap_err();
    assert!(matches!(err, AnalysisError::NotFound { .. }));
}
