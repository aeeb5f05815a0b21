use schema_evolution_schemas::{
    PromotionCriteria, PropertyDefinition, PropertyMap, PropertyType, PropertyValue,
    SchemaDefinition, ValidationRule,
};
use schema_evolution_store::Database;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{AnalysisError, Result};

/// Presence ratio at or above which a property becomes required
pub const REQUIRED_THRESHOLD: f64 = 0.90;
/// Presence ratio at or above which a property is kept as optional
pub const OPTIONAL_THRESHOLD: f64 = 0.30;
/// Upper bound on entities sampled per inference run
pub const SAMPLE_LIMIT: usize = 1000;

const STRING_MAX_LENGTH: u64 = 100;

/// Presence ratio per property key across the samples
fn presence_ratios(samples: &[PropertyMap]) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for sample in samples {
        for key in sample.keys() {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
    }

    let total = samples.len() as f64;
    counts
        .into_iter()
        .map(|(key, count)| (key, count as f64 / total))
        .collect()
}

/// Properties whose presence ratio is `>= threshold`
pub fn infer_required_properties(samples: &[PropertyMap], threshold: f64) -> Vec<String> {
    if samples.is_empty() {
        return Vec::new();
    }
    presence_ratios(samples)
        .into_iter()
        .filter(|(_, ratio)| *ratio >= threshold)
        .map(|(key, _)| key)
        .collect()
}

/// Properties whose presence ratio is `>= min` and `< max`
pub fn infer_optional_properties(samples: &[PropertyMap], min: f64, max: f64) -> Vec<String> {
    if samples.is_empty() {
        return Vec::new();
    }
    presence_ratios(samples)
        .into_iter()
        .filter(|(_, ratio)| *ratio >= min && *ratio < max)
        .map(|(key, _)| key)
        .collect()
}

/// Boolean only if every sample is boolean; then number, integer, string in that order
pub fn infer_data_type(values: &[&PropertyValue]) -> PropertyType {
    let observed: Vec<&PropertyValue> = values.iter().copied().filter(|v| !v.is_null()).collect();
    if observed.is_empty() {
        return PropertyType::String;
    }

    if observed.iter().all(|v| matches!(v, PropertyValue::Bool(_))) {
        return PropertyType::Boolean;
    }
    if observed.iter().any(|v| matches!(v, PropertyValue::Number(_))) {
        return PropertyType::Number;
    }
    if observed.iter().any(|v| matches!(v, PropertyValue::Integer(_))) {
        return PropertyType::Integer;
    }
    PropertyType::String
}

/// Name- and type-driven constraints for one property
pub fn generate_validation_rules(name: &str, data_type: &PropertyType) -> Vec<ValidationRule> {
    let is_email = name.to_lowercase().contains("email");
    let mut rules = Vec::new();

    if is_email {
        rules.push(ValidationRule::Format("email".to_string()));
    }

    match data_type {
        PropertyType::String => {
            rules.push(ValidationRule::MinLength(1));
            if !is_email {
                rules.push(ValidationRule::MaxLength(STRING_MAX_LENGTH));
            }
        }
        PropertyType::Integer => rules.push(ValidationRule::Minimum(0)),
        _ => {}
    }

    rules
}

pub struct SchemaInferrer {
    required_threshold: f64,
    optional_threshold: f64,
    sample_limit: usize,
}

impl SchemaInferrer {
    pub fn new() -> Self {
        Self {
            required_threshold: REQUIRED_THRESHOLD,
            optional_threshold: OPTIONAL_THRESHOLD,
            sample_limit: SAMPLE_LIMIT,
        }
    }

    pub fn from_criteria(criteria: &PromotionCriteria) -> Self {
        Self {
            required_threshold: criteria.required_threshold,
            optional_threshold: criteria.optional_threshold,
            sample_limit: criteria.sample_limit,
        }
    }

    pub fn sample_limit(&self) -> usize {
        self.sample_limit
    }

    /// Infer a schema from property maps of one type. Extra samples past the cap are ignored.
    pub fn infer_schema(&self, type_name: &str, samples: &[PropertyMap]) -> Result<SchemaDefinition> {
        if samples.is_empty() {
            return Err(AnalysisError::NotFound {
                type_name: type_name.to_string(),
            });
        }
        let samples = &samples[..samples.len().min(self.sample_limit)];

        let required = infer_required_properties(samples, self.required_threshold);
        let optional =
            infer_optional_properties(samples, self.optional_threshold, self.required_threshold);

        let mut schema = SchemaDefinition::new(type_name);
        for (name, is_required) in required
            .into_iter()
            .map(|n| (n, true))
            .chain(optional.into_iter().map(|n| (n, false)))
        {
            let values: Vec<&PropertyValue> = samples.iter().filter_map(|s| s.get(&name)).collect();
            let data_type = infer_data_type(&values);
            let validation = generate_validation_rules(&name, &data_type);

            debug!(
                "{}.{}: {} ({})",
                type_name,
                name,
                data_type,
                if is_required { "required" } else { "optional" }
            );

            schema.properties.insert(
                name,
                PropertyDefinition {
                    data_type,
                    required: is_required,
                    validation,
                },
            );
        }

        info!(
            "Inferred schema for '{}' from {} samples: {} properties ({} required)",
            type_name,
            samples.len(),
            schema.properties.len(),
            schema.required_properties().count()
        );

        Ok(schema)
    }

    /// Sample the store for `type_name` and infer its schema
    pub fn infer_from_store(&self, db: &Database, type_name: &str) -> Result<SchemaDefinition> {
        let entities = db.list_entities_by_type(type_name, Some(self.sample_limit))?;
        let samples: Vec<PropertyMap> = entities.into_iter().map(|e| e.properties).collect();
        self.infer_schema(type_name, &samples)
    }
}

impl Default for SchemaInferrer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn keys(present: &[&str]) -> PropertyMap {
        present.iter().map(|k| (k.to_string(), "x".into())).collect()
    }

    #[test]
    fn test_required_property_boundary() {
        let samples = vec![
            keys(&["always", "mostly"]),
            keys(&["always", "mostly"]),
            keys(&["always", "mostly"]),
            keys(&["always"]),
        ];

        let required = infer_required_properties(&samples, 0.90);
        assert_eq!(required, vec!["always".to_string()]);
    }

    #[test]
    fn test_required_threshold_is_inclusive() {
        let mut samples: Vec<PropertyMap> = (0..9).map(|_| keys(&["p"])).collect();
        samples.push(keys(&[]));

        // exactly 9/10 = 0.90
        assert_eq!(infer_required_properties(&samples, 0.90), vec!["p".to_string()]);
    }

    #[test]
    fn test_optional_property_bounds() {
        let samples = vec![
            keys(&["always", "half"]),
            keys(&["always", "half"]),
            keys(&["always"]),
            keys(&["always"]),
        ];

        let optional = infer_optional_properties(&samples, 0.30, 0.90);
        assert_eq!(optional, vec!["half".to_string()]);
    }

    #[test]
    fn test_optional_lower_bound_is_inclusive() {
        let mut samples: Vec<PropertyMap> = (0..3).map(|_| keys(&["p"])).collect();
        samples.extend((0..7).map(|_| keys(&[])));

        // exactly 3/10 = 0.30 stays, anything rarer is noise
        assert_eq!(infer_optional_properties(&samples, 0.30, 0.90), vec!["p".to_string()]);
        samples.push(keys(&[]));
        assert!(infer_optional_properties(&samples, 0.30, 0.90).is_empty());
    }

    #[test]
    fn test_data_type_inference() {
        let t = PropertyValue::Bool(true);
        let i = PropertyValue::Integer(3);
        let f = PropertyValue::Number(2.5);
        let s = PropertyValue::from("three");
        let n = PropertyValue::Null;

        assert_eq!(infer_data_type(&[&t, &t]), PropertyType::Boolean);
        assert_eq!(infer_data_type(&[&t, &i]), PropertyType::Integer);
        assert_eq!(infer_data_type(&[&i, &f]), PropertyType::Number);
        assert_eq!(infer_data_type(&[&s, &f]), PropertyType::Number);
        assert_eq!(infer_data_type(&[&i, &i, &n]), PropertyType::Integer);
        assert_eq!(infer_data_type(&[&s]), PropertyType::String);
        assert_eq!(infer_data_type(&[&n]), PropertyType::String);
        assert_eq!(infer_data_type(&[]), PropertyType::String);
    }

    #[test]
    fn test_validation_rules() {
        assert_eq!(
            generate_validation_rules("Work_Email", &PropertyType::String),
            vec![
                ValidationRule::Format("email".to_string()),
                ValidationRule::MinLength(1)
            ]
        );
        assert_eq!(
            generate_validation_rules("name", &PropertyType::String),
            vec![ValidationRule::MinLength(1), ValidationRule::MaxLength(100)]
        );
        assert_eq!(
            generate_validation_rules("age", &PropertyType::Integer),
            vec![ValidationRule::Minimum(0)]
        );
        assert!(generate_validation_rules("score", &PropertyType::Number).is_empty());
        assert!(generate_validation_rules("active", &PropertyType::Boolean).is_empty());
    }

    #[test]
    fn test_person_schema_scenario() {
        let samples = vec![
            sample(&[
                ("email", "ada@example.com".into()),
                ("name", "Ada".into()),
                ("title", "Engineer".into()),
            ]),
            sample(&[("email", "bob@example.com".into()), ("name", "Bob".into())]),
            sample(&[("email", "cy@example.com".into()), ("name", "Cy".into())]),
        ];

        let schema = SchemaInferrer::new().infer_schema("person", &samples).unwrap();

        assert!(schema.properties["email"].required);
        assert!(schema.properties["name"].required);
        // 1/3 sits inside [0.30, 0.90)
        assert!(!schema.properties["title"].required);
        assert_eq!(schema.properties["title"].data_type, PropertyType::String);

        let doc = schema.to_json_schema();
        assert_eq!(doc["required"], serde_json::json!(["email", "name"]));
        assert!(doc["properties"]["title"].is_object());
    }

    #[test]
    fn test_rare_properties_are_dropped() {
        let mut samples: Vec<PropertyMap> = (0..4).map(|_| keys(&["name"])).collect();
        samples[0].insert("nickname".to_string(), "x".into());

        let schema = SchemaInferrer::new().infer_schema("Person", &samples).unwrap();
        assert!(schema.properties.contains_key("name"));
        assert!(!schema.properties.contains_key("nickname"));
    }

    #[test]
    fn test_empty_sample_is_not_found() {
        let err = SchemaInferrer::new().infer_schema("Ghost", &[]).unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound { ref type_name } if type_name == "Ghost"));
    }

    #[test]
    fn test_sample_limit_caps_input() {
        let criteria = PromotionCriteria {
            sample_limit: 2,
            ..PromotionCriteria::default()
        };
        let samples = vec![keys(&["a"]), keys(&["a"]), keys(&["b"]), keys(&["b"])];

        let schema = SchemaInferrer::from_criteria(&criteria)
            .infer_schema("T", &samples)
            .unwrap();
        assert!(schema.properties["a"].required);
        assert!(!schema.properties.contains_key("b"));
    }
}
