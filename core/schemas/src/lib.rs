use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Endpoint kind tag used by relationships that point at discovered entities.
pub const DISCOVERED_ENTITY_KIND: &str = "discovered_entity";

// ============================================================================
// ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromotionId(pub String);

impl fmt::Display for PromotionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn generate_promotion_id() -> PromotionId {
    PromotionId(format!("promo_{}", ulid::Ulid::new()))
}

pub fn generate_entity_unique_id() -> String {
    format!("ent_{}", ulid::Ulid::new())
}

// ============================================================================
// Property Values
// ============================================================================

/// A single value from a loosely typed property map.
///
/// Stored maps are plain JSON objects, so the union is untagged. Whole JSON
/// numbers land in `Integer`, everything else numeric lands in `Number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Structured(serde_json::Value),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Bool(_) => "boolean",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Number(_) => "number",
            PropertyValue::String(_) => "string",
            PropertyValue::Structured(_) => "structured",
        }
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PropertyValue::Null,
            serde_json::Value::Bool(b) => PropertyValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Integer(i),
                None => PropertyValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => PropertyValue::String(s),
            other => PropertyValue::Structured(other),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

pub type PropertyMap = BTreeMap<String, PropertyValue>;

// ============================================================================
// Entity Store Records
// ============================================================================

/// Loosely typed record produced by the extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredEntity {
    pub id: i64,
    pub unique_id: String,
    pub type_category: String,
    pub name: String,
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub confidence: f64,
    pub created_at: String, // RFC3339
}

impl DiscoveredEntity {
    /// Embedding usable for similarity, i.e. present, non-empty and finite.
    pub fn usable_embedding(&self) -> Option<&[f32]> {
        match self.embedding.as_deref() {
            Some(v) if !v.is_empty() && v.iter().all(|x| x.is_finite()) => Some(v),
            _ => None,
        }
    }
}

/// Entity as handed over by the extraction collaborator, before it has a row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDiscoveredEntity {
    #[serde(default)]
    pub unique_id: Option<String>,
    pub type_category: String,
    pub name: String,
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: i64,
}

impl EntityRef {
    pub fn discovered(id: i64) -> Self {
        Self {
            kind: DISCOVERED_ENTITY_KIND.to_string(),
            id,
        }
    }

    pub fn is_discovered_entity(&self) -> bool {
        self.kind == DISCOVERED_ENTITY_KIND
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub relationship_type: String,
    pub from: EntityRef,
    pub to: EntityRef,
    pub confidence: f64,
    #[serde(default)]
    pub properties: PropertyMap,
    pub created_at: String, // RFC3339
}

// ============================================================================
// Analysis Output
// ============================================================================

/// Ranked type label, recomputed on every analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeCandidate {
    pub type_name: String,
    pub frequency: usize,
    pub density: f64,
    pub consistency: f64,
    pub score: f64,
}

// ============================================================================
// Schema Definitions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    /// Type name that this version does not recognise; kept verbatim.
    Unknown(String),
}

impl PropertyType {
    pub fn as_str(&self) -> &str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Unknown(raw) => raw.as_str(),
        }
    }
}

impl From<String> for PropertyType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "string" => PropertyType::String,
            "integer" => PropertyType::Integer,
            "number" => PropertyType::Number,
            "boolean" => PropertyType::Boolean,
            _ => PropertyType::Unknown(raw),
        }
    }
}

impl From<PropertyType> for String {
    fn from(value: PropertyType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ValidationRule {
    Format(String),
    MinLength(u64),
    MaxLength(u64),
    Minimum(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub data_type: PropertyType,
    pub required: bool,
    #[serde(default)]
    pub validation: Vec<ValidationRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub type_name: String,
    pub properties: BTreeMap<String, PropertyDefinition>,
}

impl SchemaDefinition {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn required_properties(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, def)| def.required)
            .map(|(name, _)| name.as_str())
    }

    /// Render as a JSON Schema (draft-07) object document.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for (name, def) in &self.properties {
            let mut prop = serde_json::Map::new();
            let json_type = match def.data_type {
                PropertyType::Unknown(_) => "string",
                ref known => known.as_str(),
            };
            prop.insert("type".into(), json_type.into());
            for rule in &def.validation {
                match rule {
                    ValidationRule::Format(format) => {
                        prop.insert("format".into(), format.clone().into());
                    }
                    ValidationRule::MinLength(n) => {
                        prop.insert("minLength".into(), (*n).into());
                    }
                    ValidationRule::MaxLength(n) => {
                        prop.insert("maxLength".into(), (*n).into());
                    }
                    ValidationRule::Minimum(n) => {
                        prop.insert("minimum".into(), (*n).into());
                    }
                }
            }
            properties.insert(name.clone(), serde_json::Value::Object(prop));
        }

        let required: Vec<&str> = self.required_properties().collect();

        serde_json::json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": self.type_name,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

// ============================================================================
// Promotion Audit
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionCriteria {
    pub required_threshold: f64,
    pub optional_threshold: f64,
    pub sample_limit: usize,
    pub copy_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Default for PromotionCriteria {
    fn default() -> Self {
        Self {
            required_threshold: 0.90,
            optional_threshold: 0.30,
            sample_limit: 1000,
            copy_data: true,
            note: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStatus::Success => "success",
            PromotionStatus::Failed => "failed",
        }
    }
}

/// Strictly forward progression of one promotion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PromotionStage {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "schema_generated")]
    SchemaGenerated,
    #[serde(rename = "bindings_rebuilt")]
    BindingsRebuilt,
    #[serde(rename = "storage_migrated")]
    StorageMigrated,
    #[serde(rename = "validated")]
    Validated,
    #[serde(rename = "data_copied")]
    DataCopied,
    #[serde(rename = "audited")]
    Audited,
}

impl PromotionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStage::Idle => "idle",
            PromotionStage::SchemaGenerated => "schema_generated",
            PromotionStage::BindingsRebuilt => "bindings_rebuilt",
            PromotionStage::StorageMigrated => "storage_migrated",
            PromotionStage::Validated => "validated",
            PromotionStage::DataCopied => "data_copied",
            PromotionStage::Audited => "audited",
        }
    }
}

/// Durable, insert-only history entry for one promotion attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaPromotion {
    pub id: PromotionId,
    pub type_name: String,
    pub promoted_at: String, // RFC3339
    pub promotion_criteria: PromotionCriteria,
    pub entities_affected: u64,
    pub validation_failures: u64,
    pub schema_definition: Option<SchemaDefinition>,
    pub status: PromotionStatus,
    pub error: Option<String>,
}

/// Outcome handed back to whoever asked for the promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionResult {
    pub success: bool,
    pub schema_path: Option<PathBuf>,
    pub entities_migrated: u64,
    pub validation_errors: u64,
    pub error: Option<String>,
    pub stage: PromotionStage,
    pub manual_migration_pending: bool,
    pub audit_id: Option<PromotionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_schema() -> SchemaDefinition {
        let mut schema = SchemaDefinition::new("Person");
        schema.properties.insert(
            "email".to_string(),
            PropertyDefinition {
                data_type: PropertyType::String,
                required: true,
                validation: vec![
                    ValidationRule::Format("email".to_string()),
                    ValidationRule::MinLength(1),
                ],
            },
        );
        schema.properties.insert(
            "age".to_string(),
            PropertyDefinition {
                data_type: PropertyType::Integer,
                required: false,
                validation: vec![ValidationRule::Minimum(0)],
            },
        );
        schema
    }

    #[test]
    fn test_schema_definition_round_trip() {
        let schema = person_schema();

        let json = serde_json::to_string(&schema).unwrap();
        let restored: SchemaDefinition = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.type_name, "Person");
        assert_eq!(restored, schema);
    }

    #[test]
    fn test_validation_rule_wire_shape() {
        let json = serde_json::to_value(ValidationRule::MinLength(1)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "minLength", "value": 1}));

        let json = serde_json::to_value(ValidationRule::Format("email".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "format", "value": "email"}));
    }

    #[test]
    fn test_unknown_property_type_is_preserved() {
        let def: PropertyDefinition = serde_json::from_value(serde_json::json!({
            "data_type": "uuid",
            "required": true
        }))
        .unwrap();

        assert_eq!(def.data_type, PropertyType::Unknown("uuid".to_string()));
        assert!(def.validation.is_empty());

        let back = serde_json::to_value(&def).unwrap();
        assert_eq!(back["data_type"], "uuid");
    }

    #[test]
    fn test_property_value_decoding() {
        let map: PropertyMap = serde_json::from_value(serde_json::json!({
            "flag": true,
            "count": 3,
            "ratio": 0.5,
            "whole_float": 2.0,
            "label": "x",
            "tags": ["a", "b"],
            "missing": null
        }))
        .unwrap();

        assert_eq!(map["flag"], PropertyValue::Bool(true));
        assert_eq!(map["count"], PropertyValue::Integer(3));
        assert_eq!(map["ratio"], PropertyValue::Number(0.5));
        assert_eq!(map["whole_float"], PropertyValue::Number(2.0));
        assert_eq!(map["label"], PropertyValue::String("x".into()));
        assert!(matches!(map["tags"], PropertyValue::Structured(_)));
        assert!(map["missing"].is_null());
    }

    #[test]
    fn test_json_value_conversion_matches_serde() {
        let raw = serde_json::json!({"n": 7, "f": 1.25, "s": "text"});
        let via_serde: PropertyMap = serde_json::from_value(raw.clone()).unwrap();

        for (key, value) in raw.as_object().unwrap() {
            assert_eq!(PropertyValue::from(value.clone()), via_serde[key]);
        }
    }

    #[test]
    fn test_json_schema_rendering() {
        let doc = person_schema().to_json_schema();

        assert_eq!(doc["title"], "Person");
        assert_eq!(doc["required"], serde_json::json!(["email"]));
        assert_eq!(doc["properties"]["email"]["format"], "email");
        assert_eq!(doc["properties"]["email"]["minLength"], 1);
        assert_eq!(doc["properties"]["age"]["type"], "integer");
        assert_eq!(doc["properties"]["age"]["minimum"], 0);
    }

    #[test]
    fn test_usable_embedding_filters_bad_vectors() {
        let mut entity = DiscoveredEntity {
            id: 1,
            unique_id: generate_entity_unique_id(),
            type_category: "Person".into(),
            name: "Ada".into(),
            properties: PropertyMap::new(),
            embedding: None,
            confidence: 0.9,
            created_at: "2025-01-01T00:00:00Z".into(),
        };
        assert!(entity.usable_embedding().is_none());

        entity.embedding = Some(vec![]);
        assert!(entity.usable_embedding().is_none());

        entity.embedding = Some(vec![1.0, f32::NAN]);
        assert!(entity.usable_embedding().is_none());

        entity.embedding = Some(vec![1.0, 0.0]);
        assert_eq!(entity.usable_embedding(), Some(&[1.0, 0.0][..]));
    }

    #[test]
    fn test_promotion_stage_ordering() {
        assert!(PromotionStage::Idle < PromotionStage::SchemaGenerated);
        assert!(PromotionStage::DataCopied < PromotionStage::Audited);
        assert_eq!(PromotionStage::StorageMigrated.as_str(), "storage_migrated");
    }
}
