//! Drives one discovered type through promotion.
//!
//! The steps run strictly in order: infer the schema, generate the
//! artifact, regenerate bindings, migrate the storage structure, validate
//! the existing entities and copy them into the new table. Whatever happens
//! along the way, exactly one audit record is written before the result is
//! handed back.

use chrono::Utc;
use schema_evolution_analysis::SchemaInferrer;
use schema_evolution_schemas::{
    generate_promotion_id, DiscoveredEntity, PromotionCriteria, PromotionResult, PromotionStage,
    PromotionStatus, SchemaDefinition, SchemaPromotion,
};
use schema_evolution_store::{Database, RawWriter, StoreError, TypedRow};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactGenerator;
use crate::error::{PromotionError, Result};
use crate::migration::SchemaTooling;

/// Progress of a single attempt, filled in as steps complete
struct Attempt {
    type_name: String,
    stage: PromotionStage,
    schema: Option<SchemaDefinition>,
    schema_path: Option<PathBuf>,
    validation_failures: u64,
    entities_migrated: u64,
    manual_migration_pending: bool,
}

impl Attempt {
    fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            stage: PromotionStage::Idle,
            schema: None,
            schema_path: None,
            validation_failures: 0,
            entities_migrated: 0,
            manual_migration_pending: false,
        }
    }
}

pub struct PromotionOrchestrator<'a> {
    db: &'a Database,
    generator: &'a ArtifactGenerator,
    tooling: &'a dyn SchemaTooling,
    writer: Option<&'a dyn RawWriter>,
    criteria: PromotionCriteria,
    cancelled: Option<&'a AtomicBool>,
}

impl<'a> PromotionOrchestrator<'a> {
    /// Orchestrator without a raw writer: data is counted, never copied
    pub fn new(
        db: &'a Database,
        generator: &'a ArtifactGenerator,
        tooling: &'a dyn SchemaTooling,
    ) -> Self {
        Self {
            db,
            generator,
            tooling,
            writer: None,
            criteria: PromotionCriteria::default(),
            cancelled: None,
        }
    }

    pub fn with_raw_writer(mut self, writer: &'a dyn RawWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_criteria(mut self, criteria: PromotionCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Flag checked between steps and before every copied row; once set, the
    /// attempt stops and is audited as failed
    pub fn with_cancel_flag(mut self, cancelled: &'a AtomicBool) -> Self {
        self.cancelled = Some(cancelled);
        self
    }

    pub fn criteria(&self) -> &PromotionCriteria {
        &self.criteria
    }

    /// Promote `type_name`. Never returns an error; failures are reported in the result and audited.
    pub fn promote(&self, type_name: &str) -> PromotionResult {
        info!("Starting promotion of '{}'", type_name);

        let mut attempt = Attempt::new(type_name);
        let outcome = self.run(&mut attempt);
        self.finalize(attempt, outcome)
    }

    fn check_cancelled(&self, next_step: &'static str) -> Result<()> {
        match self.cancelled {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(PromotionError::Cancelled(next_step)),
            _ => Ok(()),
        }
    }

    /// Refuse a type whose table already belongs to a different, successfully promoted type
    fn ensure_table_unclaimed(&self, type_name: &str) -> Result<()> {
        let table = self.generator.renderer().table_name(type_name)?;
        let owner = self
            .db
            .list_schema_promotions(None)?
            .into_iter()
            .filter(|p| p.status == PromotionStatus::Success && p.type_name != type_name)
            .find(|p| {
                self.generator
                    .renderer()
                    .table_name(&p.type_name)
                    .is_ok_and(|t| t == table)
            });

        match owner {
            Some(previous) => Err(PromotionError::Generation(format!(
                "table '{}' already holds promoted type '{}'",
                table, previous.type_name
            ))),
            None => Ok(()),
        }
    }

    fn run(&self, attempt: &mut Attempt) -> Result<()> {
        let inferrer = SchemaInferrer::from_criteria(&self.criteria);
        let schema = attempt
            .schema
            .insert(inferrer.infer_from_store(self.db, &attempt.type_name)?);

        self.check_cancelled("artifact generation")?;
        self.ensure_table_unclaimed(&attempt.type_name)?;
        let artifact = self.generator.generate(schema)?;
        attempt.schema_path = Some(artifact.path.clone());
        attempt.stage = PromotionStage::SchemaGenerated;

        self.check_cancelled("bindings regeneration")?;
        self.tooling.regenerate_bindings(&artifact.path)?;
        attempt.stage = PromotionStage::BindingsRebuilt;

        self.check_cancelled("storage migration")?;
        self.tooling.migrate_structure(&artifact.path)?;
        attempt.stage = PromotionStage::StorageMigrated;

        let entities = self.db.list_entities_by_type(&attempt.type_name, None)?;
        attempt.validation_failures = count_validation_failures(schema, &entities);
        if attempt.validation_failures > 0 {
            warn!(
                "{} of {} '{}' entities are missing required properties and will not be copied",
                attempt.validation_failures,
                entities.len(),
                attempt.type_name
            );
        }
        attempt.stage = PromotionStage::Validated;

        self.check_cancelled("data copy")?;
        match self.writer.filter(|_| self.criteria.copy_data) {
            Some(writer) => {
                let rows = build_typed_rows(schema, &entities);
                attempt.entities_migrated = writer
                    .insert_typed_rows(&artifact.table_name, &rows, self.cancelled)
                    .map_err(|e| match e {
                        StoreError::Cancelled { .. } => PromotionError::Cancelled("data copy commit"),
                        other => PromotionError::DataCopy(other),
                    })?;
                info!(
                    "Copied {} '{}' entities into {}",
                    attempt.entities_migrated, attempt.type_name, artifact.table_name
                );
            }
            None => {
                attempt.entities_migrated = entities.len() as u64;
                attempt.manual_migration_pending = true;
                info!(
                    "{} '{}' entities ready for manual migration into {}",
                    attempt.entities_migrated, attempt.type_name, artifact.table_name
                );
            }
        }
        attempt.stage = PromotionStage::DataCopied;

        Ok(())
    }

    /// Write the audit record for the attempt and build the caller's result
    fn finalize(&self, mut attempt: Attempt, outcome: Result<()>) -> PromotionResult {
        let mut failure = outcome.err().map(|e| {
            error!(
                "Promotion of '{}' failed after stage {}: {}",
                attempt.type_name,
                attempt.stage.as_str(),
                e
            );
            e.to_string()
        });

        let record = SchemaPromotion {
            id: generate_promotion_id(),
            type_name: attempt.type_name.clone(),
            promoted_at: Utc::now().to_rfc3339(),
            promotion_criteria: self.criteria.clone(),
            entities_affected: attempt.entities_migrated,
            validation_failures: attempt.validation_failures,
            schema_definition: attempt.schema.take(),
            status: if failure.is_none() {
                PromotionStatus::Success
            } else {
                PromotionStatus::Failed
            },
            error: failure.clone(),
        };

        let audit_id = match self.db.insert_schema_promotion(&record) {
            Ok(()) => Some(record.id),
            Err(e) => {
                error!(
                    "Could not record promotion of '{}': {}",
                    attempt.type_name, e
                );
                let message = format!("audit record not written: {}", e);
                failure = Some(match failure {
                    Some(previous) => format!("{}; {}", previous, message),
                    None => message,
                });
                None
            }
        };

        if failure.is_none() {
            attempt.stage = PromotionStage::Audited;
            info!(
                "Promoted '{}' ({} entities, {} validation failures)",
                attempt.type_name, attempt.entities_migrated, attempt.validation_failures
            );
        }

        PromotionResult {
            success: failure.is_none(),
            schema_path: attempt.schema_path,
            entities_migrated: attempt.entities_migrated,
            validation_errors: attempt.validation_failures,
            error: failure,
            stage: attempt.stage,
            manual_migration_pending: attempt.manual_migration_pending,
            audit_id,
        }
    }
}

/// Entities lacking at least one required property; a null value counts as missing
pub fn count_validation_failures(schema: &SchemaDefinition, entities: &[DiscoveredEntity]) -> u64 {
    let required: Vec<&str> = schema.required_properties().collect();
    entities
        .iter()
        .filter(|entity| is_missing_required(&required, entity))
        .count() as u64
}

fn is_missing_required(required: &[&str], entity: &DiscoveredEntity) -> bool {
    required
        .iter()
        .any(|name| entity.properties.get(*name).map_or(true, |v| v.is_null()))
}

/// One insert per entity, restricted to properties that are both in the schema and on the entity.
///
/// Entities missing a required property cannot satisfy the table's NOT NULL
/// columns; they are left out of the copy and stay in the discovery store.
pub fn build_typed_rows(schema: &SchemaDefinition, entities: &[DiscoveredEntity]) -> Vec<TypedRow> {
    let required: Vec<&str> = schema.required_properties().collect();
    entities
        .iter()
        .filter(|entity| {
            let complete = !is_missing_required(&required, entity);
            if !complete {
                debug!("Leaving {} out of the copy: required property missing", entity.unique_id);
            }
            complete
        })
        .map(|entity| TypedRow {
            source_id: entity.unique_id.clone(),
            columns: schema
                .properties
                .keys()
                .filter_map(|name| {
                    entity
                        .properties
                        .get(name)
                        .map(|value| (name.clone(), value.clone()))
                })
                .collect(),
        })
        .collect()
}
