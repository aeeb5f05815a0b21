use chrono::Utc;
use rusqlite::types::{Type, Value};
use rusqlite::{params, Connection, InterruptHandle, OptionalExtension, Row};
use schema_evolution_schemas::{
    generate_entity_unique_id, DiscoveredEntity, EntityRef, NewDiscoveredEntity, PromotionId,
    PromotionStatus, PropertyMap, PropertyValue, Relationship, SchemaPromotion,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

/// Tables owned by the store itself; promoted types may never reuse these names.
pub const RESERVED_TABLES: &[&str] = &[
    "discovered_entities",
    "relationships",
    "schema_promotions",
    "sqlite_sequence",
];

const ENTITY_COLUMNS: &str =
    "id, unique_id, type_category, name, properties, embedding, confidence, created_at";

const PROMOTION_COLUMNS: &str = "id, type_name, promoted_at, promotion_criteria, entities_affected,
     validation_failures, schema_definition, status, error";

/// One synthetic insert against a promoted table.
#[derive(Debug, Clone)]
pub struct TypedRow {
    /// Unique id of the discovered entity the row was built from.
    pub source_id: String,
    pub columns: Vec<(String, PropertyValue)>,
}

/// Capability to write rows into promoted tables.
///
/// All rows of one call land in a single transaction: either every row is
/// committed or none is. When `cancelled` is raised before the commit, the
/// call fails with [`StoreError::Cancelled`] and nothing is written.
pub trait RawWriter {
    fn insert_typed_rows(
        &self,
        table: &str,
        rows: &[TypedRow],
        cancelled: Option<&AtomicBool>,
    ) -> Result<u64>;
}

fn is_raised(flag: Option<&AtomicBool>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::SeqCst))
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the store and make sure the base tables exist
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;

        let db = Self { conn, path };
        db.init_schema()?;

        info!("Entity store initialized at {}", db.path.display());
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle that can abort whatever statement is currently running on this connection
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Loosely typed records written by the extraction pipeline
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS discovered_entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unique_id TEXT NOT NULL UNIQUE,
                type_category TEXT NOT NULL,
                name TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                embedding TEXT,
                confidence REAL NOT NULL DEFAULT 1.0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_discovered_entities_type
             ON discovered_entities(type_category)",
            [],
        )?;

        // Typed edges; endpoints are (kind, id) pairs
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                relationship_type TEXT NOT NULL,
                from_kind TEXT NOT NULL,
                from_id INTEGER NOT NULL,
                to_kind TEXT NOT NULL,
                to_id INTEGER NOT NULL,
                confidence REAL NOT NULL DEFAULT 1.0,
                properties TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Insert-only history of promotion attempts
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_promotions (
                id TEXT PRIMARY KEY,
                type_name TEXT NOT NULL,
                promoted_at TEXT NOT NULL,
                promotion_criteria TEXT NOT NULL,
                entities_affected INTEGER NOT NULL DEFAULT 0 CHECK (entities_affected >= 0),
                validation_failures INTEGER NOT NULL DEFAULT 0 CHECK (validation_failures >= 0),
                schema_definition TEXT,
                status TEXT NOT NULL,
                error TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_schema_promotions_type
             ON schema_promotions(type_name, promoted_at DESC)",
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // Discovered entities
    // ========================================================================

    /// Insert a discovered entity; mostly used by import tooling and tests
    pub fn insert_discovered_entity(&self, entity: &NewDiscoveredEntity) -> Result<DiscoveredEntity> {
        if !(0.0..=1.0).contains(&entity.confidence) {
            return Err(StoreError::InvalidRecord(format!(
                "confidence {} for '{}' is outside [0, 1]",
                entity.confidence, entity.name
            )));
        }
        if entity.type_category.trim().is_empty() {
            return Err(StoreError::InvalidRecord(format!(
                "entity '{}' has an empty type category",
                entity.name
            )));
        }

        let unique_id = entity
            .unique_id
            .clone()
            .unwrap_or_else(generate_entity_unique_id);
        let properties_json = serde_json::to_string(&entity.properties)?;
        let embedding_json = entity
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let created_at = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO discovered_entities (unique_id, type_category, name, properties,
                                              embedding, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                unique_id,
                entity.type_category,
                entity.name,
                properties_json,
                embedding_json,
                entity.confidence,
                created_at,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(
            "Inserted discovered entity {} ({}) as row {}",
            unique_id, entity.type_category, id
        );

        Ok(DiscoveredEntity {
            id,
            unique_id,
            type_category: entity.type_category.clone(),
            name: entity.name.clone(),
            properties: entity.properties.clone(),
            embedding: entity.embedding.clone(),
            confidence: entity.confidence,
            created_at,
        })
    }

    fn row_to_entity(row: &Row) -> rusqlite::Result<DiscoveredEntity> {
        let unique_id: String = row.get(1)?;
        let properties_json: String = row.get(4)?;
        let properties: PropertyMap =
            serde_json::from_str(&properties_json).map_err(|e| json_error(4, e))?;

        // A broken embedding only removes the entity from clustering
        let embedding = match row.get::<_, Option<String>>(5)? {
            Some(raw) => match serde_json::from_str::<Vec<f32>>(&raw) {
                Ok(vector) => Some(vector),
                Err(e) => {
                    debug!("Ignoring malformed embedding on {}: {}", unique_id, e);
                    None
                }
            },
            None => None,
        };

        Ok(DiscoveredEntity {
            id: row.get(0)?,
            unique_id,
            type_category: row.get(2)?,
            name: row.get(3)?,
            properties,
            embedding,
            confidence: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    /// All discovered entities in insertion order
    pub fn list_discovered_entities(&self) -> Result<Vec<DiscoveredEntity>> {
        let sql = format!("SELECT {} FROM discovered_entities ORDER BY id ASC", ENTITY_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map([], Self::row_to_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    /// Entities carrying exactly this type label, optionally capped
    pub fn list_entities_by_type(
        &self,
        type_category: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DiscoveredEntity>> {
        let sql = format!(
            "SELECT {} FROM discovered_entities WHERE type_category = ?1 ORDER BY id ASC LIMIT ?2",
            ENTITY_COLUMNS
        );
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map(params![type_category, limit], Self::row_to_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    pub fn count_entities_by_type(&self, type_category: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM discovered_entities WHERE type_category = ?1",
            params![type_category],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_discovered_entities(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM discovered_entities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    pub fn insert_relationship(
        &self,
        relationship_type: &str,
        from: &EntityRef,
        to: &EntityRef,
        confidence: f64,
        properties: &PropertyMap,
    ) -> Result<i64> {
        let properties_json = serde_json::to_string(properties)?;

        self.conn.execute(
            "INSERT INTO relationships (relationship_type, from_kind, from_id, to_kind, to_id,
                                        confidence, properties, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                relationship_type,
                from.kind,
                from.id,
                to.kind,
                to.id,
                confidence,
                properties_json,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_relationships(&self) -> Result<Vec<Relationship>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, relationship_type, from_kind, from_id, to_kind, to_id,
                    confidence, properties, created_at
             FROM relationships
             ORDER BY id ASC",
        )?;

        let relationships = stmt
            .query_map([], |row| {
                let properties_json: String = row.get(7)?;
                Ok(Relationship {
                    id: row.get(0)?,
                    relationship_type: row.get(1)?,
                    from: EntityRef {
                        kind: row.get(2)?,
                        id: row.get(3)?,
                    },
                    to: EntityRef {
                        kind: row.get(4)?,
                        id: row.get(5)?,
                    },
                    confidence: row.get(6)?,
                    properties: serde_json::from_str(&properties_json)
                        .map_err(|e| json_error(7, e))?,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(relationships)
    }

    // ========================================================================
    // Promoted tables
    // ========================================================================

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Column names of a table, in declaration order
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let query = format!("PRAGMA table_info({})", quote_identifier(table));
        let mut stmt = self.conn.prepare(&query)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // Promotion audit
    // ========================================================================

    /// Append one audit record. There is deliberately no update or delete.
    pub fn insert_schema_promotion(&self, record: &SchemaPromotion) -> Result<()> {
        let criteria_json = serde_json::to_string(&record.promotion_criteria)?;
        let schema_json = record
            .schema_definition
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO schema_promotions (id, type_name, promoted_at, promotion_criteria,
                                            entities_affected, validation_failures,
                                            schema_definition, status, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.0,
                record.type_name,
                record.promoted_at,
                criteria_json,
                record.entities_affected as i64,
                record.validation_failures as i64,
                schema_json,
                record.status.as_str(),
                record.error,
            ],
        )?;

        info!(
            "Recorded {} promotion of '{}' ({})",
            record.status.as_str(),
            record.type_name,
            record.id
        );
        Ok(())
    }

    fn row_to_promotion(row: &Row) -> rusqlite::Result<SchemaPromotion> {
        let criteria_json: String = row.get(3)?;
        let schema_json: Option<String> = row.get(6)?;
        let status_raw: String = row.get(7)?;

        let schema_definition = schema_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| json_error(6, e))?;

        Ok(SchemaPromotion {
            id: PromotionId(row.get(0)?),
            type_name: row.get(1)?,
            promoted_at: row.get(2)?,
            promotion_criteria: serde_json::from_str(&criteria_json)
                .map_err(|e| json_error(3, e))?,
            entities_affected: row.get::<_, i64>(4)? as u64,
            validation_failures: row.get::<_, i64>(5)? as u64,
            schema_definition,
            status: parse_promotion_status(&status_raw),
            error: row.get(8)?,
        })
    }

    /// Promotion history, newest first
    pub fn list_schema_promotions(&self, type_name: Option<&str>) -> Result<Vec<SchemaPromotion>> {
        let sql = format!(
            "SELECT {} FROM schema_promotions
             WHERE ?1 IS NULL OR type_name = ?1
             ORDER BY promoted_at DESC, id DESC",
            PROMOTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![type_name], Self::row_to_promotion)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count_schema_promotions(&self, type_name: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM schema_promotions WHERE type_name = ?1",
            params![type_name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl RawWriter for Database {
    fn insert_typed_rows(
        &self,
        table: &str,
        rows: &[TypedRow],
        cancelled: Option<&AtomicBool>,
    ) -> Result<u64> {
        // Dropping the transaction without commit rolls every row back
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0u64;

        for row in rows {
            if is_raised(cancelled) {
                warn!("Copy into {} cancelled after {} rows, rolling back", table, inserted);
                return Err(StoreError::Cancelled {
                    table: table.to_string(),
                });
            }

            let sql = if row.columns.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(table))
            } else {
                let names: Vec<String> = row
                    .columns
                    .iter()
                    .map(|(name, _)| quote_identifier(name))
                    .collect();
                let placeholders: Vec<String> =
                    (1..=row.columns.len()).map(|i| format!("?{}", i)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_identifier(table),
                    names.join(", "),
                    placeholders.join(", ")
                )
            };

            let values: Vec<Value> = row.columns.iter().map(|(_, v)| to_sql_value(v)).collect();

            let mut stmt = tx.prepare_cached(&sql).map_err(|source| StoreError::RowInsert {
                table: table.to_string(),
                entity: row.source_id.clone(),
                source,
            })?;
            stmt.execute(rusqlite::params_from_iter(values.iter()))
                .map_err(|source| {
                    warn!("Typed insert into {} failed for {}: {}", table, row.source_id, source);
                    StoreError::RowInsert {
                        table: table.to_string(),
                        entity: row.source_id.clone(),
                        source,
                    }
                })?;
            inserted += 1;
        }

        if is_raised(cancelled) {
            warn!("Copy into {} cancelled before commit, rolling back", table);
            return Err(StoreError::Cancelled {
                table: table.to_string(),
            });
        }

        tx.commit()?;
        debug!("Committed {} typed rows into {}", inserted, table);
        Ok(inserted)
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Null => Value::Null,
        PropertyValue::Bool(b) => Value::Integer(i64::from(*b)),
        PropertyValue::Integer(i) => Value::Integer(*i),
        PropertyValue::Number(f) => Value::Real(*f),
        PropertyValue::String(s) => Value::Text(s.clone()),
        PropertyValue::Structured(json) => Value::Text(json.to_string()),
    }
}

fn json_error(column: usize, err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn parse_promotion_status(raw: &str) -> PromotionStatus {
    match raw {
        "success" => PromotionStatus::Success,
        _ => PromotionStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_evolution_schemas::{generate_promotion_id, PromotionCriteria, SchemaDefinition};
    use tempfile::NamedTempFile;

    fn person(name: &str, properties: serde_json::Value) -> NewDiscoveredEntity {
        NewDiscoveredEntity {
            unique_id: None,
            type_category: "Person".to_string(),
            name: name.to_string(),
            properties: serde_json::from_value(properties).unwrap(),
            embedding: Some(vec![0.1, 0.2, 0.3]),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_database_creation() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        assert_eq!(db.count_discovered_entities().unwrap(), 0);
        assert!(db.table_exists("discovered_entities").unwrap());
        assert!(db.table_exists("relationships").unwrap());
        assert!(db.table_exists("schema_promotions").unwrap());
        assert!(!db.table_exists("person").unwrap());
    }

    #[test]
    fn test_entity_insert_and_retrieve() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let inserted = db
            .insert_discovered_entity(&person("Ada", serde_json::json!({"email": "ada@example.com", "age": 36})))
            .unwrap();
        db.insert_discovered_entity(&NewDiscoveredEntity {
            type_category: "Company".to_string(),
            ..person("Acme", serde_json::json!({}))
        })
        .unwrap();

        let people = db.list_entities_by_type("Person", None).unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].unique_id, inserted.unique_id);
        assert_eq!(people[0].properties["age"], PropertyValue::Integer(36));
        assert_eq!(people[0].embedding.as_deref(), Some(&[0.1, 0.2, 0.3][..]));
        assert_eq!(db.count_entities_by_type("Company").unwrap(), 1);
        assert_eq!(db.list_discovered_entities().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_unique_id_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let mut entity = person("Ada", serde_json::json!({}));
        entity.unique_id = Some("ent_fixed".to_string());
        db.insert_discovered_entity(&entity).unwrap();

        assert!(db.insert_discovered_entity(&entity).is_err());
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let mut entity = person("Ada", serde_json::json!({}));
        entity.confidence = 1.5;
        let err = db.insert_discovered_entity(&entity).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
    }

    #[test]
    fn test_list_entities_respects_limit() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        for i in 0..5 {
            db.insert_discovered_entity(&person(&format!("p{}", i), serde_json::json!({})))
                .unwrap();
        }

        assert_eq!(db.list_entities_by_type("Person", Some(3)).unwrap().len(), 3);
        assert_eq!(db.list_entities_by_type("Person", None).unwrap().len(), 5);
    }

    #[test]
    fn test_malformed_embedding_is_skipped() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let entity = db
            .insert_discovered_entity(&person("Ada", serde_json::json!({})))
            .unwrap();
        db.conn
            .execute(
                "UPDATE discovered_entities SET embedding = 'not-a-vector' WHERE id = ?1",
                params![entity.id],
            )
            .unwrap();

        let loaded = db.list_discovered_entities().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].embedding.is_none());
    }

    #[test]
    fn test_relationship_round_trip() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let a = db.insert_discovered_entity(&person("Ada", serde_json::json!({}))).unwrap();
        let b = db.insert_discovered_entity(&person("Bob", serde_json::json!({}))).unwrap();

        db.insert_relationship(
            "knows",
            &EntityRef::discovered(a.id),
            &EntityRef::discovered(b.id),
            0.8,
            &PropertyMap::new(),
        )
        .unwrap();

        let relationships = db.list_relationships().unwrap();
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].from, EntityRef::discovered(a.id));
        assert!(relationships[0].to.is_discovered_entity());
    }

    #[test]
    fn test_typed_rows_are_all_or_nothing() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        db.conn
            .execute(
                "CREATE TABLE \"person\" (_id INTEGER PRIMARY KEY AUTOINCREMENT, \"email\" TEXT NOT NULL)",
                [],
            )
            .unwrap();

        let good = TypedRow {
            source_id: "ent_1".to_string(),
            columns: vec![("email".to_string(), PropertyValue::from("a@example.com"))],
        };
        let bad = TypedRow {
            source_id: "ent_2".to_string(),
            columns: vec![("email".to_string(), PropertyValue::Null)],
        };

        let err = db
            .insert_typed_rows("person", &[good.clone(), bad], None)
            .unwrap_err();
        assert!(matches!(err, StoreError::RowInsert { ref entity, .. } if entity == "ent_2"));
        assert_eq!(db.count_rows("person").unwrap(), 0);

        assert_eq!(db.insert_typed_rows("person", &[good], None).unwrap(), 1);
        assert_eq!(db.count_rows("person").unwrap(), 1);
    }

    #[test]
    fn test_cancelled_copy_writes_nothing() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        db.conn
            .execute(
                "CREATE TABLE \"person\" (_id INTEGER PRIMARY KEY AUTOINCREMENT, \"email\" TEXT)",
                [],
            )
            .unwrap();

        let rows: Vec<TypedRow> = (0..3)
            .map(|i| TypedRow {
                source_id: format!("ent_{}", i),
                columns: vec![(
                    "email".to_string(),
                    PropertyValue::from(format!("p{}@example.com", i)),
                )],
            })
            .collect();

        let cancelled = AtomicBool::new(true);
        let err = db
            .insert_typed_rows("person", &rows, Some(&cancelled))
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled { ref table } if table == "person"));
        assert_eq!(db.count_rows("person").unwrap(), 0);

        // A lowered flag behaves like no flag
        cancelled.store(false, Ordering::SeqCst);
        assert_eq!(
            db.insert_typed_rows("person", &rows, Some(&cancelled)).unwrap(),
            3
        );
        assert_eq!(db.count_rows("person").unwrap(), 3);
    }

    #[test]
    fn test_schema_promotion_history() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let record = SchemaPromotion {
            id: generate_promotion_id(),
            type_name: "Person".to_string(),
            promoted_at: Utc::now().to_rfc3339(),
            promotion_criteria: PromotionCriteria::default(),
            entities_affected: 3,
            validation_failures: 1,
            schema_definition: Some(SchemaDefinition::new("Person")),
            status: PromotionStatus::Success,
            error: None,
        };
        db.insert_schema_promotion(&record).unwrap();

        let failed = SchemaPromotion {
            id: generate_promotion_id(),
            schema_definition: None,
            status: PromotionStatus::Failed,
            error: Some("boom".to_string()),
            ..record.clone()
        };
        db.insert_schema_promotion(&failed).unwrap();

        assert_eq!(db.count_schema_promotions("Person").unwrap(), 2);
        assert_eq!(db.list_schema_promotions(Some("Company")).unwrap().len(), 0);

        let history = db.list_schema_promotions(None).unwrap();
        assert_eq!(history.len(), 2);
        let restored = history.iter().find(|r| r.id == record.id).unwrap();
        assert_eq!(restored.entities_affected, 3);
        assert_eq!(restored.validation_failures, 1);
        assert_eq!(restored.schema_definition, record.schema_definition);
        let restored_failed = history.iter().find(|r| r.id == failed.id).unwrap();
        assert_eq!(restored_failed.status, PromotionStatus::Failed);
        assert_eq!(restored_failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("person"), "\"person\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
