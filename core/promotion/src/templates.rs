use regex::Regex;
use rusqlite::Connection;
use schema_evolution_schemas::{PropertyDefinition, PropertyType, SchemaDefinition, ValidationRule};
use schema_evolution_store::{quote_identifier, RESERVED_TABLES};

use crate::error::{PromotionError, Result};

/// Synthetic primary key present in every promoted table
pub const PRIMARY_KEY_COLUMN: &str = "_id";

/// SQLite GLOB used as the email format constraint
const EMAIL_PATTERN: &str = "*?@?*.?*";

/// DDL for one promoted type, not yet written anywhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub table_name: String,
    pub file_name: String,
    pub ddl: String,
}

/// Renders schema definitions into SQLite schema artifacts
pub struct ArtifactRenderer {
    invalid_chars: Regex,
}

impl ArtifactRenderer {
    pub fn new() -> Self {
        Self {
            invalid_chars: Regex::new(r"[^a-z0-9_]").expect("static pattern compiles"),
        }
    }

    /// Table (and file stem) for a type label: lower-cased, anything outside `[a-z0-9_]` becomes `_`
    pub fn table_name(&self, type_name: &str) -> Result<String> {
        let lowered = type_name.trim().to_lowercase();
        let table = self.invalid_chars.replace_all(&lowered, "_").into_owned();

        if table.trim_matches('_').is_empty() {
            return Err(PromotionError::Generation(format!(
                "type name '{}' does not yield a usable table name",
                type_name
            )));
        }
        if table.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(PromotionError::Generation(format!(
                "table name '{}' for type '{}' starts with a digit",
                table, type_name
            )));
        }
        if table.starts_with("sqlite_") || RESERVED_TABLES.contains(&table.as_str()) {
            return Err(PromotionError::Generation(format!(
                "table name '{}' for type '{}' is reserved by the store",
                table, type_name
            )));
        }

        Ok(table)
    }

    /// Render and syntax-check the artifact for one schema
    pub fn render(&self, schema: &SchemaDefinition) -> Result<RenderedArtifact> {
        let table_name = self.table_name(&schema.type_name)?;

        let mut columns = vec![format!(
            "    {} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_identifier(PRIMARY_KEY_COLUMN)
        )];
        for (name, definition) in &schema.properties {
            columns.push(format!("    {}", self.render_column(name, definition)?));
        }

        let ddl = format!(
            "-- Schema artifact for discovered type \"{}\".\n\
             -- Generated by schema-evolution; regenerated on every promotion of this type.\n\
             CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
            schema.type_name.escape_debug(),
            quote_identifier(&table_name),
            columns.join(",\n")
        );

        validate_ddl(&ddl)?;

        Ok(RenderedArtifact {
            file_name: format!("{}.sql", table_name),
            table_name,
            ddl,
        })
    }

    fn render_column(&self, name: &str, definition: &PropertyDefinition) -> Result<String> {
        if name.is_empty() || name.chars().any(char::is_control) {
            return Err(PromotionError::Generation(format!(
                "property name {:?} cannot be used as a column",
                name
            )));
        }
        if name.eq_ignore_ascii_case(PRIMARY_KEY_COLUMN) {
            return Err(PromotionError::Generation(format!(
                "property '{}' collides with the synthetic primary key",
                name
            )));
        }

        let column = quote_identifier(name);
        let mut parts = vec![column.clone(), native_type(&definition.data_type).to_string()];

        if definition.required {
            parts.push("NOT NULL".to_string());
        }
        if definition.data_type == PropertyType::Boolean {
            parts.push(format!("CHECK ({} IN (0, 1))", column));
        }
        for rule in &definition.validation {
            parts.push(render_constraint(&column, name, rule)?);
        }

        Ok(parts.join(" "))
    }
}

impl Default for ArtifactRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Column type in SQLite's vocabulary; unrecognised types fall back to TEXT
pub fn native_type(data_type: &PropertyType) -> &'static str {
    match data_type {
        PropertyType::String => "TEXT",
        PropertyType::Integer => "INTEGER",
        PropertyType::Number => "REAL",
        PropertyType::Boolean => "INTEGER",
        PropertyType::Unknown(_) => "TEXT",
    }
}

fn render_constraint(column: &str, name: &str, rule: &ValidationRule) -> Result<String> {
    match rule {
        ValidationRule::Format(format) if format == "email" => {
            Ok(format!("CHECK ({} GLOB '{}')", column, EMAIL_PATTERN))
        }
        ValidationRule::Format(other) => Err(PromotionError::Generation(format!(
            "unsupported format '{}' on property '{}'",
            other, name
        ))),
        ValidationRule::MinLength(n) => Ok(format!("CHECK (length({}) >= {})", column, n)),
        ValidationRule::MaxLength(n) => Ok(format!("CHECK (length({}) <= {})", column, n)),
        ValidationRule::Minimum(n) => Ok(format!("CHECK ({} >= {})", column, n)),
    }
}

/// Execute the DDL against a throwaway in-memory database
fn validate_ddl(ddl: &str) -> Result<()> {
    let conn = Connection::open_in_memory()
        .map_err(|e| PromotionError::Generation(format!("cannot open validation database: {}", e)))?;
    conn.execute_batch(ddl)
        .map_err(|e| PromotionError::Generation(format!("artifact failed syntax validation: {}", e)))
}
