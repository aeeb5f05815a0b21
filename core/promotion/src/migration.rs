//! External tooling invoked between artifact generation and data copy.
//!
//! Two steps are delegated: regenerating any bindings derived from the
//! schema artifacts, and applying the artifact to the live database. Both
//! are configured as argv vectors in which `{artifact}` and `{database}` are
//! replaced before the command runs.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::error::{PromotionError, Result};

const ARTIFACT_PLACEHOLDER: &str = "{artifact}";
const DATABASE_PLACEHOLDER: &str = "{database}";

/// Structural steps of a promotion that live outside this process by default
pub trait SchemaTooling {
    /// Rebuild whatever is generated from the schema artifacts
    fn regenerate_bindings(&self, artifact: &Path) -> Result<()>;

    /// Make the storage structure described by `artifact` exist
    fn migrate_structure(&self, artifact: &Path) -> Result<()>;
}

/// Runs operator-configured commands for each tooling step
pub struct CommandTooling {
    database_path: PathBuf,
    bindings_command: Vec<String>,
    migrate_command: Vec<String>,
}

impl CommandTooling {
    pub fn new<P: AsRef<Path>>(
        database_path: P,
        bindings_command: Vec<String>,
        migrate_command: Vec<String>,
    ) -> Self {
        Self {
            database_path: database_path.as_ref().to_path_buf(),
            bindings_command,
            migrate_command,
        }
    }

    fn substitute(&self, argv: &[String], artifact: &Path) -> Vec<String> {
        let artifact = artifact.to_string_lossy();
        let database = self.database_path.to_string_lossy();
        argv.iter()
            .map(|arg| {
                arg.replace(ARTIFACT_PLACEHOLDER, &artifact)
                    .replace(DATABASE_PLACEHOLDER, &database)
            })
            .collect()
    }

    fn run(&self, step: &'static str, argv: &[String], artifact: &Path) -> Result<()> {
        let argv = self.substitute(argv, artifact);
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };

        debug!("{}: running {:?}", step, argv);
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| PromotionError::Tooling {
                step,
                message: format!("could not start '{}': {}", program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("{} exited with {}: {}", step, output.status, stderr);
            return Err(PromotionError::Tooling {
                step,
                message: format!("'{}' exited with {}: {}", program, output.status, stderr),
            });
        }

        Ok(())
    }
}

impl SchemaTooling for CommandTooling {
    fn regenerate_bindings(&self, artifact: &Path) -> Result<()> {
        if self.bindings_command.is_empty() {
            debug!("No bindings command configured, nothing to regenerate");
            return Ok(());
        }
        self.run("Bindings regeneration", &self.bindings_command, artifact)?;
        info!("Regenerated bindings for {}", artifact.display());
        Ok(())
    }

    fn migrate_structure(&self, artifact: &Path) -> Result<()> {
        if !self.migrate_command.is_empty() {
            self.run("Storage migration", &self.migrate_command, artifact)?;
            info!("Applied {} with external migration tool", artifact.display());
            return Ok(());
        }

        apply_artifact(&self.database_path, artifact)
    }
}

/// Apply an artifact in-process on a fresh connection, inside one transaction
pub fn apply_artifact(database_path: &Path, artifact: &Path) -> Result<()> {
    let ddl = fs::read_to_string(artifact)?;

    let migration_error = |e: rusqlite::Error| PromotionError::Tooling {
        step: "Storage migration",
        message: e.to_string(),
    };

    let mut conn = Connection::open(database_path).map_err(migration_error)?;
    let tx = conn.transaction().map_err(migration_error)?;
    tx.execute_batch(&ddl).map_err(migration_error)?;
    tx.commit().map_err(migration_error)?;

    info!(
        "Applied {} to {}",
        artifact.display(),
        database_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_evolution_store::Database;
    use tempfile::TempDir;

    fn write_artifact(dir: &Path) -> PathBuf {
        let path = dir.join("person.sql");
        fs::write(
            &path,
            "CREATE TABLE IF NOT EXISTS \"person\" (\"_id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"name\" TEXT NOT NULL);\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_empty_commands_apply_in_process() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");
        let db = Database::new(&db_path).unwrap();
        let artifact = write_artifact(temp_dir.path());

        let tooling = CommandTooling::new(&db_path, Vec::new(), Vec::new());
        tooling.regenerate_bindings(&artifact).unwrap();
        tooling.migrate_structure(&artifact).unwrap();

        // The long-lived handle sees the table created on the fresh connection
        assert!(db.table_exists("person").unwrap());
        assert_eq!(db.table_columns("person").unwrap(), vec!["_id", "name"]);

        // Applying twice is harmless
        tooling.migrate_structure(&artifact).unwrap();
    }

    #[test]
    fn test_placeholders_are_substituted() {
        let tooling = CommandTooling::new("/data/store.db", Vec::new(), Vec::new());
        let argv = vec![
            "sqlite3".to_string(),
            "{database}".to_string(),
            ".read {artifact}".to_string(),
        ];

        let resolved = tooling.substitute(&argv, Path::new("/out/person.sql"));
        assert_eq!(resolved, vec!["sqlite3", "/data/store.db", ".read /out/person.sql"]);
    }

    #[test]
    fn test_broken_artifact_fails_migration() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");
        let artifact = temp_dir.path().join("broken.sql");
        fs::write(&artifact, "CREATE TABLE (").unwrap();

        let err = apply_artifact(&db_path, &artifact).unwrap_err();
        assert!(matches!(err, PromotionError::Tooling { step: "Storage migration", .. }));
    }

    #[test]
    fn test_missing_program_is_a_tooling_error() {
        let temp_dir = TempDir::new().unwrap();
        let tooling = CommandTooling::new(
            temp_dir.path().join("store.db"),
            vec!["schema-evolution-no-such-binary".to_string()],
            Vec::new(),
        );

        let err = tooling.regenerate_bindings(Path::new("person.sql")).unwrap_err();
        assert!(matches!(err, PromotionError::Tooling { ref message, .. } if message.contains("could not start")));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exit_status_is_checked() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = write_artifact(temp_dir.path());

        let ok = CommandTooling::new(
            temp_dir.path().join("store.db"),
            vec!["true".to_string()],
            vec!["sh".to_string(), "-c".to_string(), "test -f \"$0\"".to_string(), "{artifact}".to_string()],
        );
        ok.regenerate_bindings(&artifact).unwrap();
        ok.migrate_structure(&artifact).unwrap();

        let failing = CommandTooling::new(
            temp_dir.path().join("store.db"),
            vec!["sh".to_string(), "-c".to_string(), "echo codegen broke >&2; exit 3".to_string()],
            Vec::new(),
        );
        let err = failing.regenerate_bindings(&artifact).unwrap_err();
        match err {
            PromotionError::Tooling { step, message } => {
                assert_eq!(step, "Bindings regeneration");
                assert!(message.contains("codegen broke"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
