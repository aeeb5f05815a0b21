/// Schema Evolution CLI - promote stable discovered types into typed storage
///
/// Usage:
///   schema-evolution [--db-path <path>] [--config <file>] <command>
///
/// Commands:
///   analyze   Rank discovered type labels as promotion candidates
///   clusters  Group entities of each type by embedding similarity
///   infer     Show the schema that would be inferred for a type
///   promote   Generate, migrate and copy a type into its own table
///   history   List recorded promotion attempts
///   import    Load discovered entities and relationships from a JSON file
///
/// Configuration is read from `schema-evolution.toml` and `SCHEMA_EVOLUTION_*`
/// environment variables; command line flags take precedence.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use schema_evolution_analysis::{
    analyze_candidates, PatternDetector, SchemaInferrer, SimilarityClusterer,
};
use schema_evolution_promotion::{
    ArtifactGenerator, CommandTooling, EvolutionConfig, PromotionOrchestrator,
};
use schema_evolution_schemas::{EntityRef, NewDiscoveredEntity, PromotionResult};
use schema_evolution_store::Database;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "schema-evolution")]
#[command(about = "Detect stable discovered entity types and promote them into typed storage")]
#[command(version)]
struct Args {
    /// Path to SQLite database file
    #[arg(long, short, global = true)]
    db_path: Option<PathBuf>,

    /// Configuration file (defaults to ./schema-evolution.toml when present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Directory receiving generated schema artifacts
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rank discovered type labels as promotion candidates
    Analyze {
        #[arg(long)]
        min_occurrences: Option<usize>,
        #[arg(long)]
        min_consistency: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Group entities of each type by embedding similarity
    Clusters {
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        min_members: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Show the schema that would be inferred for a type
    Infer {
        type_name: String,
        /// Print a JSON Schema document instead of the internal definition
        #[arg(long)]
        json_schema: bool,
    },

    /// Promote a discovered type into its own typed table
    Promote {
        type_name: String,
        /// Count entities but leave the copy to a manual migration
        #[arg(long)]
        no_copy: bool,
        /// Wall-clock budget in seconds, 0 disables the limit
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Free-form note stored with the audit record
        #[arg(long)]
        note: Option<String>,
    },

    /// List recorded promotion attempts, newest first
    History {
        #[arg(long = "type")]
        type_name: Option<String>,
    },

    /// Load discovered entities (and optional relationships) from a JSON file
    Import { file: PathBuf },
}

/// Import file layout; relationships point at entities by unique id
#[derive(Debug, Deserialize)]
struct ImportBatch {
    #[serde(default)]
    entities: Vec<NewDiscoveredEntity>,
    #[serde(default)]
    relationships: Vec<ImportedRelationship>,
}

#[derive(Debug, Deserialize)]
struct ImportedRelationship {
    relationship_type: String,
    from: String,
    to: String,
    #[serde(default = "default_relationship_confidence")]
    confidence: f64,
}

fn default_relationship_confidence() -> f64 {
    1.0
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so command output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = EvolutionConfig::load_from(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(db_path) = args.db_path {
        config.database.path = db_path;
    }
    if let Some(artifact_dir) = args.artifact_dir {
        config.promotion.artifact_dir = artifact_dir;
    }

    match args.command {
        Command::Analyze {
            min_occurrences,
            min_consistency,
            limit,
            json,
        } => {
            let analysis = &mut config.analysis;
            analysis.min_occurrences = min_occurrences.unwrap_or(analysis.min_occurrences);
            analysis.min_consistency = min_consistency.unwrap_or(analysis.min_consistency);
            analysis.limit = limit.unwrap_or(analysis.limit);
            config.validate().context("Invalid analysis settings")?;
            run_analyze(&config, json)?;
        }
        Command::Clusters {
            threshold,
            min_members,
            json,
        } => {
            let analysis = &mut config.analysis;
            analysis.similarity_threshold = threshold.unwrap_or(analysis.similarity_threshold);
            analysis.min_cluster_members = min_members.unwrap_or(analysis.min_cluster_members);
            config.validate().context("Invalid clustering settings")?;
            run_clusters(&config, json)?;
        }
        Command::Infer {
            type_name,
            json_schema,
        } => run_infer(&config, &type_name, json_schema)?,
        Command::Promote {
            type_name,
            no_copy,
            timeout_secs,
            note,
        } => {
            if no_copy {
                config.promotion.copy_data = false;
            }
            if let Some(secs) = timeout_secs {
                config.promotion.timeout_secs = secs;
            }
            config.validate().context("Invalid promotion settings")?;

            let result = run_promote(config, type_name, note).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::History { type_name } => run_history(&config, type_name.as_deref())?,
        Command::Import { file } => run_import(&config, &file)?,
    }

    Ok(ExitCode::SUCCESS)
}

fn open_database(config: &EvolutionConfig) -> Result<Database> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn run_analyze(config: &EvolutionConfig, json: bool) -> Result<()> {
    let db = open_database(config)?;
    let stats = PatternDetector::new().analyze(&db)?;
    let candidates = analyze_candidates(&stats, &config.analysis.ranking_criteria());

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!(
            "No type labels pass the gates (min_occurrences={}, min_consistency={})",
            config.analysis.min_occurrences, config.analysis.min_consistency
        );
        return Ok(());
    }

    println!(
        "{:<32} {:>10} {:>10} {:>12} {:>10}",
        "TYPE", "FREQUENCY", "DENSITY", "CONSISTENCY", "SCORE"
    );
    for candidate in &candidates {
        println!(
            "{:<32} {:>10} {:>10.3} {:>12.3} {:>10.3}",
            candidate.type_name,
            candidate.frequency,
            candidate.density,
            candidate.consistency,
            candidate.score
        );
    }
    Ok(())
}

fn run_clusters(config: &EvolutionConfig, json: bool) -> Result<()> {
    let db = open_database(config)?;
    let clusterer = SimilarityClusterer::new(
        config.analysis.similarity_threshold,
        config.analysis.min_cluster_members,
    );
    let report = clusterer.analyze(&db)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for summary in &report.summaries {
        println!(
            "{}: {} clusters over {} entities, sizes {:?}",
            summary.type_name, summary.cluster_count, summary.clustered_entities, summary.cluster_sizes
        );
    }
    for candidate in &report.candidates {
        println!(
            "  candidate: {} cluster of {} seeded by {}",
            candidate.type_name, candidate.size, candidate.seed_id
        );
    }
    if report.skipped_entities > 0 {
        println!("{} entities skipped (no usable embedding)", report.skipped_entities);
    }
    Ok(())
}

fn run_infer(config: &EvolutionConfig, type_name: &str, json_schema: bool) -> Result<()> {
    let db = open_database(config)?;
    let inferrer = SchemaInferrer::from_criteria(&config.promotion.criteria());
    let schema = inferrer.infer_from_store(&db, type_name)?;

    let document = if json_schema {
        schema.to_json_schema()
    } else {
        serde_json::to_value(&schema)?
    };
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

async fn run_promote(
    config: EvolutionConfig,
    type_name: String,
    note: Option<String>,
) -> Result<PromotionResult> {
    let db = open_database(&config)?;
    let interrupt = db.interrupt_handle();
    let cancelled = Arc::new(AtomicBool::new(false));
    let time_limit = config.promotion.timeout();

    let flag = Arc::clone(&cancelled);
    let mut task = tokio::task::spawn_blocking(move || {
        let promotion = &config.promotion;
        let generator = ArtifactGenerator::new(&promotion.artifact_dir);
        let tooling = CommandTooling::new(
            &config.database.path,
            promotion.bindings_command.clone(),
            promotion.migrate_command.clone(),
        );
        let mut criteria = promotion.criteria();
        criteria.note = note;

        PromotionOrchestrator::new(&db, &generator, &tooling)
            .with_raw_writer(&db)
            .with_criteria(criteria)
            .with_cancel_flag(&flag)
            .promote(&type_name)
    });

    let joined = match time_limit {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    "Promotion exceeded {}s, cancelling",
                    limit.as_secs()
                );
                cancelled.store(true, Ordering::SeqCst);
                interrupt.interrupt();
                // The task still writes its audit record before returning
                wait_for_cancelled(task).await?
            }
        },
        None => task.await,
    };

    joined.context("Promotion task panicked")
}

async fn wait_for_cancelled(
    task: tokio::task::JoinHandle<PromotionResult>,
) -> Result<std::result::Result<PromotionResult, tokio::task::JoinError>> {
    // External tools are not interruptible; give them a bounded grace period
    match tokio::time::timeout(Duration::from_secs(60), task).await {
        Ok(joined) => Ok(joined),
        Err(_) => bail!("Promotion did not stop after cancellation"),
    }
}

fn run_history(config: &EvolutionConfig, type_name: Option<&str>) -> Result<()> {
    let db = open_database(config)?;
    let history = db.list_schema_promotions(type_name)?;

    if history.is_empty() {
        println!("No promotions recorded");
        return Ok(());
    }

    for record in &history {
        println!(
            "{}  {:<7} {:<24} entities={} validation_failures={}{}",
            record.promoted_at,
            record.status.as_str(),
            record.type_name,
            record.entities_affected,
            record.validation_failures,
            record
                .error
                .as_deref()
                .map(|e| format!("  error: {}", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn run_import(config: &EvolutionConfig, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    // Either a bare array of entities or an object with entities and relationships
    let batch: ImportBatch = match serde_json::from_str::<Vec<NewDiscoveredEntity>>(&raw) {
        Ok(entities) => ImportBatch {
            entities,
            relationships: Vec::new(),
        },
        Err(_) => serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", file.display()))?,
    };

    let db = open_database(config)?;
    let mut ids: HashMap<String, i64> = HashMap::new();
    for entity in &batch.entities {
        let stored = db
            .insert_discovered_entity(entity)
            .with_context(|| format!("Failed to import entity '{}'", entity.name))?;
        ids.insert(stored.unique_id, stored.id);
    }

    for relationship in &batch.relationships {
        let resolve = |unique_id: &str| {
            ids.get(unique_id)
                .copied()
                .with_context(|| format!("Relationship references unknown entity '{}'", unique_id))
        };
        let from = EntityRef::discovered(resolve(&relationship.from)?);
        let to = EntityRef::discovered(resolve(&relationship.to)?);
        db.insert_relationship(
            &relationship.relationship_type,
            &from,
            &to,
            relationship.confidence,
            &Default::default(),
        )?;
    }

    info!(
        "Imported {} entities and {} relationships into {}",
        batch.entities.len(),
        batch.relationships.len(),
        config.database.path.display()
    );
    Ok(())
}
