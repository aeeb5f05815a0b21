//! Layered configuration for the `schema-evolution` tool, loaded with figment.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`SCHEMA_EVOLUTION_*`, `__` separates sections)
//! 2. An explicit `--config` file, or `schema-evolution.toml` in the working directory
//! 3. Built-in defaults
//!
//! `SCHEMA_EVOLUTION_PROMOTION__ARTIFACT_DIR` maps to `promotion.artifact_dir`,
//! `SCHEMA_EVOLUTION_ANALYSIS__LIMIT` to `analysis.limit`, and so on.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use schema_evolution_analysis::{
    RankingCriteria, DEFAULT_MIN_CLUSTER_MEMBERS, DEFAULT_SIMILARITY_THRESHOLD,
    OPTIONAL_THRESHOLD, REQUIRED_THRESHOLD, SAMPLE_LIMIT,
};
use schema_evolution_schemas::PromotionCriteria;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "schema-evolution.toml";
pub const ENV_PREFIX: &str = "SCHEMA_EVOLUTION_";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment extraction or merge error.
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// A configuration field has an invalid value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EvolutionConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite file holding discovered entities, relationships and promotion history.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("schema-evolution.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,
    #[serde(default = "default_min_consistency")]
    pub min_consistency: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_min_cluster_members")]
    pub min_cluster_members: usize,
}

const fn default_min_occurrences() -> usize {
    5
}

const fn default_min_consistency() -> f64 {
    0.6
}

const fn default_limit() -> usize {
    10
}

const fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

const fn default_min_cluster_members() -> usize {
    DEFAULT_MIN_CLUSTER_MEMBERS
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_occurrences: default_min_occurrences(),
            min_consistency: default_min_consistency(),
            limit: default_limit(),
            similarity_threshold: default_similarity_threshold(),
            min_cluster_members: default_min_cluster_members(),
        }
    }
}

impl AnalysisConfig {
    pub fn ranking_criteria(&self) -> RankingCriteria {
        RankingCriteria {
            min_occurrences: self.min_occurrences,
            min_consistency: self.min_consistency,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromotionConfig {
    /// Directory receiving one `<type>.sql` artifact per promoted type.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// argv for the bindings generator; `{artifact}` and `{database}` are substituted.
    /// Empty means the step has nothing to do.
    #[serde(default)]
    pub bindings_command: Vec<String>,

    /// argv for the migration tool. Empty means the artifact is applied in-process.
    #[serde(default)]
    pub migrate_command: Vec<String>,

    /// When false, rows are counted but left for manual migration.
    #[serde(default = "default_copy_data")]
    pub copy_data: bool,

    /// Wall-clock budget for one promotion; 0 disables the timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_required_threshold")]
    pub required_threshold: f64,
    #[serde(default = "default_optional_threshold")]
    pub optional_threshold: f64,
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("schema/generated")
}

const fn default_copy_data() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    300
}

const fn default_required_threshold() -> f64 {
    REQUIRED_THRESHOLD
}

const fn default_optional_threshold() -> f64 {
    OPTIONAL_THRESHOLD
}

const fn default_sample_limit() -> usize {
    SAMPLE_LIMIT
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            bindings_command: Vec::new(),
            migrate_command: Vec::new(),
            copy_data: default_copy_data(),
            timeout_secs: default_timeout_secs(),
            required_threshold: default_required_threshold(),
            optional_threshold: default_optional_threshold(),
            sample_limit: default_sample_limit(),
        }
    }
}

impl PromotionConfig {
    pub fn criteria(&self) -> PromotionCriteria {
        PromotionCriteria {
            required_threshold: self.required_threshold,
            optional_threshold: self.optional_threshold,
            sample_limit: self.sample_limit,
            copy_data: self.copy_data,
            note: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl EvolutionConfig {
    /// Load from defaults, `schema-evolution.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`load`](Self::load), but an explicit file replaces the default file name.
    pub fn load_from(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the provider chain; public so tests can inspect it directly.
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let file = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if file.exists() {
            figment = figment.merge(Toml::file(file));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_fields = [
            ("analysis.min_consistency", self.analysis.min_consistency),
            ("analysis.similarity_threshold", self.analysis.similarity_threshold),
            ("promotion.required_threshold", self.promotion.required_threshold),
            ("promotion.optional_threshold", self.promotion.optional_threshold),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("{} is outside [0, 1]", value),
                });
            }
        }

        if self.promotion.optional_threshold > self.promotion.required_threshold {
            return Err(ConfigError::InvalidValue {
                field: "promotion.optional_threshold".to_string(),
                reason: "must not exceed promotion.required_threshold".to_string(),
            });
        }

        if self.promotion.sample_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "promotion.sample_limit".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}
