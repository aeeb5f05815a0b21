//! Error types for the promotion stage.

use schema_evolution_analysis::AnalysisError;
use schema_evolution_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromotionError {
    /// Schema inference failed, usually because the type has no entities.
    #[error("Schema inference failed: {0}")]
    Analysis(#[from] AnalysisError),

    /// The schema could not be rendered into a valid artifact.
    #[error("Artifact generation failed: {0}")]
    Generation(String),

    /// External code-generation or migration tooling failed.
    #[error("{step} failed: {message}")]
    Tooling { step: &'static str, message: String },

    /// The transactional copy into the promoted table failed and was rolled back.
    #[error("Data copy failed: {0}")]
    DataCopy(#[source] StoreError),

    /// Reading from or auditing into the entity store failed.
    #[error("Entity store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller gave up on the promotion before it finished.
    #[error("Promotion cancelled before {0}")]
    Cancelled(&'static str),
}

pub type Result<T> = std::result::Result<T, PromotionError>;
