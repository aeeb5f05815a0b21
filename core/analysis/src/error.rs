//! Error types for the analysis stage.

use schema_evolution_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// No discovered entities carry the requested type label.
    #[error("No entities found for type '{type_name}'")]
    NotFound { type_name: String },

    /// Reading from the entity store failed.
    #[error("Entity store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
