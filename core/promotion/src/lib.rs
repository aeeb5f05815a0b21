pub mod artifact;
pub mod config;
pub mod error;
pub mod migration;
pub mod orchestrator;
pub mod templates;

pub use artifact::{ArtifactGenerator, GeneratedArtifact};
pub use config::{AnalysisConfig, ConfigError, DatabaseConfig, EvolutionConfig, PromotionConfig};
pub use error::{PromotionError, Result};
pub use migration::{apply_artifact, CommandTooling, SchemaTooling};
pub use orchestrator::{build_typed_rows, count_validation_failures, PromotionOrchestrator};
pub use templates::{native_type, ArtifactRenderer, RenderedArtifact, PRIMARY_KEY_COLUMN};
