use schema_evolution_schemas::SchemaDefinition;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::Result;
use crate::templates::ArtifactRenderer;

/// Artifact persisted on disk for one promoted type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub table_name: String,
    pub path: PathBuf,
}

/// Writes one `<table>.sql` file per promoted type into the artifact directory
pub struct ArtifactGenerator {
    renderer: ArtifactRenderer,
    output_dir: PathBuf,
}

impl ArtifactGenerator {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            renderer: ArtifactRenderer::new(),
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn renderer(&self) -> &ArtifactRenderer {
        &self.renderer
    }

    /// Render, validate and write the artifact. Re-running overwrites the file in place.
    pub fn generate(&self, schema: &SchemaDefinition) -> Result<GeneratedArtifact> {
        let rendered = self.renderer.render(schema)?;

        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(&rendered.file_name);

        // Same directory as the target so the rename never crosses filesystems
        let mut staged = NamedTempFile::new_in(&self.output_dir)?;
        staged.write_all(rendered.ddl.as_bytes())?;
        staged.as_file().sync_all()?;
        staged.persist(&path).map_err(|e| e.error)?;

        info!(
            "Wrote schema artifact for '{}' to {}",
            schema.type_name,
            path.display()
        );

        Ok(GeneratedArtifact {
            table_name: rendered.table_name,
            path,
        })
    }
}
