use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::catalogue::CatalogueStore;
use crate::search::embedder::{Embedder, EmbedderError};
use crate::search::vector_index::{IndexError, VectorIndex};
use crate::storage::artifacts::{ArtifactError, ArtifactPaths, Manifest, save_pair};

pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("the catalogue is empty; nothing to index")]
    EmptyCatalogue,

    #[error("batch_size must be > 0")]
    InvalidBatchSize,

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("embedder returned {got} embeddings for {expected} inputs")]
    BatchLength { expected: usize, got: usize },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Result of a completed build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub manifest: Manifest,
    pub index_path: String,
    pub catalogue_path: String,
    pub elapsed_ms: u64,
}

/// Encodes a catalogue and writes the index/catalogue pair.
pub struct BookIndexer {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl BookIndexer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self, BuildError> {
        if batch_size == 0 {
            return Err(BuildError::InvalidBatchSize);
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn embedder_id(&self) -> &str {
        self.embedder.id()
    }

    pub fn embedder_dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Encode every record's composed text.
    ///
    /// Batches may be encoded in parallel; output `i` always belongs to
    /// catalogue position `i`.
    pub fn embed_catalogue(&self, catalogue: &CatalogueStore) -> Result<Vec<Vec<f32>>, BuildError> {
        let texts = catalogue.composed_texts();
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let pb = ProgressBar::new(texts.len() as u64);
        if std::io::stderr().is_terminal() {
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} books embedded")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
        } else {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let embedder = self.embedder.as_ref();
        let batches = texts
            .par_chunks(self.batch_size)
            .map(|chunk| -> Result<Vec<Vec<f32>>, BuildError> {
                let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
                let vectors = embedder.embed_batch_sync(&refs)?;
                if vectors.len() != chunk.len() {
                    return Err(BuildError::BatchLength {
                        expected: chunk.len(),
                        got: vectors.len(),
                    });
                }
                pb.inc(chunk.len() as u64);
                Ok(vectors)
            })
            .collect::<Result<Vec<_>, _>>()?;

        pb.finish_with_message("Embedding complete");
        Ok(batches.into_iter().flatten().collect())
    }

    /// Encode the catalogue into an in-memory index.
    pub fn build_index(&self, catalogue: &CatalogueStore) -> Result<VectorIndex, BuildError> {
        if catalogue.is_empty() {
            return Err(BuildError::EmptyCatalogue);
        }
        let vectors = self.embed_catalogue(catalogue)?;
        Ok(VectorIndex::build_with_dimension(
            self.embedder_id(),
            self.embedder_dimension(),
            vectors,
        )?)
    }

    /// Build the index and persist it with the catalogue into `out_dir`.
    ///
    /// Nothing is written when the catalogue is empty or encoding fails.
    pub fn build(
        &self,
        catalogue: &CatalogueStore,
        out_dir: &Path,
    ) -> Result<BuildSummary, BuildError> {
        let start = Instant::now();
        info!(
            records = catalogue.len(),
            embedder = self.embedder_id(),
            batch_size = self.batch_size,
            "building vector index"
        );

        let index = self.build_index(catalogue)?;
        let manifest = save_pair(out_dir, &index, catalogue)?;
        let paths = ArtifactPaths::in_dir(out_dir);
        let elapsed = start.elapsed();

        info!(
            records = manifest.record_count,
            dimension = manifest.dimension,
            elapsed_ms = duration_ms(elapsed),
            "vector index ready"
        );
        Ok(BuildSummary {
            manifest,
            index_path: paths.index.display().to_string(),
            catalogue_path: paths.catalogue.display().to_string(),
            elapsed_ms: duration_ms(elapsed),
        })
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
