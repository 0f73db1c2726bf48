//! Query engine: text in, ranked books out.
//!
//! A query is encoded with the same [`Embedder`] that built the index, matched
//! exactly against every stored vector, and joined back to the catalogue by
//! position. Results are always ordered by raw distance; the display score
//! `1 / (1 + distance)` is attached for presentation only.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::catalogue::CatalogueStore;
use crate::model::types::BookRecord;
use crate::search::embedder::{Embedder, EmbedderError, EmbedderInfo};
use crate::search::vector_index::{IndexError, VectorIndex};
use crate::storage::artifacts::{ArtifactError, LoadedArtifacts};

/// Number of results returned when the caller does not ask for a count.
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("please enter a description to search")]
    EmptyQuery,

    #[error("failed to encode query: {0}")]
    Embedding(#[from] EmbedderError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(
        "index position {position} has no catalogue record (catalogue holds {catalogue_len}); \
         the index and catalogue are mismatched"
    )]
    IndexConsistencyFault {
        position: usize,
        catalogue_len: usize,
    },
}

impl QueryError {
    /// Whether the loaded artifacts can no longer be trusted. Serving must
    /// stop rather than return wrong results.
    pub fn is_fatal(&self) -> bool {
        match self {
            QueryError::EmptyQuery | QueryError::Embedding(_) => false,
            QueryError::Index(_) | QueryError::IndexConsistencyFault { .. } => true,
        }
    }
}

/// Map a squared distance into `(0, 1]` for display.
///
/// Monotonically decreasing; not a probability.
pub fn score_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// One ranked result.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub distance: f32,
    pub score: f32,
    pub book: BookRecord,
}

impl SearchHit {
    /// Score as a whole percentage, e.g. `"83% match"`.
    pub fn match_label(&self) -> String {
        format!("{:.0}% match", self.score * 100.0)
    }
}

/// Ranked results for one query plus a browsing cursor.
///
/// The cursor is clamped: stepping past either end is a no-op.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchResultSet {
    pub query: String,
    hits: Vec<SearchHit>,
    cursor: usize,
}

impl SearchResultSet {
    pub fn new(query: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        Self {
            query: query.into(),
            hits,
            cursor: 0,
        }
    }

    pub fn hits(&self) -> &[SearchHit] {
        &self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Hit under the cursor.
    pub fn current(&self) -> Option<&SearchHit> {
        self.hits.get(self.cursor)
    }

    /// Advance the cursor. Returns `false` when already on the last hit.
    pub fn next(&mut self) -> bool {
        if self.cursor + 1 < self.hits.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// Step the cursor back. Returns `false` when already on the first hit.
    pub fn previous(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }
}

/// Shared, read-only query engine.
#[derive(Clone)]
pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    catalogue: Arc<CatalogueStore>,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
        catalogue: Arc<CatalogueStore>,
    ) -> Self {
        Self {
            embedder,
            index,
            catalogue,
        }
    }

    /// Wrap verified artifacts, checking that `embedder` built them.
    pub fn from_artifacts(
        embedder: Arc<dyn Embedder>,
        artifacts: LoadedArtifacts,
    ) -> Result<Self, ArtifactError> {
        artifacts.ensure_compatible(embedder.as_ref())?;
        Ok(Self::new(
            embedder,
            Arc::new(artifacts.index),
            Arc::new(artifacts.catalogue),
        ))
    }

    pub fn catalogue(&self) -> &Arc<CatalogueStore> {
        &self.catalogue
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn embedder_info(&self) -> EmbedderInfo {
        EmbedderInfo::from_embedder(self.embedder.as_ref())
    }

    /// Run one query for the `k` closest books.
    pub fn query(&self, text: &str, k: usize) -> Result<SearchResultSet, QueryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let start = Instant::now();
        let query_vec = self.embedder.embed_sync(text)?;
        let neighbors = self.index.search(&query_vec, k)?;

        let hits = neighbors
            .into_iter()
            .map(|neighbor| {
                let book = self.catalogue.get(neighbor.position).ok_or(
                    QueryError::IndexConsistencyFault {
                        position: neighbor.position,
                        catalogue_len: self.catalogue.len(),
                    },
                )?;
                Ok(SearchHit {
                    position: neighbor.position,
                    distance: neighbor.distance,
                    score: score_from_distance(neighbor.distance),
                    book: book.clone(),
                })
            })
            .collect::<Result<Vec<_>, QueryError>>()?;

        debug!(
            k,
            results = hits.len(),
            latency_us = start.elapsed().as_micros() as u64,
            "query answered"
        );
        Ok(SearchResultSet::new(text, hits))
    }
}
