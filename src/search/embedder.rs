//! Embedder trait and types for semantic search.
//!
//! All text encoders implement [`Embedder`], a synchronous interface that maps
//! a string to a fixed-dimension `f32` vector. An encoder is a pure function
//! of its model identity: the same text through the same model always yields
//! the same vector, and [`Embedder::embed_batch_sync`] must agree element-wise
//! with mapping [`Embedder::embed_sync`] over its input.
//!
//! # Implementations
//!
//! - **Hash embedder**: FNV-1a feature hashing (always available, 384 dimensions by default)
//! - **ML embedder**: FastEmbed with the MiniLM model (requires local model files, 384 dimensions)

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::fastembed_embedder::FastEmbedder;
use super::hash_embedder::HashEmbedder;

/// Errors raised by text encoders.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    /// The model could not be found or initialized. Fatal at startup.
    #[error("embedder '{model}' unavailable: {reason}")]
    EmbedderUnavailable { model: String, reason: String },

    #[error("embedding with '{model}' failed: {source}")]
    EmbeddingFailed {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid {field} '{value}': {reason}")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    /// The text cannot be encoded, e.g. it has no usable tokens.
    #[error("cannot encode input: {reason}")]
    InvalidInput { reason: String },

    #[error("{subsystem} failure: {source}")]
    SubsystemError {
        subsystem: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type EmbedderResult<T> = Result<T, EmbedderError>;

/// Synchronous text encoder.
pub trait Embedder: Send + Sync {
    /// Encode one text.
    fn embed_sync(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    /// Encode many texts. Output `i` equals `embed_sync(texts[i])`.
    fn embed_batch_sync(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed_sync(text)).collect()
    }

    /// Output dimension.
    fn dimension(&self) -> usize;

    /// Stable identifier recorded alongside every index built with this encoder.
    fn id(&self) -> &str;

    /// Human-readable model name.
    fn model_name(&self) -> &str;

    /// Whether vectors carry semantic (ML) meaning rather than lexical overlap.
    fn is_semantic(&self) -> bool;
}

/// Metadata about an embedder for display and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedderInfo {
    /// The embedder's unique identifier.
    pub id: String,
    /// The output dimension.
    pub dimension: usize,
    /// Whether it's a semantic (ML) embedder.
    pub is_semantic: bool,
}

impl EmbedderInfo {
    /// Create info from an embedder instance.
    pub fn from_embedder(embedder: &dyn Embedder) -> Self {
        Self {
            id: embedder.id().to_string(),
            dimension: embedder.dimension(),
            is_semantic: embedder.is_semantic(),
        }
    }
}

impl fmt::Display for EmbedderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_semantic {
            "semantic"
        } else {
            "lexical"
        };
        write!(f, "{} ({}, {} dims)", self.id, kind, self.dimension)
    }
}

/// Encoder selection, as named in configuration and on the command line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// MiniLM-L6-v2 through ONNX Runtime.
    #[default]
    Fastembed,
    /// Deterministic feature hashing; no model files needed.
    Hash,
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fastembed => write!(f, "fastembed"),
            Self::Hash => write!(f, "hash"),
        }
    }
}

impl EmbedderKind {
    /// Recover the encoder kind (and dimension) from an id recorded in a
    /// manifest, e.g. `fnv1a-384` or `minilm-384`.
    pub fn from_embedder_id(id: &str) -> Option<(Self, usize)> {
        if id == FastEmbedder::embedder_id_static() {
            return Some((Self::Fastembed, FastEmbedder::DIMENSION));
        }
        let dimension = id.strip_prefix("fnv1a-")?.parse::<usize>().ok()?;
        (dimension > 0).then_some((Self::Hash, dimension))
    }
}

/// Load the configured encoder.
///
/// A missing or broken model is reported as
/// [`EmbedderError::EmbedderUnavailable`]; callers treat it as fatal.
pub fn load_embedder(
    kind: EmbedderKind,
    model_dir: &Path,
    hash_dimension: usize,
) -> EmbedderResult<Arc<dyn Embedder>> {
    match kind {
        EmbedderKind::Fastembed => Ok(Arc::new(FastEmbedder::load_from_dir(model_dir)?)),
        EmbedderKind::Hash => {
            if hash_dimension == 0 {
                return Err(EmbedderError::InvalidConfig {
                    field: "hash_dimension".to_string(),
                    value: "0".to_string(),
                    reason: "dimension must be positive".to_string(),
                });
            }
            Ok(Arc::new(HashEmbedder::new(hash_dimension)))
        }
    }
}
