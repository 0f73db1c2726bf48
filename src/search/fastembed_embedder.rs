//! FastEmbed-based MiniLM embedder.
//!
//! Loads a local ONNX model + tokenizer bundle for `all-MiniLM-L6-v2` and
//! produces unit-length 384-dimension sentence embeddings. This implementation
//! never downloads model assets; it expects the model files to be present on
//! disk and returns a clear error when they are missing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fastembed::{
    InitOptionsUserDefined, Pooling, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
};

use super::embedder::{Embedder, EmbedderError, EmbedderResult};

const MINILM_MODEL_ID: &str = "all-minilm-l6-v2";
const MINILM_DIR_NAME: &str = "all-MiniLM-L6-v2";
const MINILM_EMBEDDER_ID: &str = "minilm-384";
const MINILM_DIMENSION: usize = 384;

// Prefer the onnx/ subdir layout, fall back to a flat directory.
const MODEL_ONNX_SUBDIR: &str = "onnx/model.onnx";
const MODEL_ONNX_LEGACY: &str = "model.onnx";
const TOKENIZER_JSON: &str = "tokenizer.json";
const CONFIG_JSON: &str = "config.json";
const SPECIAL_TOKENS_JSON: &str = "special_tokens_map.json";
const TOKENIZER_CONFIG_JSON: &str = "tokenizer_config.json";

/// Configuration for loading an ONNX embedder.
#[derive(Debug, Clone)]
pub struct OnnxEmbedderConfig {
    /// Unique embedder ID (e.g., "minilm-384").
    pub embedder_id: String,
    /// Model identifier for logging.
    pub model_id: String,
    /// Output embedding dimension.
    pub dimension: usize,
    /// Pooling strategy.
    pub pooling: Pooling,
}

impl Default for OnnxEmbedderConfig {
    fn default() -> Self {
        Self {
            embedder_id: MINILM_EMBEDDER_ID.to_string(),
            model_id: MINILM_MODEL_ID.to_string(),
            dimension: MINILM_DIMENSION,
            pooling: Pooling::Mean,
        }
    }
}

/// FastEmbed-backed semantic embedder.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    id: String,
    model_id: String,
    dimension: usize,
}

impl FastEmbedder {
    pub const DIMENSION: usize = MINILM_DIMENSION;

    /// Stable embedder identifier for MiniLM (recorded in the index header).
    pub fn embedder_id_static() -> &'static str {
        MINILM_EMBEDDER_ID
    }

    /// Required non-model files.
    ///
    /// The ONNX model itself can live at `onnx/model.onnx` (modern) or
    /// `model.onnx` (legacy); see [`Self::select_model_file`].
    pub fn required_model_files() -> &'static [&'static str] {
        &[
            TOKENIZER_JSON,
            CONFIG_JSON,
            SPECIAL_TOKENS_JSON,
            TOKENIZER_CONFIG_JSON,
        ]
    }

    /// Select the ONNX model file, preferring `onnx/model.onnx` over `model.onnx`.
    fn select_model_file(model_dir: &Path) -> Option<PathBuf> {
        let modern = model_dir.join(MODEL_ONNX_SUBDIR);
        if modern.is_file() {
            return Some(modern);
        }
        let legacy = model_dir.join(MODEL_ONNX_LEGACY);
        if legacy.is_file() {
            return Some(legacy);
        }
        None
    }

    /// Default MiniLM model directory relative to the data dir.
    pub fn default_model_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("models").join(MINILM_DIR_NAME)
    }

    /// Load the MiniLM model.
    pub fn load_from_dir(model_dir: &Path) -> EmbedderResult<Self> {
        Self::load_with_config(model_dir, OnnxEmbedderConfig::default())
    }

    /// Load an ONNX embedder with custom configuration.
    pub fn load_with_config(model_dir: &Path, config: OnnxEmbedderConfig) -> EmbedderResult<Self> {
        // ONNX Runtime dies with SIGILL on x86_64 CPUs without AVX.
        #[cfg(target_arch = "x86_64")]
        if !std::arch::is_x86_feature_detected!("avx") {
            return Err(EmbedderError::EmbedderUnavailable {
                model: config.embedder_id.clone(),
                reason: "this CPU lacks AVX, which ONNX Runtime requires".to_string(),
            });
        }

        if !model_dir.is_dir() {
            return Err(EmbedderError::EmbedderUnavailable {
                model: config.embedder_id.clone(),
                reason: format!("model directory not found: {}", model_dir.display()),
            });
        }

        let onnx_path = Self::select_model_file(model_dir).ok_or_else(|| {
            EmbedderError::EmbedderUnavailable {
                model: config.embedder_id.clone(),
                reason: format!(
                    "no ONNX model file in {} (checked {} and {})",
                    model_dir.display(),
                    MODEL_ONNX_SUBDIR,
                    MODEL_ONNX_LEGACY
                ),
            }
        })?;

        let missing: Vec<&str> = Self::required_model_files()
            .iter()
            .copied()
            .filter(|name| !model_dir.join(name).is_file())
            .collect();
        if !missing.is_empty() {
            return Err(EmbedderError::EmbedderUnavailable {
                model: config.embedder_id.clone(),
                reason: format!(
                    "model files missing in {}: {}",
                    model_dir.display(),
                    missing.join(", ")
                ),
            });
        }

        let read = |path: PathBuf, label: &str| Self::read_required(path, label, &config.embedder_id);
        let model_file = read(onnx_path, "model.onnx")?;
        let tokenizer_files = TokenizerFiles {
            tokenizer_file: read(model_dir.join(TOKENIZER_JSON), TOKENIZER_JSON)?,
            config_file: read(model_dir.join(CONFIG_JSON), CONFIG_JSON)?,
            special_tokens_map_file: read(model_dir.join(SPECIAL_TOKENS_JSON), SPECIAL_TOKENS_JSON)?,
            tokenizer_config_file: read(
                model_dir.join(TOKENIZER_CONFIG_JSON),
                TOKENIZER_CONFIG_JSON,
            )?,
        };

        let mut model = UserDefinedEmbeddingModel::new(model_file, tokenizer_files);
        model.pooling = Some(config.pooling);

        let model = TextEmbedding::try_new_from_user_defined(model, InitOptionsUserDefined::new())
            .map_err(|e| EmbedderError::EmbedderUnavailable {
                model: config.embedder_id.clone(),
                reason: format!("fastembed init failed: {e}"),
            })?;

        tracing::info!(
            embedder = %config.embedder_id,
            model_dir = %model_dir.display(),
            "MiniLM embedder loaded"
        );

        Ok(Self {
            model: Mutex::new(model),
            id: config.embedder_id,
            model_id: config.model_id,
            dimension: config.dimension,
        })
    }

    fn read_required(path: PathBuf, label: &str, model_id: &str) -> EmbedderResult<Vec<u8>> {
        fs::read(&path).map_err(|e| EmbedderError::EmbedderUnavailable {
            model: model_id.to_string(),
            reason: format!("unable to read {label} at {}: {e}", path.display()),
        })
    }

    fn embed_failed(&self, message: String) -> EmbedderError {
        EmbedderError::EmbeddingFailed {
            model: self.id.clone(),
            source: Box::new(std::io::Error::other(message)),
        }
    }

    /// Scale to unit length. Non-finite output is an error, never zeroed.
    fn normalize_in_place(&self, embedding: &mut [f32]) -> EmbedderResult<()> {
        if embedding.len() != self.dimension {
            return Err(self.embed_failed(format!(
                "fastembed dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
        if !norm_sq.is_finite() {
            return Err(self.embed_failed("fastembed produced non-finite values".to_string()));
        }
        if norm_sq > f32::EPSILON {
            let inv_norm = 1.0 / norm_sq.sqrt();
            for v in embedding.iter_mut() {
                *v *= inv_norm;
            }
        }
        Ok(())
    }

    fn run(&self, inputs: Vec<&str>) -> EmbedderResult<Vec<Vec<f32>>> {
        #[allow(unused_mut)]
        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbedderError::SubsystemError {
                subsystem: "embedder",
                source: Box::new(std::io::Error::other("fastembed lock poisoned")),
            })?;

        let expected = inputs.len();
        let mut embeddings = model
            .embed(inputs, None)
            .map_err(|e| self.embed_failed(format!("fastembed embed failed: {e}")))?;
        if embeddings.len() != expected {
            return Err(self.embed_failed(format!(
                "fastembed returned {} embeddings for {expected} inputs",
                embeddings.len()
            )));
        }
        for embedding in embeddings.iter_mut() {
            self.normalize_in_place(embedding)?;
        }
        Ok(embeddings)
    }

    fn reject_empty(text: &str, reason: &str) -> EmbedderResult<()> {
        if text.is_empty() {
            return Err(EmbedderError::InvalidInput {
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}

impl Embedder for FastEmbedder {
    fn embed_sync(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        Self::reject_empty(text, "empty text")?;
        self.run(vec![text])?
            .into_iter()
            .next()
            .ok_or_else(|| self.embed_failed("fastembed returned no embedding".to_string()))
    }

    fn embed_batch_sync(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        for text in texts {
            Self::reject_empty(text, "empty text in batch")?;
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts.to_vec())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn is_semantic(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fastembed_missing_files_returns_unavailable() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = match FastEmbedder::load_from_dir(tmp.path()) {
            Ok(_) => panic!("expected missing-model error"),
            Err(err) => err,
        };
        assert!(
            matches!(err, EmbedderError::EmbedderUnavailable { .. }),
            "expected EmbedderUnavailable, got {err:?}"
        );
    }

    #[test]
    fn fastembed_reports_missing_tokenizer_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("model.onnx"), b"not really onnx").unwrap();
        let err = match FastEmbedder::load_from_dir(tmp.path()) {
            Ok(_) => panic!("expected missing-file error"),
            Err(err) => err,
        };
        let message = err.to_string();
        assert!(message.contains(TOKENIZER_JSON), "got: {message}");
        assert!(message.contains(CONFIG_JSON), "got: {message}");
    }

    #[test]
    fn select_model_file_prefers_modern_onnx_layout() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("onnx")).unwrap();
        std::fs::write(tmp.path().join("onnx/model.onnx"), b"modern").unwrap();
        std::fs::write(tmp.path().join("model.onnx"), b"legacy").unwrap();

        let selected = FastEmbedder::select_model_file(tmp.path()).unwrap();
        assert!(
            selected.ends_with("onnx/model.onnx"),
            "should prefer onnx/ subdir: {selected:?}"
        );
    }

    #[test]
    fn select_model_file_returns_none_for_empty_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(FastEmbedder::select_model_file(tmp.path()).is_none());
    }

    #[test]
    fn default_model_dir_is_under_models() {
        let dir = FastEmbedder::default_model_dir(Path::new("/srv/onceupon"));
        assert!(dir.ends_with("models/all-MiniLM-L6-v2"));
    }
}
