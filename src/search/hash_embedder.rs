//! FNV-1a feature hashing embedder.
//!
//! Lowercased alphanumeric tokens are hashed into a fixed number of signed
//! buckets and the result is L2-normalized. No model files, no randomness:
//! the output depends only on the text and the dimension, which makes this
//! encoder the deterministic baseline for tests and offline builds.

use super::embedder::{Embedder, EmbedderError, EmbedderResult};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Default output dimension, matching MiniLM so indexes are shape-compatible.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

impl HashEmbedder {
    /// Create an embedder producing `dimension`-length vectors.
    ///
    /// `dimension` must be positive; [`super::embedder::load_embedder`] checks it.
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            id: format!("fnv1a-{dimension}"),
        }
    }

    fn fnv1a(token: &str) -> u64 {
        token.bytes().fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
    }
}

impl Embedder for HashEmbedder {
    fn embed_sync(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let mut seen = 0usize;
        for token in Self::tokens(text) {
            let hash = Self::fnv1a(&token);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
            seen += 1;
        }

        if seen == 0 {
            return Err(EmbedderError::InvalidInput {
                reason: "text has no alphanumeric tokens".to_string(),
            });
        }

        let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
        if norm_sq > 0.0 {
            let inv_norm = 1.0 / norm_sq.sqrt();
            for v in vector.iter_mut() {
                *v *= inv_norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn model_name(&self) -> &str {
        "fnv1a-feature-hash"
    }

    fn is_semantic(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_is_bit_identical() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed_sync("The quick brown fox").unwrap();
        let b = embedder.embed_sync("The quick brown fox").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_HASH_DIMENSION);
    }

    #[test]
    fn output_is_unit_length() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed_sync("one two three four five").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn case_and_punctuation_do_not_matter() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed_sync("Desert, World!").unwrap();
        let b = embedder.embed_sync("desert world").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tokenless_text_is_rejected() {
        let embedder = HashEmbedder::new(16);
        assert!(embedder.embed_sync("").is_err());
        assert!(embedder.embed_sync("  ?! ...").is_err());
    }

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(HashEmbedder::fnv1a(""), FNV_OFFSET);
        assert_eq!(HashEmbedder::fnv1a("a"), 0xaf63_dc4c_8601_ec8c);
    }
}
