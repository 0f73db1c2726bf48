//! Exact nearest-neighbor vector index.
//!
//! Stores one vector per catalogue position in a flat row-major buffer and
//! answers k-NN queries by scanning every row with squared Euclidean distance.
//! Results are ordered by `(distance, position)`, so two runs over the same
//! index always agree, ties included.
//!
//! # On-disk format (`books.index`, little-endian)
//!
//! | field | size |
//! |---|---|
//! | magic `OUVI` | 4 |
//! | format version | u16 |
//! | dimension | u32 |
//! | record count | u32 |
//! | embedder id length + UTF-8 bytes | u16 + n |
//! | vectors | count × dimension × f32 |
//! | CRC32 of everything above | u32 |

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::storage::write_atomic;

/// Default file name of the persisted index inside the data dir.
pub const VECTOR_INDEX_FILE: &str = "books.index";

const INDEX_MAGIC: &[u8; 4] = b"OUVI";
const INDEX_FORMAT_VERSION: u16 = 1;
const HEADER_FIXED_LEN: usize = 4 + 2 + 4 + 4 + 2;
const CRC_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vectors must have at least one dimension")]
    ZeroDimension,

    #[error("vector at position {position} contains a non-finite value")]
    NonFinite { position: usize },

    #[error("query vector contains a non-finite value")]
    NonFiniteQuery,

    #[error("vector index is corrupt: {0}")]
    Corrupt(String),

    #[error("vector index I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One search hit: a catalogue position and its squared distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

fn neighbor_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.position.cmp(&b.position))
}

/// Squared Euclidean distance.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Flat, immutable vector store with exact search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    embedder_id: String,
    dimension: usize,
    len: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Build an index whose dimension is taken from the first vector.
    ///
    /// An empty input yields an empty index that answers every query with no
    /// results. An empty first vector is a [`IndexError::DimensionMismatch`]
    /// when any later vector has entries, and [`IndexError::ZeroDimension`]
    /// when none do.
    pub fn build(embedder_id: impl Into<String>, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let dimension = vectors.first().map_or(0, Vec::len);
        if dimension == 0 && !vectors.is_empty() {
            if let Some(wider) = vectors.iter().find(|v| !v.is_empty()) {
                return Err(IndexError::DimensionMismatch {
                    expected: 0,
                    got: wider.len(),
                });
            }
            return Err(IndexError::ZeroDimension);
        }
        Self::build_with_dimension(embedder_id, dimension, vectors)
    }

    /// Build an index, requiring every vector to have `dimension` entries.
    pub fn build_with_dimension(
        embedder_id: impl Into<String>,
        dimension: usize,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if dimension == 0 && !vectors.is_empty() {
            return Err(IndexError::ZeroDimension);
        }
        let len = vectors.len();
        let mut data = Vec::with_capacity(len * dimension);
        for (position, vector) in vectors.into_iter().enumerate() {
            if vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    got: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(IndexError::NonFinite { position });
            }
            data.extend_from_slice(&vector);
        }
        Ok(Self {
            embedder_id: embedder_id.into(),
            dimension,
            len,
            data,
        })
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The stored vector at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len {
            return None;
        }
        let start = position * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// Exact k-nearest-neighbor search.
    ///
    /// Returns `min(k, len)` neighbors in ascending `(distance, position)`
    /// order. Every stored vector is scanned.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFiniteQuery);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: squared_l2(query, row),
            })
            .collect();

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, neighbor_order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(neighbor_order);
        Ok(scored)
    }

    /// Serialize to the on-disk format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let id = self.embedder_id.as_bytes();
        let id_len = u16::try_from(id.len())
            .map_err(|_| IndexError::Corrupt("embedder id longer than 65535 bytes".into()))?;
        let dimension = u32::try_from(self.dimension)
            .map_err(|_| IndexError::Corrupt("dimension exceeds u32".into()))?;
        let count = u32::try_from(self.len)
            .map_err(|_| IndexError::Corrupt("record count exceeds u32".into()))?;

        let mut buf =
            Vec::with_capacity(HEADER_FIXED_LEN + id.len() + self.data.len() * 4 + CRC_LEN);
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&dimension.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&id_len.to_le_bytes());
        buf.extend_from_slice(id);
        for value in &self.data {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Parse the on-disk format, verifying magic, version, checksum, and shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() < HEADER_FIXED_LEN + CRC_LEN {
            return Err(IndexError::Corrupt(format!(
                "file too short ({} bytes)",
                bytes.len()
            )));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - CRC_LEN);
        let stored_crc = u32::from_le_bytes(read_array(crc_bytes, 0)?);
        let actual_crc = crc32fast::hash(body);
        if stored_crc != actual_crc {
            return Err(IndexError::Corrupt(format!(
                "checksum mismatch (stored {stored_crc:08x}, computed {actual_crc:08x})"
            )));
        }

        if &body[..4] != INDEX_MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let version = u16::from_le_bytes(read_array(body, 4)?);
        if version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {version}"
            )));
        }
        let dimension = u32::from_le_bytes(read_array(body, 6)?) as usize;
        let len = u32::from_le_bytes(read_array(body, 10)?) as usize;
        let id_len = u16::from_le_bytes(read_array(body, 14)?) as usize;

        let id_end = HEADER_FIXED_LEN + id_len;
        let id_bytes = body
            .get(HEADER_FIXED_LEN..id_end)
            .ok_or_else(|| IndexError::Corrupt("truncated embedder id".into()))?;
        let embedder_id = std::str::from_utf8(id_bytes)
            .map_err(|_| IndexError::Corrupt("embedder id is not UTF-8".into()))?
            .to_string();

        if dimension == 0 && len > 0 {
            return Err(IndexError::Corrupt("zero dimension with records".into()));
        }
        let expected_payload = len
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("shape overflows".into()))?;
        let payload = &body[id_end..];
        if payload.len() != expected_payload {
            return Err(IndexError::Corrupt(format!(
                "payload is {} bytes, header implies {expected_payload}",
                payload.len()
            )));
        }

        let data: Vec<f32> = payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if let Some(idx) = data.iter().position(|v| !v.is_finite()) {
            return Err(IndexError::NonFinite {
                position: idx / dimension.max(1),
            });
        }

        Ok(Self {
            embedder_id,
            dimension,
            len,
            data,
        })
    }

    /// Atomically write the index to `path`.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let bytes = self.to_bytes()?;
        write_atomic(path, &bytes).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = std::fs::read(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], IndexError> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| IndexError::Corrupt(format!("truncated header at byte {offset}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> VectorIndex {
        VectorIndex::build(
            "test-3",
            vec![
                vec![0.0, 0.0, 0.0],
                vec![1.0, 0.0, 0.0],
                vec![0.0, 2.0, 0.0],
                vec![1.0, 0.0, 0.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn build_rejects_mixed_dimensions() {
        let err = VectorIndex::build("x", vec![vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn build_rejects_non_finite_values() {
        let err = VectorIndex::build("x", vec![vec![1.0], vec![f32::NAN]]).unwrap_err();
        assert!(matches!(err, IndexError::NonFinite { position: 1 }));
    }

    #[test]
    fn build_rejects_zero_dimension_vectors() {
        let err = VectorIndex::build("x", vec![vec![]]).unwrap_err();
        assert!(matches!(err, IndexError::ZeroDimension));
    }

    #[test]
    fn build_reports_mismatch_after_empty_first_vector() {
        let err = VectorIndex::build("x", vec![vec![], vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 0,
                got: 1
            }
        ));
    }

    #[test]
    fn search_orders_by_distance_then_position() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.0, 0.0], 10).unwrap();
        let positions: Vec<usize> = hits.iter().map(|n| n.position).collect();
        // positions 1 and 3 tie at distance 0
        assert_eq!(positions, vec![1, 3, 0, 2]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[2].distance, 1.0);
        assert_eq!(hits[3].distance, 5.0);
    }

    #[test]
    fn search_truncates_to_k() {
        let index = sample_index();
        let hits = index.search(&[0.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
    }

    #[test]
    fn search_with_k_zero_is_empty() {
        assert!(sample_index().search(&[0.0; 3], 0).unwrap().is_empty());
    }

    #[test]
    fn search_rejects_wrong_query_dimension() {
        let err = sample_index().search(&[0.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn search_rejects_non_finite_query() {
        let err = sample_index().search(&[0.0, f32::INFINITY, 0.0], 1).unwrap_err();
        assert!(matches!(err, IndexError::NonFiniteQuery));
    }

    #[test]
    fn empty_index_answers_with_nothing() {
        let index = VectorIndex::build("x", Vec::new()).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 2.0], 5).unwrap().is_empty());
    }

    #[test]
    fn bytes_roundtrip_preserves_everything() {
        let index = sample_index();
        let decoded = VectorIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, index);
        assert_eq!(decoded.embedder_id(), "test-3");
    }

    #[test]
    fn from_bytes_detects_bit_flips() {
        let mut bytes = sample_index().to_bytes().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        let err = VectorIndex::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"), "got {err}");
    }

    #[test]
    fn from_bytes_rejects_truncation() {
        let bytes = sample_index().to_bytes().unwrap();
        assert!(VectorIndex::from_bytes(&bytes[..10]).is_err());
        assert!(VectorIndex::from_bytes(&[]).is_err());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(VECTOR_INDEX_FILE);
        let index = sample_index();
        index.save(&path).unwrap();
        assert_eq!(VectorIndex::load(&path).unwrap(), index);
    }

    #[test]
    fn vector_accessor_returns_rows() {
        let index = sample_index();
        assert_eq!(index.vector(2), Some(&[0.0, 2.0, 0.0][..]));
        assert_eq!(index.vector(4), None);
    }
}
