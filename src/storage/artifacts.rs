//! Persisted index/catalogue pair.
//!
//! The index builder writes three files into the data dir:
//!
//! - `books.index`: the [`VectorIndex`] in its binary format
//! - `books.json`: the catalogue snapshot
//! - `manifest.json`: record count, dimension, embedder id, and checksums of
//!   the other two files; written last
//!
//! [`load_pair`] refuses to hand out a pair unless all three agree. Any
//! failure is an [`ArtifactError`], which the serving side treats as fatal.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::write_atomic;
use crate::catalogue::{CatalogueError, CatalogueStore};
use crate::model::types::BookRecord;
use crate::search::embedder::Embedder;
use crate::search::vector_index::{IndexError, VECTOR_INDEX_FILE, VectorIndex};

pub const CATALOGUE_FILE: &str = "books.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Operator instruction attached to every load failure.
pub const REBUILD_HINT: &str = "Run `onceupon build` first to create the book index.";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("missing {what} at {}", path.display())]
    Missing { what: &'static str, path: PathBuf },

    #[error("vector index has {index_len} entries but the catalogue has {catalogue_len}")]
    LengthMismatch {
        index_len: usize,
        catalogue_len: usize,
    },

    #[error("{what} does not match the checksum recorded in the manifest")]
    ChecksumMismatch { what: &'static str },

    #[error("manifest disagrees with artifacts: {0}")]
    ManifestMismatch(String),

    #[error("index was built with embedder '{built}' but '{running}' is loaded")]
    EmbedderMismatch { built: String, running: String },

    #[error("index holds {built}-dimension vectors but the embedder produces {running}")]
    DimensionMismatch { built: usize, running: usize },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("catalogue snapshot is inconsistent: {0}")]
    Catalogue(#[from] CatalogueError),

    #[error("failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O failed on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File locations for one artifact set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub index: PathBuf,
    pub catalogue: PathBuf,
    pub manifest: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            index: dir.join(VECTOR_INDEX_FILE),
            catalogue: dir.join(CATALOGUE_FILE),
            manifest: dir.join(MANIFEST_FILE),
        }
    }
}

/// Build-time facts binding the index and catalogue together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedder_id: String,
    pub dimension: usize,
    pub record_count: usize,
    pub index_crc32: u32,
    pub catalogue_blake3: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    records: &'a [BookRecord],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<BookRecord>,
}

/// A verified, matched pair ready for serving.
#[derive(Debug, Clone)]
pub struct LoadedArtifacts {
    pub index: VectorIndex,
    pub catalogue: CatalogueStore,
    pub manifest: Manifest,
}

impl LoadedArtifacts {
    /// Confirm the running encoder produced this index.
    pub fn ensure_compatible(&self, embedder: &dyn Embedder) -> Result<(), ArtifactError> {
        if embedder.id() != self.manifest.embedder_id {
            return Err(ArtifactError::EmbedderMismatch {
                built: self.manifest.embedder_id.clone(),
                running: embedder.id().to_string(),
            });
        }
        if embedder.dimension() != self.index.dimension() {
            return Err(ArtifactError::DimensionMismatch {
                built: self.index.dimension(),
                running: embedder.dimension(),
            });
        }
        Ok(())
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn encode_catalogue(catalogue: &CatalogueStore, path: &Path) -> Result<Vec<u8>, ArtifactError> {
    let snapshot = SnapshotRef {
        version: ARTIFACT_FORMAT_VERSION,
        records: catalogue.records(),
    };
    serde_json::to_vec_pretty(&snapshot).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write only the catalogue snapshot. Used by [`save_pair`]; exposed for
/// repair tooling and tests.
pub fn write_catalogue_snapshot(
    path: &Path,
    catalogue: &CatalogueStore,
) -> Result<(), ArtifactError> {
    let bytes = encode_catalogue(catalogue, path)?;
    write_atomic(path, &bytes).map_err(io_err(path))
}

/// Persist the index and catalogue as a matched pair, fully replacing any
/// previous artifacts in `dir`.
pub fn save_pair(
    dir: &Path,
    index: &VectorIndex,
    catalogue: &CatalogueStore,
) -> Result<Manifest, ArtifactError> {
    if index.len() != catalogue.len() {
        return Err(ArtifactError::LengthMismatch {
            index_len: index.len(),
            catalogue_len: catalogue.len(),
        });
    }
    let paths = ArtifactPaths::in_dir(dir);

    let index_bytes = index.to_bytes()?;
    let catalogue_bytes = encode_catalogue(catalogue, &paths.catalogue)?;
    let manifest = Manifest {
        format_version: ARTIFACT_FORMAT_VERSION,
        embedder_id: index.embedder_id().to_string(),
        dimension: index.dimension(),
        record_count: index.len(),
        index_crc32: crc32fast::hash(&index_bytes),
        catalogue_blake3: blake3::hash(&catalogue_bytes).to_hex().to_string(),
        built_at: Utc::now(),
    };
    let manifest_bytes =
        serde_json::to_vec_pretty(&manifest).map_err(|source| ArtifactError::Json {
            path: paths.manifest.clone(),
            source,
        })?;

    write_atomic(&paths.index, &index_bytes).map_err(io_err(&paths.index))?;
    write_atomic(&paths.catalogue, &catalogue_bytes).map_err(io_err(&paths.catalogue))?;
    write_atomic(&paths.manifest, &manifest_bytes).map_err(io_err(&paths.manifest))?;

    info!(
        dir = %dir.display(),
        records = manifest.record_count,
        dimension = manifest.dimension,
        embedder = %manifest.embedder_id,
        "artifacts written"
    );
    Ok(manifest)
}

fn read_required(path: &Path, what: &'static str) -> Result<Vec<u8>, ArtifactError> {
    if !path.is_file() {
        return Err(ArtifactError::Missing {
            what,
            path: path.to_path_buf(),
        });
    }
    std::fs::read(path).map_err(io_err(path))
}

/// Load and cross-check the persisted pair.
///
/// Checks run in order: presence, decoding, length equality, then manifest
/// agreement. No partially verified pair is ever returned.
pub fn load_pair(dir: &Path) -> Result<LoadedArtifacts, ArtifactError> {
    let paths = ArtifactPaths::in_dir(dir);

    let index_bytes = read_required(&paths.index, "vector index")?;
    let catalogue_bytes = read_required(&paths.catalogue, "catalogue snapshot")?;
    let manifest_bytes = read_required(&paths.manifest, "artifact manifest")?;

    let index = VectorIndex::from_bytes(&index_bytes)?;
    let snapshot: Snapshot =
        serde_json::from_slice(&catalogue_bytes).map_err(|source| ArtifactError::Json {
            path: paths.catalogue.clone(),
            source,
        })?;
    if snapshot.version != ARTIFACT_FORMAT_VERSION {
        return Err(ArtifactError::ManifestMismatch(format!(
            "catalogue snapshot version {} is not supported",
            snapshot.version
        )));
    }
    let catalogue = CatalogueStore::from_snapshot(snapshot.records)?;

    if index.len() != catalogue.len() {
        return Err(ArtifactError::LengthMismatch {
            index_len: index.len(),
            catalogue_len: catalogue.len(),
        });
    }

    let manifest: Manifest =
        serde_json::from_slice(&manifest_bytes).map_err(|source| ArtifactError::Json {
            path: paths.manifest.clone(),
            source,
        })?;
    verify_manifest(&manifest, &index, &index_bytes, &catalogue_bytes)?;

    debug!(
        records = index.len(),
        dimension = index.dimension(),
        "artifacts verified"
    );
    Ok(LoadedArtifacts {
        index,
        catalogue,
        manifest,
    })
}

fn verify_manifest(
    manifest: &Manifest,
    index: &VectorIndex,
    index_bytes: &[u8],
    catalogue_bytes: &[u8],
) -> Result<(), ArtifactError> {
    if manifest.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(ArtifactError::ManifestMismatch(format!(
            "format version {} is not supported",
            manifest.format_version
        )));
    }
    if manifest.record_count != index.len() {
        return Err(ArtifactError::ManifestMismatch(format!(
            "manifest records {} but index holds {}",
            manifest.record_count,
            index.len()
        )));
    }
    if manifest.dimension != index.dimension() || manifest.embedder_id != index.embedder_id() {
        return Err(ArtifactError::ManifestMismatch(format!(
            "manifest describes {} ({} dims) but index holds {} ({} dims)",
            manifest.embedder_id,
            manifest.dimension,
            index.embedder_id(),
            index.dimension()
        )));
    }
    if manifest.index_crc32 != crc32fast::hash(index_bytes) {
        return Err(ArtifactError::ChecksumMismatch {
            what: "vector index",
        });
    }
    if manifest.catalogue_blake3 != blake3::hash(catalogue_bytes).to_hex().as_str() {
        return Err(ArtifactError::ChecksumMismatch {
            what: "catalogue snapshot",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::hash_embedder::HashEmbedder;

    fn fixture(n: usize) -> (VectorIndex, CatalogueStore) {
        let records = (0..n)
            .map(|i| BookRecord::new(i, format!("Book {i}"), "Author", "Blurb."))
            .collect();
        let catalogue = CatalogueStore::from_records(records);
        let vectors = (0..n).map(|i| vec![i as f32, 1.0]).collect();
        let index = VectorIndex::build("fixture-2", vectors).unwrap();
        (index, catalogue)
    }

    #[test]
    fn save_then_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let (index, catalogue) = fixture(4);
        let manifest = save_pair(tmp.path(), &index, &catalogue).unwrap();
        assert_eq!(manifest.record_count, 4);

        let loaded = load_pair(tmp.path()).unwrap();
        assert_eq!(loaded.index, index);
        assert_eq!(loaded.catalogue, catalogue);
        assert_eq!(loaded.manifest, manifest);
    }

    #[test]
    fn save_refuses_mismatched_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let (index, _) = fixture(3);
        let (_, catalogue) = fixture(2);
        let err = save_pair(tmp.path(), &index, &catalogue).unwrap_err();
        assert!(matches!(err, ArtifactError::LengthMismatch { .. }));
        assert!(!ArtifactPaths::in_dir(tmp.path()).index.exists());
    }

    #[test]
    fn load_without_catalogue_is_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let (index, catalogue) = fixture(2);
        save_pair(tmp.path(), &index, &catalogue).unwrap();
        std::fs::remove_file(tmp.path().join(CATALOGUE_FILE)).unwrap();
        let err = load_pair(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::Missing {
                what: "catalogue snapshot",
                ..
            }
        ));
    }

    #[test]
    fn load_detects_length_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let (index, catalogue) = fixture(10);
        save_pair(tmp.path(), &index, &catalogue).unwrap();
        let (_, shorter) = fixture(8);
        write_catalogue_snapshot(&tmp.path().join(CATALOGUE_FILE), &shorter).unwrap();

        let err = load_pair(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::LengthMismatch {
                index_len: 10,
                catalogue_len: 8
            }
        ));
    }

    #[test]
    fn load_detects_swapped_catalogue_of_same_length() {
        let tmp = tempfile::tempdir().unwrap();
        let (index, catalogue) = fixture(3);
        save_pair(tmp.path(), &index, &catalogue).unwrap();
        let other = CatalogueStore::from_records(
            (0..3)
                .map(|i| BookRecord::new(i, format!("Other {i}"), "Someone", "Else."))
                .collect(),
        );
        write_catalogue_snapshot(&tmp.path().join(CATALOGUE_FILE), &other).unwrap();

        let err = load_pair(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::ChecksumMismatch {
                what: "catalogue snapshot"
            }
        ));
    }

    #[test]
    fn load_detects_manifest_record_count_drift() {
        let tmp = tempfile::tempdir().unwrap();
        let (index, catalogue) = fixture(3);
        let mut manifest = save_pair(tmp.path(), &index, &catalogue).unwrap();
        manifest.record_count += 1;
        std::fs::write(
            tmp.path().join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest).unwrap(),
        )
        .unwrap();

        let err = load_pair(tmp.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::ManifestMismatch(_)));
        assert!(err.to_string().contains("manifest records 4"));
    }

    #[test]
    fn load_detects_replaced_index_of_same_length() {
        let tmp = tempfile::tempdir().unwrap();
        let (index, catalogue) = fixture(3);
        save_pair(tmp.path(), &index, &catalogue).unwrap();
        let other = VectorIndex::build(
            "fixture-2",
            (0..3).map(|i| vec![1.0, i as f32 * 2.0]).collect(),
        )
        .unwrap();
        other.save(&tmp.path().join(VECTOR_INDEX_FILE)).unwrap();

        let err = load_pair(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::ChecksumMismatch {
                what: "vector index"
            }
        ));
    }

    #[test]
    fn ensure_compatible_checks_embedder_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let (index, catalogue) = fixture(2);
        save_pair(tmp.path(), &index, &catalogue).unwrap();
        let loaded = load_pair(tmp.path()).unwrap();

        let err = loaded
            .ensure_compatible(&HashEmbedder::new(2))
            .unwrap_err();
        assert!(matches!(err, ArtifactError::EmbedderMismatch { .. }));
    }
}
