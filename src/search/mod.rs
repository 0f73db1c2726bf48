//! Search layer facade.
//!
//! - **[`embedder`]**: Embedder trait and encoder selection.
//! - **[`hash_embedder`]**: FNV-1a feature hashing embedder (deterministic baseline).
//! - **[`fastembed_embedder`]**: FastEmbed-backed ML embedder (MiniLM).
//! - **[`canonicalize`]**: Canonical composed text and cell cleanup.
//! - **[`vector_index`]**: Exact brute-force vector index and its file format.
//! - **[`query`]**: Query engine, ranked results, and the result browsing cursor.

pub mod canonicalize;
pub mod embedder;
pub mod fastembed_embedder;
pub mod hash_embedder;
pub mod query;
pub mod vector_index;
