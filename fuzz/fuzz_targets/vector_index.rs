//! Fuzz target for the vector index decoder.
//!
//! Arbitrary bytes must decode to an error or to an index that searches
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

use onceupon::search::vector_index::VectorIndex;

fuzz_target!(|data: &[u8]| {
    if let Ok(index) = VectorIndex::from_bytes(data) {
        // Header-only inputs can claim huge dimensions with zero rows.
        if index.dimension() > 4096 {
            return;
        }
        let query = vec![0.5f32; index.dimension()];
        let _ = index.search(&query, 3);
        let _ = index.to_bytes();
    }
});
