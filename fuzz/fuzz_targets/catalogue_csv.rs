//! Fuzz target for catalogue CSV ingestion.

#![no_main]

use libfuzzer_sys::fuzz_target;

use onceupon::catalogue::CatalogueStore;
use onceupon::catalogue::ingest::read_catalogue_from;

fuzz_target!(|data: &[u8]| {
    if let Ok(report) = read_catalogue_from(data) {
        let store = CatalogueStore::from_records(report.records);
        for (position, record) in store.iter().enumerate() {
            assert_eq!(record.id, position);
            assert!(!record.title.is_empty());
        }
    }
});
