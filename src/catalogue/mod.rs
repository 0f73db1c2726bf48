//! Catalogue store.
//!
//! The store is the positional, read-only list of [`BookRecord`]s every other
//! component joins against. Position `i` holds the record whose id is `i`, and
//! the vector index built from the store keeps the same positions.

pub mod ingest;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::types::BookRecord;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogueError {
    #[error("record at position {position} carries id {id}")]
    IdMismatch { position: usize, id: usize },
}

/// Immutable, position-addressed collection of books.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogueStore {
    records: Vec<BookRecord>,
}

impl CatalogueStore {
    /// Build a store from freshly ingested rows, assigning ids by position.
    pub fn from_records(records: Vec<BookRecord>) -> Self {
        let records = records
            .into_iter()
            .enumerate()
            .map(|(position, mut record)| {
                record.id = position;
                record
            })
            .collect();
        Self { records }
    }

    /// Adopt records loaded from a snapshot, verifying that ids equal positions.
    pub fn from_snapshot(records: Vec<BookRecord>) -> Result<Self, CatalogueError> {
        if let Some((position, record)) = records
            .iter()
            .enumerate()
            .find(|(position, record)| record.id != *position)
        {
            return Err(CatalogueError::IdMismatch {
                position,
                id: record.id,
            });
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&BookRecord> {
        self.records.get(position)
    }

    pub fn records(&self) -> &[BookRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BookRecord> {
        self.records.iter()
    }

    /// Canonical encoder inputs, in position order.
    pub fn composed_texts(&self) -> Vec<String> {
        self.records.iter().map(BookRecord::composed_text).collect()
    }
}

impl<'a> IntoIterator for &'a CatalogueStore {
    type Item = &'a BookRecord;
    type IntoIter = std::slice::Iter<'a, BookRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
