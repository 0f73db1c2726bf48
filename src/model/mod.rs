//! Catalogue data model.

pub mod types;
