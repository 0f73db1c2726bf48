//! Offline index building.

pub mod semantic;
