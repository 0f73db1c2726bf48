//! Normalized catalogue entity structs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::search::canonicalize::{DISPLAY_BLURB_CHARS, compose_book_text, truncate_with_ellipsis};

/// Cover shown when a book has no usable cover image.
pub const PLACEHOLDER_COVER: &str = "https://via.placeholder.com/400x600?text=No+Cover";

/// Label shown when a book has no shelf location.
pub const NO_CALL_NUMBER: &str = "No call number available";

/// One book in the catalogue.
///
/// `id` always equals the record's position in the catalogue store and in the
/// vector index built from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookRecord {
    pub id: usize,
    pub title: String,
    pub author: String,
    /// Descriptive text used both for encoding and display.
    pub blurb: String,
    #[serde(default)]
    pub isbn: Option<String>,
    /// Library shelf location.
    #[serde(default)]
    pub call_number: Option<String>,
    /// Cover file name relative to the covers directory.
    #[serde(default)]
    pub cover_reference: Option<String>,
}

impl BookRecord {
    pub fn new(
        id: usize,
        title: impl Into<String>,
        author: impl Into<String>,
        blurb: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            author: author.into(),
            blurb: blurb.into(),
            isbn: None,
            call_number: None,
            cover_reference: None,
        }
    }

    /// Canonical encoder input for this record.
    pub fn composed_text(&self) -> String {
        compose_book_text(&self.title, &self.author, &self.blurb)
    }

    /// Shelf location, or the "unavailable" label.
    pub fn call_number_label(&self) -> &str {
        self.call_number.as_deref().unwrap_or(NO_CALL_NUMBER)
    }

    /// Blurb shortened for result listings.
    pub fn display_blurb(&self) -> String {
        truncate_with_ellipsis(&self.blurb, DISPLAY_BLURB_CHARS).into_owned()
    }

    /// Resolve the cover against `covers_dir`, falling back to the placeholder
    /// when the reference is absent or the file is gone.
    pub fn cover(&self, covers_dir: &Path) -> CoverImage {
        match &self.cover_reference {
            Some(name) => {
                let path = covers_dir.join(name);
                if path.is_file() {
                    CoverImage::File(path)
                } else {
                    CoverImage::Placeholder
                }
            }
            None => CoverImage::Placeholder,
        }
    }
}

/// Cover image a front end should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverImage {
    File(PathBuf),
    Placeholder,
}

impl CoverImage {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, CoverImage::Placeholder)
    }
}

impl std::fmt::Display for CoverImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverImage::File(path) => write!(f, "{}", path.display()),
            CoverImage::Placeholder => write!(f, "{PLACEHOLDER_COVER}"),
        }
    }
}

/// Flattened, display-ready view of a book.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookView {
    pub id: usize,
    pub title: String,
    pub author: String,
    pub blurb: String,
    pub isbn: Option<String>,
    pub call_number: String,
    pub cover: String,
}

impl BookView {
    pub fn from_record(record: &BookRecord, covers_dir: &Path) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            author: record.author.clone(),
            blurb: record.display_blurb(),
            isbn: record.isbn.clone(),
            call_number: record.call_number_label().to_string(),
            cover: record.cover(covers_dir).to_string(),
        }
    }
}
