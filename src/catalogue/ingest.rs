//! Tabular catalogue input.
//!
//! Reads the enriched catalogue export (one row per book) and resolves every
//! optional column once, so records leave this module in their final shape.
//!
//! Recognized columns after header normalization (trim, lowercase, spaces to
//! underscores): `title` (required), `author`, `blurb`, `isbn`,
//! `call_number` (alias `call_no`), `cover_reference` (alias `cover_filename`).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::types::BookRecord;
use crate::search::canonicalize::{clean_blurb, normalize_cell};

/// Author used when the input has none.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// Blurb used when the input has none.
pub const NO_DESCRIPTION: &str = "No description available.";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to open catalogue input {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read catalogue rows: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalogue input has no '{0}' column")]
    MissingColumn(&'static str),
}

/// Outcome of reading a catalogue file.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub records: Vec<BookRecord>,
    /// Rows dropped because their title was blank.
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct ColumnMap {
    title: usize,
    author: Option<usize>,
    blurb: Option<usize>,
    isbn: Option<usize>,
    call_number: Option<usize>,
    cover_reference: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, IngestError> {
        let names: Vec<String> = headers.iter().map(normalize_header).collect();
        let find = |wanted: &str| names.iter().position(|name| name == wanted);

        let title = find("title").ok_or(IngestError::MissingColumn("title"))?;
        Ok(Self {
            title,
            author: find("author"),
            blurb: find("blurb"),
            isbn: find("isbn"),
            call_number: find("call_number"),
            cover_reference: find("cover_reference"),
        })
    }
}

fn normalize_header(raw: &str) -> String {
    let name = raw.trim().to_lowercase().replace(' ', "_");
    match name.as_str() {
        "call_no" | "call_no." => "call_number".to_string(),
        "cover_filename" | "cover" => "cover_reference".to_string(),
        _ => name,
    }
}

fn cell(row: &csv::StringRecord, column: Option<usize>) -> Option<String> {
    column
        .and_then(|idx| row.get(idx))
        .and_then(normalize_cell)
}

/// Read a catalogue file from disk.
pub fn read_catalogue(path: &Path) -> Result<IngestReport, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_catalogue_from(file)
}

/// Read catalogue rows from any reader. Ids are assigned in row order,
/// counting only kept rows.
pub fn read_catalogue_from<R: Read>(reader: R) -> Result<IngestReport, IngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ColumnMap::from_headers(rdr.headers()?)?;
    debug!(?columns, "catalogue columns resolved");

    let mut report = IngestReport::default();
    for (row_idx, row) in rdr.records().enumerate() {
        let row = row?;
        let Some(title) = cell(&row, Some(columns.title)) else {
            warn!(row = row_idx + 1, "skipping row with empty title");
            report.skipped += 1;
            continue;
        };

        let blurb = cell(&row, columns.blurb)
            .map(|raw| clean_blurb(&raw))
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());

        report.records.push(BookRecord {
            id: report.records.len(),
            title,
            author: cell(&row, columns.author).unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            blurb,
            isbn: cell(&row, columns.isbn),
            call_number: cell(&row, columns.call_number),
            cover_reference: cell(&row, columns.cover_reference),
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_full_enriched_rows() {
        let input = "title,author,blurb,isbn,call_number,cover_filename\n\
                     Dune,Frank Herbert,Spice on Arrakis.,9780441013593,FIC HER,Dune_1.jpg\n";
        let report = read_catalogue_from(input.as_bytes()).unwrap();
        assert_eq!(report.skipped, 0);
        let book = &report.records[0];
        assert_eq!(book.id, 0);
        assert_eq!(book.title, "Dune");
        assert_eq!(book.author, "Frank Herbert");
        assert_eq!(book.isbn.as_deref(), Some("9780441013593"));
        assert_eq!(book.call_number.as_deref(), Some("FIC HER"));
        assert_eq!(book.cover_reference.as_deref(), Some("Dune_1.jpg"));
    }

    #[test]
    fn normalizes_headers_and_aliases() {
        let input = " Title , Author ,Call No\nEmma,Jane Austen,FIC AUS\n";
        let report = read_catalogue_from(input.as_bytes()).unwrap();
        let book = &report.records[0];
        assert_eq!(book.title, "Emma");
        assert_eq!(book.call_number.as_deref(), Some("FIC AUS"));
        assert_eq!(book.blurb, NO_DESCRIPTION);
        assert_eq!(book.cover_reference, None);
    }

    #[test]
    fn missing_markers_resolve_to_none() {
        let input = "title,author,isbn,call_number\nNeuromancer,nan,,NaN\n";
        let report = read_catalogue_from(input.as_bytes()).unwrap();
        let book = &report.records[0];
        assert_eq!(book.author, UNKNOWN_AUTHOR);
        assert_eq!(book.isbn, None);
        assert_eq!(book.call_number, None);
    }

    #[test]
    fn skips_blank_titles_and_keeps_ids_dense() {
        let input = "title,author\nA,x\n,y\nnan,z\nB,w\n";
        let report = read_catalogue_from(input.as_bytes()).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[1].id, 1);
        assert_eq!(report.records[1].title, "B");
    }

    #[test]
    fn blurbs_are_cleaned() {
        let input = "title,blurb\nA,\"line one\nline two\"\n";
        let report = read_catalogue_from(input.as_bytes()).unwrap();
        assert_eq!(report.records[0].blurb, "line one line two");
    }

    #[test]
    fn missing_title_column_is_an_error() {
        let input = "name,author\nA,x\n";
        let err = read_catalogue_from(input.as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn("title")));
    }

    #[test]
    fn open_error_names_the_path() {
        let err = read_catalogue(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.csv"));
    }
}
