//! Text canonicalization for consistent embedding input.
//!
//! Every catalogue record is encoded from one composed string,
//! `"{title} by {author}. {blurb}"`. Building that string in exactly one place
//! keeps the index builder and self-match queries byte-identical.
//!
//! This module also owns the cell cleanup rules applied once at ingestion, so
//! nothing downstream has to re-check for spreadsheet "missing" markers.
//!
//! # Example
//!
//! ```
//! use onceupon::search::canonicalize::{compose_book_text, normalize_cell};
//!
//! let text = compose_book_text("Dune", "Frank Herbert", "Spice and sand.");
//! assert_eq!(text, "Dune by Frank Herbert. Spice and sand.");
//! assert_eq!(normalize_cell(" nan "), None);
//! ```

use std::borrow::Cow;

/// Maximum characters kept from an ingested blurb.
pub const MAX_BLURB_CHARS: usize = 600;

/// Maximum characters shown for a blurb in a result listing.
pub const DISPLAY_BLURB_CHARS: usize = 500;

const ELLIPSIS: &str = "...";

/// Compose the canonical encoder input for a book.
pub fn compose_book_text(title: &str, author: &str, blurb: &str) -> String {
    format!("{title} by {author}. {blurb}")
}

/// Resolve a raw tabular cell to a value, treating blanks and `nan` markers as absent.
pub fn normalize_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Flatten line breaks, trim, and cap a blurb at [`MAX_BLURB_CHARS`].
pub fn clean_blurb(raw: &str) -> String {
    let flattened = raw.replace(['\r', '\n'], " ");
    truncate_with_ellipsis(flattened.trim(), MAX_BLURB_CHARS).into_owned()
}

/// Truncate `text` to at most `max_chars` characters, ending in `...` when cut.
///
/// Counts Unicode scalar values, never splitting a character.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
    if text.chars().count() <= max_chars {
        return Cow::Borrowed(text);
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_matches_canonical_shape() {
        assert_eq!(
            compose_book_text("Emma", "Jane Austen", "A matchmaker meddles."),
            "Emma by Jane Austen. A matchmaker meddles."
        );
    }

    #[test]
    fn test_normalize_cell_missing_markers() {
        assert_eq!(normalize_cell(""), None);
        assert_eq!(normalize_cell("   "), None);
        assert_eq!(normalize_cell("nan"), None);
        assert_eq!(normalize_cell("NaN"), None);
        assert_eq!(normalize_cell("  FIC HER "), Some("FIC HER".to_string()));
    }

    #[test]
    fn test_clean_blurb_flattens_newlines() {
        let cleaned = clean_blurb("  line one\r\nline two\n");
        assert_eq!(cleaned, "line one  line two");
    }

    #[test]
    fn test_clean_blurb_truncates_long_text() {
        let long = "x".repeat(700);
        let cleaned = clean_blurb(&long);
        assert_eq!(cleaned.chars().count(), MAX_BLURB_CHARS);
        assert!(cleaned.ends_with("..."));
        assert_eq!(cleaned.matches('x').count(), MAX_BLURB_CHARS - 3);
    }

    #[test]
    fn test_truncate_keeps_short_text_borrowed() {
        assert!(matches!(truncate_with_ellipsis("short", 10), Cow::Borrowed("short")));
        assert!(matches!(truncate_with_ellipsis("exact", 5), Cow::Borrowed("exact")));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(20);
        let cut = truncate_with_ellipsis(&text, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.starts_with("ééééééé"));
    }
}
