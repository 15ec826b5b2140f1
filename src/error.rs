//! Error types for the sitework-takeoff library.
//!
//! Three distinct types reflect three distinct failure modes:
//!
//! * [`TakeoffError`] — **Fatal**: the run cannot proceed at all (bad
//!   configuration, unreadable input file, provider not configured, output
//!   not writable). Returned as `Err(TakeoffError)` from the top-level
//!   `extract*` functions.
//!
//! * [`PageError`] — **Non-fatal**: the vision model failed for one page
//!   (retries exhausted, timeout). Stored next to the page so the rest of the
//!   document still assembles; the page itself degrades to an empty
//!   Low-confidence extraction.
//!
//! * [`ParseWarning`] — **Inspectable**: the markdown for a page was parsed,
//!   but something about it deserves a reviewer's attention (no headings at
//!   all, an unrecognised bullet, declared counts that disagree with what was
//!   found). Recorded inside the page's quality note, never raised.
//!
//! Parsing and merging never return `Err`. Every failure mode degrades to a
//! lower-confidence result with an explicit reason.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the sitework-takeoff library.
#[derive(Debug, Error)]
pub enum TakeoffError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found or could not be read.
    #[error("Failed to read input '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No pages were supplied.
    #[error("No pages to process")]
    NoPages,

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every page failed after all retries; output would be empty.
    #[error("All {total} pages failed after {retries} retries each.\nFirst error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialisation of an extraction failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal vision-model failure for a single page.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Model call failed after retries.
    #[error("Page {page}: model call failed after {retries} retries: {detail}")]
    ModelFailed {
        page: u32,
        retries: u8,
        detail: String,
    },

    /// Model call timed out.
    #[error("Page {page}: model call timed out after {secs}s")]
    Timeout { page: u32, secs: u64 },
}

/// One failed model call. Retried until the page's budget runs out, then
/// turned into a [`PageError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ModelCallError(pub String);

/// Something a reviewer should look at, recorded in a page's quality note.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    /// The page markdown has no usable heading structure.
    #[error("Page {page}: structural parse error: {detail}")]
    StructuralParse { page: u32, detail: String },

    /// A bullet inside an item block did not match any known label.
    /// The raw text is kept in the record's overflow bag.
    #[error("Page {page}: unrecognised line in '{block}': {raw}")]
    FieldParse { page: u32, block: String, raw: String },

    /// The Summary section's declared count disagrees with the parsed count.
    #[error("Page {page}: {section} declared {declared} but {found} were found")]
    CountMismatch {
        page: u32,
        section: String,
        declared: u32,
        found: u32,
    },

    /// The vision model produced nothing usable for this page.
    #[error("Page {page}: no model output: {detail}")]
    ModelFailure { page: u32, detail: String },
}

impl ParseWarning {
    /// Whether this warning counts as an error for triage purposes.
    ///
    /// Unrecognised bullets are informational: nothing was lost.
    pub fn is_error(&self) -> bool {
        !matches!(self, ParseWarning::FieldParse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mismatch_display() {
        let w = ParseWarning::CountMismatch {
            page: 2,
            section: "Pipes".into(),
            declared: 4,
            found: 3,
        };
        let msg = w.to_string();
        assert!(msg.contains("declared 4"), "got: {msg}");
        assert!(msg.contains("3 were found"), "got: {msg}");
    }

    #[test]
    fn field_parse_is_not_an_error() {
        let w = ParseWarning::FieldParse {
            page: 1,
            block: "Sanitary Pipe 1".into(),
            raw: "- 8 inch stub".into(),
        };
        assert!(!w.is_error());
        let s = ParseWarning::StructuralParse {
            page: 1,
            detail: "no headings".into(),
        };
        assert!(s.is_error());
    }

    #[test]
    fn warning_serialises_with_kind_tag() {
        let w = ParseWarning::StructuralParse {
            page: 7,
            detail: "empty".into(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"kind\":\"structural_parse\""), "got: {json}");
        let back: ParseWarning = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn page_error_display() {
        let e = PageError::Timeout { page: 3, secs: 60 };
        assert!(e.to_string().contains("60s"));
        assert!(e.to_string().contains("Page 3"));
    }

    #[test]
    fn all_pages_failed_display() {
        let e = TakeoffError::AllPagesFailed {
            total: 4,
            retries: 3,
            first_error: "boom".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 4 pages"), "got: {msg}");
        assert!(msg.contains("boom"));
    }
}
