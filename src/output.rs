//! Result types: per-page and per-document extractions.
//!
//! A [`PageExtraction`] is built once from one page's model markdown and is
//! never mutated afterwards; a corrected page replaces the old one. A
//! [`DocumentExtraction`] is derived purely from the ordered page list and can
//! always be recomputed with [`crate::pipeline::assemble::assemble`].

use crate::error::{PageError, ParseWarning};
use crate::record::{Discipline, EarthworkItem, Pipe, Structure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Page level ───────────────────────────────────────────────────────────

/// Completeness tier the model declared for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Completeness {
    Low,
    Medium,
    High,
}

impl fmt::Display for Completeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Completeness::Low => "Low",
            Completeness::Medium => "Medium",
            Completeness::High => "High",
        })
    }
}

/// The page's own assessment plus everything the parser noticed.
///
/// `completeness` and `confidence_pct` are `None` when the model omitted the
/// Quality Notes section or wrote something unparseable; the aggregator then
/// scores the page as Low / 0 %.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityNote {
    pub completeness: Option<Completeness>,
    pub confidence_pct: Option<f64>,
    pub uncertainties: Vec<String>,
    pub warnings: Vec<ParseWarning>,
}

impl QualityNote {
    /// A note for a page that could not be parsed at all.
    pub fn failed(warning: ParseWarning) -> Self {
        Self {
            completeness: Some(Completeness::Low),
            confidence_pct: Some(0.0),
            uncertainties: Vec::new(),
            warnings: vec![warning],
        }
    }

    pub fn effective_tier(&self) -> Completeness {
        self.completeness.unwrap_or(Completeness::Low)
    }

    pub fn effective_confidence(&self) -> f64 {
        self.confidence_pct.unwrap_or(0.0)
    }

    pub fn has_errors(&self) -> bool {
        self.warnings.iter().any(ParseWarning::is_error)
    }
}

/// Counts the page's Summary section declared, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclaredCounts {
    pub pipes: Option<u32>,
    pub structures: Option<u32>,
    pub earthwork: Option<u32>,
}

/// Everything parsed from one page of model output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageExtraction {
    /// 1-indexed page number.
    pub page_num: u32,
    /// e.g. "Plan view", "Profile", from the Summary section.
    pub document_type: Option<String>,
    pub pipes: Vec<Pipe>,
    pub structures: Vec<Structure>,
    pub earthwork: Vec<EarthworkItem>,
    /// Cross-section relationship statements, verbatim.
    pub relationships: Vec<String>,
    /// Free-text notes the model attached to the page.
    pub notes: Vec<String>,
    pub declared: DeclaredCounts,
    pub quality: QualityNote,
}

impl PageExtraction {
    /// An empty page carrying a single failure warning.
    pub fn degraded(page_num: u32, warning: ParseWarning) -> Self {
        Self {
            page_num,
            quality: QualityNote::failed(warning),
            ..Default::default()
        }
    }

    pub fn record_count(&self) -> usize {
        self.pipes.len() + self.structures.len() + self.earthwork.len()
    }
}

// ── Document level ───────────────────────────────────────────────────────

/// Which field a merge conflict was about and how it was settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// "pipe", "structure" or "earthwork".
    pub record: String,
    /// Display name of the merged record, e.g. "MH-SS-1".
    pub key: String,
    /// JSON field name, e.g. "depth_ft".
    pub field: String,
    pub kept: String,
    pub kept_page: u32,
    /// `(page, value)` for every stated candidate that lost.
    pub discarded: Vec<(u32, String)>,
    pub resolved_by: Resolution,
}

/// The precedence rule that decided a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Confidence,
    Certainty,
    Specificity,
    /// The candidate's record had more typed fields.
    Completeness,
    Recency,
    /// Nothing distinguished the candidates; the first-seen value was kept.
    FirstSeen,
}

/// Which end of a pipe referenced an unknown structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    From,
    To,
}

/// A pipe endpoint that names a structure not found on its page or the
/// pages either side of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub page: u32,
    pub pipe: String,
    pub endpoint: Endpoint,
    pub structure_id: String,
}

/// Pages per completeness tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Document-level roll-up of the per-page quality notes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySummary {
    pub page_count: usize,
    /// Confidence averaged over pages, weighted by records per page.
    pub weighted_confidence_pct: f64,
    pub tiers: TierCounts,
    /// Deduplicated uncertainty reasons grouped by field type.
    pub uncertainties: BTreeMap<String, Vec<String>>,
    pub count_mismatches: usize,
    pub structural_errors: usize,
    /// Pages worth a human look, lowest confidence first.
    pub triage_pages: Vec<u32>,
}

/// Aggregate counts over the merged record set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSummary {
    pub total_pipes: usize,
    pub total_structures: usize,
    pub total_earthwork: usize,
    /// Σ length × count over merged pipes with a known length.
    pub total_linear_ft: f64,
    /// Linear feet per discipline; pipes without one are under "Unknown".
    pub linear_ft_by_discipline: BTreeMap<String, f64>,
    pub conflicts: usize,
    pub unresolved_references: usize,
    pub quality: QualitySummary,
}

/// The whole-document result: every page plus the merged view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentExtraction {
    pub pipes: Vec<Pipe>,
    pub structures: Vec<Structure>,
    pub earthwork: Vec<EarthworkItem>,
    pub summary: DocumentSummary,
    pub conflicts: Vec<MergeConflict>,
    pub unresolved_references: Vec<UnresolvedReference>,
    pub pages: Vec<PageExtraction>,
}

impl DocumentExtraction {
    /// Structures of one discipline, in merged order.
    pub fn structures_for(&self, discipline: Discipline) -> impl Iterator<Item = &Structure> {
        self.structures
            .iter()
            .filter(move |s| s.discipline.value() == Some(&discipline))
    }

    pub fn page(&self, page_num: u32) -> Option<&PageExtraction> {
        self.pages.iter().find(|p| p.page_num == page_num)
    }
}

/// Outcome of running the vision workflow on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutcome {
    pub page_num: u32,
    /// Final markdown handed to the parser (merge-pass output, or the
    /// concatenated section passes when the merge pass failed).
    pub markdown: String,
    pub extraction: PageExtraction,
    pub model_calls: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub error: Option<PageError>,
}

/// Timing and token statistics for a vision run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub model_calls: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Result of [`crate::extract::extract_document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub document: DocumentExtraction,
    pub pages: Vec<PageOutcome>,
    pub stats: ExtractionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_note_is_low_zero() {
        let note = QualityNote::failed(ParseWarning::StructuralParse {
            page: 1,
            detail: "no headings".into(),
        });
        assert_eq!(note.effective_tier(), Completeness::Low);
        assert_eq!(note.effective_confidence(), 0.0);
        assert!(note.has_errors());
    }

    #[test]
    fn missing_note_scores_low() {
        let note = QualityNote::default();
        assert_eq!(note.effective_tier(), Completeness::Low);
        assert_eq!(note.effective_confidence(), 0.0);
        assert!(!note.has_errors());
    }

    #[test]
    fn tiers_order_low_to_high() {
        assert!(Completeness::High > Completeness::Medium);
        assert!(Completeness::Medium > Completeness::Low);
    }

    #[test]
    fn summary_keys_are_flat() {
        let doc = DocumentExtraction::default();
        let v = serde_json::to_value(&doc).unwrap();
        for key in ["pipes", "structures", "earthwork", "summary"] {
            assert!(v.get(key).is_some(), "missing top-level key {key}");
        }
        assert!(v["summary"].get("total_linear_ft").is_some());
    }
}
