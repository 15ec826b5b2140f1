//! Quality aggregation: per-page notes → one document summary.
//!
//! Never fails. A page without a usable quality note counts as Low / 0 %
//! rather than being skipped, so a document full of unparseable pages cannot
//! look better than it is.

use crate::error::ParseWarning;
use crate::output::{Completeness, PageExtraction, QualitySummary, TierCounts};
use crate::pipeline::fields::normalize_label;
use crate::record::Record;
use std::collections::BTreeMap;

/// Pages below this confidence are listed for review.
pub const TRIAGE_CONFIDENCE_PCT: f64 = 50.0;

/// Group name for a free-text uncertainty, by keyword.
pub fn uncertainty_group(text: &str) -> &'static str {
    let padded = format!(" {} ", normalize_label(text));
    let has = |words: &[&str]| words.iter().any(|w| padded.contains(&format!(" {w} ")));
    if has(&["invert", "inverts", "ie", "inv"]) {
        "invert"
    } else if has(&["rim", "rims", "grate"]) {
        "rim"
    } else if has(&["diameter", "diameters", "size", "sizes", "dia"]) {
        "diameter"
    } else if has(&["depth", "depths", "cover"]) {
        "depth"
    } else if has(&["length", "lengths", "lf", "distance", "stationing"]) {
        "length"
    } else if has(&["material", "materials", "pvc", "dip", "rcp", "hdpe"]) {
        "material"
    } else if has(&["volume", "volumes", "cy", "cut", "fill", "quantity", "quantities"]) {
        "volume"
    } else if has(&["elevation", "elevations", "grade"]) {
        "elevation"
    } else if has(&["connection", "connections", "connects", "endpoint", "upstream", "downstream"]) {
        "connection"
    } else if has(&["id", "ids", "label", "labels", "type", "discipline"]) {
        "identification"
    } else {
        "general"
    }
}

/// Group name for a record field.
pub fn field_group(field: &str) -> &'static str {
    match field {
        "diameter_in" => "diameter",
        "invert_in_ft" | "invert_out_ft" => "invert",
        "rim_elevation_ft" => "rim",
        "depth_ft" => "depth",
        "length_ft" => "length",
        "material" => "material",
        "volume_cy" | "cut_cy" | "fill_cy" | "net_cy" => "volume",
        "from_id" | "to_id" => "connection",
        "id" | "kind" | "discipline" | "count" | "purpose" => "identification",
        _ => "general",
    }
}

fn push_unique(groups: &mut BTreeMap<String, Vec<String>>, group: &str, text: String) {
    let list = groups.entry(group.to_string()).or_default();
    if !list.iter().any(|t| t.eq_ignore_ascii_case(&text)) {
        list.push(text);
    }
}

fn record_uncertainties<R: Record>(records: &[R], groups: &mut BTreeMap<String, Vec<String>>) {
    for r in records {
        for (field, reason) in r.uncertain_fields() {
            push_unique(groups, field_group(field), format!("{}: {reason}", r.display_name()));
        }
    }
}

/// Roll the per-page quality notes up into a [`QualitySummary`].
pub fn summarize(pages: &[PageExtraction]) -> QualitySummary {
    let mut ordered: Vec<&PageExtraction> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_num);

    let mut tiers = TierCounts::default();
    let mut uncertainties: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut count_mismatches = 0;
    let mut structural_errors = 0;
    let mut weighted = 0.0;
    let mut weight_total = 0.0;
    let mut plain = 0.0;
    let mut triage: Vec<(f64, u32)> = Vec::new();

    for page in &ordered {
        let q = &page.quality;
        let confidence = q.effective_confidence();
        let weight = page.record_count() as f64;
        weighted += confidence * weight;
        weight_total += weight;
        plain += confidence;

        match q.effective_tier() {
            Completeness::High => tiers.high += 1,
            Completeness::Medium => tiers.medium += 1,
            Completeness::Low => tiers.low += 1,
        }

        for w in &q.warnings {
            match w {
                ParseWarning::CountMismatch { .. } => count_mismatches += 1,
                ParseWarning::StructuralParse { .. } | ParseWarning::ModelFailure { .. } => {
                    structural_errors += 1
                }
                ParseWarning::FieldParse { .. } => {}
            }
        }

        for text in &q.uncertainties {
            push_unique(&mut uncertainties, uncertainty_group(text), text.trim().to_string());
        }
        record_uncertainties(&page.pipes, &mut uncertainties);
        record_uncertainties(&page.structures, &mut uncertainties);
        record_uncertainties(&page.earthwork, &mut uncertainties);

        if q.has_errors()
            || q.effective_tier() == Completeness::Low
            || confidence < TRIAGE_CONFIDENCE_PCT
        {
            triage.push((confidence, page.page_num));
        }
    }

    let weighted_confidence_pct = if weight_total > 0.0 {
        weighted / weight_total
    } else if !ordered.is_empty() {
        plain / ordered.len() as f64
    } else {
        0.0
    };

    triage.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    QualitySummary {
        page_count: ordered.len(),
        weighted_confidence_pct,
        tiers,
        uncertainties,
        count_mismatches,
        structural_errors,
        triage_pages: triage.into_iter().map(|(_, p)| p).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::output::QualityNote;
    use crate::record::{Pipe, Structure};

    fn page(n: u32, tier: Option<Completeness>, conf: Option<f64>, records: usize) -> PageExtraction {
        PageExtraction {
            page_num: n,
            pipes: vec![Pipe::default(); records],
            quality: QualityNote {
                completeness: tier,
                confidence_pct: conf,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn weighted_by_records() {
        let pages = [
            page(1, Some(Completeness::High), Some(90.0), 3),
            page(2, Some(Completeness::Medium), Some(60.0), 1),
        ];
        let s = summarize(&pages);
        assert!((s.weighted_confidence_pct - 82.5).abs() < 1e-9);
        assert_eq!(s.tiers, TierCounts { high: 1, medium: 1, low: 0 });
        assert_eq!(s.page_count, 2);
    }

    #[test]
    fn no_records_falls_back_to_mean() {
        let pages = [
            page(1, Some(Completeness::High), Some(90.0), 0),
            page(2, Some(Completeness::Low), Some(50.0), 0),
        ];
        assert!((summarize(&pages).weighted_confidence_pct - 70.0).abs() < 1e-9);
        assert_eq!(summarize(&[]).weighted_confidence_pct, 0.0);
    }

    #[test]
    fn missing_note_counts_as_low_zero() {
        let pages = [
            page(1, Some(Completeness::High), Some(100.0), 1),
            page(2, None, None, 1),
        ];
        let s = summarize(&pages);
        assert!((s.weighted_confidence_pct - 50.0).abs() < 1e-9);
        assert_eq!(s.tiers.low, 1);
        assert_eq!(s.triage_pages, vec![2]);
    }

    #[test]
    fn uncertainties_grouped_and_deduplicated() {
        let mut p1 = page(1, Some(Completeness::Medium), Some(70.0), 0);
        p1.quality.uncertainties = vec![
            "Invert at MH-2 unclear".into(),
            "Pipe size on lateral".into(),
            "Sheet rotated".into(),
        ];
        let mut p2 = page(2, Some(Completeness::Medium), Some(70.0), 0);
        p2.quality.uncertainties = vec!["invert at MH-2 unclear".into()];
        p2.structures.push(Structure {
            id: Field::Value("MH-SS-1".into()),
            depth_ft: Field::uncertain("Not visible"),
            ..Default::default()
        });

        let s = summarize(&[p1, p2]);
        assert_eq!(s.uncertainties["invert"], vec!["Invert at MH-2 unclear"]);
        assert_eq!(s.uncertainties["diameter"], vec!["Pipe size on lateral"]);
        assert_eq!(s.uncertainties["general"], vec!["Sheet rotated"]);
        assert_eq!(s.uncertainties["depth"], vec!["MH-SS-1: Not visible"]);
    }

    #[test]
    fn warnings_are_counted() {
        let mut p = page(4, Some(Completeness::High), Some(95.0), 2);
        p.quality.warnings = vec![
            ParseWarning::CountMismatch {
                page: 4,
                section: "Pipes".into(),
                declared: 3,
                found: 2,
            },
            ParseWarning::FieldParse {
                page: 4,
                block: "P1".into(),
                raw: "x".into(),
            },
        ];
        let s = summarize(&[p]);
        assert_eq!(s.count_mismatches, 1);
        assert_eq!(s.structural_errors, 0);
        assert_eq!(s.triage_pages, vec![4]);
    }
}
