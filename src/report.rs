//! Output writers: JSON and a human-readable markdown report.
//!
//! Both are generated from a [`DocumentExtraction`] alone; nothing is
//! re-parsed. The JSON is the document's serde form, so [`from_json`] of
//! [`to_json`] gives back an equal value.

use crate::error::TakeoffError;
use crate::field::Field;
use crate::output::{DocumentExtraction, Endpoint};
use crate::record::Record;
use std::fmt::{self, Write as _};

/// Pretty-printed JSON for a document.
pub fn to_json(doc: &DocumentExtraction) -> Result<String, TakeoffError> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Load a document previously written by [`to_json`].
pub fn from_json(json: &str) -> Result<DocumentExtraction, TakeoffError> {
    Ok(serde_json::from_str(json)?)
}

fn cell(text: impl fmt::Display) -> String {
    text.to_string().replace('|', "\\|").replace('\n', " ")
}

fn num(f: &Field<f64>) -> String {
    match f {
        Field::Value(v) => format!("{v}"),
        other => cell(other),
    }
}

fn pages(p: &[u32]) -> String {
    p.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
}

/// Render the markdown report.
pub fn markdown_report(doc: &DocumentExtraction) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_report(&mut out, doc);
    out
}

fn write_report(out: &mut String, doc: &DocumentExtraction) -> fmt::Result {
    let s = &doc.summary;
    let q = &s.quality;

    writeln!(out, "# Takeoff Report\n")?;

    // ── Summary ──────────────────────────────────────────────────────────
    writeln!(out, "## Summary\n")?;
    writeln!(out, "| Item | Value |")?;
    writeln!(out, "|------|-------|")?;
    writeln!(out, "| Pages | {} |", q.page_count)?;
    writeln!(out, "| Pipes | {} |", s.total_pipes)?;
    writeln!(out, "| Structures | {} |", s.total_structures)?;
    writeln!(out, "| Earthwork items | {} |", s.total_earthwork)?;
    writeln!(out, "| Total linear feet | {:.2} |", s.total_linear_ft)?;
    for (discipline, lf) in &s.linear_ft_by_discipline {
        writeln!(out, "| {} LF | {:.2} |", discipline, lf)?;
    }
    writeln!(out, "| Merge conflicts | {} |", s.conflicts)?;
    writeln!(out, "| Unresolved references | {} |", s.unresolved_references)?;

    // ── Quality ──────────────────────────────────────────────────────────
    writeln!(out, "\n## Quality\n")?;
    writeln!(out, "- Weighted confidence: {:.1}%", q.weighted_confidence_pct)?;
    writeln!(
        out,
        "- Pages by completeness: {} High, {} Medium, {} Low",
        q.tiers.high, q.tiers.medium, q.tiers.low
    )?;
    writeln!(out, "- Count mismatches: {}", q.count_mismatches)?;
    writeln!(out, "- Structural errors: {}", q.structural_errors)?;
    if q.triage_pages.is_empty() {
        writeln!(out, "- Pages needing review: none")?;
    } else {
        writeln!(out, "- Pages needing review: {}", pages(&q.triage_pages))?;
    }
    if !q.uncertainties.is_empty() {
        writeln!(out, "\n### Uncertainties\n")?;
        for (group, reasons) in &q.uncertainties {
            writeln!(out, "- **{}**", group)?;
            for r in reasons {
                writeln!(out, "  - {}", r)?;
            }
        }
    }

    // ── Records ──────────────────────────────────────────────────────────
    if !doc.pipes.is_empty() {
        writeln!(out, "\n## Pipes\n")?;
        writeln!(
            out,
            "| Pipe | Discipline | Dia (in) | Material | From | To | Length (ft) | Count | Depth (ft) | Pages |"
        )?;
        writeln!(out, "|---|---|---|---|---|---|---|---|---|---|")?;
        for p in &doc.pipes {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                cell(&p.label),
                cell(&p.discipline),
                num(&p.diameter_in),
                cell(&p.material),
                cell(&p.from_id),
                cell(&p.to_id),
                num(&p.length_ft),
                cell(&p.count),
                num(&p.depth_ft),
                pages(&p.source_pages)
            )?;
        }
    }

    if !doc.structures.is_empty() {
        writeln!(out, "\n## Structures\n")?;
        writeln!(
            out,
            "| ID | Type | Discipline | Rim (ft) | Inv In (ft) | Inv Out (ft) | Depth (ft) | Pages |"
        )?;
        writeln!(out, "|---|---|---|---|---|---|---|---|")?;
        for st in &doc.structures {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} | {} |",
                cell(st.display_name()),
                cell(&st.kind),
                cell(&st.discipline),
                num(&st.rim_elevation_ft),
                num(&st.invert_in_ft),
                num(&st.invert_out_ft),
                num(&st.depth_ft),
                pages(&st.source_pages)
            )?;
        }
    }

    if !doc.earthwork.is_empty() {
        writeln!(out, "\n## Earthwork\n")?;
        writeln!(
            out,
            "| Item | Type | Volume (CY) | Cut (CY) | Fill (CY) | Net (CY) | Depth (ft) | Pages |"
        )?;
        writeln!(out, "|---|---|---|---|---|---|---|---|")?;
        for e in &doc.earthwork {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} | {} |",
                cell(&e.label),
                cell(&e.kind),
                num(&e.volume_cy),
                num(&e.cut_cy),
                num(&e.fill_cy),
                num(&e.net_cy),
                num(&e.depth_ft),
                pages(&e.source_pages)
            )?;
        }
    }

    // ── Review items ─────────────────────────────────────────────────────
    if !doc.conflicts.is_empty() {
        writeln!(out, "\n## Merge Conflicts\n")?;
        for c in &doc.conflicts {
            let discarded = c
                .discarded
                .iter()
                .map(|(page, v)| format!("{v} (p{page})"))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                out,
                "- {} `{}` {}: kept {} (p{}) over {} by {:?}",
                c.record, c.key, c.field, c.kept, c.kept_page, discarded, c.resolved_by
            )?;
        }
    }

    if !doc.unresolved_references.is_empty() {
        writeln!(out, "\n## Unresolved References\n")?;
        for r in &doc.unresolved_references {
            let end = match r.endpoint {
                Endpoint::From => "from",
                Endpoint::To => "to",
            };
            writeln!(
                out,
                "- Page {}: {} {} `{}` not found on this or adjacent pages",
                r.page, r.pipe, end, r.structure_id
            )?;
        }
    }

    // ── Pages ────────────────────────────────────────────────────────────
    if !doc.pages.is_empty() {
        writeln!(out, "\n## Pages\n")?;
        writeln!(out, "| Page | Type | Records | Completeness | Confidence | Warnings |")?;
        writeln!(out, "|---|---|---|---|---|---|")?;
        for page in &doc.pages {
            let confidence = page
                .quality
                .confidence_pct
                .map_or_else(|| "—".to_string(), |c| format!("{c:.0}%"));
            let tier = page
                .quality
                .completeness
                .map_or_else(|| "—".to_string(), |t| t.to_string());
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                page.page_num,
                cell(page.document_type.as_deref().unwrap_or("—")),
                page.record_count(),
                tier,
                confidence,
                page.quality.warnings.len()
            )?;
        }

        let warned: Vec<_> = doc
            .pages
            .iter()
            .flat_map(|p| p.quality.warnings.iter())
            .filter(|w| w.is_error())
            .collect();
        if !warned.is_empty() {
            writeln!(out, "\n### Warnings\n")?;
            for w in warned {
                writeln!(out, "- {}", w)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseWarning;
    use crate::output::{Completeness, PageExtraction, QualityNote};
    use crate::pipeline::assemble::assemble;
    use crate::pipeline::reconcile::MergePolicy;
    use crate::record::{Discipline, Material, Pipe, Structure};

    fn sample() -> DocumentExtraction {
        let page = PageExtraction {
            page_num: 1,
            document_type: Some("Profile".into()),
            pipes: vec![Pipe {
                label: "Sanitary Pipe 1".into(),
                discipline: Field::Value(Discipline::Sanitary),
                diameter_in: Field::Value(8.0),
                material: Field::Value(Material::Pvc),
                from_id: Field::Value("MH-SS-1".into()),
                to_id: Field::Value("MH-SS-2".into()),
                length_ft: Field::Value(806.01),
                source_pages: vec![1],
                ..Default::default()
            }],
            structures: vec![Structure {
                label: "Sanitary Manhole".into(),
                id: Field::Value("MH-SS-1".into()),
                depth_ft: Field::uncertain("Not visible"),
                source_pages: vec![1],
                ..Default::default()
            }],
            quality: QualityNote {
                completeness: Some(Completeness::Medium),
                confidence_pct: Some(80.0),
                uncertainties: vec![],
                warnings: vec![ParseWarning::CountMismatch {
                    page: 1,
                    section: "Pipes".into(),
                    declared: 2,
                    found: 1,
                }],
            },
            ..Default::default()
        };
        assemble(vec![page], MergePolicy::default())
    }

    #[test]
    fn report_lists_records_and_quality() {
        let md = markdown_report(&sample());
        assert!(md.starts_with("# Takeoff Report"));
        assert!(md.contains("| Total linear feet | 806.01 |"));
        assert!(md.contains("| Sanitary LF | 806.01 |"));
        assert!(md.contains("| Sanitary Pipe 1 | Sanitary | 8 | PVC | MH-SS-1 | MH-SS-2 | 806.01 |"));
        assert!(md.contains("UNCERTAIN: Not visible"));
        assert!(md.contains("MH-SS-2` not found"));
        assert!(md.contains("declared 2 but 1 were found"));
        assert!(md.contains("- Pages needing review: 1"));
    }

    #[test]
    fn json_round_trip() {
        let doc = sample();
        let json = to_json(&doc).unwrap();
        assert!(json.contains("\"diameter_in\": 8.0"));
        assert!(json.contains("\"uncertain\": \"Not visible\""));
        assert_eq!(from_json(&json).unwrap(), doc);
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(matches!(from_json("{"), Err(TakeoffError::Json(_))));
    }

    #[test]
    fn cells_escape_pipes() {
        assert_eq!(cell("a|b\nc"), "a\\|b c");
    }
}
