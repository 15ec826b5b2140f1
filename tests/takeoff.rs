//! Integration tests for the markdown → takeoff path.
//!
//! No model is involved: every test feeds page markdown through
//! `parse_document` / `parse_consolidated` and checks the assembled document.

use sitework_takeoff::{
    from_json, markdown_report, parse_consolidated, parse_document, to_json, Discipline,
    ExtractionConfig, Field, Material, MergePolicy, ParseWarning, Resolution,
};

// ── Fixtures ─────────────────────────────────────────────────────────────────

const PAGE_1: &str = "\
# Page 1 - Final Extraction

## Summary
- Total Pipes: 1
- Total Structures: 1
- Document Type: Sanitary sewer plan and profile

## Pipes
### Sanitary Pipe 1
- Diameter: 8 inches
- Material: PVC
- From: MH-SS-1
- To: MH-SS-2
- Length: 806.01 LF

## Structures
### Manhole 1: MH-SS-1
- Type: Manhole
- Discipline: Sanitary
- Rim Elevation: 745.0 ft
- Depth: [UNCERTAIN: Not visible]

## Quality Notes
- Completeness: High
- Uncertainties: Depth at MH-SS-1
- Extraction Confidence: 90%
";

const PAGE_2: &str = "\
## Summary
- Total Structures: 2

## Structures
### Manhole 1: MH-SS-1
- Type: Manhole
- Discipline: Sanitary
- Rim Elevation: 745.0 ft
- Depth: 3.0 ft

### Manhole 2: MH-SS-2
- Type: Manhole
- Discipline: Sanitary
- Rim Elevation: 741.2 ft

## Quality Notes
- Completeness: Medium
- Extraction Confidence: 90%
";

const DETAIL_SHEET: &str =
    "This is a standard detail sheet; no specific pipes are visible and no quantities are given.";

fn config() -> ExtractionConfig {
    ExtractionConfig::default()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[test]
fn declared_count_mismatch_is_reported() {
    let md = "\
## Summary
- Total Pipes: 4

## Pipes
### Storm Pipe 1
- Diameter: 12 inches
### Storm Pipe 2
- Diameter: 12 inches
### Storm Pipe 3
- Diameter: 15 inches
";
    let doc = parse_document([(1, md)], &config());
    assert_eq!(doc.pipes.len(), 3);
    assert_eq!(
        doc.pages[0].quality.warnings,
        vec![ParseWarning::CountMismatch {
            page: 1,
            section: "Pipes".into(),
            declared: 4,
            found: 3,
        }]
    );
    assert_eq!(doc.summary.quality.count_mismatches, 1);
}

#[test]
fn duplicate_manhole_takes_the_known_depth() {
    let doc = parse_document([(1, PAGE_1), (2, PAGE_2)], &config());

    let sanitary: Vec<_> = doc.structures_for(Discipline::Sanitary).collect();
    assert_eq!(sanitary.len(), 2);
    let mh1 = sanitary
        .iter()
        .find(|s| s.id == Field::Value("MH-SS-1".to_string()))
        .expect("MH-SS-1 merged");
    assert_eq!(mh1.depth_ft, Field::Value(3.0));
    assert_eq!(mh1.rim_elevation_ft, Field::Value(745.0));
    assert_eq!(mh1.source_pages, vec![1, 2]);

    let conflict = doc
        .conflicts
        .iter()
        .find(|c| c.field == "depth_ft")
        .expect("depth conflict recorded");
    assert_eq!(conflict.resolved_by, Resolution::Certainty);
    assert_eq!(conflict.kept_page, 2);
}

#[test]
fn more_confident_page_keeps_its_uncertain_depth() {
    let weaker = PAGE_2.replace("Extraction Confidence: 90%", "Extraction Confidence: 60%");
    let doc = parse_document([(1, PAGE_1), (2, weaker.as_str())], &config());

    let mh1 = doc
        .structures
        .iter()
        .find(|s| s.id == Field::Value("MH-SS-1".to_string()))
        .expect("MH-SS-1 merged");
    assert_eq!(mh1.depth_ft, Field::uncertain("Not visible"));

    let conflict = doc
        .conflicts
        .iter()
        .find(|c| c.field == "depth_ft")
        .expect("depth conflict recorded");
    assert_eq!(conflict.resolved_by, Resolution::Confidence);
    assert_eq!(conflict.kept_page, 1);
}

#[test]
fn pipe_fields_parse_exactly() {
    let doc = parse_document([(1, PAGE_1)], &config());
    let pipe = &doc.pipes[0];
    assert_eq!(pipe.diameter_in, Field::Value(8.0));
    assert_eq!(pipe.material, Field::Value(Material::Pvc));
    assert_eq!(pipe.length_ft, Field::Value(806.01));
    assert_eq!(pipe.from_id, Field::Value("MH-SS-1".to_string()));
    assert_eq!(doc.summary.total_linear_ft, 806.01);
}

#[test]
fn prose_negative_page_has_no_records_and_no_error() {
    let doc = parse_document([(4, DETAIL_SHEET)], &config());
    assert!(doc.pipes.is_empty());
    assert!(doc.structures.is_empty());
    assert!(doc.earthwork.is_empty());
    let page = doc.page(4).expect("page kept");
    assert!(!page.quality.has_errors(), "{:?}", page.quality.warnings);
    assert_eq!(doc.summary.quality.structural_errors, 0);
}

#[test]
fn uncertainty_reason_is_kept_verbatim() {
    let doc = parse_document([(1, PAGE_1)], &config());
    assert_eq!(doc.structures[0].depth_ft, Field::uncertain("Not visible"));
}

#[test]
fn absent_sections_are_empty_lists() {
    let doc = parse_document([(2, PAGE_2)], &config());
    assert!(doc.pipes.is_empty());
    assert!(doc.earthwork.is_empty());
    assert!(doc.pages[0].quality.warnings.is_empty());
}

// ── Document properties ─────────────────────────────────────────────────────

#[test]
fn repeated_page_does_not_change_the_result() {
    let once = parse_document([(1, PAGE_1), (2, PAGE_2)], &config());
    let twice = parse_document([(1, PAGE_1), (2, PAGE_2), (2, PAGE_2)], &config());
    assert_eq!(once, twice);
}

#[test]
fn page_order_does_not_matter() {
    let forward = parse_document([(1, PAGE_1), (2, PAGE_2)], &config());
    let reverse = parse_document([(2, PAGE_2), (1, PAGE_1)], &config());
    assert_eq!(forward, reverse);
}

#[test]
fn json_round_trip_is_lossless() {
    let doc = parse_document([(1, PAGE_1), (2, PAGE_2), (3, DETAIL_SHEET)], &config());
    let json = to_json(&doc).unwrap();
    assert_eq!(from_json(&json).unwrap(), doc);
}

#[test]
fn adjacent_page_resolves_pipe_endpoint() {
    let alone = parse_document([(1, PAGE_1)], &config());
    assert_eq!(alone.unresolved_references.len(), 1);
    assert_eq!(alone.unresolved_references[0].structure_id, "MH-SS-2");

    let together = parse_document([(1, PAGE_1), (2, PAGE_2)], &config());
    assert!(together.unresolved_references.is_empty());
}

#[test]
fn consolidated_document_matches_per_page_input() {
    let consolidated = format!(
        "# Construction Document Extraction\n\n---\n\n# Page 1\n\n{PAGE_1}\n---\n\n# Page 2\n\n{PAGE_2}\n---\n"
    );
    let split = parse_consolidated(&consolidated, &config());
    assert_eq!(split.pages.len(), 2);
    assert_eq!(split.summary.total_structures, 2);
    assert_eq!(split.pipes.len(), 1);
    assert_eq!(split.structures[0].depth_ft, Field::Value(3.0));
}

#[test]
fn merge_policy_changes_the_winner() {
    let p1 = "## Structures\n### MH-ST-4\n- Discipline: Storm\n- Rim: 101.25\n## Quality Notes\n- Extraction Confidence: 95%\n";
    let p2 = "## Structures\n### MH-ST-4\n- Discipline: Storm\n- Rim: 101.3\n## Quality Notes\n- Extraction Confidence: 40%\n";

    let by_confidence = parse_document([(1, p1), (2, p2)], &config());
    assert_eq!(by_confidence.structures[0].rim_elevation_ft, Field::Value(101.25));

    let recent = ExtractionConfig::builder()
        .merge_policy(MergePolicy::MostRecent)
        .build()
        .unwrap();
    let by_recency = parse_document([(1, p1), (2, p2)], &recent);
    assert_eq!(by_recency.structures[0].rim_elevation_ft, Field::Value(101.3));
}

#[test]
fn extra_negative_phrase_suppresses_a_block() {
    let md = "## Pipes\n### Pipe 3\nRefer to sheet C-5 for this run.\n";
    let plain = parse_document([(1, md)], &config());
    assert_eq!(plain.pipes.len(), 1);

    let custom = ExtractionConfig::builder()
        .negative_phrase("refer to sheet")
        .build()
        .unwrap();
    let filtered = parse_document([(1, md)], &custom);
    assert!(filtered.pipes.is_empty());
}

#[test]
fn report_is_built_from_the_document() {
    let doc = parse_document([(1, PAGE_1), (2, PAGE_2)], &config());
    let report = markdown_report(&doc);
    assert!(report.contains("| Structures | 2 |"));
    assert!(report.contains("MH-SS-1"));
    assert!(report.contains("## Merge Conflicts"));
}
