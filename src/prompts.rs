//! Prompts for the takeoff vision passes.
//!
//! Every prompt asks for the same markdown dialect, the one
//! [`crate::pipeline::sections`] parses: `## Pipes` / `## Structures` /
//! `## Earthwork` sections, one `###` heading per item, and `- Label: value`
//! bullets underneath. [`RECORD_FORMAT`] is the single copy of that contract.

use crate::notation::NotationLookup;

/// System prompt for the overview pass.
pub const OVERVIEW_SYSTEM_PROMPT: &str =
    "You are a construction document analyst creating page overviews for quantity takeoff.";

/// System prompt for each section pass.
pub const SECTION_SYSTEM_PROMPT: &str =
    "You are a construction data extractor analysing one part of a drawing sheet.";

/// System prompt for the text-only merge pass.
pub const MERGE_SYSTEM_PROMPT: &str =
    "You are an expert at consolidating construction data extractions into one clean record set.";

/// System prompt for single-pass mode.
pub const SINGLE_PASS_SYSTEM_PROMPT: &str =
    "You are a sitework estimator with a civil engineering background extracting takeoff data from drawings.";

/// The record layout every extraction prompt asks for.
pub const RECORD_FORMAT: &str = r#"## Pipes
### [Discipline] Pipe 1
- Diameter: [X] inches
- Material: [PVC/DIP/RCP/HDPE/etc.]
- Discipline: [Sanitary/Storm/Water]
- Type: [Pipe/Lateral/Vertical]
- From: [Structure ID or location]
- To: [Structure ID or location]
- Invert In: [elevation] ft
- Invert Out: [elevation] ft
- Length: [X] LF
- Depth: [X] ft
- Count: [number, laterals only]

## Structures
### [Type] 1: [ID]
- ID: [Structure identifier]
- Type: [Manhole/Catch Basin/Cleanout/etc.]
- Discipline: [Sanitary/Storm/Water]
- Rim Elevation: [X] ft
- Invert In: [X] ft
- Invert Out: [X] ft
- Depth: [X] ft

## Earthwork
### [Type] 1
- Type: [Site Grading/Trench/Excavation/Cut/Fill]
- Volume: [X] cubic yards
- Cut: [X] cubic yards
- Fill: [X] cubic yards
- Depth: [X] ft
- Length: [X] LF
- Purpose: [Description]"#;

/// Rules appended to every extraction prompt.
const EXTRACTION_RULES: &str = r#"**RULES**:
- One `###` heading per item, one `- Label: value` bullet per field
- Include every visible measurement and elevation with its unit
- Mark anything you cannot read with [UNCERTAIN: reason]
- If a section has nothing, write one sentence saying so (e.g. "No specific pipes are visible")
- Do NOT wrap the answer in ```markdown fences"#;

/// Firm examples and notation guide rendered as one prompt block.
///
/// Returns an empty string when neither is available.
pub fn reference_context(firm_examples: Option<&str>, notation: Option<&dyn NotationLookup>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(examples) = firm_examples.map(str::trim).filter(|e| !e.is_empty()) {
        parts.push(examples.to_string());
    }
    if let Some(guide) = notation.and_then(|n| n.prompt_context()) {
        parts.push(guide.trim_end().to_string());
    }
    parts.join("\n\n")
}

/// Pass 1: describe the page so the section passes know what to look for.
pub fn overview_prompt(page_num: u32, total_pages: usize, context: &str) -> String {
    format!(
        r#"You are analysing page {page_num} of {total_pages} from a construction sitework drawing set.

**YOUR TASK**: Write an overview of this page to guide detailed extraction.

{context}

Cover:
1. Document type (plan view, profile view, grading plan, detail, legend) and discipline
2. Page layout, e.g. "top half: plan view, bottom half: profile"
3. Utilities, structures, tables and quantity schedules present
4. How the views relate (which profile matches which plan run)
5. Abbreviations and callouts used

**OUTPUT FORMAT** (Markdown):

# Page {page_num} Overview

## Document Type
## Layout Description
## Content Summary
## Spatial Organization
## Key Notations & Abbreviations
## Extraction Strategy
"#
    )
}

/// Pass 2: extract one section of the page with everything learned so far.
pub fn section_prompt(
    page_num: u32,
    section: &str,
    overview: &str,
    context: &str,
    previous_sections: &[String],
) -> String {
    let previous = if previous_sections.is_empty() {
        "This is the first section.".to_string()
    } else {
        previous_sections.join("\n\n")
    };
    format!(
        r#"You are performing DETAILED EXTRACTION from one section of page {page_num}.

**SECTION TO ANALYSE**: {section}

---

**CONTEXT FROM OVERVIEW**:
{overview}

---

{context}

---

**PREVIOUS SECTIONS EXTRACTED**:
{previous}

---

Extract ALL structured data from this section only. Use the overview and the
previous sections to resolve connections: if a pipe in this view runs between
structures drawn elsewhere, name those structures.

**OUTPUT FORMAT**:

# Section: {section}

{RECORD_FORMAT}

## Notes
[Observations, unclear items, cross-references to other sections]

{EXTRACTION_RULES}
"#
    )
}

/// Pass 3: consolidate the section extractions, text only.
pub fn merge_prompt(page_num: u32, overview: &str, sections: &[String], context: &str) -> String {
    let sections_text = sections
        .iter()
        .enumerate()
        .map(|(i, s)| format!("## Section {}\n{}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    format!(
        r#"You are consolidating several section extractions from page {page_num} into one.

---

**OVERVIEW CONTEXT**:
{overview}

---

**SECTION EXTRACTIONS**:
{sections_text}

---

{context}

---

**MERGE STRATEGY**:
1. The same item in several sections appears once, with the most complete data
2. Items that are only similar stay separate; note the doubt under Quality Notes
3. Connect items across views (profile runs to plan structures)
4. Count the final items and report the counts in the Summary

**OUTPUT FORMAT**:

# Page {page_num} - Final Extraction

## Summary
- Total Pipes: [count]
- Total Structures: [count]
- Total Earthwork Items: [count]
- Document Type: [from overview]

{RECORD_FORMAT}

## Cross-Section Relationships
- [e.g. "Pipe 1 from the plan view connects MH-1 to MH-2 shown in the profile"]

## Quality Notes
- Completeness: [High/Medium/Low]
- Uncertainties: [unclear items, separated by semicolons]
- Extraction Confidence: [0-100%]

{EXTRACTION_RULES}
"#
    )
}

/// Single-pass mode: one prompt per page asking for the final layout directly.
pub fn single_pass_prompt(page_num: u32, total_pages: usize, context: &str) -> String {
    format!(
        r#"This is page {page_num} of {total_pages} of a construction drawing set.

{context}

Extract every pipe, structure and earthwork quantity you can see, with
diameters, materials, connections, lengths, depths and elevations.

**OUTPUT FORMAT**:

## Summary
- Total Pipes: [count]
- Total Structures: [count]
- Total Earthwork Items: [count]
- Document Type: [plan view / profile / grading / detail]

{RECORD_FORMAT}

## Quality Notes
- Completeness: [High/Medium/Low]
- Uncertainties: [unclear items, separated by semicolons]
- Extraction Confidence: [0-100%]

{EXTRACTION_RULES}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::NotationGuide;

    #[test]
    fn record_format_uses_parser_sections() {
        for heading in ["## Pipes", "## Structures", "## Earthwork"] {
            assert!(RECORD_FORMAT.contains(heading));
        }
        assert!(EXTRACTION_RULES.contains("[UNCERTAIN: reason]"));
    }

    #[test]
    fn merge_prompt_numbers_sections() {
        let p = merge_prompt(2, "overview", &["a".into(), "b".into()], "");
        assert!(p.contains("## Section 1\na"));
        assert!(p.contains("## Section 2\nb"));
        assert!(p.contains("## Quality Notes"));
        assert!(p.contains("# Page 2 - Final Extraction"));
    }

    #[test]
    fn first_section_has_no_previous() {
        let p = section_prompt(1, "Profile view (bottom section)", "ov", "", &[]);
        assert!(p.contains("This is the first section."));
        assert!(p.contains("# Section: Profile view (bottom section)"));
    }

    #[test]
    fn context_combines_examples_and_notation() {
        let guide = NotationGuide::sitework();
        let ctx = reference_context(Some("# Hagen Examples\n"), Some(&guide));
        assert!(ctx.starts_with("# Hagen Examples"));
        assert!(ctx.contains("## Common Abbreviations"));
        assert_eq!(reference_context(None, None), "");
        assert_eq!(reference_context(Some("  "), Some(&NotationGuide::new())), "");
    }

    #[test]
    fn single_pass_asks_for_summary_counts() {
        let p = single_pass_prompt(1, 4, "");
        assert!(p.contains("page 1 of 4"));
        assert!(p.contains("- Total Pipes: [count]"));
    }
}
