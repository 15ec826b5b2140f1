//! Section parsing: one page of markdown → sections → item blocks → records.
//!
//! The expected shape is the one the prompts ask for:
//!
//! ```text
//! # Page 3 - Final Extraction
//! ## Summary            - Total Pipes: 2 …
//! ## Pipes
//! ### Sanitary Pipe 1   ← one item block per sub-heading
//! - Diameter: 8 inches
//! ## Structures
//! ## Earthwork
//! ## Cross-Section Relationships
//! ## Quality Notes      - Completeness / Uncertainties / Extraction Confidence
//! ```
//!
//! Models drift from it. Heading depth varies between pages, sections repeat
//! when several section passes are concatenated, items are sometimes written
//! as bold lines or as a table, and an empty section is usually prose such as
//! "No specific pipes are visible on this sheet". Each of those is tolerated
//! here; the only hard failure is a page with no heading structure at all,
//! which becomes an empty Low / 0 % page with a `StructuralParse` warning.

use crate::error::ParseWarning;
use crate::notation::NotationLookup;
use crate::output::{Completeness, DeclaredCounts, PageExtraction, QualityNote};
use crate::pipeline::clean::{clean_markdown, is_separator_row, is_table_row, table_cells};
use crate::pipeline::fields::{
    classify_earthwork_kind, classify_pipe_kind, classify_structure_kind, extract_earthwork,
    extract_pipe, extract_structure, find_uncertainty, normalize_label, FieldContext,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

// ── Types ────────────────────────────────────────────────────────────────────

/// The sections a page can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    Summary,
    Pipes,
    Structures,
    Earthwork,
    Relationships,
    Quality,
    Notes,
}

impl SectionKind {
    /// Sections whose body is a list of records.
    pub fn holds_records(self) -> bool {
        matches!(
            self,
            SectionKind::Pipes | SectionKind::Structures | SectionKind::Earthwork
        )
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SectionKind::Summary => "Summary",
            SectionKind::Pipes => "Pipes",
            SectionKind::Structures => "Structures",
            SectionKind::Earthwork => "Earthwork",
            SectionKind::Relationships => "Cross-Section Relationships",
            SectionKind::Quality => "Quality Notes",
            SectionKind::Notes => "Notes",
        })
    }
}

/// A heading plus the raw lines under it, up to the next heading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemBlock {
    pub heading: Option<String>,
    pub lines: Vec<String>,
}

impl ItemBlock {
    fn text(&self) -> String {
        let mut s = self.heading.clone().unwrap_or_default();
        for l in &self.lines {
            s.push('\n');
            s.push_str(l);
        }
        s
    }

    fn has_labelled_bullet(&self) -> bool {
        self.lines.iter().any(|l| RE_LABELLED.is_match(l))
    }
}

/// Sections found on one page.
///
/// Record sections hold one block per item. Every other section holds a
/// single block with all of its lines.
#[derive(Debug, Clone, Default)]
pub struct Sections {
    blocks: BTreeMap<SectionKind, Vec<ItemBlock>>,
    /// Number of markdown headings seen, recognised or not.
    pub heading_count: usize,
    /// Prose that no section claimed, or record-section prose that was not
    /// an item. Surfaces as page notes.
    pub loose: Vec<String>,
}

impl Sections {
    /// Item blocks of a section; empty when the section was not present.
    pub fn get(&self, kind: SectionKind) -> &[ItemBlock] {
        self.blocks.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, kind: SectionKind) -> bool {
        self.blocks.contains_key(&kind)
    }

    /// All lines of a non-record section, in order.
    fn lines(&self, kind: SectionKind) -> impl Iterator<Item = &str> {
        self.get(kind)
            .iter()
            .flat_map(|b| b.lines.iter().map(String::as_str))
    }

    fn any_known(&self) -> bool {
        !self.blocks.is_empty()
    }
}

// ── Negative lexicon ─────────────────────────────────────────────────────────

/// Phrases that mark a section body as "nothing here".
#[derive(Debug, Clone)]
pub struct NegativeLexicon {
    phrases: Vec<String>,
}

const DEFAULT_NEGATIVES: &[&str] = &[
    "no specific pipes",
    "no specific structures",
    "no specific earthwork",
    "no pipes",
    "no structures",
    "no earthwork",
    "no items",
    "no visible",
    "not detailed",
    "not visible",
    "not shown",
    "not identified",
    "not applicable",
    "not provided",
    "not included",
    "none visible",
    "none shown",
    "none found",
    "none identified",
    "none",
    "n a",
    "nothing",
];

impl Default for NegativeLexicon {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_NEGATIVES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl NegativeLexicon {
    /// The built-in phrases plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lex = Self::default();
        for p in extra {
            let p = normalize_label(p.as_ref());
            if !p.is_empty() && !lex.phrases.contains(&p) {
                lex.phrases.push(p);
            }
        }
        lex
    }

    /// Whether `text` says there is nothing to extract.
    pub fn matches(&self, text: &str) -> bool {
        let padded = format!(" {} ", normalize_label(text));
        self.phrases
            .iter()
            .any(|p| padded.contains(&format!(" {p} ")))
    }

    /// Whether `text` is nothing but a negative phrase: "None", "N/A".
    pub fn is_bare(&self, text: &str) -> bool {
        let norm = normalize_label(text);
        self.phrases.iter().any(|p| *p == norm)
    }

    /// Whether every sentence of `text` is negative. A single real
    /// observation ("Rim at MH-2 not visible" after a described main) makes
    /// the prose content.
    pub fn is_negative_prose(&self, text: &str) -> bool {
        let mut sentences = RE_SENTENCE_END
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .peekable();
        sentences.peek().is_some() && sentences.all(|s| self.matches(s))
    }
}

static RE_SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?](?:\s+|$)|\n").unwrap());

// ── Splitting ────────────────────────────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s{0,3}(#{1,6})\s+(.*?)\s*#*\s*$").unwrap());

static RE_LABELLED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d{1,3}[.)])\s+\**[^:\[\]]{1,48}?\**\s*:").unwrap());

static RE_BOLD_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:[-*+]|\d{1,3}[.)])\s+)?\*\*([^*:]+)\*\*\s*((?:[-–(].*)?)$").unwrap()
});

static RE_LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[.)]?\s+").unwrap());

const SECTION_NAMES: &[(&str, SectionKind)] = &[
    ("summary", SectionKind::Summary),
    ("page summary", SectionKind::Summary),
    ("extraction summary", SectionKind::Summary),
    ("totals", SectionKind::Summary),
    ("pipes", SectionKind::Pipes),
    ("piping", SectionKind::Pipes),
    ("pipe runs", SectionKind::Pipes),
    ("pipelines", SectionKind::Pipes),
    ("utility lines", SectionKind::Pipes),
    ("pipes and laterals", SectionKind::Pipes),
    ("structures", SectionKind::Structures),
    ("manholes", SectionKind::Structures),
    ("manholes and catch basins", SectionKind::Structures),
    ("drainage structures", SectionKind::Structures),
    ("earthwork", SectionKind::Earthwork),
    ("earthworks", SectionKind::Earthwork),
    ("earthwork items", SectionKind::Earthwork),
    ("earthwork quantities", SectionKind::Earthwork),
    ("excavation and grading", SectionKind::Earthwork),
    ("cut and fill", SectionKind::Earthwork),
    ("cross section relationships", SectionKind::Relationships),
    ("relationships", SectionKind::Relationships),
    ("connections", SectionKind::Relationships),
    ("cross references", SectionKind::Relationships),
    ("quality notes", SectionKind::Quality),
    ("quality", SectionKind::Quality),
    ("quality assessment", SectionKind::Quality),
    ("extraction quality", SectionKind::Quality),
    ("notes", SectionKind::Notes),
    ("general notes", SectionKind::Notes),
    ("additional notes", SectionKind::Notes),
    ("observations", SectionKind::Notes),
    ("remarks", SectionKind::Notes),
];

/// Names that also count with a qualifier in front ("Storm Pipes").
const QUALIFIED_SUFFIXES: &[(&str, SectionKind)] = &[
    ("pipes", SectionKind::Pipes),
    ("structures", SectionKind::Structures),
    ("earthwork", SectionKind::Earthwork),
    ("summary", SectionKind::Summary),
];

fn lookup_section(norm: &str) -> Option<SectionKind> {
    SECTION_NAMES
        .iter()
        .find(|(name, _)| *name == norm)
        .map(|(_, k)| *k)
}

/// Which section a heading opens, if any.
pub fn section_kind(heading: &str) -> Option<SectionKind> {
    let text = RE_LEADING_NUMBER.replace(heading.trim(), "");
    let norm = normalize_label(&text);
    if let Some(kind) = lookup_section(&norm) {
        return Some(kind);
    }
    // "Pipes (Plan View)", "Structures: Sheet C-3"
    let head = text
        .split([':', '(', '–', '—'])
        .next()
        .unwrap_or_default()
        .split(" - ")
        .next()
        .unwrap_or_default();
    let head_norm = normalize_label(head);
    if head_norm != norm {
        if let Some(kind) = lookup_section(&head_norm) {
            return Some(kind);
        }
    }
    let words: Vec<&str> = head_norm.split(' ').collect();
    if (2..=3).contains(&words.len()) {
        let last = words[words.len() - 1];
        return QUALIFIED_SUFFIXES
            .iter()
            .find(|(name, _)| *name == last)
            .map(|(_, k)| *k);
    }
    None
}

/// A same-or-shallower heading that still reads as an item of `kind`.
fn looks_like_item(kind: SectionKind, heading: &str) -> bool {
    match kind {
        SectionKind::Pipes => classify_pipe_kind(heading).is_some(),
        SectionKind::Structures => classify_structure_kind(heading).is_some(),
        SectionKind::Earthwork => classify_earthwork_kind(heading).is_some(),
        _ => false,
    }
}

struct Open {
    kind: SectionKind,
    level: usize,
    item_level: Option<usize>,
    preamble: Vec<String>,
    items: Vec<ItemBlock>,
}

/// Cut a page into sections and item blocks.
pub fn split_sections(markdown: &str, negatives: &NegativeLexicon) -> Sections {
    let mut out = Sections::default();
    let mut open: Option<Open> = None;
    let mut in_fence = false;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        let heading = if in_fence {
            None
        } else {
            RE_HEADING
                .captures(line)
                .map(|c| (c[1].len(), c[2].trim().to_string()))
        };

        let Some((level, text)) = heading else {
            match open.as_mut() {
                Some(o) => match o.items.last_mut() {
                    Some(item) => item.lines.push(line.to_string()),
                    None => o.preamble.push(line.to_string()),
                },
                None => {
                    if !line.trim().is_empty() {
                        out.loose.push(line.trim().to_string());
                    }
                }
            }
            continue;
        };
        out.heading_count += 1;

        if let Some(kind) = section_kind(&text) {
            close(&mut out, open.take(), negatives);
            open = Some(Open {
                kind,
                level,
                item_level: None,
                preamble: Vec::new(),
                items: Vec::new(),
            });
            continue;
        }

        match open.as_mut() {
            // Detail headings inside an item stay with the item
            Some(o) if o.item_level.is_some_and(|il| level > il) && !o.items.is_empty() => {
                if let Some(item) = o.items.last_mut() {
                    item.lines.push(text);
                }
            }
            Some(o)
                if o.kind.holds_records()
                    && (level > o.level || (level > 1 && looks_like_item(o.kind, &text))) =>
            {
                o.item_level = Some(level);
                o.items.push(ItemBlock {
                    heading: Some(text),
                    lines: Vec::new(),
                });
            }
            // Sub-headings inside Summary / Notes are just more lines
            Some(o) if level > o.level => o.preamble.push(text),
            _ => {
                close(&mut out, open.take(), negatives);
                if level > 1 {
                    debug!(heading = %text, "Unrecognised section heading");
                }
            }
        }
    }
    close(&mut out, open, negatives);
    out
}

fn close(out: &mut Sections, open: Option<Open>, negatives: &NegativeLexicon) {
    let Some(o) = open else { return };
    let entry = out.blocks.entry(o.kind).or_default();

    if !o.kind.holds_records() {
        let mut lines = o.preamble;
        for item in o.items {
            lines.extend(item.heading);
            lines.extend(item.lines);
        }
        entry.push(ItemBlock {
            heading: Some(o.kind.to_string()),
            lines,
        });
        return;
    }

    let (mut blocks, prose) = blocks_from_body(&o.preamble);
    blocks.extend(o.items);

    // Prose-only item blocks saying "none" are not records
    blocks.retain(|b| b.has_labelled_bullet() || !negatives.matches(&b.text()));

    let prose_text = prose.join(" ");
    if !prose_text.trim().is_empty() {
        if negatives.is_negative_prose(&prose.join("\n")) {
            debug!(section = %o.kind, "Section body says nothing to extract");
        } else {
            debug!(section = %o.kind, "Section prose kept as a note");
            out.loose.extend(prose);
        }
    }
    entry.extend(blocks);
}

/// Items written without sub-headings: a table, bold lead lines, or bare
/// bullets. Returns the blocks and any leftover prose.
fn blocks_from_body(lines: &[String]) -> (Vec<ItemBlock>, Vec<String>) {
    let mut blocks = Vec::new();
    let mut prose = Vec::new();
    let mut current: Option<ItemBlock> = None;
    let mut header: Option<Vec<String>> = None;

    for line in lines {
        if is_table_row(line) {
            if is_separator_row(line) {
                continue;
            }
            let cells = table_cells(line);
            if let Some(cols) = &header {
                let fields = cols
                    .iter()
                    .zip(cells)
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(k, v)| format!("- {k}: {v}"))
                    .collect();
                blocks.push(ItemBlock {
                    heading: None,
                    lines: fields,
                });
            } else {
                header = Some(cells);
            }
            continue;
        }
        header = None;

        if let Some(caps) = RE_BOLD_ITEM.captures(line) {
            blocks.extend(current.take());
            let rest = caps.get(2).map_or("", |m| m.as_str()).trim();
            let name = caps[1].trim();
            let heading = if rest.is_empty() {
                name.to_string()
            } else {
                format!("{name} {rest}")
            };
            current = Some(ItemBlock {
                heading: Some(heading),
                lines: Vec::new(),
            });
            continue;
        }

        match current.as_mut() {
            Some(item) => item.lines.push(line.clone()),
            None if RE_LABELLED.is_match(line) => {
                current = Some(ItemBlock {
                    heading: None,
                    lines: vec![line.clone()],
                });
            }
            None => {
                if !line.trim().is_empty() {
                    prose.push(line.trim().to_string());
                }
            }
        }
    }
    blocks.extend(current);
    (blocks, prose)
}

// ── Non-record sections ──────────────────────────────────────────────────────

static RE_BULLET_MARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d{1,3}[.)])\s+").unwrap());

static RE_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

static RE_PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(%)?").unwrap());

fn strip_bullet(line: &str) -> String {
    RE_BULLET_MARK.replace(line, "").replace("**", "").trim().to_string()
}

fn label_value(line: &str) -> Option<(String, String)> {
    let text = strip_bullet(line);
    let idx = text.find(':')?;
    let label = text[..idx].trim();
    if label.is_empty() || label.len() > 48 {
        return None;
    }
    Some((normalize_label(label), text[idx + 1..].trim().to_string()))
}

fn declared_count(value: &str) -> Option<u32> {
    if find_uncertainty(value).is_some() {
        return None;
    }
    RE_INTEGER.find(value)?.as_str().parse().ok()
}

const COUNT_FILLER: &[&str] = &["total", "number", "of", "count", "no"];
const PIPE_NOUNS: &[&str] = &["pipe", "pipes", "lateral", "laterals", "run", "runs"];
const STRUCTURE_NOUNS: &[&str] = &["structure", "structures"];
const EARTHWORK_NOUNS: &[&str] = &["earthwork", "earthworks", "item", "items"];

/// Which record count a Summary label declares. Every word must be a count
/// word or a record noun, so "Total Pipe Length" declares nothing.
fn count_section(label: &str) -> Option<SectionKind> {
    let nouns: Vec<&str> = label
        .split(' ')
        .filter(|w| !COUNT_FILLER.contains(w))
        .collect();
    let all_in = |set: &[&str]| !nouns.is_empty() && nouns.iter().all(|w| set.contains(w));
    if all_in(PIPE_NOUNS) {
        Some(SectionKind::Pipes)
    } else if all_in(STRUCTURE_NOUNS) {
        Some(SectionKind::Structures)
    } else if all_in(EARTHWORK_NOUNS) && nouns.iter().any(|w| w.starts_with("earthwork")) {
        Some(SectionKind::Earthwork)
    } else {
        None
    }
}

fn parse_summary(sections: &Sections) -> (DeclaredCounts, Option<String>) {
    let mut declared = DeclaredCounts::default();
    let mut doc_type = None;
    for line in sections.lines(SectionKind::Summary) {
        let Some((label, value)) = label_value(line) else { continue };
        match count_section(&label) {
            Some(SectionKind::Pipes) => declared.pipes = declared.pipes.or(declared_count(&value)),
            Some(SectionKind::Structures) => {
                declared.structures = declared.structures.or(declared_count(&value));
            }
            Some(SectionKind::Earthwork) => {
                declared.earthwork = declared.earthwork.or(declared_count(&value));
            }
            _ if label.contains("type") && doc_type.is_none() && !value.is_empty() => {
                doc_type = Some(value);
            }
            _ => {}
        }
    }
    (declared, doc_type)
}

fn parse_completeness(value: &str) -> Option<Completeness> {
    let v = value.to_lowercase();
    if v.contains("high") {
        Some(Completeness::High)
    } else if v.contains("med") {
        Some(Completeness::Medium)
    } else if v.contains("low") {
        Some(Completeness::Low)
    } else {
        None
    }
}

/// "85%", "85", "0.85" → 85.0; anything outside 0..=100 is malformed.
fn parse_confidence(value: &str) -> Option<f64> {
    let caps = RE_PERCENT.captures(value)?;
    let n: f64 = caps[1].parse().ok()?;
    let pct = if caps.get(2).is_none() && n <= 1.0 && caps[1].contains('.') {
        n * 100.0
    } else {
        n
    };
    (0.0..=100.0).contains(&pct).then_some(pct)
}

/// Quality note from the Quality Notes section, plus lines that belong in
/// page notes.
fn parse_quality(sections: &Sections, negatives: &NegativeLexicon) -> (QualityNote, Vec<String>) {
    let mut note = QualityNote::default();
    let mut notes = Vec::new();
    let mut in_uncertainties = false;

    let push_uncertainty = |text: &str, note: &mut QualityNote| {
        for part in text.split(';') {
            let part = part.trim().trim_end_matches('.').trim();
            if !part.is_empty() && !negatives.is_bare(part) && !note.uncertainties.iter().any(|u| u == part) {
                note.uncertainties.push(part.to_string());
            }
        }
    };

    for line in sections.lines(SectionKind::Quality) {
        if line.trim().is_empty() {
            continue;
        }
        let nested = line.starts_with("  ") || line.starts_with('\t');
        match label_value(line) {
            Some((label, value)) if !nested || !in_uncertainties => {
                in_uncertainties = false;
                if label.contains("completeness") {
                    note.completeness = note.completeness.or(parse_completeness(&value));
                } else if label.contains("confidence") {
                    note.confidence_pct = note.confidence_pct.or(parse_confidence(&value));
                } else if label.contains("uncertain") || label.contains("issues") || label.contains("missing") {
                    in_uncertainties = true;
                    push_uncertainty(&value, &mut note);
                } else {
                    notes.push(strip_bullet(line));
                }
            }
            _ if in_uncertainties => push_uncertainty(&strip_bullet(line), &mut note),
            _ => notes.push(strip_bullet(line)),
        }
    }
    (note, notes)
}

fn plain_lines<'a>(
    lines: impl Iterator<Item = &'a str>,
    negatives: &NegativeLexicon,
) -> Vec<String> {
    lines
        .map(strip_bullet)
        .filter(|l| !l.is_empty() && !negatives.is_bare(l))
        .collect()
}

// ── Page assembly ────────────────────────────────────────────────────────────

/// Options for parsing one page.
#[derive(Clone, Copy)]
pub struct PageOptions<'a> {
    pub negatives: &'a NegativeLexicon,
    pub notation: Option<&'a dyn NotationLookup>,
}

/// Parse one page of model markdown into a [`PageExtraction`].
///
/// Never fails: structural problems are recorded as warnings in the page's
/// quality note.
pub fn parse_page_markdown(page_num: u32, markdown: &str, opts: PageOptions<'_>) -> PageExtraction {
    let cleaned = clean_markdown(markdown);
    let negatives = opts.negatives;

    if cleaned.trim().is_empty() {
        warn!(page = page_num, "Page markdown is empty");
        return PageExtraction::degraded(
            page_num,
            ParseWarning::StructuralParse {
                page: page_num,
                detail: "empty markdown".into(),
            },
        );
    }

    let sections = split_sections(&cleaned, negatives);

    if !sections.any_known() {
        let prose = sections.loose.join("\n");
        if sections.heading_count == 0 && negatives.is_negative_prose(&prose) {
            debug!(page = page_num, "Page reports nothing to extract");
            return PageExtraction {
                page_num,
                ..Default::default()
            };
        }
        let detail = if sections.heading_count == 0 {
            "no headings found".to_string()
        } else {
            format!("{} headings but no recognised section", sections.heading_count)
        };
        warn!(page = page_num, %detail, "Page has no usable structure");
        let mut page = PageExtraction::degraded(
            page_num,
            ParseWarning::StructuralParse {
                page: page_num,
                detail,
            },
        );
        page.notes = sections.loose;
        return page;
    }

    let mut ctx = FieldContext::new(page_num);
    ctx.notation = opts.notation;
    let mut warnings = Vec::new();

    let mut pipes = Vec::new();
    for block in sections.get(SectionKind::Pipes) {
        let out = extract_pipe(block, &ctx);
        warnings.extend(out.warnings);
        pipes.push(out.record);
    }
    let mut structures = Vec::new();
    for block in sections.get(SectionKind::Structures) {
        let out = extract_structure(block, &ctx);
        warnings.extend(out.warnings);
        structures.push(out.record);
    }
    let mut earthwork = Vec::new();
    for block in sections.get(SectionKind::Earthwork) {
        let out = extract_earthwork(block, &ctx);
        warnings.extend(out.warnings);
        earthwork.push(out.record);
    }

    let (declared, document_type) = parse_summary(&sections);
    let checks = [
        (SectionKind::Pipes, declared.pipes, pipes.len()),
        (SectionKind::Structures, declared.structures, structures.len()),
        (SectionKind::Earthwork, declared.earthwork, earthwork.len()),
    ];
    for (section, declared, found) in checks {
        let Some(declared) = declared else { continue };
        let found = u32::try_from(found).unwrap_or(u32::MAX);
        if declared != found {
            warn!(page = page_num, %section, declared, found, "Declared count does not match");
            warnings.push(ParseWarning::CountMismatch {
                page: page_num,
                section: section.to_string(),
                declared,
                found,
            });
        }
    }

    let (mut quality, quality_notes) = parse_quality(&sections, negatives);
    quality.warnings = warnings;

    let mut notes = sections.loose.clone();
    notes.extend(plain_lines(sections.lines(SectionKind::Notes), negatives));
    notes.extend(quality_notes);

    let page = PageExtraction {
        page_num,
        document_type,
        relationships: plain_lines(sections.lines(SectionKind::Relationships), negatives),
        pipes,
        structures,
        earthwork,
        notes,
        declared,
        quality,
    };
    debug!(
        page = page_num,
        pipes = page.pipes.len(),
        structures = page.structures.len(),
        earthwork = page.earthwork.len(),
        warnings = page.quality.warnings.len(),
        "Parsed page"
    );
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::record::Discipline;

    fn parse(page: u32, md: &str) -> PageExtraction {
        let lex = NegativeLexicon::default();
        parse_page_markdown(
            page,
            md,
            PageOptions {
                negatives: &lex,
                notation: None,
            },
        )
    }

    const FULL_PAGE: &str = "\
# Page 2 - Final Extraction

## Summary
- Total Pipes: 2
- Total Structures: 1
- Total Earthwork Items: 0
- Document Type: Plan and profile

## Pipes
### Sanitary Pipe 1
- Diameter: 8 inches
- Material: PVC
- From: MH-SS-1
- To: MH-SS-2
- Length: 806.01 LF

### Storm Pipe 1
- Diameter: 12 inches
- Material: RCP
- Length: 150 LF

## Structures
### Manhole 1: MH-SS-1
- Type: Manhole
- Discipline: Sanitary
- Rim Elevation: 745.0 ft
- Depth: [UNCERTAIN: Not visible]

## Earthwork
No specific earthwork quantities are shown on this sheet.

## Cross-Section Relationships
- Pipe 1 in plan connects MH-SS-1 to MH-SS-2 shown in profile

## Quality Notes
- Completeness: High
- Uncertainties: Depth at MH-SS-1; invert at MH-SS-2
- Extraction Confidence: 85%
";

    #[test]
    fn parses_a_full_page() {
        let p = parse(2, FULL_PAGE);
        assert_eq!(p.page_num, 2);
        assert_eq!(p.pipes.len(), 2);
        assert_eq!(p.structures.len(), 1);
        assert!(p.earthwork.is_empty());
        assert_eq!(p.document_type.as_deref(), Some("Plan and profile"));
        assert_eq!(p.declared.pipes, Some(2));
        assert_eq!(p.declared.earthwork, Some(0));
        assert_eq!(p.relationships.len(), 1);
        assert_eq!(p.quality.completeness, Some(Completeness::High));
        assert_eq!(p.quality.confidence_pct, Some(85.0));
        assert_eq!(
            p.quality.uncertainties,
            vec!["Depth at MH-SS-1", "invert at MH-SS-2"]
        );
        assert!(p.quality.warnings.is_empty(), "{:?}", p.quality.warnings);
        assert!(p.notes.is_empty(), "{:?}", p.notes);
        assert_eq!(p.structures[0].depth_ft, Field::uncertain("Not visible"));
        assert_eq!(p.structures[0].discipline, Field::Value(Discipline::Sanitary));
    }

    #[test]
    fn count_mismatch_is_reported_not_corrected() {
        let md = "## Summary\n- Total Pipes: 4\n## Pipes\n### Pipe 1\n- Size: 8 in\n### Pipe 2\n- Size: 8 in\n### Pipe 3\n- Size: 8 in\n";
        let p = parse(1, md);
        assert_eq!(p.pipes.len(), 3);
        assert_eq!(
            p.quality.warnings,
            vec![ParseWarning::CountMismatch {
                page: 1,
                section: "Pipes".into(),
                declared: 4,
                found: 3,
            }]
        );
    }

    #[test]
    fn missing_sections_are_empty() {
        let p = parse(1, "## Structures\n### CB-1\n- Rim: 96.2\n");
        assert!(p.pipes.is_empty());
        assert!(p.earthwork.is_empty());
        assert_eq!(p.structures.len(), 1);
        assert!(p.quality.warnings.is_empty());
    }

    #[test]
    fn negative_prose_page_is_empty_without_error() {
        let p = parse(5, "There are no specific pipes are visible on this detail sheet.");
        assert_eq!(p.record_count(), 0);
        assert!(!p.quality.has_errors());
    }

    #[test]
    fn headingless_page_is_structural_error() {
        let p = parse(5, "The sheet shows an 8 inch main along Oak Street.");
        assert_eq!(p.record_count(), 0);
        assert!(p.quality.has_errors());
        assert_eq!(p.quality.effective_confidence(), 0.0);
        assert_eq!(p.notes.len(), 1);
    }

    #[test]
    fn empty_page_is_structural_error() {
        let p = parse(9, "   \n");
        assert!(matches!(
            p.quality.warnings.as_slice(),
            [ParseWarning::StructuralParse { page: 9, .. }]
        ));
    }

    #[test]
    fn heading_depth_varies() {
        let md = "# Pipes\n## Sanitary Pipe 1\n- Diameter: 8 in\n# Structures\n## Manhole: MH-1\n- Rim: 100\n";
        let p = parse(1, md);
        assert_eq!(p.pipes.len(), 1);
        assert_eq!(p.structures.len(), 1);
    }

    #[test]
    fn same_level_item_headings_are_tolerated() {
        let md = "## Pipes\n## Sanitary Pipe 1\n- Diameter: 8 in\n## Sanitary Pipe 2\n- Diameter: 10 in\n";
        let p = parse(1, md);
        assert_eq!(p.pipes.len(), 2);
    }

    #[test]
    fn repeated_sections_append() {
        let md = "# Section: Plan\n## Pipes\n### Pipe A\n- Size: 8 in\n# Section: Profile\n## Pipes\n### Pipe B\n- Size: 10 in\n";
        let p = parse(1, md);
        assert_eq!(p.pipes.len(), 2);
        assert_eq!(p.pipes[1].label, "Pipe B");
    }

    #[test]
    fn bold_items_and_bare_bullets() {
        let md = "## Structures\n**MH-1** (Manhole)\n- Rim: 100.5\n**CB-2**\n- Rim: 98\n";
        let p = parse(1, md);
        assert_eq!(p.structures.len(), 2);
        assert_eq!(p.structures[0].label, "MH-1 (Manhole)");

        let md = "## Earthwork\n- Type: Trench\n- Volume: 120 CY\n";
        let p = parse(1, md);
        assert_eq!(p.earthwork.len(), 1);
        assert_eq!(p.earthwork[0].volume_cy, Field::Value(120.0));
    }

    #[test]
    fn table_rows_become_items() {
        let md = "## Structures\n| ID | Type | Rim |\n|---|---|---|\n| MH-1 | Manhole | 100.5 |\n| CB-2 | Catch Basin | 98.0 |\n";
        let p = parse(1, md);
        assert_eq!(p.structures.len(), 2);
        assert_eq!(p.structures[1].id, Field::Value("CB-2".into()));
        assert_eq!(p.structures[1].rim_elevation_ft, Field::Value(98.0));
    }

    #[test]
    fn negative_item_block_is_dropped() {
        let md = "## Pipes\n### None\nNo pipes are shown.\n## Structures\n### MH-1\n";
        let p = parse(1, md);
        assert!(p.pipes.is_empty());
        assert_eq!(p.structures.len(), 1);
    }

    #[test]
    fn extra_negative_phrases() {
        let lex = NegativeLexicon::with_extra(["refer to sheet"]);
        assert!(lex.matches("Refer to sheet C-4 for profiles"));
        assert!(!NegativeLexicon::default().matches("Refer to sheet C-4 for profiles"));
        assert!(lex.matches("None."));
    }

    #[test]
    fn section_names() {
        assert_eq!(section_kind("Pipes"), Some(SectionKind::Pipes));
        assert_eq!(section_kind("2. Structures:"), Some(SectionKind::Structures));
        assert_eq!(section_kind("Pipes (Plan View)"), Some(SectionKind::Pipes));
        assert_eq!(section_kind("Storm Pipes"), Some(SectionKind::Pipes));
        assert_eq!(section_kind("Cross-Section Relationships"), Some(SectionKind::Relationships));
        assert_eq!(section_kind("Quality Notes"), Some(SectionKind::Quality));
        assert_eq!(section_kind("Pipe 1"), None);
        assert_eq!(section_kind("Manhole 1: MH-SS-1"), None);
        assert_eq!(section_kind("Page 3 - Final Extraction"), None);
    }

    #[test]
    fn confidence_forms() {
        assert_eq!(parse_confidence("85%"), Some(85.0));
        assert_eq!(parse_confidence("0.9"), Some(90.0));
        assert_eq!(parse_confidence("72"), Some(72.0));
        assert_eq!(parse_confidence("140%"), None);
        assert_eq!(parse_confidence("[0-100%]"), Some(0.0));
        assert_eq!(parse_confidence("unknown"), None);
    }

    #[test]
    fn nested_uncertainties() {
        let md = "## Pipes\n### P1\n- Size: 8\n## Quality Notes\n- Completeness: Medium\n- Uncertainties:\n  - rim at MH-2\n  - None\n- Extraction Confidence: 70%\n";
        let p = parse(1, md);
        assert_eq!(p.quality.uncertainties, vec!["rim at MH-2"]);
        assert_eq!(p.quality.completeness, Some(Completeness::Medium));
        assert_eq!(p.quality.confidence_pct, Some(70.0));
    }

    #[test]
    fn uncertainties_that_mention_negatives_are_kept() {
        let md = "## Pipes\n### P1\n- Size: 8\n## Quality Notes\n- Uncertainties: Rim elevation at CB-3 not visible; invert at MH-2 not provided; N/A\n";
        let p = parse(1, md);
        assert_eq!(
            p.quality.uncertainties,
            vec!["Rim elevation at CB-3 not visible", "invert at MH-2 not provided"]
        );
    }

    #[test]
    fn relationships_that_mention_negatives_are_kept() {
        let md = "## Pipes\n### P1\n- Size: 8\n## Cross-Section Relationships\n- Pipe 1 runs CB-1 to MH-2; profile not shown on this sheet\n- None\n";
        let p = parse(1, md);
        assert_eq!(
            p.relationships,
            vec!["Pipe 1 runs CB-1 to MH-2; profile not shown on this sheet"]
        );
    }

    #[test]
    fn headingless_content_with_a_negative_sentence_is_structural_error() {
        let p = parse(
            3,
            "Sheet C-3 shows an 8 inch PVC sanitary main from MH-1 to MH-2, 240 LF. Rim at MH-2 not visible.",
        );
        assert!(matches!(
            p.quality.warnings.as_slice(),
            [ParseWarning::StructuralParse { page: 3, .. }]
        ));
        assert_eq!(p.notes.len(), 1);
    }

    #[test]
    fn negative_prose_checks_every_sentence() {
        let lex = NegativeLexicon::default();
        assert!(lex.is_negative_prose("No pipes are shown. Nothing to extract!"));
        assert!(!lex.is_negative_prose("A 12 inch RCP runs north. Inverts not shown."));
        assert!(!lex.is_negative_prose("  "));
        assert!(lex.is_bare("N/A"));
        assert!(!lex.is_bare("Invert not visible"));
    }

    #[test]
    fn summary_length_is_not_a_pipe_count() {
        let md = "## Summary\n- Total Pipe Length: 806 LF\n- Total Pipes: 1\n- Pipe Diameter Range: 8-12 in\n## Pipes\n### Sanitary Pipe 1\n- Diameter: 8 inches\n- Length: 806 LF\n";
        let p = parse(1, md);
        assert_eq!(p.declared.pipes, Some(1));
        assert!(p.quality.warnings.is_empty(), "{:?}", p.quality.warnings);
        assert_eq!(p.document_type, None);
    }

    #[test]
    fn summary_count_labels() {
        assert_eq!(count_section("total pipes"), Some(SectionKind::Pipes));
        assert_eq!(count_section("pipe count"), Some(SectionKind::Pipes));
        assert_eq!(count_section("number of laterals"), Some(SectionKind::Pipes));
        assert_eq!(count_section("total structures"), Some(SectionKind::Structures));
        assert_eq!(count_section("total earthwork items"), Some(SectionKind::Earthwork));
        assert_eq!(count_section("total items"), None);
        assert_eq!(count_section("total pipe length"), None);
        assert_eq!(count_section("earthwork volume"), None);
        assert_eq!(count_section("document type"), None);
    }

    #[test]
    fn fenced_output_is_parsed() {
        let md = "```markdown\n## Pipes\n### Pipe 1\n- Diameter: 8 inches\n```";
        let p = parse(1, md);
        assert_eq!(p.pipes.len(), 1);
    }
}
