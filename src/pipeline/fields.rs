//! Pattern extraction: one item block → one typed record.
//!
//! An item block is a heading plus the lines under it. Every `Label: value`
//! bullet is matched against a per-record synonym table; the value is then
//! read according to the field's type. Anything the tables do not know about
//! lands in the record's `extra` bag, verbatim.
//!
//! ```text
//! ### Sanitary Pipe 1                 ← heading: discipline fallback
//! - Diameter: 8 inches                ← 8.0
//! - Material: PVC                     ← Material::Pvc
//! - Length: 806.01 LF                 ← 806.01
//! - Depth: [UNCERTAIN: Not visible]   ← Uncertain("Not visible")
//! - Bedding: Class B                  ← extra
//! ```
//!
//! Extraction is a pure function of the block and the notation lookup.

use crate::error::ParseWarning;
use crate::field::Field;
use crate::notation::NotationLookup;
use crate::pipeline::sections::ItemBlock;
use crate::record::{
    Discipline, EarthworkItem, EarthworkKind, Material, Overflow, Pipe, PipeKind, Structure,
    StructureKind,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Per-page inputs shared by every block on that page.
#[derive(Clone, Copy)]
pub struct FieldContext<'a> {
    pub page: u32,
    pub notation: Option<&'a dyn NotationLookup>,
}

impl<'a> FieldContext<'a> {
    pub fn new(page: u32) -> Self {
        Self {
            page,
            notation: None,
        }
    }

    pub fn with_notation(mut self, notation: &'a dyn NotationLookup) -> Self {
        self.notation = Some(notation);
        self
    }

    fn expand(&self, term: &str) -> Option<String> {
        self.notation.and_then(|n| n.expand(term.trim()))
    }
}

/// A record plus the warnings raised while reading it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<R> {
    pub record: R,
    pub warnings: Vec<ParseWarning>,
}

// ── Line splitting ───────────────────────────────────────────────────────────

static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d{1,3}[.)])\s+(.*)$").unwrap());

enum Line {
    Labelled { label: String, value: String },
    Unlabelled { text: String, bullet: bool },
}

fn split_line(line: &str) -> Option<Line> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (content, bullet) = match RE_BULLET.captures(line) {
        Some(caps) => (caps.get(1).map_or("", |m| m.as_str()), true),
        None => (trimmed, false),
    };
    let content = content.replace("**", "");
    let content = content.trim();

    if let Some(idx) = content.find(':') {
        let label = content[..idx].trim();
        let value = content[idx + 1..].trim();
        let plausible = !label.is_empty()
            && label.len() <= 48
            && !label.contains('[')
            && label.chars().any(char::is_alphabetic);
        if plausible {
            return Some(Line::Labelled {
                label: label.to_string(),
                value: value.to_string(),
            });
        }
    }
    Some(Line::Unlabelled {
        text: content.to_string(),
        bullet,
    })
}

/// Lowercase, punctuation to spaces, whitespace collapsed.
pub(crate) fn normalize_label(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const UNIT_WORDS: &[&str] = &[
    "ft", "feet", "lf", "in", "inch", "inches", "cy", "cf", "yd", "yds", "elev", "el",
];

fn lookup<S: Copy>(table: &[(&str, S)], label: &str) -> Option<S> {
    let norm = normalize_label(label);
    let find = |key: &str| table.iter().find(|(k, _)| *k == key).map(|(_, s)| *s);
    if let Some(slot) = find(&norm) {
        return Some(slot);
    }
    // "Length (LF)", "Diameter (in)"
    let mut words: Vec<&str> = norm.split(' ').collect();
    while words.len() > 1 && words.last().is_some_and(|w| UNIT_WORDS.contains(w)) {
        words.pop();
        if let Some(slot) = find(&words.join(" ")) {
            return Some(slot);
        }
    }
    None
}

fn resolve_label<S: Copy>(table: &[(&str, S)], label: &str, ctx: &FieldContext<'_>) -> Option<S> {
    lookup(table, label).or_else(|| ctx.expand(label).and_then(|e| lookup(table, &e)))
}

// ── Value parsing ────────────────────────────────────────────────────────────

static RE_UNCERTAIN_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\s*uncertain\b\s*[:\-–]?\s*([^\]]*)\]").unwrap());

static RE_UNCERTAIN_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*uncertain\b\s*[:\-–]?\s*(.*)$").unwrap());

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[[^\]]*\]$").unwrap());

/// `(reason, residual)` when the value carries an uncertainty marker.
pub(crate) fn find_uncertainty(value: &str) -> Option<(String, String)> {
    let (reason, residual) = if let Some(caps) = RE_UNCERTAIN_BRACKET.captures(value) {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let reason = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
        (reason, value.replacen(whole, " ", 1))
    } else if let Some(caps) = RE_UNCERTAIN_BARE.captures(value) {
        let reason = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
        (reason, String::new())
    } else {
        return None;
    };
    let reason = if reason.is_empty() {
        "unspecified".to_string()
    } else {
        reason
    };
    Some((reason, tidy_residual(&residual)))
}

/// Measurement family of a numeric field; decides unit conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dim {
    /// Pipe diameter, inches.
    Diameter,
    /// Lengths and depths, feet.
    Length,
    /// Elevations, feet; never converted.
    Elevation,
    /// Volumes, cubic yards.
    Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Inch,
    Foot,
    CubicYard,
    CubicFoot,
    Bare,
}

static RE_FEET_INCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\d+(?:\.\d+)?)\s*(?:'|′|ft\.?)\s*-?\s*(\d+(?:\.\d+)?)\s*(?:"|''|″|in\b\.?)"#).unwrap()
});

static RE_MEASURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)
        (?P<num>-?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?|-?\.\d+)
        \s*
        (?P<unit>
            (?:cubic\s+yards?|cu\.?\s*yds?|yd3|yds?|cy
              |cubic\s+feet|cubic\s+foot|cu\.?\s*ft|ft3|cf
              |linear\s+feet|lin\.?\s*ft|lf|l\.f
              |inches|inch|in
              |feet|foot|ft)\b\.?
          |"|''|'|″|′
        )?"#,
    )
    .unwrap()
});

fn unit_of(raw: &str) -> Unit {
    let u = raw.to_lowercase();
    let u = u.trim_end_matches('.');
    if u.is_empty() {
        return Unit::Bare;
    }
    if u.contains("yd") || u.contains("yard") || u == "cy" {
        Unit::CubicYard
    } else if u.contains("cubic") || u.starts_with("cu") || u == "ft3" || u == "cf" {
        Unit::CubicFoot
    } else if u.starts_with("in") || u == "\"" || u == "''" || u == "″" {
        Unit::Inch
    } else {
        Unit::Foot
    }
}

fn convert(value: f64, unit: Unit, dim: Dim) -> f64 {
    match (dim, unit) {
        (Dim::Diameter, Unit::Foot) => value * 12.0,
        (Dim::Length, Unit::Inch) => value / 12.0,
        (Dim::Volume, Unit::CubicFoot) => value / 27.0,
        _ => value,
    }
}

const NOISE_WORDS: &[&str] = &[
    "approx", "approximately", "about", "el", "elev", "elevation", "ea", "each", "typ", "at",
    "of", "total",
];

/// Residual text worth keeping: anything beyond punctuation and filler.
fn tidy_residual(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '(' && c != ')')
        .to_string();
    let meaningful = normalize_label(&trimmed)
        .split(' ')
        .any(|w| !w.is_empty() && !NOISE_WORDS.contains(&w) && w.chars().any(char::is_alphabetic));
    if meaningful {
        trimmed
    } else {
        String::new()
    }
}

/// First measurement in `value`, converted to `dim`'s unit, plus residual text.
fn parse_measure(value: &str, dim: Dim) -> Option<(f64, String)> {
    if let Some(caps) = RE_FEET_INCHES.captures(value) {
        let whole = caps.get(0)?;
        let feet: f64 = caps[1].parse().ok()?;
        let inches: f64 = caps[2].parse().ok()?;
        let n = match dim {
            Dim::Diameter => feet * 12.0 + inches,
            _ => feet + inches / 12.0,
        };
        let residual = format!("{} {}", &value[..whole.start()], &value[whole.end()..]);
        return Some((n, tidy_residual(&residual)));
    }
    let caps = RE_MEASURE.captures(value)?;
    let whole = caps.get(0)?;
    let n: f64 = caps["num"].replace(',', "").parse().ok()?;
    let unit = unit_of(caps.name("unit").map_or("", |m| m.as_str()));
    let residual = format!("{} {}", &value[..whole.start()], &value[whole.end()..]);
    Some((convert(n, unit, dim), tidy_residual(&residual)))
}

// ── Classifiers ──────────────────────────────────────────────────────────────

fn has_any(norm: &str, keywords: &[&str]) -> bool {
    let padded = format!(" {norm} ");
    keywords.iter().any(|k| padded.contains(&format!(" {k} ")))
}

/// Discipline from free text. `abbreviations` also accepts `SS`, `SD`, `WM`.
pub(crate) fn classify_discipline(text: &str, abbreviations: bool) -> Option<Discipline> {
    let norm = normalize_label(text);
    if has_any(&norm, &["wastewater", "sanitary"]) {
        return Some(Discipline::Sanitary);
    }
    if has_any(&norm, &["storm", "stormwater", "drainage", "drain"]) {
        return Some(Discipline::Storm);
    }
    if has_any(&norm, &["sewer", "sewage"]) {
        return Some(Discipline::Sanitary);
    }
    if has_any(&norm, &["water", "potable", "domestic"]) {
        return Some(Discipline::Water);
    }
    if abbreviations {
        if has_any(&norm, &["ss", "san", "ssl", "sdr"]) && !has_any(&norm, &["sd"]) {
            return Some(Discipline::Sanitary);
        }
        if has_any(&norm, &["sd", "stm"]) {
            return Some(Discipline::Storm);
        }
        if has_any(&norm, &["wm", "w", "wl"]) {
            return Some(Discipline::Water);
        }
    }
    None
}

pub(crate) fn classify_material(text: &str) -> Option<Material> {
    let norm = normalize_label(text);
    let rules: &[(&[&str], Material)] = &[
        (&["pvc", "c900", "c 900", "sdr", "polyvinyl"], Material::Pvc),
        (&["dip", "di", "ductile"], Material::Dip),
        (&["rcp", "reinforced concrete", "concrete"], Material::Rcp),
        (&["hdpe", "polyethylene", "ads", "n 12"], Material::Hdpe),
        (&["aluminum", "aluminium", "cap", "alum"], Material::Aluminum),
        (&["unknown", "unk"], Material::Unknown),
    ];
    rules
        .iter()
        .find(|(keys, _)| has_any(&norm, keys))
        .map(|(_, m)| *m)
}

/// A kind written under its canonical name ("SiteGrading", "catch basin")
/// maps straight to that variant, so serialised kinds read back unchanged.
fn canonical_kind<K: From<String>>(text: &str, known: &[&str]) -> Option<K> {
    let squashed: String = text.chars().filter(|c| c.is_alphanumeric()).collect();
    known
        .iter()
        .find(|k| k.eq_ignore_ascii_case(&squashed))
        .map(|k| K::from((*k).to_string()))
}

pub(crate) fn classify_pipe_kind(text: &str) -> Option<PipeKind> {
    if let Some(kind) = canonical_kind(text, PipeKind::KNOWN) {
        return Some(kind);
    }
    let norm = normalize_label(text);
    if has_any(&norm, &["lateral", "laterals", "service", "services", "lat"]) {
        Some(PipeKind::Lateral)
    } else if has_any(&norm, &["vertical", "verticals", "riser", "drop", "stack"]) {
        Some(PipeKind::Vertical)
    } else if has_any(&norm, &["pipe", "pipes", "main", "mainline", "trunk", "run"]) {
        Some(PipeKind::Pipe)
    } else {
        None
    }
}

pub(crate) fn classify_structure_kind(text: &str) -> Option<StructureKind> {
    if let Some(kind) = canonical_kind(text, StructureKind::KNOWN) {
        return Some(kind);
    }
    let norm = normalize_label(text);
    let rules: &[(&[&str], StructureKind)] = &[
        (&["catch basin", "catchbasin", "cb", "cbmh"], StructureKind::CatchBasin),
        (&["manhole", "mh", "smh", "sdmh"], StructureKind::Manhole),
        (&["cleanout", "clean out", "co"], StructureKind::Cleanout),
        (&["valve box", "valvebox", "vb", "valve"], StructureKind::ValveBox),
        (&["hydrant", "fh", "hyd"], StructureKind::Hydrant),
        (&["culvert"], StructureKind::Culvert),
        (&["riser"], StructureKind::Riser),
        (&["dam"], StructureKind::Dam),
        (&["inlet", "yard drain", "area drain"], StructureKind::Inlet),
    ];
    rules
        .iter()
        .find(|(keys, _)| has_any(&norm, keys))
        .map(|(_, k)| k.clone())
}

pub(crate) fn classify_earthwork_kind(text: &str) -> Option<EarthworkKind> {
    if let Some(kind) = canonical_kind(text, EarthworkKind::KNOWN) {
        return Some(kind);
    }
    let norm = normalize_label(text);
    if has_any(&norm, &["trench", "trenching"]) {
        Some(EarthworkKind::Trench)
    } else if has_any(&norm, &["grading", "site grading", "rough grading"]) {
        Some(EarthworkKind::SiteGrading)
    } else if has_any(&norm, &["excavation", "excavate", "dig"]) {
        Some(EarthworkKind::Excavation)
    } else if has_any(&norm, &["cut"]) {
        Some(EarthworkKind::Cut)
    } else if has_any(&norm, &["fill", "embankment", "backfill"]) {
        Some(EarthworkKind::Fill)
    } else {
        None
    }
}

// ── Identifiers ──────────────────────────────────────────────────────────────

static RE_STRUCTURE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z]{1,5}(?:[-_ ]?[A-Za-z0-9]+)*?[-_ ]?\d+[A-Za-z]?$").unwrap()
});

static RE_ID_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{1,5}(?:-[A-Z0-9]+)*-?\d+[A-Z]?\b").unwrap());

static RE_HEADING_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z]{1,5}(?:-[A-Z0-9]+)*-?\d+[A-Z]?)\s+(?:to|→|->|–)\s+([A-Z]{1,5}(?:-[A-Z0-9]+)*-?\d+[A-Z]?)\b")
        .unwrap()
});

static RE_TRAILING_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\([^)]*\)\s*$").unwrap());

/// The structure ID an endpoint names, if it is shaped like one
/// (`MH-SS-1`, `CB 3`, `SMH12A`); plain locations return `None`.
pub(crate) fn structure_id_in(text: &str) -> Option<String> {
    let stripped = RE_TRAILING_PAREN.replace(text.trim(), "");
    let candidate = stripped.trim();
    if candidate.len() > 24 || !RE_STRUCTURE_ID.is_match(candidate) {
        return None;
    }
    Some(normalize_id(candidate))
}

/// Canonical form used for keys: upper case, separators folded to `-`.
pub(crate) fn normalize_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.trim().chars() {
        if c.is_whitespace() || c == '_' || c == '–' || c == '-' {
            if !out.ends_with('-') && !out.is_empty() {
                out.push('-');
            }
        } else {
            out.extend(c.to_uppercase());
        }
    }
    out.trim_end_matches('-').to_string()
}

// ── Block reader ─────────────────────────────────────────────────────────────

struct Reader<'a> {
    ctx: FieldContext<'a>,
    block: String,
    extra: Vec<Overflow>,
    warnings: Vec<ParseWarning>,
}

impl<'a> Reader<'a> {
    fn new(ctx: FieldContext<'a>, block: &ItemBlock) -> Self {
        Self {
            ctx,
            block: block.heading.clone().unwrap_or_default(),
            extra: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Blank, marked uncertain, or a template placeholder: handled without
    /// looking at the field type.
    fn special<T>(&mut self, label: &str, value: &str) -> Option<Field<T>> {
        let value = value.trim();
        if value.is_empty() {
            return Some(Field::uncertain("no value given"));
        }
        if let Some((reason, residual)) = find_uncertainty(value) {
            if !residual.is_empty() {
                self.extra.push(Overflow::labelled(label, residual));
            }
            return Some(Field::uncertain(reason));
        }
        if RE_PLACEHOLDER.is_match(value) {
            return Some(Field::uncertain(format!("unfilled placeholder {value}")));
        }
        None
    }

    fn unparseable<T>(&mut self, label: &str, value: &str) -> Field<T> {
        let value = value.trim();
        self.extra.push(Overflow::labelled(label, value));
        Field::uncertain(format!("unparseable: {value}"))
    }

    fn number(&mut self, label: &str, value: &str, dim: Dim) -> Field<f64> {
        if let Some(f) = self.special(label, value) {
            return f;
        }
        match parse_measure(value, dim) {
            Some((n, residual)) => {
                if !residual.is_empty() {
                    self.extra.push(Overflow::labelled(label, residual));
                }
                Field::Value(n)
            }
            None => self.unparseable(label, value),
        }
    }

    fn count(&mut self, label: &str, value: &str) -> Field<u32> {
        if let Some(f) = self.special(label, value) {
            return f;
        }
        match parse_measure(value, Dim::Elevation) {
            Some((n, residual)) if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) => {
                if !residual.is_empty() {
                    self.extra.push(Overflow::labelled(label, residual));
                }
                Field::Value(n as u32)
            }
            _ => self.unparseable(label, value),
        }
    }

    fn text(&mut self, label: &str, value: &str) -> Field<String> {
        if let Some(f) = self.special(label, value) {
            return f;
        }
        Field::Value(value.trim().to_string())
    }

    fn discipline(&mut self, label: &str, value: &str) -> Field<Discipline> {
        if let Some(f) = self.special(label, value) {
            return f;
        }
        match classify_discipline(value, true)
            .or_else(|| self.ctx.expand(value).and_then(|e| classify_discipline(&e, false)))
        {
            Some(d) => Field::Value(d),
            None => self.unparseable(label, value),
        }
    }

    fn material(&mut self, label: &str, value: &str) -> Field<Material> {
        if let Some(f) = self.special(label, value) {
            return f;
        }
        match classify_material(value)
            .or_else(|| self.ctx.expand(value).and_then(|e| classify_material(&e)))
        {
            Some(m) => Field::Value(m),
            None => {
                self.extra.push(Overflow::labelled(label, value.trim()));
                Field::Value(Material::Unknown)
            }
        }
    }

    fn open_kind<K>(
        &mut self,
        label: &str,
        value: &str,
        classify: fn(&str) -> Option<K>,
        other: fn(String) -> K,
    ) -> Field<K> {
        if let Some(f) = self.special(label, value) {
            return f;
        }
        let known = classify(value).or_else(|| self.ctx.expand(value).and_then(|e| classify(&e)));
        Field::Value(known.unwrap_or_else(|| other(value.trim().to_string())))
    }

    /// First occurrence wins; a repeat is kept in `extra`.
    fn fill<T>(
        &mut self,
        slot: &mut Field<T>,
        label: &str,
        value: &str,
        read: impl FnOnce(&mut Self, &str, &str) -> Field<T>,
    ) {
        if slot.is_absent() {
            *slot = read(self, label, value);
        } else {
            debug!(page = self.ctx.page, block = %self.block, label, "Duplicate field kept in extra");
            self.extra.push(Overflow::labelled(label, value.trim()));
        }
    }

    fn unknown_label(&mut self, label: &str, value: &str) {
        self.warnings.push(ParseWarning::FieldParse {
            page: self.ctx.page,
            block: self.block.clone(),
            raw: format!("{label}: {value}"),
        });
        self.extra.push(Overflow::labelled(label, value.trim()));
    }

    fn unlabelled(&mut self, text: &str, bullet: bool) {
        if bullet {
            self.warnings.push(ParseWarning::FieldParse {
                page: self.ctx.page,
                block: self.block.clone(),
                raw: text.to_string(),
            });
        }
        self.extra.push(Overflow::unlabelled(text));
    }

    fn finish<R>(self, record: R) -> Extracted<R> {
        Extracted {
            record,
            warnings: self.warnings,
        }
    }
}

// ── Pipes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum PipeSlot {
    Discipline,
    Kind,
    Diameter,
    Material,
    From,
    To,
    InvertIn,
    InvertOut,
    Length,
    Depth,
    Count,
}

const PIPE_LABELS: &[(&str, PipeSlot)] = &[
    ("discipline", PipeSlot::Discipline),
    ("utility", PipeSlot::Discipline),
    ("utility type", PipeSlot::Discipline),
    ("system", PipeSlot::Discipline),
    ("service type", PipeSlot::Discipline),
    ("type", PipeSlot::Kind),
    ("pipe type", PipeSlot::Kind),
    ("kind", PipeSlot::Kind),
    ("diameter", PipeSlot::Diameter),
    ("dia", PipeSlot::Diameter),
    ("size", PipeSlot::Diameter),
    ("pipe size", PipeSlot::Diameter),
    ("pipe diameter", PipeSlot::Diameter),
    ("nominal diameter", PipeSlot::Diameter),
    ("material", PipeSlot::Material),
    ("pipe material", PipeSlot::Material),
    ("from", PipeSlot::From),
    ("from structure", PipeSlot::From),
    ("start", PipeSlot::From),
    ("starts at", PipeSlot::From),
    ("upstream", PipeSlot::From),
    ("upstream structure", PipeSlot::From),
    ("to", PipeSlot::To),
    ("to structure", PipeSlot::To),
    ("end", PipeSlot::To),
    ("ends at", PipeSlot::To),
    ("downstream", PipeSlot::To),
    ("downstream structure", PipeSlot::To),
    ("invert in", PipeSlot::InvertIn),
    ("inv in", PipeSlot::InvertIn),
    ("ie in", PipeSlot::InvertIn),
    ("invert elevation in", PipeSlot::InvertIn),
    ("upstream invert", PipeSlot::InvertIn),
    ("invert out", PipeSlot::InvertOut),
    ("inv out", PipeSlot::InvertOut),
    ("ie out", PipeSlot::InvertOut),
    ("invert elevation out", PipeSlot::InvertOut),
    ("downstream invert", PipeSlot::InvertOut),
    ("length", PipeSlot::Length),
    ("pipe length", PipeSlot::Length),
    ("run length", PipeSlot::Length),
    ("total length", PipeSlot::Length),
    ("linear feet", PipeSlot::Length),
    ("depth", PipeSlot::Depth),
    ("average depth", PipeSlot::Depth),
    ("avg depth", PipeSlot::Depth),
    ("depth of cover", PipeSlot::Depth),
    ("count", PipeSlot::Count),
    ("quantity", PipeSlot::Count),
    ("qty", PipeSlot::Count),
    ("number", PipeSlot::Count),
];

/// Read one pipe block.
pub fn extract_pipe(block: &ItemBlock, ctx: &FieldContext<'_>) -> Extracted<Pipe> {
    let mut r = Reader::new(*ctx, block);
    let mut pipe = Pipe {
        label: block.heading.clone().unwrap_or_default(),
        source_pages: vec![ctx.page],
        ..Default::default()
    };

    for line in &block.lines {
        match split_line(line) {
            Some(Line::Labelled { label, value }) => {
                let Some(slot) = resolve_label(PIPE_LABELS, &label, ctx) else {
                    r.unknown_label(&label, &value);
                    continue;
                };
                let (l, v) = (label.as_str(), value.as_str());
                match slot {
                    PipeSlot::Discipline => r.fill(&mut pipe.discipline, l, v, Reader::discipline),
                    PipeSlot::Kind => r.fill(&mut pipe.kind, l, v, |r, l, v| {
                        r.open_kind(l, v, classify_pipe_kind, PipeKind::Other)
                    }),
                    PipeSlot::Diameter => {
                        r.fill(&mut pipe.diameter_in, l, v, |r, l, v| r.number(l, v, Dim::Diameter))
                    }
                    PipeSlot::Material => r.fill(&mut pipe.material, l, v, Reader::material),
                    PipeSlot::From => r.fill(&mut pipe.from_id, l, v, Reader::text),
                    PipeSlot::To => r.fill(&mut pipe.to_id, l, v, Reader::text),
                    PipeSlot::InvertIn => {
                        r.fill(&mut pipe.invert_in_ft, l, v, |r, l, v| r.number(l, v, Dim::Elevation))
                    }
                    PipeSlot::InvertOut => {
                        r.fill(&mut pipe.invert_out_ft, l, v, |r, l, v| r.number(l, v, Dim::Elevation))
                    }
                    PipeSlot::Length => {
                        r.fill(&mut pipe.length_ft, l, v, |r, l, v| r.number(l, v, Dim::Length))
                    }
                    PipeSlot::Depth => {
                        r.fill(&mut pipe.depth_ft, l, v, |r, l, v| r.number(l, v, Dim::Length))
                    }
                    PipeSlot::Count => r.fill(&mut pipe.count, l, v, Reader::count),
                }
            }
            Some(Line::Unlabelled { text, bullet }) => r.unlabelled(&text, bullet),
            None => {}
        }
    }

    // Heading fallbacks
    if let Some(heading) = &block.heading {
        if pipe.discipline.is_absent() {
            if let Some(d) = classify_discipline(heading, false) {
                pipe.discipline = Field::Value(d);
            }
        }
        if pipe.kind.is_absent() {
            if let Some(k) = classify_pipe_kind(heading) {
                pipe.kind = Field::Value(k);
            }
        }
        if pipe.from_id.is_absent() && pipe.to_id.is_absent() {
            if let Some(caps) = RE_HEADING_RUN.captures(heading) {
                pipe.from_id = Field::Value(caps[1].to_string());
                pipe.to_id = Field::Value(caps[2].to_string());
            }
        }
    }

    pipe.extra = std::mem::take(&mut r.extra);
    r.finish(pipe)
}

// ── Structures ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum StructureSlot {
    Id,
    Kind,
    Discipline,
    Rim,
    InvertIn,
    InvertOut,
    Depth,
}

const STRUCTURE_LABELS: &[(&str, StructureSlot)] = &[
    ("id", StructureSlot::Id),
    ("structure id", StructureSlot::Id),
    ("identifier", StructureSlot::Id),
    ("label", StructureSlot::Id),
    ("name", StructureSlot::Id),
    ("tag", StructureSlot::Id),
    ("mark", StructureSlot::Id),
    ("type", StructureSlot::Kind),
    ("structure type", StructureSlot::Kind),
    ("kind", StructureSlot::Kind),
    ("discipline", StructureSlot::Discipline),
    ("utility", StructureSlot::Discipline),
    ("utility type", StructureSlot::Discipline),
    ("system", StructureSlot::Discipline),
    ("rim", StructureSlot::Rim),
    ("rim elevation", StructureSlot::Rim),
    ("rim elev", StructureSlot::Rim),
    ("top elevation", StructureSlot::Rim),
    ("top of casting", StructureSlot::Rim),
    ("grate elevation", StructureSlot::Rim),
    ("grate", StructureSlot::Rim),
    ("invert", StructureSlot::InvertIn),
    ("invert elevation", StructureSlot::InvertIn),
    ("invert elev", StructureSlot::InvertIn),
    ("inv", StructureSlot::InvertIn),
    ("ie", StructureSlot::InvertIn),
    ("invert in", StructureSlot::InvertIn),
    ("inv in", StructureSlot::InvertIn),
    ("ie in", StructureSlot::InvertIn),
    ("invert elevation in", StructureSlot::InvertIn),
    ("inlet invert", StructureSlot::InvertIn),
    ("invert out", StructureSlot::InvertOut),
    ("inv out", StructureSlot::InvertOut),
    ("ie out", StructureSlot::InvertOut),
    ("invert elevation out", StructureSlot::InvertOut),
    ("outlet invert", StructureSlot::InvertOut),
    ("depth", StructureSlot::Depth),
    ("structure depth", StructureSlot::Depth),
    ("total depth", StructureSlot::Depth),
];

/// Read one structure block.
pub fn extract_structure(block: &ItemBlock, ctx: &FieldContext<'_>) -> Extracted<Structure> {
    let mut r = Reader::new(*ctx, block);
    let mut s = Structure {
        label: block.heading.clone().unwrap_or_default(),
        source_pages: vec![ctx.page],
        ..Default::default()
    };

    for line in &block.lines {
        match split_line(line) {
            Some(Line::Labelled { label, value }) => {
                let Some(slot) = resolve_label(STRUCTURE_LABELS, &label, ctx) else {
                    r.unknown_label(&label, &value);
                    continue;
                };
                let (l, v) = (label.as_str(), value.as_str());
                match slot {
                    StructureSlot::Id => r.fill(&mut s.id, l, v, Reader::text),
                    StructureSlot::Kind => r.fill(&mut s.kind, l, v, |r, l, v| {
                        r.open_kind(l, v, classify_structure_kind, StructureKind::Other)
                    }),
                    StructureSlot::Discipline => r.fill(&mut s.discipline, l, v, Reader::discipline),
                    StructureSlot::Rim => {
                        r.fill(&mut s.rim_elevation_ft, l, v, |r, l, v| r.number(l, v, Dim::Elevation))
                    }
                    StructureSlot::InvertIn => {
                        r.fill(&mut s.invert_in_ft, l, v, |r, l, v| r.number(l, v, Dim::Elevation))
                    }
                    StructureSlot::InvertOut => {
                        r.fill(&mut s.invert_out_ft, l, v, |r, l, v| r.number(l, v, Dim::Elevation))
                    }
                    StructureSlot::Depth => {
                        r.fill(&mut s.depth_ft, l, v, |r, l, v| r.number(l, v, Dim::Length))
                    }
                }
            }
            Some(Line::Unlabelled { text, bullet }) => r.unlabelled(&text, bullet),
            None => {}
        }
    }

    if let Some(heading) = &block.heading {
        // "Manhole 1: MH-SS-1" → kind from the left, id from the right
        let (left, right) = match heading.rfind(':') {
            Some(i) => (&heading[..i], Some(heading[i + 1..].trim())),
            None => (heading.as_str(), None),
        };
        if s.id.is_absent() {
            let id = right
                .filter(|r| !r.is_empty() && !RE_PLACEHOLDER.is_match(r))
                .map(str::to_string)
                .or_else(|| RE_ID_TOKEN.find(heading).map(|m| m.as_str().to_string()));
            if let Some(id) = id {
                s.id = Field::Value(id);
            }
        }
        if s.kind.is_absent() {
            if let Some(k) = classify_structure_kind(left) {
                s.kind = Field::Value(k);
            }
        }
        if s.discipline.is_absent() {
            if let Some(d) = classify_discipline(left, false) {
                s.discipline = Field::Value(d);
            }
        }
    }

    s.extra = std::mem::take(&mut r.extra);
    r.finish(s)
}

// ── Earthwork ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum EarthworkSlot {
    Kind,
    Purpose,
    Volume,
    Cut,
    Fill,
    Net,
    Depth,
    Length,
}

const EARTHWORK_LABELS: &[(&str, EarthworkSlot)] = &[
    ("type", EarthworkSlot::Kind),
    ("kind", EarthworkSlot::Kind),
    ("operation", EarthworkSlot::Kind),
    ("purpose", EarthworkSlot::Purpose),
    ("description", EarthworkSlot::Purpose),
    ("desc", EarthworkSlot::Purpose),
    ("use", EarthworkSlot::Purpose),
    ("volume", EarthworkSlot::Volume),
    ("total volume", EarthworkSlot::Volume),
    ("excavation volume", EarthworkSlot::Volume),
    ("quantity", EarthworkSlot::Volume),
    ("qty", EarthworkSlot::Volume),
    ("cut", EarthworkSlot::Cut),
    ("cut volume", EarthworkSlot::Cut),
    ("cut quantity", EarthworkSlot::Cut),
    ("fill", EarthworkSlot::Fill),
    ("fill volume", EarthworkSlot::Fill),
    ("fill quantity", EarthworkSlot::Fill),
    ("net", EarthworkSlot::Net),
    ("net volume", EarthworkSlot::Net),
    ("net cut fill", EarthworkSlot::Net),
    ("net cut", EarthworkSlot::Net),
    ("depth", EarthworkSlot::Depth),
    ("average depth", EarthworkSlot::Depth),
    ("avg depth", EarthworkSlot::Depth),
    ("length", EarthworkSlot::Length),
    ("trench length", EarthworkSlot::Length),
];

/// Read one earthwork block.
pub fn extract_earthwork(block: &ItemBlock, ctx: &FieldContext<'_>) -> Extracted<EarthworkItem> {
    let mut r = Reader::new(*ctx, block);
    let mut e = EarthworkItem {
        label: block.heading.clone().unwrap_or_default(),
        source_pages: vec![ctx.page],
        ..Default::default()
    };

    for line in &block.lines {
        match split_line(line) {
            Some(Line::Labelled { label, value }) => {
                let Some(slot) = resolve_label(EARTHWORK_LABELS, &label, ctx) else {
                    r.unknown_label(&label, &value);
                    continue;
                };
                let (l, v) = (label.as_str(), value.as_str());
                match slot {
                    EarthworkSlot::Kind => r.fill(&mut e.kind, l, v, |r, l, v| {
                        r.open_kind(l, v, classify_earthwork_kind, EarthworkKind::Other)
                    }),
                    EarthworkSlot::Purpose => r.fill(&mut e.purpose, l, v, Reader::text),
                    EarthworkSlot::Volume => {
                        r.fill(&mut e.volume_cy, l, v, |r, l, v| r.number(l, v, Dim::Volume))
                    }
                    EarthworkSlot::Cut => {
                        r.fill(&mut e.cut_cy, l, v, |r, l, v| r.number(l, v, Dim::Volume))
                    }
                    EarthworkSlot::Fill => {
                        r.fill(&mut e.fill_cy, l, v, |r, l, v| r.number(l, v, Dim::Volume))
                    }
                    EarthworkSlot::Net => {
                        r.fill(&mut e.net_cy, l, v, |r, l, v| r.number(l, v, Dim::Volume))
                    }
                    EarthworkSlot::Depth => {
                        r.fill(&mut e.depth_ft, l, v, |r, l, v| r.number(l, v, Dim::Length))
                    }
                    EarthworkSlot::Length => {
                        r.fill(&mut e.length_ft, l, v, |r, l, v| r.number(l, v, Dim::Length))
                    }
                }
            }
            Some(Line::Unlabelled { text, bullet }) => r.unlabelled(&text, bullet),
            None => {}
        }
    }

    if e.kind.is_absent() {
        if let Some(k) = block.heading.as_deref().and_then(classify_earthwork_kind) {
            e.kind = Field::Value(k);
        }
    }

    e.extra = std::mem::take(&mut r.extra);
    r.finish(e)
}
