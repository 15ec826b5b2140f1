//! Cleanup: deterministic normalisation of model markdown before parsing.
//!
//! Well-prompted models still wrap their answer in ```` ```markdown ```` fences,
//! emit `\r\n`, forget the space in `##Pipes`, or use `•` for bullets. None of
//! that changes meaning, so it is fixed here with cheap string rules and the
//! section parser only ever sees one dialect.
//!
//! Rules run in order: fences come off before line endings are touched, and
//! invisible characters are removed before heading detection so a zero-width
//! space in front of `##` cannot hide a heading.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one page of model output.
///
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Insert the missing space after heading markers (`##Pipes`)
/// 6. Normalise bullet glyphs (`•`, `▪`, `–`) to `-`
/// 7. Collapse runs of blank lines
/// 8. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = fix_heading_markers(&s);
    let s = normalise_bullets(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Heading marker spacing ───────────────────────────────────────────

static RE_TIGHT_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]{0,3}#{1,6})([^#\s])").unwrap());

fn fix_heading_markers(input: &str) -> String {
    RE_TIGHT_HEADING.replace_all(input, "$1 $2").to_string()
}

// ── Rule 6: Bullet glyphs ────────────────────────────────────────────────────

static RE_BULLET_GLYPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)[•●▪◦·–—][ \t]+").unwrap());

fn normalise_bullets(input: &str) -> String {
    RE_BULLET_GLYPH.replace_all(input, "$1- ").to_string()
}

// ── Rule 7: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 8: Single final newline ─────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

// ── Table helpers (used by the section parser) ───────────────────────────────

pub(crate) fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

pub(crate) fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

/// Cells of a table row, trimmed, without the outer pipes.
pub(crate) fn table_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim().trim_start_matches('|').trim_end_matches('|');
    trimmed.split('|').map(|c| c.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        let input = "```markdown\n## Pipes\n- Size: 8\"\n```";
        assert_eq!(clean_markdown(input), "## Pipes\n- Size: 8\"\n");
    }

    #[test]
    fn leaves_inner_code_alone() {
        let input = "## Notes\n```\nraw\n```\n- after";
        assert_eq!(clean_markdown(input), "## Notes\n```\nraw\n```\n- after\n");
    }

    #[test]
    fn crlf_and_trailing_space() {
        assert_eq!(clean_markdown("## A  \r\n- b\t\r\n"), "## A\n- b\n");
    }

    #[test]
    fn fixes_tight_headings() {
        assert_eq!(clean_markdown("##Pipes\n###Pipe 1"), "## Pipes\n### Pipe 1\n");
        // A lone marker and horizontal rules are left as they are
        assert_eq!(clean_markdown("## Pipes\n---"), "## Pipes\n---\n");
    }

    #[test]
    fn normalises_bullet_glyphs() {
        assert_eq!(
            clean_markdown("• Size: 8\"\n  ▪ Material: PVC"),
            "- Size: 8\"\n  - Material: PVC\n"
        );
    }

    #[test]
    fn removes_invisible_characters() {
        assert_eq!(clean_markdown("\u{FEFF}\u{200B}## Pipes"), "## Pipes\n");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(clean_markdown("a\n\n\n\n\nb"), "a\n\nb\n");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(clean_markdown("  \n\n"), "");
    }

    #[test]
    fn table_helpers() {
        assert!(is_table_row("| ID | Rim |"));
        assert!(is_separator_row("|---|:---:|"));
        assert!(!is_separator_row("| MH-1 | 96.5 |"));
        assert_eq!(table_cells("| MH-1 | 96.5 |"), vec!["MH-1", "96.5"]);
    }
}
