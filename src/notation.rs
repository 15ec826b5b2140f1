//! Abbreviation and notation expansion.
//!
//! Drawings are full of firm-specific shorthand: `IE` for invert elevation,
//! `SD` for storm drain, `FH` for fire hydrant. The parser first tries its
//! own keyword tables; when those miss, it asks an injected
//! [`NotationLookup`] to expand the term and tries again.
//!
//! The lookup is a pure string → string capability. Nothing in the parser
//! requires one, so a missing or empty lookup only means fewer values are
//! recognised, never that parsing fails. Any `Fn(&str) -> Option<String>`
//! closure works, which keeps a vector-store or RAG backend entirely outside
//! this crate.

use std::fmt::Write as _;

/// Expands an abbreviation to the standard term the parser understands.
pub trait NotationLookup: Send + Sync {
    /// Expand `term`, or `None` when it is not known.
    fn expand(&self, term: &str) -> Option<String>;

    /// Prompt-ready description of the notation, for the vision passes.
    fn prompt_context(&self) -> Option<String> {
        None
    }
}

impl<F> NotationLookup for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn expand(&self, term: &str) -> Option<String> {
        self(term)
    }
}

/// A static table of standard terms and the notations that mean them.
#[derive(Debug, Clone, Default)]
pub struct NotationGuide {
    entries: Vec<(String, Vec<String>)>,
}

impl NotationGuide {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a standard term and its notations.
    pub fn with_entry<I, S>(mut self, term: impl Into<String>, notations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .push((term.into(), notations.into_iter().map(Into::into).collect()));
        self
    }

    /// The common sitework abbreviations used on civil drawing sets.
    pub fn sitework() -> Self {
        Self::new()
            .with_entry("sanitary", ["SS", "SAN", "SSL", "sanitary sewer", "sewer"])
            .with_entry("storm", ["SD", "STM", "storm drain", "storm sewer"])
            .with_entry("water", ["WM", "W", "water main", "potable water"])
            .with_entry("manhole", ["MH", "SMH", "SDMH"])
            .with_entry("catch basin", ["CB", "CBMH", "curb inlet"])
            .with_entry("cleanout", ["CO", "SSL cleanout"])
            .with_entry("valve box", ["VB", "GV", "gate valve"])
            .with_entry("hydrant", ["FH", "fire hydrant", "HYD"])
            .with_entry("invert elevation", ["IE", "INV", "invert"])
            .with_entry("rim elevation", ["RIM", "TC", "top of casting", "top"])
            .with_entry("ground level", ["GL", "EG", "existing grade"])
            .with_entry("finished grade", ["FG", "finish grade"])
            .with_entry("pvc", ["PVC", "SDR-35", "SDR35", "C900"])
            .with_entry("dip", ["DIP", "DI", "ductile iron"])
            .with_entry("hdpe", ["HDPE", "N-12", "ADS"])
            .with_entry("rcp", ["RCP", "concrete pipe", "reinforced concrete"])
            .with_entry("aluminum", ["CAP", "ALUM", "corrugated aluminum"])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl NotationLookup for NotationGuide {
    fn expand(&self, term: &str) -> Option<String> {
        let needle = term.trim();
        if needle.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(_, notations)| notations.iter().any(|n| n.eq_ignore_ascii_case(needle)))
            .map(|(standard, _)| standard.clone())
    }

    fn prompt_context(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let mut out = String::from("## Common Abbreviations\n");
        for (term, notations) in &self.entries {
            let _ = writeln!(out, "- {}: {}", term, notations.join(", "));
        }
        Some(out)
    }
}
