//! Typed records: [`Pipe`], [`Structure`], [`EarthworkItem`].
//!
//! JSON keys carry their unit (`diameter_in`, `length_ft`, `cut_cy`) so the
//! output can be diffed field-for-field against ground-truth annotations.

use crate::field::Field;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Closed enums ─────────────────────────────────────────────────────────

/// Utility category of a pipe or structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Discipline {
    Sanitary,
    Storm,
    Water,
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Discipline::Sanitary => "Sanitary",
            Discipline::Storm => "Storm",
            Discipline::Water => "Water",
        })
    }
}

/// Pipe material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Material {
    #[serde(rename = "PVC")]
    Pvc,
    #[serde(rename = "DIP")]
    Dip,
    #[serde(rename = "RCP")]
    Rcp,
    #[serde(rename = "HDPE")]
    Hdpe,
    Aluminum,
    Unknown,
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Material::Pvc => "PVC",
            Material::Dip => "DIP",
            Material::Rcp => "RCP",
            Material::Hdpe => "HDPE",
            Material::Aluminum => "Aluminum",
            Material::Unknown => "Unknown",
        })
    }
}

// ── Open enums ───────────────────────────────────────────────────────────
//
// Kinds the drawings use are open-ended; anything not in the known list is
// kept verbatim in `Other`. They serialise as their canonical name.

macro_rules! open_kind {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Other(String),
        }

        impl $name {
            /// Canonical name of every known variant.
            pub const KNOWN: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Other(s) => s.as_str(),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                match s.as_str() {
                    $($text => $name::$variant,)+
                    _ => $name::Other(s),
                }
            }
        }

        impl From<$name> for String {
            fn from(k: $name) -> Self {
                k.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

open_kind!(
    /// Kind of pipe run.
    PipeKind {
        Pipe => "Pipe",
        Lateral => "Lateral",
        Vertical => "Vertical",
    }
);

open_kind!(
    /// Kind of drainage / utility structure.
    StructureKind {
        Manhole => "Manhole",
        CatchBasin => "CatchBasin",
        Culvert => "Culvert",
        Riser => "Riser",
        Dam => "Dam",
        ValveBox => "ValveBox",
        Hydrant => "Hydrant",
        Cleanout => "Cleanout",
        Inlet => "Inlet",
    }
);

open_kind!(
    /// Kind of earthwork operation.
    EarthworkKind {
        Trench => "Trench",
        SiteGrading => "SiteGrading",
        Excavation => "Excavation",
        Cut => "Cut",
        Fill => "Fill",
    }
);

// ── Overflow bag ─────────────────────────────────────────────────────────

/// A bullet the schema did not anticipate, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub value: String,
}

impl Overflow {
    pub fn labelled(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            value: value.into(),
        }
    }

    pub fn unlabelled(value: impl Into<String>) -> Self {
        Self {
            label: None,
            value: value.into(),
        }
    }
}

// ── Records ──────────────────────────────────────────────────────────────

/// One pipe run (or a group of identical laterals when `count > 1`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipe {
    /// Item heading as written, e.g. "Sanitary Pipe 1".
    pub label: String,
    pub discipline: Field<Discipline>,
    pub kind: Field<PipeKind>,
    pub diameter_in: Field<f64>,
    pub material: Field<Material>,
    pub from_id: Field<String>,
    pub to_id: Field<String>,
    pub invert_in_ft: Field<f64>,
    pub invert_out_ft: Field<f64>,
    pub length_ft: Field<f64>,
    pub depth_ft: Field<f64>,
    pub count: Field<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<Overflow>,
    pub source_pages: Vec<u32>,
}

/// A manhole, catch basin, or other point structure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Structure {
    pub label: String,
    pub id: Field<String>,
    pub kind: Field<StructureKind>,
    pub discipline: Field<Discipline>,
    pub rim_elevation_ft: Field<f64>,
    pub invert_in_ft: Field<f64>,
    pub invert_out_ft: Field<f64>,
    pub depth_ft: Field<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<Overflow>,
    pub source_pages: Vec<u32>,
}

/// A trench, grading area, or other earthwork quantity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EarthworkItem {
    pub label: String,
    pub kind: Field<EarthworkKind>,
    pub purpose: Field<String>,
    pub volume_cy: Field<f64>,
    pub cut_cy: Field<f64>,
    pub fill_cy: Field<f64>,
    pub net_cy: Field<f64>,
    pub depth_ft: Field<f64>,
    pub length_ft: Field<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<Overflow>,
    pub source_pages: Vec<u32>,
}

/// Shared read-only view over the three record kinds.
pub trait Record {
    /// Short human name used in logs, conflicts and the report.
    fn display_name(&self) -> String;

    /// `(json field name, reason)` for every field marked uncertain.
    fn uncertain_fields(&self) -> Vec<(&'static str, &str)>;

    /// Number of fields that hold a typed value.
    fn value_count(&self) -> usize;

    fn source_pages(&self) -> &[u32];
}

fn push_uncertain<'a, T>(
    out: &mut Vec<(&'static str, &'a str)>,
    name: &'static str,
    field: &'a Field<T>,
) {
    if let Some(reason) = field.reason() {
        out.push((name, reason));
    }
}

impl Pipe {
    /// Length × count; `None` when the length is not a value.
    pub fn linear_feet(&self) -> Option<f64> {
        let len = *self.length_ft.value()?;
        let count = self.count.value().copied().unwrap_or(1);
        Some(len * f64::from(count))
    }
}

impl Record for Pipe {
    fn display_name(&self) -> String {
        match (self.from_id.value(), self.to_id.value()) {
            (Some(from), Some(to)) => format!("{} ({from} → {to})", self.label),
            _ => self.label.clone(),
        }
    }

    fn uncertain_fields(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        push_uncertain(&mut out, "discipline", &self.discipline);
        push_uncertain(&mut out, "kind", &self.kind);
        push_uncertain(&mut out, "diameter_in", &self.diameter_in);
        push_uncertain(&mut out, "material", &self.material);
        push_uncertain(&mut out, "from_id", &self.from_id);
        push_uncertain(&mut out, "to_id", &self.to_id);
        push_uncertain(&mut out, "invert_in_ft", &self.invert_in_ft);
        push_uncertain(&mut out, "invert_out_ft", &self.invert_out_ft);
        push_uncertain(&mut out, "length_ft", &self.length_ft);
        push_uncertain(&mut out, "depth_ft", &self.depth_ft);
        push_uncertain(&mut out, "count", &self.count);
        out
    }

    fn value_count(&self) -> usize {
        [
            self.discipline.is_value(),
            self.kind.is_value(),
            self.diameter_in.is_value(),
            self.material.is_value(),
            self.from_id.is_value(),
            self.to_id.is_value(),
            self.invert_in_ft.is_value(),
            self.invert_out_ft.is_value(),
            self.length_ft.is_value(),
            self.depth_ft.is_value(),
            self.count.is_value(),
        ]
        .into_iter()
        .filter(|v| *v)
        .count()
    }

    fn source_pages(&self) -> &[u32] {
        &self.source_pages
    }
}

impl Record for Structure {
    fn display_name(&self) -> String {
        match self.id.value() {
            Some(id) => id.clone(),
            None => self.label.clone(),
        }
    }

    fn uncertain_fields(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        push_uncertain(&mut out, "id", &self.id);
        push_uncertain(&mut out, "kind", &self.kind);
        push_uncertain(&mut out, "discipline", &self.discipline);
        push_uncertain(&mut out, "rim_elevation_ft", &self.rim_elevation_ft);
        push_uncertain(&mut out, "invert_in_ft", &self.invert_in_ft);
        push_uncertain(&mut out, "invert_out_ft", &self.invert_out_ft);
        push_uncertain(&mut out, "depth_ft", &self.depth_ft);
        out
    }

    fn value_count(&self) -> usize {
        [
            self.id.is_value(),
            self.kind.is_value(),
            self.discipline.is_value(),
            self.rim_elevation_ft.is_value(),
            self.invert_in_ft.is_value(),
            self.invert_out_ft.is_value(),
            self.depth_ft.is_value(),
        ]
        .into_iter()
        .filter(|v| *v)
        .count()
    }

    fn source_pages(&self) -> &[u32] {
        &self.source_pages
    }
}

impl Record for EarthworkItem {
    fn display_name(&self) -> String {
        self.label.clone()
    }

    fn uncertain_fields(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        push_uncertain(&mut out, "kind", &self.kind);
        push_uncertain(&mut out, "purpose", &self.purpose);
        push_uncertain(&mut out, "volume_cy", &self.volume_cy);
        push_uncertain(&mut out, "cut_cy", &self.cut_cy);
        push_uncertain(&mut out, "fill_cy", &self.fill_cy);
        push_uncertain(&mut out, "net_cy", &self.net_cy);
        push_uncertain(&mut out, "depth_ft", &self.depth_ft);
        push_uncertain(&mut out, "length_ft", &self.length_ft);
        out
    }

    fn value_count(&self) -> usize {
        [
            self.kind.is_value(),
            self.purpose.is_value(),
            self.volume_cy.is_value(),
            self.cut_cy.is_value(),
            self.fill_cy.is_value(),
            self.net_cy.is_value(),
            self.depth_ft.is_value(),
            self.length_ft.is_value(),
        ]
        .into_iter()
        .filter(|v| *v)
        .count()
    }

    fn source_pages(&self) -> &[u32] {
        &self.source_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_serialises_as_acronym() {
        assert_eq!(serde_json::to_string(&Material::Pvc).unwrap(), "\"PVC\"");
        let m: Material = serde_json::from_str("\"HDPE\"").unwrap();
        assert_eq!(m, Material::Hdpe);
    }

    #[test]
    fn open_kind_keeps_unknown_text() {
        let k: StructureKind = serde_json::from_str("\"Headwall\"").unwrap();
        assert_eq!(k, StructureKind::Other("Headwall".into()));
        assert_eq!(serde_json::to_string(&k).unwrap(), "\"Headwall\"");
        let k: StructureKind = serde_json::from_str("\"CatchBasin\"").unwrap();
        assert_eq!(k, StructureKind::CatchBasin);
    }

    #[test]
    fn linear_feet_uses_count() {
        let lateral = Pipe {
            length_ft: Field::Value(31.5),
            count: Field::Value(4),
            ..Default::default()
        };
        assert_eq!(lateral.linear_feet(), Some(126.0));

        let main = Pipe {
            length_ft: Field::Value(806.01),
            ..Default::default()
        };
        assert_eq!(main.linear_feet(), Some(806.01));

        let unknown = Pipe {
            length_ft: Field::uncertain("cut off"),
            ..Default::default()
        };
        assert_eq!(unknown.linear_feet(), None);
    }

    #[test]
    fn uncertain_fields_listed_by_json_name() {
        let s = Structure {
            id: Field::Value("MH-SS-1".into()),
            depth_ft: Field::uncertain("Not visible"),
            ..Default::default()
        };
        assert_eq!(s.uncertain_fields(), vec![("depth_ft", "Not visible")]);
        assert_eq!(s.display_name(), "MH-SS-1");
    }

    #[test]
    fn missing_keys_default_to_absent() {
        let p: Pipe = serde_json::from_str(r#"{"label":"P1","diameter_in":8.0}"#).unwrap();
        assert_eq!(p.diameter_in, Field::Value(8.0));
        assert!(p.length_ft.is_absent());
        assert!(p.extra.is_empty());
    }
}
