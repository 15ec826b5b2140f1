//! Reconciliation: duplicate detection and field-level conflict resolution.
//!
//! Records are visited in canonical order (page number, then position on the
//! page), grouped by key, and each group collapses into one record. Because
//! the order is canonical the outcome depends only on the page set, never on
//! the order pages were processed in.
//!
//! | Record | Key |
//! |--------|-----|
//! | Structure | `(normalised ID, discipline)`; no ID → never merged |
//! | Pipe | `(from, to, discipline)` when both endpoints are known |
//! | Pipe, endpoints unknown | exact diameter + material + length, across pages only |
//! | Earthwork | kind + volumes rounded to whole CY, across pages only |
//!
//! Within a group each field is settled on its own. A stated field always
//! beats an absent one; the [`MergePolicy`] orders the stated candidates,
//! typed values and uncertain markers alike.

use crate::field::Field;
use crate::output::{MergeConflict, PageExtraction, Resolution};
use crate::pipeline::fields::normalize_id;
use crate::record::{
    Discipline, EarthworkItem, EarthworkKind, Material, Overflow, Pipe, PipeKind, Record,
    Structure, StructureKind,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// How competing field values from duplicate records are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Page confidence, then typed over uncertain, then most specific
    /// number, then first seen.
    #[default]
    ConfidenceFirst,
    /// Record with the most typed fields, then page confidence.
    MostComplete,
    /// Typed over uncertain, then most specific number, then page confidence.
    MostSpecific,
    /// Latest page wins.
    MostRecent,
}

impl MergePolicy {
    fn criteria(self) -> &'static [Resolution] {
        match self {
            MergePolicy::ConfidenceFirst => &[
                Resolution::Confidence,
                Resolution::Certainty,
                Resolution::Specificity,
                Resolution::FirstSeen,
            ],
            MergePolicy::MostComplete => &[
                Resolution::Completeness,
                Resolution::Confidence,
                Resolution::Certainty,
                Resolution::Specificity,
                Resolution::FirstSeen,
            ],
            MergePolicy::MostSpecific => &[
                Resolution::Certainty,
                Resolution::Specificity,
                Resolution::Confidence,
                Resolution::FirstSeen,
            ],
            MergePolicy::MostRecent => &[Resolution::Recency],
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergePolicy::ConfidenceFirst => "confidence-first",
            MergePolicy::MostComplete => "most-complete",
            MergePolicy::MostSpecific => "most-specific",
            MergePolicy::MostRecent => "most-recent",
        })
    }
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "confidence-first" | "confidence" => Ok(MergePolicy::ConfidenceFirst),
            "most-complete" | "complete" => Ok(MergePolicy::MostComplete),
            "most-specific" | "specific" => Ok(MergePolicy::MostSpecific),
            "most-recent" | "recent" => Ok(MergePolicy::MostRecent),
            other => Err(format!(
                "unknown merge policy '{other}' (expected confidence-first, most-complete, most-specific or most-recent)"
            )),
        }
    }
}

// ── Specificity ──────────────────────────────────────────────────────────────

/// How precisely a value was stated. Higher is more specific.
pub trait Specificity {
    fn specificity(&self) -> u32;
}

impl Specificity for f64 {
    /// Decimal places in the shortest representation: `806.01` → 2, `3.0` → 0.
    fn specificity(&self) -> u32 {
        let s = self.to_string();
        s.split_once('.')
            .map_or(0, |(_, frac)| u32::try_from(frac.len()).unwrap_or(u32::MAX))
    }
}

impl Specificity for u32 {
    fn specificity(&self) -> u32 {
        0
    }
}

impl Specificity for String {
    fn specificity(&self) -> u32 {
        u32::try_from(self.chars().count()).unwrap_or(u32::MAX)
    }
}

impl Specificity for Material {
    fn specificity(&self) -> u32 {
        u32::from(*self != Material::Unknown)
    }
}

impl Specificity for Discipline {
    fn specificity(&self) -> u32 {
        1
    }
}

macro_rules! kind_specificity {
    ($($kind:ident),+) => {$(
        impl Specificity for $kind {
            fn specificity(&self) -> u32 {
                u32::from(!matches!(self, $kind::Other(_)))
            }
        }
    )+};
}

kind_specificity!(PipeKind, StructureKind, EarthworkKind);

// ── Candidates ───────────────────────────────────────────────────────────────

/// Where a record came from and how much its page is trusted.
#[derive(Debug, Clone, Copy)]
struct Meta {
    page: u32,
    pos: usize,
    confidence: f64,
    value_count: usize,
}

type Group<'a, R> = Vec<(&'a R, Meta)>;

/// Per-value scores, as opposed to the per-record [`Meta`].
#[derive(Debug, Clone, Copy)]
struct Score {
    certainty: u8,
    specificity: u32,
}

impl Score {
    fn of<T: Specificity>(field: &Field<T>) -> Self {
        Self {
            certainty: field.certainty_rank(),
            specificity: field.value().map_or(0, Specificity::specificity),
        }
    }
}

fn compare(criterion: Resolution, a: &Meta, a_score: Score, b: &Meta, b_score: Score) -> Ordering {
    // Greater means `a` is preferred
    match criterion {
        Resolution::Confidence => a.confidence.total_cmp(&b.confidence),
        Resolution::Certainty => a_score.certainty.cmp(&b_score.certainty),
        Resolution::Specificity => a_score.specificity.cmp(&b_score.specificity),
        Resolution::Completeness => a.value_count.cmp(&b.value_count),
        Resolution::Recency => (a.page, a.pos).cmp(&(b.page, b.pos)),
        Resolution::FirstSeen => (b.page, b.pos).cmp(&(a.page, a.pos)),
    }
}

struct Merger<'c> {
    policy: MergePolicy,
    record: &'static str,
    key: String,
    conflicts: &'c mut Vec<MergeConflict>,
}

impl Merger<'_> {
    /// Settle one field across a group.
    fn field<R, T>(
        &mut self,
        name: &'static str,
        group: &[(&R, Meta)],
        get: impl Fn(&R) -> &Field<T>,
    ) -> Field<T>
    where
        T: Clone + PartialEq + fmt::Display + Specificity,
    {
        let stated: Vec<(&Field<T>, &Meta)> = group
            .iter()
            .map(|(r, m)| (get(*r), m))
            .filter(|(f, _)| f.is_stated())
            .collect();
        let Some(first) = stated.first() else {
            return Field::Absent;
        };
        if stated.iter().all(|(f, _)| *f == first.0) {
            return first.0.clone();
        }

        let criteria = self.policy.criteria();
        let rank = |a: &(&Field<T>, &Meta), b: &(&Field<T>, &Meta)| {
            criteria
                .iter()
                .map(|c| compare(*c, a.1, Score::of(a.0), b.1, Score::of(b.0)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        };

        let mut winner = &stated[0];
        for cand in &stated[1..] {
            if rank(cand, winner) == Ordering::Greater {
                winner = cand;
            }
        }

        // Which rule separated the winner from the best differing candidate
        let runner_up = stated
            .iter()
            .filter(|(f, _)| *f != winner.0)
            .reduce(|best, c| if rank(c, best) == Ordering::Greater { c } else { best });
        let resolved_by = runner_up
            .and_then(|other| {
                criteria.iter().copied().find(|c| {
                    compare(*c, winner.1, Score::of(winner.0), other.1, Score::of(other.0)).is_ne()
                })
            })
            .unwrap_or(Resolution::FirstSeen);

        let discarded: Vec<(u32, String)> = stated
            .iter()
            .filter(|(f, _)| *f != winner.0)
            .map(|(f, m)| (m.page, f.to_string()))
            .collect();

        let conflict = MergeConflict {
            record: self.record.to_string(),
            key: self.key.clone(),
            field: name.to_string(),
            kept: winner.0.to_string(),
            kept_page: winner.1.page,
            discarded,
            resolved_by,
        };
        if resolved_by == Resolution::FirstSeen {
            warn!(record = self.record, key = %self.key, field = name, kept = %conflict.kept,
                "Merge tie; keeping first-seen value");
        } else {
            debug!(record = self.record, key = %self.key, field = name, kept = %conflict.kept,
                ?resolved_by, "Merge conflict resolved");
        }
        self.conflicts.push(conflict);
        winner.0.clone()
    }
}

fn union_pages<R: Record>(group: &[(&R, Meta)]) -> Vec<u32> {
    let mut pages: Vec<u32> = group
        .iter()
        .flat_map(|(r, _)| r.source_pages().iter().copied())
        .collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}

fn union_extra<'a>(all: impl Iterator<Item = &'a Vec<Overflow>>) -> Vec<Overflow> {
    let mut out: Vec<Overflow> = Vec::new();
    for o in all.flatten() {
        if !out.contains(o) {
            out.push(o.clone());
        }
    }
    out
}

// ── Grouping ─────────────────────────────────────────────────────────────────

/// Every record of one kind from every page, in canonical order.
fn in_page_order<'a, R: Record>(
    pages: &'a [PageExtraction],
    records: impl Fn(&'a PageExtraction) -> &'a [R],
) -> Vec<(&'a R, Meta)> {
    let mut ordered: Vec<&PageExtraction> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_num);
    ordered
        .into_iter()
        .flat_map(|page| {
            let confidence = page.quality.effective_confidence();
            records(page).iter().enumerate().map(move |(pos, r)| {
                (
                    r,
                    Meta {
                        page: page.page_num,
                        pos,
                        confidence,
                        value_count: r.value_count(),
                    },
                )
            })
        })
        .collect()
}

/// Group by exact key; records without a key stand alone.
fn group_by_key<'a, R, K>(
    records: Vec<(&'a R, Meta)>,
    key: impl Fn(&R) -> Option<K>,
) -> Vec<Group<'a, R>>
where
    K: std::hash::Hash + Eq,
{
    let mut groups: Vec<Group<'a, R>> = Vec::new();
    let mut index: HashMap<K, usize> = HashMap::new();
    for (r, meta) in records {
        match key(r) {
            Some(k) => match index.get(&k) {
                Some(&i) => groups[i].push((r, meta)),
                None => {
                    index.insert(k, groups.len());
                    groups.push(vec![(r, meta)]);
                }
            },
            None => groups.push(vec![(r, meta)]),
        }
    }
    groups
}

/// Group by fingerprint, but only across pages: a record joins the first
/// group with its fingerprint that has nothing from its own page yet.
fn group_across_pages<'a, R, K>(
    records: Vec<(&'a R, Meta)>,
    fingerprint: impl Fn(&R) -> Option<K>,
) -> Vec<Group<'a, R>>
where
    K: PartialEq,
{
    let mut groups: Vec<(Option<K>, Group<'a, R>)> = Vec::new();
    for (r, meta) in records {
        let fp = fingerprint(r);
        let slot = fp.as_ref().and_then(|fp| {
            groups.iter().position(|(g_fp, members)| {
                g_fp.as_ref() == Some(fp) && members.iter().all(|(_, m)| m.page != meta.page)
            })
        });
        match slot {
            Some(i) => groups[i].1.push((r, meta)),
            None => groups.push((fp, vec![(r, meta)])),
        }
    }
    groups.into_iter().map(|(_, g)| g).collect()
}

fn endpoint_key(f: &Field<String>) -> Option<String> {
    f.value().map(|s| normalize_id(s)).filter(|s| !s.is_empty())
}

/// Exact bit pattern, so 8.0 and 8.00 match but 8.0 and 8.01 do not.
fn exact(f: &Field<f64>) -> Option<u64> {
    f.value().map(|v| v.to_bits())
}

fn whole_cy(f: &Field<f64>) -> Option<i64> {
    f.value().map(|v| v.round() as i64)
}

// ── Merging ──────────────────────────────────────────────────────────────────

/// Output of [`reconcile`].
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    pub pipes: Vec<Pipe>,
    pub structures: Vec<Structure>,
    pub earthwork: Vec<EarthworkItem>,
    pub conflicts: Vec<MergeConflict>,
}

/// Merge duplicate records across the given pages.
pub fn reconcile(pages: &[PageExtraction], policy: MergePolicy) -> Reconciled {
    let mut conflicts = Vec::new();

    // Structures
    let structures: Vec<Structure> = group_by_key(in_page_order(pages, |p| p.structures.as_slice()), |s: &Structure| {
        let id = endpoint_key(&s.id)?;
        Some((id, s.discipline.value().copied()))
    })
    .into_iter()
    .map(|g| merge_structure(&g, policy, &mut conflicts))
    .collect();

    // Pipes: keyed first, then fingerprinted
    let (keyed, loose): (Vec<_>, Vec<_>) = in_page_order(pages, |p| p.pipes.as_slice())
        .into_iter()
        .partition(|(p, _)| endpoint_key(&p.from_id).is_some() && endpoint_key(&p.to_id).is_some());
    let mut pipe_groups = group_by_key(keyed, |p: &Pipe| {
        Some((
            endpoint_key(&p.from_id)?,
            endpoint_key(&p.to_id)?,
            p.discipline.value().copied(),
        ))
    });
    pipe_groups.extend(group_across_pages(loose, |p: &Pipe| {
        Some((exact(&p.diameter_in)?, *p.material.value()?, exact(&p.length_ft)?))
    }));
    // Keep canonical order: by first member's page and position
    pipe_groups.sort_by_key(|g| g.first().map(|(_, m)| (m.page, m.pos)));
    let pipes: Vec<Pipe> = pipe_groups
        .iter()
        .map(|g| merge_pipe(g, policy, &mut conflicts))
        .collect();

    // Earthwork
    let earthwork: Vec<EarthworkItem> = group_across_pages(in_page_order(pages, |p| p.earthwork.as_slice()), |e: &EarthworkItem| {
        let kind = e.kind.value()?.clone();
        let volumes = [
            whole_cy(&e.volume_cy),
            whole_cy(&e.cut_cy),
            whole_cy(&e.fill_cy),
            whole_cy(&e.net_cy),
        ];
        volumes.iter().any(Option::is_some).then_some((kind, volumes))
    })
    .into_iter()
    .map(|g| merge_earthwork(&g, policy, &mut conflicts))
    .collect();

    Reconciled {
        pipes,
        structures,
        earthwork,
        conflicts,
    }
}

fn merge_structure(
    group: &[(&Structure, Meta)],
    policy: MergePolicy,
    conflicts: &mut Vec<MergeConflict>,
) -> Structure {
    let (first, _) = group[0];
    if group.len() == 1 {
        return first.clone();
    }
    let mut m = Merger {
        policy,
        record: "structure",
        key: first.display_name(),
        conflicts,
    };
    Structure {
        label: first.label.clone(),
        id: m.field("id", group, |s| &s.id),
        kind: m.field("kind", group, |s| &s.kind),
        discipline: m.field("discipline", group, |s| &s.discipline),
        rim_elevation_ft: m.field("rim_elevation_ft", group, |s| &s.rim_elevation_ft),
        invert_in_ft: m.field("invert_in_ft", group, |s| &s.invert_in_ft),
        invert_out_ft: m.field("invert_out_ft", group, |s| &s.invert_out_ft),
        depth_ft: m.field("depth_ft", group, |s| &s.depth_ft),
        extra: union_extra(group.iter().map(|(s, _)| &s.extra)),
        source_pages: union_pages(group),
    }
}

fn merge_pipe(
    group: &[(&Pipe, Meta)],
    policy: MergePolicy,
    conflicts: &mut Vec<MergeConflict>,
) -> Pipe {
    let (first, _) = group[0];
    if group.len() == 1 {
        return first.clone();
    }
    let mut m = Merger {
        policy,
        record: "pipe",
        key: first.display_name(),
        conflicts,
    };
    Pipe {
        label: first.label.clone(),
        discipline: m.field("discipline", group, |p| &p.discipline),
        kind: m.field("kind", group, |p| &p.kind),
        diameter_in: m.field("diameter_in", group, |p| &p.diameter_in),
        material: m.field("material", group, |p| &p.material),
        from_id: m.field("from_id", group, |p| &p.from_id),
        to_id: m.field("to_id", group, |p| &p.to_id),
        invert_in_ft: m.field("invert_in_ft", group, |p| &p.invert_in_ft),
        invert_out_ft: m.field("invert_out_ft", group, |p| &p.invert_out_ft),
        length_ft: m.field("length_ft", group, |p| &p.length_ft),
        depth_ft: m.field("depth_ft", group, |p| &p.depth_ft),
        count: m.field("count", group, |p| &p.count),
        extra: union_extra(group.iter().map(|(p, _)| &p.extra)),
        source_pages: union_pages(group),
    }
}

fn merge_earthwork(
    group: &[(&EarthworkItem, Meta)],
    policy: MergePolicy,
    conflicts: &mut Vec<MergeConflict>,
) -> EarthworkItem {
    let (first, _) = group[0];
    if group.len() == 1 {
        return first.clone();
    }
    let mut m = Merger {
        policy,
        record: "earthwork",
        key: first.display_name(),
        conflicts,
    };
    EarthworkItem {
        label: first.label.clone(),
        kind: m.field("kind", group, |e| &e.kind),
        purpose: m.field("purpose", group, |e| &e.purpose),
        volume_cy: m.field("volume_cy", group, |e| &e.volume_cy),
        cut_cy: m.field("cut_cy", group, |e| &e.cut_cy),
        fill_cy: m.field("fill_cy", group, |e| &e.fill_cy),
        net_cy: m.field("net_cy", group, |e| &e.net_cy),
        depth_ft: m.field("depth_ft", group, |e| &e.depth_ft),
        length_ft: m.field("length_ft", group, |e| &e.length_ft),
        extra: union_extra(group.iter().map(|(e, _)| &e.extra)),
        source_pages: union_pages(group),
    }
}
