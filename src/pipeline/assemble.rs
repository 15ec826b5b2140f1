//! Document assembly: ordered pages → merged [`DocumentExtraction`].
//!
//! The document is a pure function of its page list. Re-running
//! [`assemble`] on `doc.pages` reproduces `doc`, and a corrected page is
//! applied by pushing it onto the list and assembling again.

use crate::output::{
    DocumentExtraction, DocumentSummary, Endpoint, PageExtraction, UnresolvedReference,
};
use crate::pipeline::fields::{normalize_id, structure_id_in};
use crate::pipeline::quality::summarize;
use crate::pipeline::reconcile::{reconcile, MergePolicy};
use crate::record::Record;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Order pages by number; a later page with the same number replaces the
/// earlier one.
pub fn order_pages(pages: Vec<PageExtraction>) -> Vec<PageExtraction> {
    let mut by_num: BTreeMap<u32, PageExtraction> = BTreeMap::new();
    for page in pages {
        if by_num.insert(page.page_num, page).is_some() {
            debug!("page replaced by a later extraction");
        }
    }
    by_num.into_values().collect()
}

/// Merge every page into one document.
pub fn assemble(pages: Vec<PageExtraction>, policy: MergePolicy) -> DocumentExtraction {
    let pages = order_pages(pages);
    let merged = reconcile(&pages, policy);
    let unresolved = unresolved_references(&pages);

    let mut linear_ft_by_discipline: BTreeMap<String, f64> = BTreeMap::new();
    let mut total_linear_ft = 0.0;
    for pipe in &merged.pipes {
        if let Some(lf) = pipe.linear_feet() {
            total_linear_ft += lf;
            let key = pipe
                .discipline
                .value()
                .map_or_else(|| "Unknown".to_string(), |d| d.to_string());
            *linear_ft_by_discipline.entry(key).or_insert(0.0) += lf;
        }
    }

    let summary = DocumentSummary {
        total_pipes: merged.pipes.len(),
        total_structures: merged.structures.len(),
        total_earthwork: merged.earthwork.len(),
        total_linear_ft,
        linear_ft_by_discipline,
        conflicts: merged.conflicts.len(),
        unresolved_references: unresolved.len(),
        quality: summarize(&pages),
    };

    info!(
        "Assembled {} pages: {} pipes, {} structures, {} earthwork, {} conflicts, {} unresolved",
        pages.len(),
        summary.total_pipes,
        summary.total_structures,
        summary.total_earthwork,
        summary.conflicts,
        summary.unresolved_references
    );

    DocumentExtraction {
        pipes: merged.pipes,
        structures: merged.structures,
        earthwork: merged.earthwork,
        summary,
        conflicts: merged.conflicts,
        unresolved_references: unresolved,
        pages,
    }
}

/// Pipe endpoints that look like structure IDs but name no structure on the
/// same page or the pages either side. `pages` must already be ordered.
pub fn unresolved_references(pages: &[PageExtraction]) -> Vec<UnresolvedReference> {
    let ids: HashMap<u32, HashSet<String>> = pages
        .iter()
        .map(|p| {
            let set = p
                .structures
                .iter()
                .filter_map(|s| s.id.value())
                .map(|id| normalize_id(id))
                .collect();
            (p.page_num, set)
        })
        .collect();

    let known = |page: u32, id: &str| {
        [page.checked_sub(1), Some(page), page.checked_add(1)]
            .into_iter()
            .flatten()
            .any(|n| ids.get(&n).is_some_and(|set| set.contains(id)))
    };

    let mut out = Vec::new();
    for page in pages {
        for pipe in &page.pipes {
            for (endpoint, field) in [(Endpoint::From, &pipe.from_id), (Endpoint::To, &pipe.to_id)] {
                let Some(raw) = field.value() else { continue };
                let Some(id) = structure_id_in(raw) else { continue };
                if !known(page.page_num, &normalize_id(&id)) {
                    debug!(page = page.page_num, id = %id, "unresolved pipe endpoint");
                    out.push(UnresolvedReference {
                        page: page.page_num,
                        pipe: pipe.display_name(),
                        endpoint,
                        structure_id: id,
                    });
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::record::{Discipline, Pipe, Structure};

    fn mh(id: &str) -> Structure {
        Structure {
            label: id.into(),
            id: Field::Value(id.into()),
            discipline: Field::Value(Discipline::Sanitary),
            ..Default::default()
        }
    }

    fn run(from: &str, to: &str, len: f64) -> Pipe {
        Pipe {
            label: "Sanitary Pipe".into(),
            discipline: Field::Value(Discipline::Sanitary),
            from_id: Field::Value(from.into()),
            to_id: Field::Value(to.into()),
            length_ft: Field::Value(len),
            ..Default::default()
        }
    }

    #[test]
    fn later_page_replaces_earlier() {
        let first = PageExtraction {
            page_num: 2,
            notes: vec!["old".into()],
            ..Default::default()
        };
        let second = PageExtraction {
            page_num: 2,
            notes: vec!["new".into()],
            ..Default::default()
        };
        let one = PageExtraction {
            page_num: 1,
            ..Default::default()
        };
        let ordered = order_pages(vec![first, one, second]);
        assert_eq!(ordered.iter().map(|p| p.page_num).collect::<Vec<_>>(), [1, 2]);
        assert_eq!(ordered[1].notes, vec!["new"]);
    }

    #[test]
    fn endpoints_resolve_on_adjacent_pages() {
        let p1 = PageExtraction {
            page_num: 1,
            structures: vec![mh("MH-1")],
            ..Default::default()
        };
        let p2 = PageExtraction {
            page_num: 2,
            pipes: vec![run("MH 1", "MH-9", 100.0)],
            ..Default::default()
        };
        let p4 = PageExtraction {
            page_num: 4,
            structures: vec![mh("MH-9")],
            ..Default::default()
        };
        let refs = unresolved_references(&[p1, p2, p4]);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].endpoint, Endpoint::To);
        assert_eq!(refs[0].structure_id, "MH-9");
        assert_eq!(refs[0].page, 2);
    }

    #[test]
    fn descriptive_endpoints_are_not_checked() {
        let page = PageExtraction {
            page_num: 1,
            pipes: vec![run("existing main", "building", 20.0)],
            ..Default::default()
        };
        assert!(unresolved_references(&[page]).is_empty());
    }

    #[test]
    fn linear_feet_by_discipline() {
        let mut storm = run("CB-1", "CB-2", 40.0);
        storm.discipline = Field::Value(Discipline::Storm);
        let mut unknown = run("A-1", "A-2", 10.0);
        unknown.discipline = Field::Absent;
        unknown.count = Field::Value(3);
        let page = PageExtraction {
            page_num: 1,
            pipes: vec![run("MH-1", "MH-2", 100.5), storm, unknown],
            structures: vec![mh("MH-1"), mh("MH-2")],
            ..Default::default()
        };
        let doc = assemble(vec![page], MergePolicy::default());
        assert_eq!(doc.summary.total_pipes, 3);
        assert!((doc.summary.total_linear_ft - 170.5).abs() < 1e-9);
        assert_eq!(doc.summary.linear_ft_by_discipline["Sanitary"], 100.5);
        assert_eq!(doc.summary.linear_ft_by_discipline["Storm"], 40.0);
        assert_eq!(doc.summary.linear_ft_by_discipline["Unknown"], 30.0);
        assert_eq!(doc.summary.unresolved_references, 4);
    }

    #[test]
    fn reassembling_pages_is_stable() {
        let page = PageExtraction {
            page_num: 1,
            pipes: vec![run("MH-1", "MH-2", 100.0)],
            structures: vec![mh("MH-1"), mh("MH-2")],
            ..Default::default()
        };
        let doc = assemble(vec![page], MergePolicy::default());
        let again = assemble(doc.pages.clone(), MergePolicy::default());
        assert_eq!(doc, again);
    }
}
