//! Nearest-reference selection over a query lineage.
//!
//! Both scorers keep the highest-scoring candidate, keep the first one seen on
//! ties and report [`Selection::NoMatch`] when nothing scores above zero. A
//! match on the root alone therefore never counts.

use serde::Serialize;

use crate::catalog::CatalogEntry;
use crate::domain::{Lineage, TaxonId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Selection {
    Match { taxon: TaxonId, score: usize },
    NoMatch,
}

impl Selection {
    pub fn taxon(&self) -> Option<TaxonId> {
        match self {
            Selection::Match { taxon, .. } => Some(*taxon),
            Selection::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Selection::Match { .. })
    }
}

fn best_of(scored: impl IntoIterator<Item = (TaxonId, usize)>) -> Selection {
    let mut best = Selection::NoMatch;
    let mut best_score = 0;
    for (taxon, score) in scored {
        if score > best_score {
            best_score = score;
            best = Selection::Match { taxon, score };
        }
    }
    best
}

/// Picks the candidate that sits deepest in `query`: its score is its index
/// in the query lineage. Candidates outside the lineage are skipped.
pub fn select_by_position(query: &Lineage, candidates: &[TaxonId]) -> Selection {
    best_of(
        candidates
            .iter()
            .filter_map(|taxon| query.position(*taxon).map(|pos| (*taxon, pos))),
    )
}

/// Score of one candidate lineage against `query`.
///
/// The candidate cursor only moves forward: for each query position it skips
/// ahead until it finds the query id, and the walk stops at the first query id
/// it cannot find. The score is the candidate-side index of the last match.
pub fn prefix_overlap_score(query: &Lineage, candidate: &Lineage) -> usize {
    let candidate = candidate.as_slice();
    if candidate.is_empty() {
        return 0;
    }
    let mut pos1 = 0;
    let mut last_match = 0;
    for taxon in query.as_slice() {
        while *taxon != candidate[pos1] && pos1 + 1 < candidate.len() {
            pos1 += 1;
        }
        if *taxon == candidate[pos1] {
            last_match = pos1;
        } else {
            break;
        }
    }
    last_match
}

/// Picks the catalog entry sharing the deepest ancestor with `query`.
/// Entries without a lineage are not scored.
pub fn select_by_prefix_overlap(query: &Lineage, entries: &[CatalogEntry]) -> Selection {
    best_of(entries.iter().filter_map(|entry| {
        entry
            .lineage
            .as_ref()
            .map(|lineage| (entry.taxon, prefix_overlap_score(query, lineage)))
    }))
}
