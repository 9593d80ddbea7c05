use tracing::info;

use super::rows::{extract_candidates, Row};
use super::status::SortKey;
use crate::error::SelectError;

/// A valid, deduplicated candidate together with its clickable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry<L> {
    pub ip: String,
    pub label: String,
    pub sort_key: SortKey,
    pub text: String,
    pub link: L,
}

/// Valid candidates ordered freshest first.
#[derive(Debug, Clone)]
pub struct Ranking<L> {
    entries: Vec<RankedEntry<L>>,
}

impl<L: Clone> Ranking<L> {
    pub fn from_rows<R: Row<Link = L>>(rows: &[R], marker: &str) -> Self {
        let mut entries = extract_candidates(rows, marker);
        // sort_by_key is stable: equal keys keep page order.
        entries.sort_by_key(|e| e.sort_key);
        info!(rows = rows.len(), valid = entries.len(), "Ranked multicast candidates");
        Ranking { entries }
    }

    pub fn entries(&self) -> &[RankedEntry<L>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at 1-indexed `rank` (1 = freshest).
    pub fn select(&self, rank: usize) -> Result<&RankedEntry<L>, SelectError> {
        if self.entries.is_empty() {
            return Err(SelectError::NoValidCandidates);
        }
        rank.checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .ok_or(SelectError::OutOfRange {
                rank,
                available: self.entries.len(),
            })
    }

    /// One display line per entry, the selected rank marked.
    pub fn render(&self, selected: usize) -> Vec<String> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let mark = if i + 1 == selected { "  <- selected" } else { "" };
                format!("  #{:<3} {:<15}  {}{}", i + 1, e.ip, e.label, mark)
            })
            .collect()
    }
}

/// Rank `rows` and return the entry at `rank`.
pub fn select_rank<R: Row>(
    rows: &[R],
    rank: usize,
    marker: &str,
) -> Result<RankedEntry<R::Link>, SelectError> {
    Ranking::from_rows(rows, marker).select(rank).cloned()
}
