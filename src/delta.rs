//! Census diffing: per-category growth, ranking, truncation.

use std::cmp::Reverse;

use crate::census::{Category, CensusResult};
use crate::config::{Config, SortBy};

/// One category's usage and growth between two censuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaRecord {
    pub category: Category,
    /// Usage in the newer census.
    pub current: u64,
    /// Signed change since the older census.
    pub delta: i64,
}

/// Ranked, possibly truncated sequence of delta records.
pub type DeltaReport = Vec<DeltaRecord>;

/// Diffs two censuses over the union of their categories.
///
/// Categories absent from one side count as 0, so a category that dropped
/// to nothing stays visible as a negative delta. Ordering and truncation
/// follow `config.sort_by` and `config.limit`; an unsorted report is never
/// truncated. Sorting is stable, tie order is unspecified.
pub fn delta(current: &CensusResult, previous: &CensusResult, config: &Config) -> DeltaReport {
    let mut categories: Vec<Category> = current.categories().collect();
    categories.extend(previous.categories().filter(|&c| !current.contains(c)));

    let mut records: DeltaReport = categories
        .into_iter()
        .map(|category| {
            let current_usage = current.usage(category);
            DeltaRecord {
                category,
                current: current_usage,
                delta: current_usage as i64 - previous.usage(category) as i64,
            }
        })
        .collect();

    match config.sort_by {
        SortBy::None => return records,
        SortBy::Current => records.sort_by_key(|r| Reverse(r.current)),
        SortBy::Delta => records.sort_by_key(|r| Reverse(r.delta)),
        SortBy::AbsDelta => records.sort_by_key(|r| Reverse(r.delta.unsigned_abs())),
    }

    if config.limit > 0 && config.limit < records.len() {
        records.truncate(config.limit);
    }
    records
}
