//! Plain-text rendering of census reports.
//!
//! Pure presentation: no side effects, no state. The daemon and the
//! one-shot report writer both format through here.

use crate::census::Category;
use crate::delta::DeltaRecord;

/// Renders a delta report as an aligned table.
///
/// Header, separator, then one line per record: fixed-width current usage,
/// always-signed delta, category name. A pure function of its input.
pub fn format_report(records: &[DeltaRecord]) -> String {
    let mut out = String::new();
    for line in report_lines(records) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// The same table as individual lines, for sinks that take line blocks.
pub fn report_lines(records: &[DeltaRecord]) -> Vec<String> {
    let mut lines = Vec::with_capacity(records.len() + 2);
    lines.push(format!("{:>8} {:>8} {}", "Curr.", "Delta", "Category"));
    lines.push(format!("{:>8} {:>8} {}", "-----", "-----", "--------"));
    for r in records {
        lines.push(format!(
            "{:>8} {:>+8} {}",
            r.current,
            r.delta,
            r.category.name()
        ));
    }
    lines
}

/// Renders a single census as `usage  category` lines (no delta column).
pub fn census_lines(entries: &[(Category, u64)]) -> Vec<String> {
    entries
        .iter()
        .map(|&(category, usage)| format!("{:>8} {}", usage, category.name()))
        .collect()
}
