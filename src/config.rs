//! Profiling options and census selectors.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::census::{Category, HeapObject};

/// Report ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Descending by current usage.
    #[default]
    Current,
    /// Descending by signed usage delta.
    Delta,
    /// Descending by absolute usage delta.
    AbsDelta,
    /// Input order. An unsorted report is never truncated.
    None,
}

impl SortBy {
    /// Parses a sort key from text.
    ///
    /// An unknown key is a usage mistake, not a fatal one: it logs a
    /// warning and degrades to [`SortBy::None`] (unsorted, untruncated).
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" => SortBy::Current,
            "delta" => SortBy::Delta,
            "absdelta" | "abs-delta" => SortBy::AbsDelta,
            "none" => SortBy::None,
            other => {
                warn!(key = %other, "invalid sort key; using none");
                SortBy::None
            }
        }
    }
}

/// How usage is accumulated per live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeMode {
    /// One unit per object.
    #[default]
    Count,
    /// Estimated byte size per object, 1 when estimation fails.
    EstimatedSize,
}

/// Filter matched against objects during a census pass.
#[derive(Clone)]
pub enum Selector {
    /// Every object of exactly this category.
    Category(Category),
    /// Categories whose type path starts with the prefix (e.g. `"myapp::"`).
    NamePrefix(String),
    /// Arbitrary per-object predicate. A predicate may consult instance
    /// state; see the latching note on
    /// [`Analyser::analyse`](crate::census::Analyser::analyse).
    Predicate(Arc<dyn Fn(&dyn HeapObject) -> bool + Send + Sync>),
}

impl Selector {
    pub fn matches(&self, obj: &dyn HeapObject) -> bool {
        match self {
            Selector::Category(cat) => obj.category() == *cat,
            Selector::NamePrefix(prefix) => obj.category().name().starts_with(prefix.as_str()),
            Selector::Predicate(pred) => pred(obj),
        }
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Category(cat) => f.debug_tuple("Category").field(cat).finish(),
            Selector::NamePrefix(prefix) => f.debug_tuple("NamePrefix").field(prefix).finish(),
            Selector::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Census, session, and daemon options.
///
/// `Default` carries the documented defaults; build variations with struct
/// update syntax.
#[derive(Debug, Clone)]
pub struct Config {
    pub sort_by: SortBy,
    /// When non-empty, only matching categories are counted.
    pub only: Vec<Selector>,
    /// Excluded categories. Takes precedence over `only`.
    pub ignore: Vec<Selector>,
    /// Top-N cutoff applied after sorting. 0 means unlimited; ignored for
    /// unsorted reports.
    pub limit: usize,
    /// Request a forced collection before and after every snapshot.
    pub force_gc: bool,
    /// Interval between daemon sampling cycles.
    pub delay: Duration,
    /// Daemon/report artifact name; generated from the process id when
    /// `None`.
    pub output_target: Option<String>,
    pub size_mode: SizeMode,
    /// Dump the text-category population through the artifact store on
    /// every census pass.
    pub debug_dump: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sort_by: SortBy::Current,
            only: Vec::new(),
            ignore: Vec::new(),
            limit: 20,
            force_gc: false,
            delay: Duration::from_secs(60),
            output_target: None,
            size_mode: SizeMode::Count,
            debug_dump: false,
        }
    }
}
