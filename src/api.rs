//! JSON-serializable report payloads.
//!
//! Mirrors the plain-text report for embedding in external tooling: one
//! `ApiReport` is one atomic payload with category names resolved and
//! deltas pre-computed.

use serde::Serialize;

use crate::delta::DeltaRecord;

/// One delta report as an atomic JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct ApiReport {
    /// Unix timestamp (seconds since epoch).
    pub timestamp: i64,
    pub records: Vec<ApiDeltaRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiDeltaRecord {
    pub category: String,
    pub current: u64,
    pub delta: i64,
}

impl ApiReport {
    /// Converts a report captured at the given timestamp.
    pub fn new(timestamp: i64, records: &[DeltaRecord]) -> Self {
        Self {
            timestamp,
            records: records
                .iter()
                .map(|r| ApiDeltaRecord {
                    category: r.category.name().to_string(),
                    current: r.current,
                    delta: r.delta,
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
