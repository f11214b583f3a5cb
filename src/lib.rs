//! memcensus - live-object census and growth reporting.
//!
//! Periodically (or on demand) takes a census of the live object population
//! grouped by category, diffs two censuses, and reports the top categories
//! by current usage or growth. Built to spot memory leaks in a long-running
//! process without external tooling.
//!
//! - `census` - heap enumeration, category filters, usage aggregation
//! - `config` - profiling options and census selectors
//! - `delta` - census diffing, ranking, truncation
//! - `report` - plain-text table rendering
//! - `session` - the single foreground measurement bracket
//! - `daemon` - the single background sampling loop
//! - `sink` - report persistence (file or in-memory artifacts)
//! - `profiler` - process-wide coordinator owning session and daemon
//!
//! With `api` feature:
//! - `api` - JSON-serializable report payloads

pub mod census;
pub mod config;
pub mod daemon;
pub mod delta;
pub mod profiler;
pub mod report;
pub mod session;
pub mod sink;

#[cfg(feature = "api")]
pub mod api;
