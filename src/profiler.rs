//! Process-wide coordinator: the public profiling API.
//!
//! One `Profiler` owns the two lock-guarded singletons - the foreground
//! session and the background daemon - plus the analyser they share. The
//! raw guarded state never leaves this module's collaborators.

use std::cmp::Reverse;
use std::io;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::census::{Analyser, Category, GcControl, HeapWalker, SizeEstimator};
use crate::config::{Config, SortBy};
use crate::daemon::{DaemonError, DaemonManager};
use crate::delta::DeltaReport;
use crate::report::census_lines;
use crate::session::{SessionError, SessionManager, measure};
use crate::sink::{ArtifactStore, artifact_name};

/// Live-object profiler: one foreground session, one background daemon,
/// independently locked.
pub struct Profiler {
    analyser: Analyser,
    session: SessionManager,
    daemon: DaemonManager,
}

impl Profiler {
    /// Profiler over `walker` with default collaborators: no size
    /// estimator, no-op GC, file artifacts in the system temp directory.
    pub fn new(walker: Arc<dyn HeapWalker>) -> Self {
        Self {
            analyser: Analyser::new(walker),
            session: SessionManager::new(),
            daemon: DaemonManager::new(),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn SizeEstimator>) -> Self {
        self.analyser = self.analyser.with_estimator(estimator);
        self
    }

    pub fn with_gc(mut self, gc: Arc<dyn GcControl>) -> Self {
        self.analyser = self.analyser.with_gc(gc);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.analyser = self.analyser.with_store(store);
        self
    }

    /// Starts the singleton measurement session.
    pub fn start(&self, config: Config) -> Result<(), SessionError> {
        self.session.start(&self.analyser, config)
    }

    /// Stops the session and reports growth since `start`.
    pub fn stop(&self) -> Result<DeltaReport, SessionError> {
        self.session.stop(&self.analyser)
    }

    /// Stops and immediately restarts the session; returns the stop report.
    pub fn restart(&self, config: Config) -> Result<DeltaReport, SessionError> {
        self.session.restart(&self.analyser, config)
    }

    /// Whether the singleton session is active.
    pub fn session_active(&self) -> bool {
        self.session.is_active()
    }

    /// Measures `f` in isolation: censuses before and after, no singleton
    /// state, safe to overlap with anything else.
    pub fn measure<T>(&self, config: &Config, f: impl FnOnce() -> T) -> (T, DeltaReport) {
        measure(&self.analyser, config, f)
    }

    /// Starts the singleton sampling daemon; returns its output target.
    pub fn start_daemon(&self, config: Config) -> Result<String, DaemonError> {
        let name = config
            .output_target
            .clone()
            .unwrap_or_else(|| artifact_name(None));
        self.daemon
            .start(self.analyser.clone(), config, self.analyser.store().as_ref(), &name)
    }

    /// Stops the daemon, blocking until its loop has fully exited.
    pub fn stop_daemon(&self) -> Result<(), DaemonError> {
        self.daemon.stop()
    }

    /// Whether the daemon loop is running.
    pub fn daemon_running(&self) -> bool {
        self.daemon.is_running()
    }

    /// Writes a one-shot census table to a timestamped artifact and returns
    /// the artifact's target identifier.
    ///
    /// Only `Current` and `None` orderings apply to a single census; any
    /// other key logs the invalid-sort warning and degrades to `None`.
    pub fn report(&self, config: &Config) -> io::Result<String> {
        self.analyser.forced_gc(config);
        let census = self.analyser.analyse(config);

        let mut entries: Vec<(Category, u64)> = census.iter().collect();
        match config.sort_by {
            SortBy::Current => {
                entries.sort_by_key(|&(_, usage)| Reverse(usage));
                if config.limit > 0 && config.limit < entries.len() {
                    entries.truncate(config.limit);
                }
            }
            SortBy::None => {}
            other => {
                warn!(sort = ?other, "sort key not applicable to a one-shot report; using none");
            }
        }

        let name = config.output_target.clone().unwrap_or_else(|| {
            artifact_name(Some(&Utc::now().timestamp().to_string()))
        });
        let mut sink = self.analyser.store().open(&name)?;
        sink.write_block(&census_lines(&entries))?;

        self.analyser.forced_gc(config);
        Ok(self.analyser.store().target(&name))
    }
}
