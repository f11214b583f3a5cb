//! The single foreground measurement session.
//!
//! `Idle -> Active -> Idle`: `start` records a baseline census, `stop`
//! diffs a fresh census against it. One session per process; the whole
//! check-then-act sequence, snapshots included, runs under one lock.

use std::sync::Mutex;

use tracing::debug;

use crate::census::{Analyser, CensusResult};
use crate::config::Config;
use crate::delta::{DeltaReport, delta};

/// Session state-transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// `start` while a session is already active.
    AlreadyStarted,
    /// `stop` or `restart` with no active session.
    NotStarted,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::AlreadyStarted => write!(f, "session already started"),
            SessionError::NotStarted => write!(f, "session not started"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Baseline captured by `start`, consumed by `stop`.
struct Session {
    baseline: CensusResult,
    config: Config,
}

/// Owns the singleton session.
pub struct SessionManager {
    state: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// `Idle -> Active`: records a baseline census under the session lock.
    pub fn start(&self, analyser: &Analyser, config: Config) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        Self::start_locked(&mut state, analyser, config)
    }

    /// `Active -> Idle`: reads and clears the baseline, then diffs a fresh
    /// census against it.
    pub fn stop(&self, analyser: &Analyser) -> Result<DeltaReport, SessionError> {
        let mut state = self.state.lock().unwrap();
        Self::stop_locked(&mut state, analyser)
    }

    /// `stop` immediately followed by `start(config)`, as one critical
    /// section. Returns the report produced by the stop.
    pub fn restart(&self, analyser: &Analyser, config: Config) -> Result<DeltaReport, SessionError> {
        let mut state = self.state.lock().unwrap();
        let report = Self::stop_locked(&mut state, analyser)?;
        Self::start_locked(&mut state, analyser, config)?;
        Ok(report)
    }

    /// Whether a session is currently active.
    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    fn start_locked(
        state: &mut Option<Session>,
        analyser: &Analyser,
        config: Config,
    ) -> Result<(), SessionError> {
        if state.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        analyser.forced_gc(&config);
        let baseline = analyser.analyse(&config);
        analyser.forced_gc(&config);
        debug!(categories = baseline.len(), "session started");
        *state = Some(Session { baseline, config });
        Ok(())
    }

    fn stop_locked(
        state: &mut Option<Session>,
        analyser: &Analyser,
    ) -> Result<DeltaReport, SessionError> {
        let Session { baseline, config } = state.take().ok_or(SessionError::NotStarted)?;
        analyser.forced_gc(&config);
        let current = analyser.analyse(&config);
        let report = delta(&current, &baseline, &config);
        analyser.forced_gc(&config);
        debug!(records = report.len(), "session stopped");
        Ok(report)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free measurement bracket: a baseline census, `f` run to completion,
/// a post census, and the delta between them.
///
/// Touches no singleton state, so overlapping calls - and calls concurrent
/// with the session or the daemon - are all independent.
pub fn measure<T>(analyser: &Analyser, config: &Config, f: impl FnOnce() -> T) -> (T, DeltaReport) {
    analyser.forced_gc(config);
    let baseline = analyser.analyse(config);
    analyser.forced_gc(config);

    let value = f();

    analyser.forced_gc(config);
    let current = analyser.analyse(config);
    let report = delta(&current, &baseline, config);
    analyser.forced_gc(config);

    (value, report)
}
