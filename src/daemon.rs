//! The single background periodic-sampling loop.
//!
//! `Stopped -> Running -> Stopped`: `start` spawns a thread that censuses
//! the heap every `delay`, diffs against the previous cycle, and appends a
//! timestamped report block to its sink. One daemon per process; start and
//! stop run under one lock, separate from the session's.

use std::any::Any;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::census::{Analyser, CensusResult};
use crate::config::Config;
use crate::delta::delta;
use crate::report::report_lines;
use crate::sink::{ArtifactStore, Sink};

/// Daemon state-transition errors.
#[derive(Debug)]
pub enum DaemonError {
    /// `start` while the daemon is already running.
    AlreadyRunning,
    /// `stop` while the daemon is not running.
    NotRunning,
    /// The output sink could not be opened.
    Io(io::Error),
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::AlreadyRunning => write!(f, "daemon already running"),
            DaemonError::NotRunning => write!(f, "daemon not running"),
            DaemonError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<io::Error> for DaemonError {
    fn from(e: io::Error) -> Self {
        DaemonError::Io(e)
    }
}

/// Handle to the running loop.
struct Daemon {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    target: String,
}

/// Owns the singleton daemon.
pub struct DaemonManager {
    state: Mutex<Option<Daemon>>,
}

impl DaemonManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// `Stopped -> Running`: opens the named artifact and spawns the
    /// sampling loop. Returns the output target identifier.
    ///
    /// The sink is opened inside the critical section so a losing
    /// concurrent `start` cannot touch the winner's artifact.
    pub fn start(
        &self,
        analyser: Analyser,
        config: Config,
        store: &dyn ArtifactStore,
        name: &str,
    ) -> Result<String, DaemonError> {
        let mut state = self.state.lock().unwrap();
        if state.is_some() {
            return Err(DaemonError::AlreadyRunning);
        }

        let sink = store.open(name)?;
        let target = store.target(name);
        let running = Arc::new(AtomicBool::new(true));
        let loop_flag = running.clone();
        let handle = std::thread::spawn(move || {
            sampling_loop(&analyser, &config, sink, &loop_flag);
        });

        info!(target = %target, "daemon started");
        *state = Some(Daemon {
            running,
            handle,
            target: target.clone(),
        });
        Ok(target)
    }

    /// `Running -> Stopped`: signals the loop and joins it. The loop's sink
    /// is dropped (closed) before this returns, and the in-progress sleep
    /// is cut short rather than waited out.
    pub fn stop(&self) -> Result<(), DaemonError> {
        let mut state = self.state.lock().unwrap();
        let daemon = state.take().ok_or(DaemonError::NotRunning)?;

        daemon.running.store(false, Ordering::SeqCst);
        if daemon.handle.join().is_err() {
            error!("daemon thread panicked before shutdown");
        }
        info!(target = %daemon.target, "daemon stopped");
        Ok(())
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Sampling loop
// ---------------------------------------------------------------------------

/// The cadence is a fixed interval, not a deadline: a slow cycle shifts the
/// schedule later, it never overlaps the next cycle.
fn sampling_loop(
    analyser: &Analyser,
    config: &Config,
    mut sink: Box<dyn Sink>,
    running: &AtomicBool,
) {
    let mut previous = CensusResult::default();
    let mut cycle: u64 = 0;

    while running.load(Ordering::SeqCst) {
        cycle += 1;
        // One bad cycle must never take the loop down.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            run_cycle(analyser, config, sink.as_mut(), &mut previous)
        }));
        match outcome {
            Ok(Ok(records)) => debug!(cycle, records, "cycle complete"),
            Ok(Err(e)) => error!(cycle, error = %e, "cycle failed"),
            Err(payload) => error!(cycle, panic = panic_message(&payload), "cycle panicked"),
        }

        sleep_interruptibly(config.delay, running);
    }
    debug!(cycles = cycle, "daemon loop exited");
}

fn run_cycle(
    analyser: &Analyser,
    config: &Config,
    sink: &mut dyn Sink,
    previous: &mut CensusResult,
) -> io::Result<usize> {
    analyser.forced_gc(config);
    let current = analyser.analyse(config);
    let report = delta(&current, previous, config);

    let mut lines = Vec::with_capacity(report.len() + 4);
    lines.push("-".repeat(80));
    lines.push(Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string());
    lines.extend(report_lines(&report));
    sink.write_block(&lines)?;

    // Only advance the baseline once the block is safely out.
    *previous = current;
    analyser.forced_gc(config);
    Ok(report.len())
}

/// Sleeps in 100 ms ticks so a stop request does not wait out the full
/// delay.
fn sleep_interruptibly(delay: Duration, running: &AtomicBool) {
    let tick = Duration::from_millis(100);
    let mut remaining = delay;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(tick);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::census::mock::MockHeap;
    use crate::sink::MemoryStore;

    struct Foo;

    fn wait_for_blocks(store: &MemoryStore, name: &str, blocks: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let separators = store
                .lines(name)
                .iter()
                .filter(|l| l.starts_with("----"))
                .count();
            if separators >= blocks {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "daemon produced {separators} report blocks, wanted {blocks}"
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn fast_config() -> Config {
        Config {
            delay: Duration::from_millis(10),
            ..Config::default()
        }
    }

    #[test]
    fn double_start_fails() {
        let daemons = DaemonManager::new();
        let analyser = Analyser::new(Arc::new(MockHeap::new()));
        let store = MemoryStore::new();

        daemons
            .start(analyser.clone(), fast_config(), &store, "census.log")
            .unwrap();
        assert!(matches!(
            daemons.start(analyser, fast_config(), &store, "census.log"),
            Err(DaemonError::AlreadyRunning)
        ));
        daemons.stop().unwrap();
    }

    #[test]
    fn stop_without_start_fails() {
        let daemons = DaemonManager::new();
        assert!(matches!(daemons.stop(), Err(DaemonError::NotRunning)));
    }

    #[test]
    fn sink_open_failure_propagates_and_leaves_daemon_stopped() {
        let daemons = DaemonManager::new();
        let analyser = Analyser::new(Arc::new(MockHeap::new()));
        let store = crate::sink::FileStore::in_dir("/nonexistent/memcensus/dir");

        assert!(matches!(
            daemons.start(analyser, fast_config(), &store, "census.log"),
            Err(DaemonError::Io(_))
        ));
        assert!(!daemons.is_running());
    }

    #[test]
    fn cycles_report_against_running_previous() {
        let heap = Arc::new(MockHeap::new());
        heap.push_many::<Foo>(3);
        let analyser = Analyser::new(heap);
        let store = MemoryStore::new();
        let daemons = DaemonManager::new();

        let target = daemons
            .start(analyser, fast_config(), &store, "census.log")
            .unwrap();
        assert_eq!(target, "census.log");
        wait_for_blocks(&store, "census.log", 2);
        daemons.stop().unwrap();

        let lines = store.lines("census.log");
        // First cycle reports against an all-zero previous census.
        let first_foo = lines
            .iter()
            .find(|l| l.ends_with("Foo"))
            .expect("first cycle reports Foo");
        assert!(first_foo.contains("+3"), "got {first_foo:?}");
        // A later cycle with an unchanged population reports a zero delta.
        assert!(
            lines.iter().any(|l| l.ends_with("Foo") && l.contains("+0")),
            "steady-state cycle reports +0"
        );
    }

    #[test]
    fn failed_cycle_never_terminates_the_loop() {
        let heap = Arc::new(MockHeap::new());
        heap.push_many::<Foo>(1);
        let analyser = Analyser::new(heap);
        // Cycle 2 (block index 1) fails with an injected I/O error.
        let store = MemoryStore::fail_on_blocks([1]);
        let daemons = DaemonManager::new();

        daemons
            .start(analyser, fast_config(), &store, "census.log")
            .unwrap();
        // Two surviving blocks means cycles 1 and 3 both wrote output.
        wait_for_blocks(&store, "census.log", 2);
        assert!(daemons.is_running());
        daemons.stop().unwrap();
        assert!(!daemons.is_running());
    }

    #[test]
    fn stop_cancels_promptly_without_waiting_out_the_delay() {
        let analyser = Analyser::new(Arc::new(MockHeap::new()));
        let store = MemoryStore::new();
        let daemons = DaemonManager::new();

        let config = Config {
            delay: Duration::from_secs(60),
            ..Config::default()
        };
        daemons
            .start(analyser, config, &store, "census.log")
            .unwrap();
        wait_for_blocks(&store, "census.log", 1);

        let t0 = Instant::now();
        daemons.stop().unwrap();
        assert!(
            t0.elapsed() < Duration::from_secs(5),
            "stop had to wait out the cycle delay"
        );
    }
}
