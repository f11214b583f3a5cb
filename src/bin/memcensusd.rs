//! memcensusd - live-object census daemon demo.
//!
//! Runs the sampling daemon over an instrumented workload: tracked
//! allocations churn in the foreground while the daemon writes periodic
//! census deltas to a log artifact.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use memcensus::census::{RecordedSizeEstimator, TrackId, TrackedHeap};
use memcensus::config::{Config, SizeMode, SortBy};
use memcensus::profiler::Profiler;
use memcensus::report::format_report;

/// Live-object census daemon.
#[derive(Parser)]
#[command(name = "memcensusd", about = "Live-object census daemon", version)]
struct Args {
    /// Seconds between daemon samples.
    #[arg(short, long, default_value = "10")]
    delay: u64,

    /// Top categories per report (0 = all).
    #[arg(short, long, default_value = "10")]
    limit: usize,

    /// Report ordering: current | delta | absdelta | none.
    #[arg(short, long, default_value = "absdelta", value_parser = parse_sort_key)]
    sort_by: SortBy,

    /// Accumulate estimated byte sizes instead of instance counts.
    #[arg(long)]
    estimate_size: bool,

    /// Output artifact name (generated from the pid by default).
    #[arg(short, long)]
    output: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Unknown keys degrade to `none` (with a warning) rather than failing the
/// command line.
fn parse_sort_key(s: &str) -> Result<SortBy, String> {
    Ok(SortBy::parse_lossy(s))
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("memcensusd={}", level).parse().unwrap())
        .add_directive(format!("memcensus={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("memcensusd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: delay={}s, limit={}, size_mode={}",
        args.delay,
        args.limit,
        if args.estimate_size { "estimated" } else { "count" }
    );

    let heap = Arc::new(TrackedHeap::new());
    let profiler =
        Profiler::new(heap.clone()).with_estimator(Arc::new(RecordedSizeEstimator));

    let config = Config {
        sort_by: args.sort_by,
        limit: args.limit,
        delay: Duration::from_secs(args.delay.max(1)),
        output_target: args.output.clone(),
        size_mode: if args.estimate_size {
            SizeMode::EstimatedSize
        } else {
            SizeMode::Count
        },
        ..Config::default()
    };

    let target = match profiler.start_daemon(config.clone()) {
        Ok(target) => target,
        Err(e) => {
            error!("Failed to start daemon: {}", e);
            std::process::exit(1);
        }
    };
    info!("Daemon reporting to {}", target);

    // Graceful shutdown on Ctrl-C.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    // Workload: churn tracked allocations so the census has something to
    // see. Strings leak faster than buffers; half the backlog is released
    // once it grows past a bound.
    let mut leaked: Vec<TrackId> = Vec::new();
    let mut round: u64 = 0;

    while running.load(Ordering::SeqCst) {
        round += 1;
        let ((), report) = profiler.measure(&config, || {
            for i in 0..200 {
                leaked.push(heap.track_described::<String>(
                    24,
                    Some(format!("payload-{round}-{i}")),
                ));
            }
            for _ in 0..50 {
                leaked.push(heap.track::<Vec<u8>>(4096));
            }
        });

        info!("Round {}: {} live allocations", round, heap.live_count());
        println!("{}", format_report(&report));

        if leaked.len() > 2000 {
            for id in leaked.drain(..1000) {
                heap.release(id);
            }
        }

        sleep_interruptibly(Duration::from_secs(args.delay.max(1)), &running);
    }

    info!("Shutting down...");
    if let Err(e) = profiler.stop_daemon() {
        warn!("Daemon was not running at shutdown: {}", e);
    }
    info!("Shutdown complete");
}

/// Sleeps in ticks with periodic checks for the shutdown signal.
fn sleep_interruptibly(delay: Duration, running: &AtomicBool) {
    let tick = Duration::from_millis(100);
    let mut remaining = delay;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(tick);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
