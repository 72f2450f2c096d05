//! Wall-clock benchmarking reported through measurements.
//!
//! A [`Benchmark`] tracks elapsed time (excluding paused intervals) and a
//! step counter, and reports both to the `benchmark` measurement point. Each
//! report produces an absolute row (since start) and an incremental row
//! (since the previous report).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use oml_types::{values, FieldType, MeasurementPoint};
use parking_lot::Mutex;
use tracing::warn;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::registry::MeasurementPointHandle;

/// Name of the measurement point benchmark reports are sent to.
pub const BENCHMARK_MEASUREMENT_POINT: &str = "benchmark";

/// Descriptor of the `benchmark` measurement point.
pub fn benchmark_point() -> MeasurementPoint {
    MeasurementPoint::builder(BENCHMARK_MEASUREMENT_POINT)
        .field("label", FieldType::String)
        .field("note", FieldType::String)
        .field("is_absolute", FieldType::Bool)
        .field("is_final", FieldType::Bool)
        .field("step_cnt", FieldType::Int64)
        .field("rate_real", FieldType::Double)
        .field("time_wall", FieldType::Double)
        .build()
}

#[derive(Debug)]
struct Clock {
    running: bool,
    paused_at: Option<Instant>,
    last_paused_report: Option<Instant>,
    started: Instant,
    last_report: Instant,
    steps: i64,
    steps_at_last_report: i64,
    first_report: bool,
}

impl Clock {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            running: false,
            paused_at: None,
            last_paused_report: None,
            started: now,
            last_report: now,
            steps: 0,
            steps_at_last_report: 0,
            first_report: true,
        }
    }
}

#[derive(Debug)]
struct Shared {
    label: String,
    client: Arc<Client>,
    mp: MeasurementPointHandle,
    clock: Mutex<Clock>,
}

impl Shared {
    fn report(&self, note: &str, is_final: bool) {
        let mut clock = self.clock.lock();
        let now = match clock.paused_at {
            // report once per pause
            Some(paused_at) => {
                if clock.last_paused_report == Some(paused_at) {
                    return;
                }
                clock.last_paused_report = Some(paused_at);
                paused_at
            }
            None => Instant::now(),
        };

        let since_start = now.saturating_duration_since(clock.started);
        self.inject(note, true, is_final, since_start, clock.steps);
        if !(is_final && clock.first_report) {
            let since_last = now.saturating_duration_since(clock.last_report);
            self.inject(note, false, is_final, since_last, clock.steps - clock.steps_at_last_report);
        }
        clock.last_report = now;
        clock.steps_at_last_report = clock.steps;
        clock.first_report = false;
    }

    fn inject(&self, note: &str, is_absolute: bool, is_final: bool, wall: Duration, steps: i64) {
        let wall = wall.as_secs_f64();
        if wall <= 0.0 {
            return;
        }
        let row = values![
            self.label.as_str(),
            note,
            is_absolute,
            is_final,
            steps,
            steps as f64 / wall,
            wall
        ];
        if let Err(e) = self.client.inject(&self.mp, &row) {
            warn!(benchmark = %self.label, error = %e, "failed to report benchmark");
        }
    }
}

/// Measures a workload and reports its progress.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use oml_sdk::{Benchmark, Client};
///
/// let client = Arc::new(Client::new());
/// let bm = Benchmark::new(client.clone(), "copy", Some(Duration::from_secs(1)))?;
/// bm.measure(|bm| {
///     for _ in 0..100 {
///         bm.step(1);
///     }
/// })?;
/// # Ok::<(), oml_sdk::Error>(())
/// ```
#[derive(Debug)]
pub struct Benchmark {
    shared: Arc<Shared>,
    periodic: Option<Duration>,
    reporter: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl Benchmark {
    /// Create a benchmark. With `periodic` set, a background thread reports
    /// at that interval while the benchmark runs.
    pub fn new(client: Arc<Client>, label: impl Into<String>, periodic: Option<Duration>) -> Result<Self> {
        let mp = client.define(benchmark_point())?;
        Ok(Self {
            shared: Arc::new(Shared {
                label: label.into(),
                client,
                mp,
                clock: Mutex::new(Clock::new()),
            }),
            periodic: periodic.filter(|p| !p.is_zero()),
            reporter: Mutex::new(None),
        })
    }

    /// Benchmark label.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Start the clock.
    pub fn start(&self) -> Result<()> {
        let mut clock = self.shared.clock.lock();
        if clock.running {
            return Err(Error::InvalidState {
                operation: "start benchmark",
                state: "running",
            });
        }
        *clock = Clock::new();
        clock.running = true;
        drop(clock);

        if let Some(interval) = self.periodic {
            let (stop_tx, stop_rx) = bounded::<()>(1);
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("oml-benchmark-{}", self.shared.label))
                .spawn(move || loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => shared.report("-", false),
                        _ => break,
                    }
                })?;
            *self.reporter.lock() = Some((stop_tx, handle));
        }
        Ok(())
    }

    /// Stop counting time until [`resume`](Self::resume).
    pub fn pause(&self) {
        let mut clock = self.shared.clock.lock();
        if clock.running && clock.paused_at.is_none() {
            clock.paused_at = Some(Instant::now());
        }
    }

    /// Continue after a pause, or start if never started.
    pub fn resume(&self) -> Result<()> {
        let mut clock = self.shared.clock.lock();
        if !clock.running {
            drop(clock);
            return self.start();
        }
        if let Some(paused_at) = clock.paused_at.take() {
            let offset = paused_at.elapsed();
            clock.started += offset;
            clock.last_report += offset;
        }
        Ok(())
    }

    /// Count processed items.
    pub fn step(&self, count: i64) {
        self.shared.clock.lock().steps += count;
    }

    /// Send an intermediate report. Does nothing unless running.
    pub fn report(&self, note: &str) {
        if self.shared.clock.lock().running {
            self.shared.report(note, false);
        }
    }

    /// Send the final report and stop. Does nothing unless running.
    pub fn stop(&self) {
        if let Some((stop_tx, handle)) = self.reporter.lock().take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                warn!(benchmark = %self.shared.label, "benchmark reporter panicked");
            }
        }
        if !self.shared.clock.lock().running {
            return;
        }
        self.shared.report("done", true);
        self.shared.clock.lock().running = false;
    }

    /// Run `work` between [`resume`](Self::resume) and [`pause`](Self::pause).
    /// Can be called repeatedly; call [`stop`](Self::stop) at the end.
    pub fn task<T>(&self, work: impl FnOnce(&Self) -> T) -> Result<T> {
        self.resume()?;
        let out = work(self);
        self.pause();
        Ok(out)
    }

    /// Run `work` from start to stop.
    pub fn measure<T>(&self, work: impl FnOnce(&Self) -> T) -> Result<T> {
        self.start()?;
        let out = work(self);
        self.stop();
        Ok(out)
    }
}

impl Drop for Benchmark {
    fn drop(&mut self) {
        self.stop();
    }
}
