//! Long-lived worker threads driving discovery and scoring.
//!
//! Two cooperating workers: a 1 Hz ticker that dispatches at most one tile
//! per tick to the fetch pipeline, and a 5 Hz scoring loop that rescores
//! the registry when the aircraft has moved far enough (or 5 s have
//! passed). Both honor a shared cancel flag and join on drop.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::{AreaConfig, ScoringConfig};
use crate::grid::haversine_km;
use crate::model::Poi;
use crate::pipeline::{CancelToken, TileFetcher};
use crate::scheduler::{self, RecentTiles};
use crate::scorer::Scorer;
use crate::telemetry::Telemetry;

/// Scheduler tick cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Scoring loop cadence.
pub const SCORE_INTERVAL: Duration = Duration::from_millis(200);

/// A full rescore happens at least this often, moved or not.
const FULL_RESCORE_INTERVAL: Duration = Duration::from_secs(5);

/// Latest telemetry sample, written by the sim client task and read by
/// both workers.
#[derive(Default)]
pub struct TelemetryCell {
    inner: RwLock<Option<Telemetry>>,
}

impl TelemetryCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, telemetry: Telemetry) {
        *self.inner.write() = Some(telemetry);
    }

    pub fn get(&self) -> Option<Telemetry> {
        *self.inner.read()
    }
}

/// Sleep in short slices so a cancelled worker exits promptly.
fn sleep_cancellable(cancel: &CancelToken, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && !cancel.is_cancelled() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(Duration::from_millis(50)));
    }
}

/// The 1 Hz scheduler ticker.
pub struct DiscoveryWorker {
    cancel: CancelToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryWorker {
    /// Spawn the ticker. Each tick ranks candidates from the latest
    /// telemetry and dispatches the best non-recent tile; at most one tile
    /// per tick.
    pub fn start(
        fetcher: Arc<TileFetcher>,
        telemetry: Arc<TelemetryCell>,
        recent: Arc<RecentTiles>,
        area: AreaConfig,
    ) -> Self {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("discovery-ticker".into())
            .spawn(move || {
                while !worker_cancel.is_cancelled() {
                    let started = Instant::now();
                    Self::tick(&fetcher, &telemetry, &recent, &area, &worker_cancel);
                    let elapsed = started.elapsed();
                    if let Some(rest) = TICK_INTERVAL.checked_sub(elapsed) {
                        sleep_cancellable(&worker_cancel, rest);
                    }
                }
                debug!("discovery ticker stopped");
            })
            .expect("failed to spawn discovery ticker");

        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn tick(
        fetcher: &TileFetcher,
        telemetry: &TelemetryCell,
        recent: &RecentTiles,
        area: &AreaConfig,
        cancel: &CancelToken,
    ) {
        let Some(sample) = telemetry.get() else {
            return;
        };

        let candidates = scheduler::candidates(&sample, &recent.snapshot(), area);
        let Some(best) = candidates.iter().find(|c| !recent.contains(&c.tile)) else {
            return;
        };

        match fetcher.fetch_tile(best, cancel) {
            Ok(outcome) => debug!("tick dispatched {}: {outcome:?}", best.tile),
            Err(err) => warn!("tile {} failed: {err}", best.tile),
        }
    }

    /// Cancel the worker and wait for it to exit.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DiscoveryWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Receives each freshly ranked view, best first.
pub type RankedCallback = Box<dyn Fn(&[Poi]) + Send + Sync>;

/// The 5 Hz scoring loop.
pub struct ScoringWorker {
    cancel: CancelToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScoringWorker {
    /// Spawn the scoring loop. A pass runs when the aircraft has moved at
    /// least `rescore_distance_m` since the last pass, and at least every
    /// [`FULL_RESCORE_INTERVAL`] regardless.
    pub fn start(
        scorer: Arc<Scorer>,
        telemetry: Arc<TelemetryCell>,
        cfg: ScoringConfig,
        publish: RankedCallback,
    ) -> Self {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("poi-scoring".into())
            .spawn(move || {
                // The first sample always scores: moved_m starts at infinity
                let mut last_position: Option<(f64, f64)> = None;
                let mut last_pass = Instant::now();

                while !worker_cancel.is_cancelled() {
                    if let Some(sample) = telemetry.get() {
                        let moved_m = last_position
                            .map(|(lat, lon)| {
                                haversine_km(lat, lon, sample.lat, sample.lon) * 1000.0
                            })
                            .unwrap_or(f64::INFINITY);
                        let due = last_pass.elapsed() >= FULL_RESCORE_INTERVAL;

                        if moved_m >= cfg.rescore_distance_m || due {
                            let ranked = scorer.score_all(&sample);
                            publish(&ranked);
                            last_position = Some((sample.lat, sample.lon));
                            last_pass = Instant::now();
                        }
                    }
                    sleep_cancellable(&worker_cancel, SCORE_INTERVAL);
                }
                debug!("scoring worker stopped");
            })
            .expect("failed to spawn scoring worker");

        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Cancel the worker and wait for it to exit.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ScoringWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
