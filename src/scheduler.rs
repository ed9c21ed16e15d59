//! Periodic measurement cycles.
//!
//! One cycle scans for the beacon, decodes its payload and publishes the
//! result. The first cycle runs immediately; later cycles run once per
//! interval, strictly one after another.

use crate::decoder::{DecodeError, decode};
use crate::measurement::Measurement;
use crate::metrics::MetricsRegistry;
use crate::scanner::{Collector, ScanError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};

/// Why a single cycle failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CycleError {
    #[error("scanning: {0}")]
    Scan(#[from] ScanError),
    #[error("parsing packet: {0}")]
    Decode(#[from] DecodeError),
}

impl CycleError {
    /// Fatal errors stop the scheduler no matter which cycle hits them.
    pub fn is_fatal(&self) -> bool {
        match self {
            CycleError::Scan(e) => e.is_fatal(),
            CycleError::Decode(_) => false,
        }
    }
}

/// Errors that end the scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The startup measurement failed and startup failures are not tolerated
    #[error("initial measurement failed: {0}")]
    Startup(CycleError),
    /// A cycle failed in a way the next cycle cannot recover from
    #[error("measurement failed: {0}")]
    Fatal(CycleError),
}

/// Timing and failure policy for the measurement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Time between the starts of consecutive cycles
    pub interval: Duration,
    /// Upper bound on the scan wait within one cycle
    pub scan_timeout: Duration,
    /// Whether a failed (non-fatal) startup cycle is tolerated
    pub allow_initial_failure: bool,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            scan_timeout: Duration::from_secs(300),
            allow_initial_failure: false,
        }
    }
}

/// Run one cycle and record its outcome and duration in `metrics`.
///
/// The duration is recorded whether or not the cycle succeeds; a failed cycle
/// leaves the gauges at their previous values.
pub async fn run_cycle(
    collector: &dyn Collector,
    metrics: &MetricsRegistry,
    scan_timeout: Duration,
) -> Result<Measurement, CycleError> {
    let start = Instant::now();

    let result = measure(collector, scan_timeout).await;
    match &result {
        Ok(measurement) => metrics.record_success(measurement),
        Err(_) => metrics.record_failure(),
    }

    metrics.observe_duration(start.elapsed());
    result
}

async fn measure(
    collector: &dyn Collector,
    scan_timeout: Duration,
) -> Result<Measurement, CycleError> {
    let advertisement = timeout(scan_timeout, collector.collect())
        .await
        .map_err(|_| ScanError::TimedOut(scan_timeout))??;

    debug!(
        "data from {} (len: {}): {}",
        advertisement.address,
        advertisement.payload.len(),
        advertisement.payload_hex()
    );

    Ok(decode(&advertisement.payload)?)
}

/// Drives measurement cycles against a collector.
pub struct Scheduler {
    collector: Box<dyn Collector>,
    metrics: Arc<MetricsRegistry>,
    schedule: Schedule,
}

impl Scheduler {
    pub fn new(
        collector: Box<dyn Collector>,
        metrics: Arc<MetricsRegistry>,
        schedule: Schedule,
    ) -> Self {
        Self {
            collector,
            metrics,
            schedule,
        }
    }

    async fn cycle(&self) -> Result<Measurement, CycleError> {
        let result = run_cycle(
            self.collector.as_ref(),
            &self.metrics,
            self.schedule.scan_timeout,
        )
        .await;

        if let Ok(m) = &result {
            info!(
                "Temperature: {:.2}°C, Humidity: {:.2}%, Pressure: {:.2} hPa",
                m.temperature, m.humidity, m.pressure
            );
        }
        result
    }

    /// Take the startup measurement, then measure once per interval forever.
    ///
    /// Returns only on a fatal cycle error, or when the startup cycle fails
    /// and the schedule does not allow that.
    pub async fn run(&self) -> Result<(), SchedulerError> {
        info!("Taking initial measurement");
        match self.cycle().await {
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(SchedulerError::Fatal(e)),
            Err(e) if !self.schedule.allow_initial_failure => {
                return Err(SchedulerError::Startup(e));
            }
            Err(e) => warn!("Initial measurement failed: {e}"),
        }

        // interval() panics on a zero period
        let period = self.schedule.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting measurements ticker, every {:?}", period);
        loop {
            ticker.tick().await;
            match self.cycle().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(SchedulerError::Fatal(e)),
                Err(e) => warn!("{e}"),
            }
        }
    }
}
