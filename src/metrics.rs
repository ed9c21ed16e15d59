//! Process-wide measurement metrics.
//!
//! The registry is created once at startup and shared by `Arc` between the
//! scheduler, which is the only writer, and the exposition server, which only
//! reads. Every update is a single atomic store or increment, so neither side
//! takes a lock.

use crate::measurement::Measurement;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lower bound of the first duration bucket, in seconds.
pub const DURATION_BUCKET_START: f64 = 1.0;
/// Width of each duration bucket, in seconds.
pub const DURATION_BUCKET_WIDTH: f64 = 5.0;
/// Number of finite duration buckets (1, 6, ..., 96).
pub const DURATION_BUCKET_COUNT: usize = 20;

/// `count` upper bounds starting at `start`, `width` apart.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start + width * i as f64).collect()
}

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-value gauge that reads as `None` until it is first set.
#[derive(Debug)]
pub struct Gauge(AtomicU64);

impl Gauge {
    // A NaN bit pattern no decoded value can produce
    const UNSET: u64 = u64::MAX;

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<f64> {
        match self.0.load(Ordering::Relaxed) {
            Self::UNSET => None,
            bits => Some(f64::from_bits(bits)),
        }
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self(AtomicU64::new(Self::UNSET))
    }
}

/// Fixed-bucket histogram.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    /// Per-bucket (non-cumulative) counts, plus one trailing `+Inf` slot.
    /// The total count is their sum, so it can never trail a bucket.
    buckets: Vec<AtomicU64>,
    sum: AtomicU64,
}

/// Point-in-time copy of a [`Histogram`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper bound, cumulative count)` for every finite bucket
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    /// Cumulative count including the `+Inf` slot
    pub count: u64,
}

impl Histogram {
    /// Create a histogram with the given ascending upper bounds.
    pub fn new(bounds: Vec<f64>) -> Self {
        let buckets = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            sum: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn observe(&self, value: f64) {
        let index = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());
        self.buckets[index].fetch_add(1, Ordering::Relaxed);

        // fetch_update only fails when the closure returns None
        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        // Each slot is loaded once, so the buckets and the total agree
        let counts: Vec<u64> = self
            .buckets
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect();

        let mut cumulative = 0;
        let buckets = self
            .bounds
            .iter()
            .zip(&counts)
            .map(|(bound, count)| {
                cumulative += count;
                (*bound, cumulative)
            })
            .collect();

        HistogramSnapshot {
            buckets,
            sum: f64::from_bits(self.sum.load(Ordering::Relaxed)),
            count: counts.iter().sum(),
        }
    }
}

/// Everything the exporter publishes.
#[derive(Debug)]
pub struct MetricsRegistry {
    /// Successful measurement cycles
    pub measurements: Counter,
    /// Failed measurement cycles
    pub errors: Counter,
    pub temperature: Gauge,
    pub humidity: Gauge,
    pub pressure: Gauge,
    /// Seconds spent per cycle, scan wait included
    pub duration: Histogram,
}

/// Point-in-time copy of a [`MetricsRegistry`], handed to formatters.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub measurement_count: u64,
    pub measurement_err_count: u64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub duration: HistogramSnapshot,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            measurements: Counter::default(),
            errors: Counter::default(),
            temperature: Gauge::default(),
            humidity: Gauge::default(),
            pressure: Gauge::default(),
            duration: Histogram::new(linear_buckets(
                DURATION_BUCKET_START,
                DURATION_BUCKET_WIDTH,
                DURATION_BUCKET_COUNT,
            )),
        }
    }

    /// Publish a fresh reading and count the cycle as successful.
    pub fn record_success(&self, measurement: &Measurement) {
        self.temperature.set(measurement.temperature);
        self.humidity.set(measurement.humidity);
        self.pressure.set(measurement.pressure);
        self.measurements.inc();
    }

    /// Count a failed cycle. Gauges keep their last values.
    pub fn record_failure(&self) {
        self.errors.inc();
    }

    pub fn observe_duration(&self, elapsed: Duration) {
        self.duration.observe(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            measurement_count: self.measurements.get(),
            measurement_err_count: self.errors.get(),
            temperature: self.temperature.get(),
            humidity: self.humidity.get(),
            pressure: self.pressure.get(),
            duration: self.duration.snapshot(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
