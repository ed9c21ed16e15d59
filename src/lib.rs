//! `ruuvitag-exporter` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The measurement loop lives in [`crate::scheduler`] and the
//! wiring in [`crate::app`], both testable with an injected [`Collector`].

pub mod advertisement;
pub mod app;
pub mod config;
pub mod decoder;
pub mod measurement;
pub mod metrics;
pub mod output;
pub mod scanner;
pub mod scheduler;
pub mod server;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{BeaconFilter, MacAddress, RUUVI_MANUFACTURER_ID, RawAdvertisement};
pub use config::Options;
pub use decoder::{DecodeError, decode};
pub use measurement::Measurement;
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use output::OutputFormatter;
pub use output::prometheus::PrometheusFormatter;
pub use scanner::{Backend, Collector, ScanError};
pub use scheduler::{CycleError, Schedule, Scheduler, run_cycle};
