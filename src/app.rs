//! Core application runner for `ruuvitag-exporter`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically with an injected collector.

use crate::advertisement::BeaconFilter;
use crate::config::Options;
use crate::metrics::MetricsRegistry;
use crate::output::prometheus::PrometheusFormatter;
use crate::scanner::{self, Collector, ScanError};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::server::{MetricsServer, MetricsService};
use log::info;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    /// The Bluetooth adapter could not be enabled
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The metrics listener could not be bound
    #[error("metrics endpoint: {0}")]
    Io(#[from] io::Error),
}

/// Enable the Bluetooth adapter, then serve metrics and measure until a fatal error.
pub async fn run(options: Options) -> Result<(), RunError> {
    let filter = BeaconFilter::ruuvi(options.name_marker.as_str());
    info!(
        "Opening {} backend, looking for \"{}\"",
        options.backend,
        filter.name_marker()
    );
    let collector = scanner::open(options.backend, filter).await?;

    run_with_collector(options, collector).await
}

/// Serve metrics on `options.addr` and run the scheduler against `collector`.
///
/// The listener is bound before the first measurement, so a scrape during the
/// startup scan sees the empty registry rather than a refused connection.
pub async fn run_with_collector(
    options: Options,
    collector: Box<dyn Collector>,
) -> Result<(), RunError> {
    let metrics = Arc::new(MetricsRegistry::new());
    let formatter = Arc::new(PrometheusFormatter::new(options.metrics_prefix.as_str()));

    let server = MetricsServer::bind(
        options.addr,
        MetricsService::new(Arc::clone(&metrics), formatter),
    )
    .await?;
    let server = tokio::spawn(server.serve());

    let scheduler = Scheduler::new(collector, metrics, options.schedule());
    let result = scheduler.run().await;

    server.abort();
    result.map_err(RunError::from)
}
