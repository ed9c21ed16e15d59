//! Output formatters for exported metrics.
//!
//! Formatters turn a [`MetricsSnapshot`] into the text served to scrapers.
//! Currently only the Prometheus text exposition format is supported.

pub mod prometheus;

use crate::metrics::MetricsSnapshot;

/// Trait for formatting a metrics snapshot into an exposition body.
pub trait OutputFormatter: Send + Sync {
    /// MIME type of the formatted body.
    fn content_type(&self) -> &'static str;

    /// Format a snapshot.
    ///
    /// # Arguments
    /// * `snapshot` - Metric values read at scrape time
    ///
    /// # Returns
    /// The complete response body
    fn format(&self, snapshot: &MetricsSnapshot) -> String;
}
