//! Prometheus text exposition format (version 0.0.4).

use crate::metrics::{HistogramSnapshot, MetricsSnapshot};
use crate::output::OutputFormatter;
use std::fmt;

/// Metric types used by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

/// A sample line: `<family><suffix>{labels} value`
#[derive(Debug, PartialEq)]
pub struct Sample {
    pub suffix: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl Sample {
    fn plain(value: f64) -> Self {
        Sample {
            suffix: "",
            labels: Vec::new(),
            value,
        }
    }
}

/// One metric family with its HELP and TYPE header.
#[derive(Debug)]
pub struct MetricFamily {
    pub name: String,
    pub help: &'static str,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

/// Go-style float rendering expected by Prometheus parsers.
fn fmt_value(value: f64, fmt: &mut fmt::Formatter) -> fmt::Result {
    if value.is_nan() {
        write!(fmt, "NaN")
    } else if value.is_infinite() {
        write!(fmt, "{}", if value > 0.0 { "+Inf" } else { "-Inf" })
    } else {
        write!(fmt, "{value}")
    }
}

fn fmt_labels(sample: &Sample, fmt: &mut fmt::Formatter) -> fmt::Result {
    if sample.labels.is_empty() {
        return Ok(());
    }
    write!(fmt, "{{")?;
    for (i, (key, value)) in sample.labels.iter().enumerate() {
        if i > 0 {
            write!(fmt, ",")?;
        }
        let escaped = value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n");
        write!(fmt, "{key}=\"{escaped}\"")?;
    }
    write!(fmt, "}}")
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "# HELP {} {}", self.name, self.help)?;
        writeln!(fmt, "# TYPE {} {}", self.name, self.kind)?;
        for sample in &self.samples {
            write!(fmt, "{}{}", self.name, sample.suffix)?;
            fmt_labels(sample, fmt)?;
            write!(fmt, " ")?;
            fmt_value(sample.value, fmt)?;
            writeln!(fmt)?;
        }
        Ok(())
    }
}

/// Prometheus text formatter.
///
/// Metric names match the exporter's historic names (`measurement_count`,
/// `temperature`, ...), optionally behind a common prefix.
#[derive(Debug, Clone, Default)]
pub struct PrometheusFormatter {
    prefix: String,
}

impl PrometheusFormatter {
    /// Create a formatter that prepends `prefix` to every metric name.
    ///
    /// An empty prefix keeps the bare names.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn family(&self, name: &str, help: &'static str, kind: MetricKind) -> MetricFamily {
        MetricFamily {
            name: format!("{}{}", self.prefix, name),
            help,
            kind,
            samples: Vec::new(),
        }
    }

    fn counter(&self, name: &str, help: &'static str, value: u64) -> MetricFamily {
        let mut family = self.family(name, help, MetricKind::Counter);
        family.samples.push(Sample::plain(value as f64));
        family
    }

    /// Unset gauges produce no family at all.
    fn gauge(&self, name: &str, help: &'static str, value: Option<f64>) -> Option<MetricFamily> {
        let mut family = self.family(name, help, MetricKind::Gauge);
        family.samples.push(Sample::plain(value?));
        Some(family)
    }

    fn histogram(
        &self,
        name: &str,
        help: &'static str,
        histogram: &HistogramSnapshot,
    ) -> MetricFamily {
        let mut family = self.family(name, help, MetricKind::Histogram);
        for (bound, count) in &histogram.buckets {
            family.samples.push(Sample {
                suffix: "_bucket",
                labels: vec![("le", bound.to_string())],
                value: *count as f64,
            });
        }
        family.samples.push(Sample {
            suffix: "_bucket",
            labels: vec![("le", "+Inf".to_string())],
            value: histogram.count as f64,
        });
        family.samples.push(Sample {
            suffix: "_sum",
            labels: Vec::new(),
            value: histogram.sum,
        });
        family.samples.push(Sample {
            suffix: "_count",
            labels: Vec::new(),
            value: histogram.count as f64,
        });
        family
    }

    fn families(&self, s: &MetricsSnapshot) -> Vec<MetricFamily> {
        let mut families = vec![
            self.counter(
                "measurement_count",
                "Number of successful measurements",
                s.measurement_count,
            ),
            self.counter(
                "measurement_err_count",
                "Number of failed measurements",
                s.measurement_err_count,
            ),
        ];
        families.extend(self.gauge("temperature", "Temperature in celsius", s.temperature));
        families.extend(self.gauge("humidity", "Humidity in percentage", s.humidity));
        families.extend(self.gauge(
            "pressure",
            "Atmospheric pressure in hectopascal",
            s.pressure,
        ));
        families.push(self.histogram(
            "measurement_duration",
            "Seconds it took to make a measurement",
            &s.duration,
        ));
        families
    }
}

impl OutputFormatter for PrometheusFormatter {
    fn content_type(&self) -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }

    fn format(&self, snapshot: &MetricsSnapshot) -> String {
        self.families(snapshot)
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use crate::metrics::MetricsRegistry;
    use std::time::Duration;

    #[test]
    fn test_metric_family_format() {
        let family = MetricFamily {
            name: "test".to_string(),
            help: "A test metric",
            kind: MetricKind::Gauge,
            samples: vec![Sample::plain(32.0)],
        };

        assert_eq!(
            family.to_string(),
            "# HELP test A test metric\n# TYPE test gauge\ntest 32\n"
        );
    }

    #[test]
    fn test_labels_are_escaped() {
        let family = MetricFamily {
            name: "test".to_string(),
            help: "Labels",
            kind: MetricKind::Counter,
            samples: vec![Sample {
                suffix: "_total",
                labels: vec![("a", "x\"y".to_string()), ("b", "1".to_string())],
                value: f64::INFINITY,
            }],
        };

        assert!(
            family
                .to_string()
                .ends_with("test_total{a=\"x\\\"y\",b=\"1\"} +Inf\n")
        );
    }

    #[test]
    fn test_empty_registry_omits_gauges() {
        let formatter = PrometheusFormatter::default();
        let out = formatter.format(&MetricsRegistry::new().snapshot());

        assert!(out.contains("# TYPE measurement_count counter\nmeasurement_count 0\n"));
        assert!(out.contains("measurement_err_count 0\n"));
        assert!(!out.contains("temperature"));
        assert!(!out.contains("humidity"));
        assert!(!out.contains("# TYPE pressure"));
        assert!(out.contains("measurement_duration_bucket{le=\"1\"} 0\n"));
        assert!(out.contains("measurement_duration_bucket{le=\"96\"} 0\n"));
        assert!(out.contains("measurement_duration_bucket{le=\"+Inf\"} 0\n"));
        assert!(out.contains("measurement_duration_count 0\n"));
    }

    #[test]
    fn test_format_after_measurement() {
        let registry = MetricsRegistry::new();
        registry.record_success(&Measurement {
            temperature: 2.5,
            humidity: 25.0,
            pressure: 1000.0,
        });
        registry.observe_duration(Duration::from_secs(3));
        registry.record_failure();
        registry.observe_duration(Duration::from_secs(200));

        let out = PrometheusFormatter::default().format(&registry.snapshot());

        assert!(out.contains("# HELP temperature Temperature in celsius\n"));
        assert!(out.contains("# TYPE temperature gauge\ntemperature 2.5\n"));
        assert!(out.contains("humidity 25\n"));
        assert!(out.contains("pressure 1000\n"));
        assert!(out.contains("measurement_count 1\n"));
        assert!(out.contains("measurement_err_count 1\n"));
        assert!(out.contains("measurement_duration_bucket{le=\"1\"} 0\n"));
        assert!(out.contains("measurement_duration_bucket{le=\"6\"} 1\n"));
        assert!(out.contains("measurement_duration_bucket{le=\"96\"} 1\n"));
        assert!(out.contains("measurement_duration_bucket{le=\"+Inf\"} 2\n"));
        assert!(out.contains("measurement_duration_sum 203\n"));
        assert!(out.contains("measurement_duration_count 2\n"));
    }

    #[test]
    fn test_prefix_applies_to_every_family() {
        let registry = MetricsRegistry::new();
        registry.temperature.set(20.0);

        let out = PrometheusFormatter::new("ruuvi_").format(&registry.snapshot());

        for line in out.lines().filter(|l| !l.starts_with('#')) {
            assert!(line.starts_with("ruuvi_"), "unprefixed line: {line}");
        }
        assert!(out.contains("# TYPE ruuvi_temperature gauge\n"));
    }
}
