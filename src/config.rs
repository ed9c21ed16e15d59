//! Command-line configuration.

use crate::advertisement::DEFAULT_NAME_MARKER;
use crate::scanner::Backend;
use crate::scheduler::Schedule;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Poll a RuuviTag over Bluetooth LE and export its readings as Prometheus metrics.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Get measurements once every specified duration.
    /// Accepts duration with suffix: 30s, 5m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "5m", value_parser = parse_interval)]
    pub measure_every: Duration,

    /// address:port to serve /metrics on
    #[arg(long, default_value = "127.0.0.1:8045")]
    pub addr: SocketAddr,

    /// Only accept beacons whose advertised name contains this text
    #[arg(long, default_value = DEFAULT_NAME_MARKER)]
    pub name_marker: String,

    /// Give up on a scan after this long (default: the measurement interval)
    #[arg(long, value_parser = parse_interval)]
    pub scan_timeout: Option<Duration>,

    /// Keep running when the very first measurement fails
    #[arg(long)]
    pub allow_initial_failure: bool,

    /// Prefix prepended to every exported metric name
    #[arg(long, default_value = "")]
    pub metrics_prefix: String,

    /// Verbose output, log every device seen while scanning
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

impl Options {
    /// Scan timeout, falling back to the measurement interval.
    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout.unwrap_or(self.measure_every)
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            interval: self.measure_every,
            scan_timeout: self.scan_timeout(),
            allow_initial_failure: self.allow_initial_failure,
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use ruuvitag_exporter::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be checked before "m" and "s"
    let units: [(&str, &str, fn(u64) -> Duration); 4] = [
        ("ms", "milliseconds", Duration::from_millis),
        ("h", "hours", |n| Duration::from_secs(n.saturating_mul(3600))),
        ("m", "minutes", |n| Duration::from_secs(n.saturating_mul(60))),
        ("s", "seconds", Duration::from_secs),
    ];

    for (suffix, unit, to_duration) in units {
        if let Some(num) = src.strip_suffix(suffix) {
            let value: u64 = num
                .trim()
                .parse()
                .map_err(|_| format!("invalid {}: {}", unit, num))?;
            return Ok(to_duration(value));
        }
    }

    // No suffix, treat as seconds
    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    Ok(Duration::from_secs(secs))
}

/// Like [`parse_duration`], but rejects zero.
pub fn parse_interval(src: &str) -> Result<Duration, String> {
    match parse_duration(src)? {
        Duration::ZERO => Err(format!("duration must be greater than zero: {}", src.trim())),
        duration => Ok(duration),
    }
}
