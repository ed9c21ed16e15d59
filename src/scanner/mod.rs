//! BLE scan collector for a single RuuviTag.
//!
//! A [`Collector`] runs one discovery pass per call and resolves with the
//! first advertisement accepted by its [`BeaconFilter`], stopping the scan
//! once it has one. The adapter itself is enabled once, when the collector is
//! opened.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::{BeaconFilter, RawAdvertisement};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Error type for scanner operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// The radio adapter could not be opened or powered on
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    /// Discovery could not be started
    #[error("failed to start scan: {0}")]
    ScanStartFailed(String),
    /// Discovery could not be stopped after a match; the match is discarded
    #[error("failed to stop scan: {0}")]
    ScanStopFailed(String),
    /// The adapter reported an error or ended discovery while waiting for a match
    #[error("scan interrupted: {0}")]
    ScanInterrupted(String),
    /// No matching advertisement arrived in time
    #[error("no matching advertisement within {0:?}")]
    TimedOut(Duration),
}

impl ScanError {
    /// Whether the error means the process cannot continue measuring.
    ///
    /// Only adapter-level failures are fatal. Everything else is expected to
    /// clear up by the next cycle (e.g. the beacon was briefly out of range).
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::AdapterUnavailable(_))
    }
}

/// Future returned by [`Collector::collect`].
pub type CollectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawAdvertisement, ScanError>> + Send + 'a>>;

/// One-shot advertisement capture, abstracted so the scheduler can be tested
/// without Bluetooth hardware.
pub trait Collector: Send + Sync {
    /// Scan until the target beacon is seen, then stop scanning.
    ///
    /// Waits without bound; callers apply their own timeout. Dropping the
    /// future must leave the collector usable for the next call.
    fn collect(&self) -> CollectFuture<'_>;
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Enable the adapter for the chosen backend and return a collector bound to it.
///
/// # Errors
/// Returns [`ScanError::AdapterUnavailable`] when the adapter cannot be
/// opened or powered on.
pub async fn open(
    backend: Backend,
    filter: BeaconFilter,
) -> Result<Box<dyn Collector>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Ok(Box::new(bluer::BluerCollector::open(filter).await?)),
        #[cfg(feature = "hci")]
        Backend::Hci => Ok(Box::new(hci::HciCollector::open(filter)?)),
    }
}
