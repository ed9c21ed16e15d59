use crate::advertisement::{MacAddress, RawAdvertisement};
use crate::scanner::{CollectFuture, Collector, ScanError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// 2.50 °C, 25.00 %, 1000.00 hPa
pub const REFERENCE_PAYLOAD: [u8; 7] = [0x05, 0x01, 0xF4, 0x27, 0x10, 0xC3, 0x50];

/// A complete 24-byte data format 5 frame.
pub fn v5_payload() -> Vec<u8> {
    vec![
        0x05, // Format 5
        0x12, 0xFC, // Temperature: 24.30°C
        0x53, 0x94, // Humidity: 53.49%
        0xC3, 0x7C, // Pressure: 1000.44 hPa
        0x00, 0x04, // Acceleration X
        0xFF, 0xFC, // Acceleration Y
        0x04, 0x0C, // Acceleration Z
        0xAC, 0x36, // Battery and TX power
        0x42, // Movement counter
        0x00, 0xCD, // Sequence
        0xCB, 0xB8, 0x33, 0x4C, 0x88, 0x4F, // MAC address
    ]
}

pub fn advertisement(payload: &[u8]) -> RawAdvertisement {
    RawAdvertisement {
        address: TEST_MAC,
        name: "Ruuvi EEFF".to_string(),
        payload: payload.to_vec(),
    }
}

/// Start and (if the scan finished) end time of one `collect` call.
#[derive(Debug, Clone, Copy)]
pub struct Call {
    pub started: Instant,
    pub finished: Option<Instant>,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Collector that replays scripted scan outcomes.
///
/// Each call takes `scan_time` and pops the next outcome. Once the script is
/// exhausted, calls never resolve, like a scan with no beacon in range.
pub struct FakeCollector {
    script: Mutex<VecDeque<Result<RawAdvertisement, ScanError>>>,
    scan_time: Duration,
    calls: CallLog,
}

impl FakeCollector {
    pub fn new(script: Vec<Result<RawAdvertisement, ScanError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            scan_time: Duration::ZERO,
            calls: CallLog::default(),
        }
    }

    /// Collector that always finds the reference payload.
    pub fn repeating(times: usize) -> Self {
        Self::new(vec![Ok(advertisement(&REFERENCE_PAYLOAD)); times])
    }

    pub fn with_scan_time(mut self, scan_time: Duration) -> Self {
        self.scan_time = scan_time;
        self
    }

    pub fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }
}

impl Collector for FakeCollector {
    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(async move {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Call {
                    started: Instant::now(),
                    finished: None,
                });
                calls.len() - 1
            };

            tokio::time::sleep(self.scan_time).await;

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => {
                    self.calls.lock().unwrap()[index].finished = Some(Instant::now());
                    result
                }
                None => std::future::pending().await,
            }
        })
    }
}
