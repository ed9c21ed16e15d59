//! Advertisement data captured from a scan and the policy used to pick the
//! target beacon out of everything in radio range.

use std::collections::HashMap;
use std::fmt;

/// Ruuvi Innovations manufacturer ID (0x0499).
///
/// See: https://github.com/ruuvi/ruuvi-sensor-protocols
pub const RUUVI_MANUFACTURER_ID: u16 = 1177;

/// Name marker advertised by RuuviTag firmware ("Ruuvi ABCD").
pub const DEFAULT_NAME_MARKER: &str = "Ruuvi";

/// A Bluetooth device address stored as a 6-byte array, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// The manufacturer data of one matching advertisement.
///
/// Lives for a single measurement cycle: the collector produces it, the
/// scheduler decodes the payload and drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    /// Address of the advertising device
    pub address: MacAddress,
    /// Advertised local name
    pub name: String,
    /// Manufacturer data stored under the beacon's manufacturer ID, without the ID itself
    pub payload: Vec<u8>,
}

impl RawAdvertisement {
    /// Payload as lowercase hex, for logging.
    pub fn payload_hex(&self) -> String {
        self.payload.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Decides whether an advertising device is the beacon being polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconFilter {
    name_marker: String,
    manufacturer_id: u16,
}

impl BeaconFilter {
    pub fn new(name_marker: impl Into<String>, manufacturer_id: u16) -> Self {
        Self {
            name_marker: name_marker.into(),
            manufacturer_id,
        }
    }

    /// Filter for RuuviTags advertising the given name marker.
    pub fn ruuvi(name_marker: impl Into<String>) -> Self {
        Self::new(name_marker, RUUVI_MANUFACTURER_ID)
    }

    pub fn name_marker(&self) -> &str {
        &self.name_marker
    }

    pub fn manufacturer_id(&self) -> u16 {
        self.manufacturer_id
    }

    /// Returns the beacon payload if the device qualifies.
    ///
    /// A device qualifies when its name contains the marker and its
    /// manufacturer data has an entry under the filter's manufacturer ID.
    /// Devices without a name never qualify.
    pub fn matches<'a>(
        &self,
        name: Option<&str>,
        manufacturer_data: &'a HashMap<u16, Vec<u8>>,
    ) -> Option<&'a [u8]> {
        if !name.is_some_and(|name| name.contains(&self.name_marker)) {
            return None;
        }
        manufacturer_data
            .get(&self.manufacturer_id)
            .map(Vec::as_slice)
    }

    /// Build the advertisement for a qualifying device.
    pub fn capture(
        &self,
        address: MacAddress,
        name: Option<&str>,
        manufacturer_data: &HashMap<u16, Vec<u8>>,
    ) -> Option<RawAdvertisement> {
        let payload = self.matches(name, manufacturer_data)?;
        Some(RawAdvertisement {
            address,
            name: name.unwrap_or_default().to_string(),
            payload: payload.to_vec(),
        })
    }
}

impl Default for BeaconFilter {
    fn default() -> Self {
        Self::ruuvi(DEFAULT_NAME_MARKER)
    }
}
