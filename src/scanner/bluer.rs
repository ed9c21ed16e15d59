//! BlueZ D-Bus backend for RuuviTag scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{CollectFuture, Collector, ScanError};
use crate::advertisement::{BeaconFilter, MacAddress, RawAdvertisement};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{StreamExt, pin_mut};
use log::debug;
use std::collections::HashSet;

/// Devices BlueZ already knew about when a discovery session started.
///
/// The session opens by listing every cached device, in range or not, with
/// the properties BlueZ last saw. That first event for each cached device is
/// skipped; only later property-change events carry fresh data.
#[derive(Debug, Default)]
struct CachedDevices {
    unseen: HashSet<Address>,
}

impl CachedDevices {
    fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            unseen: addresses.into_iter().collect(),
        }
    }

    /// Whether a `DeviceAdded` event for `address` reflects a new advertisement.
    fn is_fresh(&mut self, address: Address) -> bool {
        !self.unseen.remove(&address)
    }
}

/// Collector backed by the default BlueZ adapter.
pub struct BluerCollector {
    // Keeps the D-Bus connection alive for the adapter handle
    _session: Session,
    adapter: Adapter,
    filter: BeaconFilter,
}

impl BluerCollector {
    /// Connect to BlueZ and power on the default adapter.
    pub async fn open(filter: BeaconFilter) -> Result<Self, ScanError> {
        let unavailable = |e: bluer::Error| ScanError::AdapterUnavailable(e.to_string());

        let session = Session::new().await.map_err(unavailable)?;
        let adapter = session.default_adapter().await.map_err(unavailable)?;
        adapter.set_powered(true).await.map_err(unavailable)?;
        debug!("Using Bluetooth adapter {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            filter,
        })
    }

    /// Run one discovery session until a device passes the filter.
    ///
    /// Discovery stops when the event stream is dropped, which happens on
    /// return or when the caller gives up on this future.
    async fn scan(&self) -> Result<RawAdvertisement, ScanError> {
        let start_failed = |e: bluer::Error| ScanError::ScanStartFailed(e.to_string());

        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        };
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(start_failed)?;

        // Property changes of known devices are reported as DeviceAdded too,
        // after the initial listing of cached devices
        let mut cached = CachedDevices::new(
            self.adapter
                .device_addresses()
                .await
                .map_err(start_failed)?,
        );
        let events = self
            .adapter
            .discover_devices_with_changes()
            .await
            .map_err(start_failed)?;
        pin_mut!(events);
        debug!("Scan started");

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            if !cached.is_fresh(address) {
                debug!("Ignoring cached properties of {address}");
                continue;
            }
            match self.inspect(address).await {
                Ok(Some(advertisement)) => {
                    debug!("Stopping scan");
                    return Ok(advertisement);
                }
                Ok(None) => {}
                Err(e) => debug!("Skipping {address}: {e}"),
            }
        }

        Err(ScanError::ScanInterrupted(
            "discovery ended before a matching advertisement was seen".into(),
        ))
    }

    /// Read a device's advertised name and manufacturer data and apply the filter.
    async fn inspect(&self, address: Address) -> bluer::Result<Option<RawAdvertisement>> {
        let device = self.adapter.device(address)?;
        let name = device.name().await?;
        let manufacturer_data = device.manufacturer_data().await?.unwrap_or_default();
        debug!(
            "found device: {} {:?} {:?} {:?}",
            address,
            device.rssi().await.ok().flatten(),
            name,
            manufacturer_data
        );

        Ok(self
            .filter
            .capture(MacAddress::from(address), name.as_deref(), &manufacturer_data))
    }
}

impl Collector for BluerCollector {
    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.scan())
    }
}
