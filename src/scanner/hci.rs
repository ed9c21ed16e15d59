//! Raw HCI socket backend for RuuviTag scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.
//!
//! Scanning is active: RuuviTags put their name in the scan response and
//! their sensor data in the advertisement itself, so both halves are merged
//! per device before the filter is applied.

use super::{CollectFuture, Collector, ScanError};
use crate::advertisement::{BeaconFilter, MacAddress, RawAdvertisement};
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use log::debug;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::time::timeout;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;
const HCI_DEV_ID: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_CMD_COMPLETE: u8 = 0x0E;
const EVT_CMD_STATUS: u8 = 0x0F;
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_ACTIVE: u8 = 0x01;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Max HCI event size
const EVENT_BUFFER_SIZE: usize = 258;

/// How long the controller gets to answer a command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// LE Set Scan Parameters command
struct LeSetScanParameters {
    scan_type: u8,
    interval: u16,
    window: u16,
    own_address_type: u8,
    filter_policy: u8,
}

impl LeSetScanParameters {
    fn to_bytes(&self) -> [u8; 7] {
        let [i0, i1] = self.interval.to_le_bytes();
        let [w0, w1] = self.window.to_le_bytes();
        [
            self.scan_type,
            i0,
            i1,
            w0,
            w1,
            self.own_address_type,
            self.filter_policy,
        ]
    }
}

fn opcode(ogf: u16, ocf: u16) -> u16 {
    (ogf << 10) | ocf
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = opcode(ogf, ocf);
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Enable parameters; duplicates are never filtered.
fn scan_enable_params(enable: bool) -> [u8; 2] {
    [u8::from(enable), 0x00]
}

/// Status byte of the Command Complete or Command Status event answering `opcode`.
fn parse_command_status(packet: &[u8], opcode: u16) -> Option<u8> {
    let expected = opcode.to_le_bytes();
    match *packet {
        // type, event, param len, num packets, opcode, status
        [HCI_EVENT_PKT, EVT_CMD_COMPLETE, _, _, op0, op1, status, ..] if [op0, op1] == expected => {
            Some(status)
        }
        // type, event, param len, status, num packets, opcode
        [HCI_EVENT_PKT, EVT_CMD_STATUS, _, status, _, op0, op1, ..] if [op0, op1] == expected => {
            Some(status)
        }
        _ => None,
    }
}

/// Open a raw HCI socket
fn open_hci_socket() -> io::Result<OwnedFd> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> io::Result<()> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Only pass the given events to the socket
fn set_hci_filter(fd: &OwnedFd, events: &[u8]) -> io::Result<()> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    for &event in events {
        filter.set_event(event);
    }

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> io::Result<()> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Read one packet from a non-blocking socket
fn read_packet(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Discard whatever is queued on a non-blocking socket
fn drain(fd: &OwnedFd, buf: &mut [u8]) {
    while matches!(read_packet(fd, buf), Ok(n) if n > 0) {}
}

/// One LE advertising report: either an advertisement or a scan response.
#[derive(Debug, Default, PartialEq)]
struct AdvertisingReport {
    address: MacAddress,
    name: Option<String>,
    manufacturer_data: HashMap<u16, Vec<u8>>,
}

/// Name and manufacturer data accumulated for one device during a scan.
#[derive(Debug, Default)]
struct DeviceState {
    name: Option<String>,
    manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl DeviceState {
    fn merge(&mut self, report: AdvertisingReport) {
        if report.name.is_some() {
            self.name = report.name;
        }
        self.manufacturer_data.extend(report.manufacturer_data);
    }
}

/// Parse an HCI event packet holding an LE advertising report.
///
/// Only the first report of the event is parsed.
fn parse_advertising_report(packet: &[u8]) -> Option<AdvertisingReport> {
    // packet type, event code, param len, subevent
    if packet.len() < 4
        || packet[0] != HCI_EVENT_PKT
        || packet[1] != EVT_LE_META_EVENT
        || packet[3] != EVT_LE_ADVERTISING_REPORT
    {
        return None;
    }

    // num_reports(1) + event_type(1) + addr_type(1) + addr(6) + data_len(1)
    let report = &packet[4..];
    if report.len() < 10 || report[0] == 0 {
        return None;
    }

    // HCI uses little-endian address
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&report[3..9]);
    addr.reverse();

    let data_len = report[9] as usize;
    let ad_data = report.get(10..10 + data_len)?;

    let mut parsed = AdvertisingReport {
        address: MacAddress(addr),
        ..Default::default()
    };

    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_COMPLETE_LOCAL_NAME => {
                parsed.name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_SHORT_LOCAL_NAME if parsed.name.is_none() => {
                parsed.name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_MANUFACTURER_DATA if value.len() >= 2 => {
                let id = u16::from_le_bytes([value[0], value[1]]);
                parsed.manufacturer_data.insert(id, value[2..].to_vec());
            }
            _ => {}
        }

        offset += 1 + len;
    }

    Some(parsed)
}

/// Collector reading advertising reports from `hci0`.
pub struct HciCollector {
    events: AsyncFd<OwnedFd>,
    commands: AsyncFd<OwnedFd>,
    filter: BeaconFilter,
}

impl HciCollector {
    /// Open the event and command sockets on `hci0`.
    pub fn open(filter: BeaconFilter) -> Result<Self, ScanError> {
        let unavailable =
            |e: io::Error| ScanError::AdapterUnavailable(format!("hci{HCI_DEV_ID}: {e}"));

        let events = open_hci_socket().map_err(unavailable)?;
        bind_hci_socket(&events, HCI_DEV_ID).map_err(unavailable)?;
        set_hci_filter(&events, &[EVT_LE_META_EVENT]).map_err(unavailable)?;

        // Commands go through a separate socket bound to the same device,
        // which also receives the controller's answers to them
        let commands = open_hci_socket().map_err(unavailable)?;
        bind_hci_socket(&commands, HCI_DEV_ID).map_err(unavailable)?;
        set_hci_filter(&commands, &[EVT_CMD_COMPLETE, EVT_CMD_STATUS]).map_err(unavailable)?;

        let events = AsyncFd::new(events).map_err(unavailable)?;
        let commands = AsyncFd::new(commands).map_err(unavailable)?;

        Ok(Self {
            events,
            commands,
            filter,
        })
    }

    /// Send an LE controller command and wait for the controller to accept it.
    async fn command(&self, ocf: u16, params: &[u8]) -> io::Result<()> {
        let opcode = opcode(OGF_LE_CTL, ocf);
        let mut buf = [0u8; EVENT_BUFFER_SIZE];

        // Answers to commands of a cancelled cycle
        drain(self.commands.get_ref(), &mut buf);
        send_hci_command(
            self.commands.get_ref(),
            &hci_command_packet(OGF_LE_CTL, ocf, params),
        )?;

        let reply = async {
            loop {
                let mut guard = self.commands.readable().await?;
                match guard.try_io(|inner| read_packet(inner.get_ref(), &mut buf)) {
                    Ok(Ok(n)) => {
                        if let Some(status) = parse_command_status(&buf[..n], opcode) {
                            return Ok::<u8, io::Error>(status);
                        }
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_would_block) => continue,
                }
            }
        };
        let status = timeout(COMMAND_TIMEOUT, reply).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply to command {opcode:#06x}"),
            )
        })??;

        match status {
            0 => Ok(()),
            status => Err(io::Error::other(format!(
                "command {opcode:#06x} rejected with status {status:#04x}"
            ))),
        }
    }

    /// Configure and enable active LE scanning
    async fn start_le_scan(&self) -> io::Result<()> {
        // Active scan, 10ms interval, 10ms window
        let params = LeSetScanParameters {
            scan_type: LE_SCAN_ACTIVE,
            interval: 0x0010, // 10ms in 0.625ms units
            window: 0x0010,   // 10ms in 0.625ms units
            own_address_type: LE_PUBLIC_ADDRESS,
            filter_policy: FILTER_POLICY_ACCEPT_ALL,
        };

        self.command(OCF_LE_SET_SCAN_PARAMETERS, &params.to_bytes())
            .await?;
        self.command(OCF_LE_SET_SCAN_ENABLE, &scan_enable_params(true))
            .await
    }

    async fn scan(&self) -> Result<RawAdvertisement, ScanError> {
        let mut buf = [0u8; EVENT_BUFFER_SIZE];

        // A previous cycle may have been cancelled with scanning still enabled.
        // Controllers reject this when scanning is already off.
        if let Err(e) = self
            .command(OCF_LE_SET_SCAN_ENABLE, &scan_enable_params(false))
            .await
        {
            debug!("Could not reset scan state: {e}");
        }
        // Reports queued up while no cycle was running
        drain(self.events.get_ref(), &mut buf);

        self.start_le_scan()
            .await
            .map_err(|e| ScanError::ScanStartFailed(e.to_string()))?;
        debug!("Scan started");

        let mut devices: HashMap<MacAddress, DeviceState> = HashMap::new();
        let advertisement = loop {
            let mut guard = self
                .events
                .readable()
                .await
                .map_err(|e| ScanError::ScanInterrupted(e.to_string()))?;

            let n = match guard.try_io(|inner| read_packet(inner.get_ref(), &mut buf)) {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(ScanError::ScanInterrupted(e.to_string())),
                Err(_would_block) => continue,
            };

            let Some(report) = parse_advertising_report(&buf[..n]) else {
                continue;
            };
            let address = report.address;
            let state = devices.entry(address).or_default();
            state.merge(report);
            debug!(
                "found device: {} {:?} {:?}",
                address, state.name, state.manufacturer_data
            );

            if let Some(advertisement) =
                self.filter
                    .capture(address, state.name.as_deref(), &state.manufacturer_data)
            {
                break advertisement;
            }
        };

        debug!("Stopping scan");
        self.command(OCF_LE_SET_SCAN_ENABLE, &scan_enable_params(false))
            .await
            .map_err(|e| ScanError::ScanStopFailed(e.to_string()))?;
        debug!("Stopped scan");

        Ok(advertisement)
    }
}

impl Collector for HciCollector {
    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.scan())
    }
}
