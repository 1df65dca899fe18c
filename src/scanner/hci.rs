//! Raw HCI socket backend.
//!
//! Opens a raw Linux HCI socket, enables passive LE scanning and feeds LE
//! advertising reports to the listeners without going through BlueZ. Requires
//! CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges.

use super::ScanError;
use crate::advertisement::AdvertisementPacket;
use crate::mac_address::MacAddress;
use crate::reading::{UNKNOWN_RSSI, clamp_rssi};
use crate::tracker::ListenerRegistry;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use log::{trace, warn};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

/// Adapter index (`hci0`).
const HCI_DEV_ID: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;
/// Scan interval and window, 0.625 ms units (10 ms)
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

/// RSSI byte meaning "not available" in an advertising report.
const HCI_RSSI_NOT_AVAILABLE: u8 = 0x7F;

/// Packet type, event code, parameter length, LE subevent.
const EVENT_HEADER_LEN: usize = 4;
/// Largest HCI event: header plus 255 parameter bytes.
const MAX_EVENT_LEN: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
#[derive(Debug, Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << u32::from(ptype);
    }

    fn set_event(&mut self, event: u8) {
        let bit = usize::from(event);
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

fn os_error(what: &str) -> ScanError {
    ScanError::Bluetooth(format!("{what}: {}", io::Error::last_os_error()))
}

fn check(ret: isize, what: &str) -> Result<(), ScanError> {
    if ret < 0 { Err(os_error(what)) } else { Ok(()) }
}

/// Serialize an HCI command packet.
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters: passive, 10 ms interval and window.
fn scan_parameters() -> [u8; 7] {
    let [i0, i1] = SCAN_INTERVAL.to_le_bytes();
    let [w0, w1] = SCAN_WINDOW.to_le_bytes();
    [
        LE_SCAN_PASSIVE,
        i0,
        i1,
        w0,
        w1,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

/// Open a non-blocking raw HCI socket bound to `dev_id`.
fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // nix has no BTPROTO_HCI support, so this goes through libc directly
    let fd = unsafe { libc::socket(AF_BLUETOOTH, SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK, BTPROTO_HCI) };
    check(fd as isize, "Failed to create HCI socket")?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    check(ret as isize, "Failed to bind HCI socket")?;

    Ok(fd)
}

/// Only deliver LE meta events to this socket.
fn set_le_event_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::default();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    check(ret as isize, "Failed to set HCI filter")
}

fn send_hci_command(fd: &OwnedFd, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
    let ret = unsafe { libc::write(fd.as_raw_fd(), packet.as_ptr() as *const c_void, packet.len()) };
    check(ret, "Failed to send HCI command")
}

fn enable_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    send_hci_command(fd, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters())?;
    // enable, duplicates not filtered: every advertisement carries fresh readings
    send_hci_command(fd, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00])
}

fn read_event(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

fn report_rssi(raw: u8) -> i8 {
    match raw {
        HCI_RSSI_NOT_AVAILABLE => UNKNOWN_RSSI,
        raw => clamp_rssi((raw as i8).into()),
    }
}

/// Extract the first report of an LE advertising report event.
///
/// Report layout after the event header: number of reports, event type,
/// address type, address (6, reversed), data length, data, RSSI.
fn parse_advertising_report(event: &[u8]) -> Option<AdvertisementPacket<'_>> {
    let [HCI_EVENT_PKT, EVT_LE_META_EVENT, _, EVT_LE_ADVERTISING_REPORT, report @ ..] = event else {
        return None;
    };
    let [num_reports, _event_type, _addr_type, a0, a1, a2, a3, a4, a5, data_len, rest @ ..] = report
    else {
        return None;
    };
    if *num_reports == 0 {
        return None;
    }

    let data_len = usize::from(*data_len);
    let (data, tail) = rest.split_at_checked(data_len)?;
    let rssi = report_rssi(*tail.first()?);
    let address = MacAddress::from_reversed([*a0, *a1, *a2, *a3, *a4, *a5]);

    Some(AdvertisementPacket::new(address, rssi, data))
}

/// Start a passive scan on `hci0` through raw HCI sockets.
///
/// One socket receives LE meta events, a second one sends the scan commands.
pub async fn start_scan(listeners: Arc<ListenerRegistry>) -> Result<(), ScanError> {
    let fd = open_hci_socket(HCI_DEV_ID)?;
    set_le_event_filter(&fd)?;

    let cmd_fd = open_hci_socket(HCI_DEV_ID)?;
    enable_le_scan(&cmd_fd)?;

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    tokio::spawn(async move {
        let _cmd_fd = cmd_fd;
        let mut buf = [0u8; MAX_EVENT_LEN];

        loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("HCI socket closed: {e}");
                    break;
                }
            };

            // Drain all queued events before waiting again
            loop {
                let n = match guard.try_io(|inner| read_event(inner.get_ref(), &mut buf)) {
                    Ok(Ok(n)) if n >= EVENT_HEADER_LEN => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(e)) => {
                        trace!("HCI read failed: {e}");
                        break;
                    }
                    Err(_would_block) => break,
                };

                if let Some(packet) = parse_advertising_report(&buf[..n]) {
                    listeners.dispatch(&packet);
                }
            }
        }
    });

    Ok(())
}
