//! Raw HCI socket access.
//!
//! The only reason this crate touches HCI directly is `LE Connection Update`: changing the
//! connection interval, peripheral latency or supervision timeout is a link-layer
//! controller command, not an ATT or L2CAP operation, and BlueZ does not expose it through
//! any L2CAP socket option.

use crate::{
    addr::Address,
    error::Error,
    sock::{self, OwnedFd, SysSockAddr},
    sys::{self, bdaddr_t, hci_conn_info, hci_conn_info_req, sockaddr_hci},
};
use libc::AF_BLUETOOTH;
use std::{io::Result as IoResult, os::unix::io::AsRawFd};

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_CONN_UPDATE: u16 = 0x0013;

fn opcode(ogf: u16, ocf: u16) -> u16 {
    (ogf << 10) | ocf
}

/// Validated parameters for an `LE Connection Update` command.
///
/// `0xFFFF` for `interval_min`/`interval_max`/`timeout_10ms` means "no specific value
/// requested", matching the controller's own "don't care" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout_10ms: u16,
}

impl ConnectionParams {
    /// Validates the parameters against the ranges the Bluetooth Core Spec defines for this
    /// command, returning an error rather than letting the controller reject a malformed
    /// request.
    pub fn validate(self) -> Result<Self, Error> {
        let in_range = |v: u16, lo: u16, hi: u16| v == 0xFFFF || (lo..=hi).contains(&v);
        if !in_range(self.interval_min, 0x0006, 0x0C80) {
            return Err(Error::invalid_arg("connection interval_min out of range"));
        }
        if !in_range(self.interval_max, 0x0006, 0x0C80) {
            return Err(Error::invalid_arg("connection interval_max out of range"));
        }
        if self.interval_min != 0xFFFF && self.interval_max != 0xFFFF && self.interval_min > self.interval_max {
            return Err(Error::invalid_arg("interval_min exceeds interval_max"));
        }
        if self.latency > 0x01F3 {
            return Err(Error::invalid_arg("peripheral latency out of range"));
        }
        if !in_range(self.timeout_10ms, 0x000A, 0x0C80) {
            return Err(Error::invalid_arg("supervision timeout out of range"));
        }
        Ok(self)
    }
}

/// An HCI socket address: a controller index and the raw channel to bind.
#[derive(Debug, Clone, Copy)]
struct HciAddr {
    dev_id: u16,
}

impl SysSockAddr for HciAddr {
    type SysSockAddr = sockaddr_hci;

    fn into_sys_sock_addr(self) -> sockaddr_hci {
        sockaddr_hci { hci_family: AF_BLUETOOTH as _, hci_dev: self.dev_id, hci_channel: sys::HCI_CHANNEL_RAW }
    }

    fn try_from_sys_sock_addr(addr: sockaddr_hci) -> IoResult<Self> {
        Ok(Self { dev_id: addr.hci_dev })
    }
}

/// A raw HCI socket, used solely to submit one-shot `LE Connection Update` commands.
pub struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    /// Opens a raw HCI socket bound to controller `dev_id` (as reported by
    /// `hciconfig`/`btmgmt`; `sys::HCI_DEV_NONE` binds to no specific controller).
    pub fn open(dev_id: u16) -> Result<Self, Error> {
        let fd = sock::socket(AF_BLUETOOTH, libc::SOCK_RAW, sys::BTPROTO_HCI)?;
        sock::bind(&fd, HciAddr { dev_id })?;
        Ok(Self { fd })
    }

    /// Looks up the active connection handle for `peer`, as assigned by the controller when
    /// the link was established. Required before [`HciSocket::le_connection_update`], which
    /// addresses connections by handle rather than by Bluetooth address.
    pub fn connection_handle(&self, peer: Address) -> Result<u16, Error> {
        let req = hci_conn_info_req {
            bdaddr: bdaddr_t { b: peer.0 },
            conn_info: hci_conn_info { handle: 0, bdaddr: [0; 6], type_: 0, out: 0, state: 0, link_mode: 0 },
        };
        let result: hci_conn_info_req = sock::ioctl_read_write(&self.fd, sys::HCIGETCONNINFO, req)?;
        Ok(result.conn_info.handle)
    }

    /// Issues `LE Connection Update` for `conn_handle`.
    ///
    /// This only waits for the command to be written to the controller, not for the
    /// resulting `LE Connection Update Complete` event; this crate does not currently parse
    /// HCI events off this socket.
    pub fn le_connection_update(&self, conn_handle: u16, params: ConnectionParams) -> Result<(), Error> {
        let params = params.validate()?;
        let mut pdu = Vec::with_capacity(18);
        pdu.push(0x01); // HCI_COMMAND_PKT
        pdu.extend_from_slice(&opcode(OGF_LE_CTL, OCF_LE_CONN_UPDATE).to_le_bytes());
        pdu.push(14); // parameter total length
        pdu.extend_from_slice(&conn_handle.to_le_bytes());
        pdu.extend_from_slice(&params.interval_min.to_le_bytes());
        pdu.extend_from_slice(&params.interval_max.to_le_bytes());
        pdu.extend_from_slice(&params.latency.to_le_bytes());
        pdu.extend_from_slice(&params.timeout_10ms.to_le_bytes());
        pdu.extend_from_slice(&0u16.to_le_bytes()); // Min_CE_Length
        pdu.extend_from_slice(&0u16.to_le_bytes()); // Max_CE_Length

        match unsafe { libc::write(self.fd.as_raw_fd(), pdu.as_ptr() as *const _, pdu.len()) } {
            -1 => Err(std::io::Error::last_os_error().into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_interval() {
        let params = ConnectionParams { interval_min: 0x0001, interval_max: 0x0010, latency: 0, timeout_10ms: 100 };
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_min_above_max() {
        let params = ConnectionParams { interval_min: 0x0100, interval_max: 0x0050, latency: 0, timeout_10ms: 100 };
        assert!(params.validate().is_err());
    }

    #[test]
    fn accepts_dont_care_sentinels() {
        let params = ConnectionParams { interval_min: 0xFFFF, interval_max: 0xFFFF, latency: 0, timeout_10ms: 100 };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn rejects_excessive_latency() {
        let params = ConnectionParams { interval_min: 0x0010, interval_max: 0x0020, latency: 0x0200, timeout_10ms: 100 };
        assert!(params.validate().is_err());
    }
}
