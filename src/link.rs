//! Link Layer Adapter.
//!
//! Opens the raw L2CAP socket bound to the fixed Attribute Protocol channel (CID `0x0004`)
//! and exposes it as an [`tokio::io::AsyncRead`] + [`tokio::io::AsyncWrite`] stream the
//! transport engine can drive directly. Every ATT PDU this crate sends or receives crosses
//! exactly one such socket per connected peer.

use crate::{
    addr::{Address, AddressType},
    error::Error,
    sock::{self, OwnedFd, SysSockAddr},
    sys::{self, bdaddr_t, sockaddr_l2},
};
use futures::ready;
use libc::{AF_BLUETOOTH, EAGAIN, EINPROGRESS, SOCK_SEQPACKET, SOL_BLUETOOTH, SOL_SOCKET, SO_ERROR};
use std::{
    io::{Error as IoError, ErrorKind as IoErrKind, Result as IoResult},
    os::unix::io::AsRawFd,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{unix::AsyncFd, AsyncRead, AsyncWrite, ReadBuf};

/// The link-layer security level applied to a bearer before connecting, via `BT_SECURITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl SecurityLevel {
    fn as_level(self) -> u8 {
        match self {
            Self::Low => sys::BT_SECURITY_LOW as u8,
            Self::Medium => sys::BT_SECURITY_MEDIUM as u8,
            Self::High => sys::BT_SECURITY_HIGH as u8,
        }
    }
}

/// An L2CAP socket address: a peer's Bluetooth address, its address type, and the channel —
/// either the fixed ATT CID (`psm == 0`) or a dynamic Connection-oriented Channel identified
/// by `psm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capAddr {
    pub addr: Address,
    pub addr_type: AddressType,
    pub cid: u16,
    pub psm: u16,
}

impl SysSockAddr for L2capAddr {
    type SysSockAddr = sockaddr_l2;

    fn into_sys_sock_addr(self) -> sockaddr_l2 {
        sockaddr_l2 {
            l2_family: AF_BLUETOOTH as _,
            l2_psm: self.psm,
            l2_bdaddr: bdaddr_t { b: self.addr.0 },
            l2_cid: self.cid,
            l2_bdaddr_type: match self.addr_type {
                AddressType::BrEdr => sys::BDADDR_BREDR,
                AddressType::LePublic => sys::BDADDR_LE_PUBLIC,
                AddressType::LeRandom => sys::BDADDR_LE_RANDOM,
            },
        }
    }

    fn try_from_sys_sock_addr(addr: sockaddr_l2) -> IoResult<Self> {
        let addr_type = match addr.l2_bdaddr_type {
            sys::BDADDR_LE_RANDOM => AddressType::LeRandom,
            sys::BDADDR_BREDR => AddressType::BrEdr,
            _ => AddressType::LePublic,
        };
        Ok(Self { addr: Address::new(addr.l2_bdaddr.b), addr_type, cid: addr.l2_cid, psm: addr.l2_psm })
    }
}

/// A connected L2CAP socket bound to the ATT fixed channel.
///
/// Implements [`AsyncRead`]/[`AsyncWrite`] so it can be handed directly to
/// [`crate::transport::Transport::run`]. Each successful read yields exactly one ATT PDU:
/// the ATT fixed channel is message-oriented (`SOCK_SEQPACKET`), so datagram boundaries are
/// preserved by the kernel.
pub struct AttSocket {
    fd: AsyncFd<OwnedFd>,
}

impl AttSocket {
    /// Opens an L2CAP socket and connects it to `peer`, either on the fixed ATT channel
    /// (`psm == 0`) or a dynamic Connection-oriented Channel (`psm != 0`).
    ///
    /// `local` identifies the local adapter to bind through (use [`Address::any`] to let the
    /// kernel pick the default adapter). `security` is applied via `BT_SECURITY` before the
    /// kernel attempts the connection.
    pub async fn connect(
        local: Address,
        local_type: AddressType,
        peer: Address,
        peer_type: AddressType,
        security: SecurityLevel,
        psm: u16,
    ) -> Result<Self, Error> {
        let cid = if psm == 0 { sys::ATT_CID } else { 0 };

        let owned = sock::socket(AF_BLUETOOTH, SOCK_SEQPACKET, sys::BTPROTO_L2CAP)?;
        sock::bind(&owned, L2capAddr { addr: local, addr_type: local_type, cid, psm: 0 })?;

        let bts = sys::bt_security { level: security.as_level(), key_size: 0 };
        sock::setsockopt(&owned, SOL_BLUETOOTH, sys::BT_SECURITY, &bts)?;

        let fd = AsyncFd::new(owned)?;

        let target = L2capAddr { addr: peer, addr_type: peer_type, cid, psm };
        match sock::connect(fd.get_ref(), target) {
            Ok(()) => {}
            Err(err) if matches!(err.raw_os_error(), Some(EINPROGRESS) | Some(EAGAIN)) => loop {
                let mut guard = fd.writable().await?;
                let result = guard.try_io(|inner| {
                    let errno: libc::c_int = sock::getsockopt(inner.get_ref(), SOL_SOCKET, SO_ERROR)?;
                    match errno {
                        0 => Ok(()),
                        EINPROGRESS | EAGAIN => Err(IoErrKind::WouldBlock.into()),
                        _ => Err(IoError::from_raw_os_error(errno)),
                    }
                });
                match result {
                    Ok(inner) => {
                        inner?;
                        break;
                    }
                    Err(_would_block) => continue,
                }
            },
            Err(err) => return Err(err.into()),
        }

        Ok(Self { fd })
    }

    fn poll_read_priv(&self, cx: &mut Context, buf: &mut ReadBuf) -> Poll<IoResult<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            match guard.try_io(|inner| sock::recv(inner.get_ref(), buf, 0)) {
                Ok(result) => return Poll::Ready(result.map(|_| ())),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_write_priv(&self, cx: &mut Context, buf: &[u8]) -> Poll<IoResult<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|inner| sock::send(inner.get_ref(), buf, 0)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncRead for AttSocket {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context, buf: &mut ReadBuf) -> Poll<IoResult<()>> {
        self.poll_read_priv(cx, buf)
    }
}

impl AsyncWrite for AttSocket {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<IoResult<usize>> {
        self.poll_write_priv(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<IoResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<IoResult<()>> {
        sock::shutdown(self.fd.get_ref(), libc::SHUT_RDWR)?;
        Poll::Ready(Ok(()))
    }
}

impl AsRawFd for AttSocket {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}
