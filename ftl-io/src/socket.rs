//! UDP socket wrapper for the media path
//!
//! One blocking UDP socket per session, shared by the pacer (sending),
//! the audio producer (sending) and the feedback listener (receiving with a
//! bounded timeout so it can notice shutdown).

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Receive timeout must be non-zero")]
    ZeroTimeout,
}

impl SocketError {
    /// Whether a receive gave up because the timeout elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SocketError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        )
    }
}

/// Local address to bind for reaching `destination`
///
/// Loopback destinations bind loopback; anything else binds the unspecified
/// address of the same family. The port is always ephemeral.
pub fn bind_addr_for(destination: IpAddr) -> SocketAddr {
    let ip = match destination {
        IpAddr::V4(v4) if v4.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(v6) if v6.is_loopback() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Blocking UDP socket used for media and feedback
#[derive(Debug)]
pub struct MediaSocket {
    inner: UdpSocket,
}

impl MediaSocket {
    /// Create a socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&addr.into())?;

        Ok(MediaSocket {
            inner: socket.into(),
        })
    }

    /// Create a socket suitable for sending to `destination`
    pub fn for_destination(destination: IpAddr) -> Result<Self, SocketError> {
        Self::bind(bind_addr_for(destination))
    }

    /// Bound receive timeout; `recv_from` fails with a timeout error after it
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), SocketError> {
        if timeout.is_zero() {
            return Err(SocketError::ZeroTimeout);
        }
        self.inner.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_send_buffer_size(size)?;
        Ok(())
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    pub fn send_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).send_buffer_size()?)
    }

    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Bound address, with the ephemeral port filled in
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Send one datagram, returning the number of bytes written
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive one datagram, blocking up to the read timeout
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        Ok(self.inner.recv_from(buf)?)
    }
}
