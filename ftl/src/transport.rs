//! Packet transport
//!
//! The pacer, the audio producer and the feedback listener all write through
//! one [`Transport`]. The UDP implementation serializes `send_to` calls
//! behind a session-wide lock.

use ftl_io::{MediaSocket, SocketError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

/// Destination for serialized media packets
pub trait Transport: Send + Sync {
    /// Send one packet, returning the number of bytes written
    fn send(&self, packet: &[u8]) -> Result<usize, SocketError>;

    /// Where packets go
    fn destination(&self) -> SocketAddr;
}

/// UDP transport to the ingest
pub struct UdpTransport {
    socket: Arc<MediaSocket>,
    destination: SocketAddr,
    send_lock: Mutex<()>,
}

impl UdpTransport {
    pub fn new(socket: Arc<MediaSocket>, destination: SocketAddr) -> Self {
        UdpTransport {
            socket,
            destination,
            send_lock: Mutex::new(()),
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, packet: &[u8]) -> Result<usize, SocketError> {
        let _guard = self.send_lock.lock();
        self.socket.send_to(packet, self.destination)
    }

    fn destination(&self) -> SocketAddr {
        self.destination
    }
}

/// Transport that records packets instead of sending them
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub packets: Mutex<Vec<Vec<u8>>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.packets.lock().clone()
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    fn send(&self, packet: &[u8]) -> Result<usize, SocketError> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(SocketError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "send failed",
            )));
        }
        self.packets.lock().push(packet.to_vec());
        Ok(packet.len())
    }

    fn destination(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_udp_transport_sends_to_destination() {
        let receiver = MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        receiver.set_read_timeout(Duration::from_secs(2)).unwrap();
        let socket = Arc::new(MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap());

        let transport = UdpTransport::new(socket, receiver.local_addr().unwrap());
        assert_eq!(transport.destination(), receiver.local_addr().unwrap());
        assert_eq!(transport.send(b"packet").unwrap(), 6);

        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"packet");
    }
}
