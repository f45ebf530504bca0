//! RTP Packet Header and Constants
//!
//! Every media packet starts with the fixed 12-byte RTP header (RFC 3550):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Padding, extensions and CSRC lists are never produced.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut};
use thiserror::Error;

/// Size of the fixed RTP header in bytes
pub const RTP_HEADER_LEN: usize = 12;

/// Size of the FU-A indicator + FU header pair
pub const FU_A_HEADER_LEN: usize = 2;

/// Largest datagram a slot can hold
pub const MAX_PACKET_BUFFER: usize = 1500;

/// Default path MTU used for packetization
pub const DEFAULT_MTU: usize = 1392;

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;

/// Dynamic payload type used for H.264 video
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;

/// Dynamic payload type used for audio
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;

/// Marker bit in the second header byte
const MARKER_BIT: u8 = 0x80;

/// Payload type mask in the second header byte
const PAYLOAD_TYPE_MASK: u8 = 0x7F;

/// Fixed RTP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// End of frame (video) or complete frame (audio)
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number
    pub sequence: SeqNumber,
    /// Media clock timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
}

impl RtpHeader {
    /// Write the header into the start of `out` (network byte order)
    pub fn write_to(&self, out: &mut [u8]) -> Result<(), PacketError> {
        if out.len() < RTP_HEADER_LEN {
            return Err(PacketError::BufferTooSmall {
                needed: RTP_HEADER_LEN,
                available: out.len(),
            });
        }

        let mut buf = &mut out[..RTP_HEADER_LEN];
        buf.put_u8(RTP_VERSION << 6);
        let marker = if self.marker { MARKER_BIT } else { 0 };
        buf.put_u8(marker | (self.payload_type & PAYLOAD_TYPE_MASK));
        buf.put_u16(self.sequence.as_raw());
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        Ok(())
    }

    /// Parse a header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < RTP_HEADER_LEN {
            return Err(PacketError::InsufficientData {
                expected: RTP_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..RTP_HEADER_LEN];
        let first = buf.get_u8();
        let version = first >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::UnsupportedVersion(version));
        }

        let second = buf.get_u8();
        Ok(RtpHeader {
            marker: second & MARKER_BIT != 0,
            payload_type: second & PAYLOAD_TYPE_MASK,
            sequence: SeqNumber::new(buf.get_u16()),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
        })
    }
}

/// Set the marker bit on an already serialized packet
pub fn set_marker(packet: &mut [u8]) {
    if packet.len() > 1 {
        packet[1] |= MARKER_BIT;
    }
}

/// A parsed RTP packet borrowing its payload from the datagram
#[derive(Debug, Clone, Copy)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a datagram as an RTP packet
    pub fn parse(bytes: &'a [u8]) -> Result<Self, PacketError> {
        let header = RtpHeader::from_bytes(bytes)?;
        Ok(RtpPacket {
            header,
            payload: &bytes[RTP_HEADER_LEN..],
        })
    }
}

/// Packet construction and parsing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unsupported RTP version {0}")]
    UnsupportedVersion(u8),

    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid MTU {mtu}: must be between {min} and {max}")]
    InvalidMtu { mtu: usize, min: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = RtpHeader {
            marker: true,
            payload_type: AUDIO_PAYLOAD_TYPE,
            sequence: SeqNumber::new(0x1234),
            timestamp: 0xDEAD_BEEF,
            ssrc: 0x0102_0304,
        };

        let mut buf = [0u8; RTP_HEADER_LEN];
        header.write_to(&mut buf).unwrap();

        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x80 | 97);
        assert_eq!(&buf[2..4], &[0x12, 0x34]);
        assert_eq!(&buf[4..8], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&buf[8..12], &[0x01, 0x02, 0x03, 0x04]);

        assert_eq!(RtpHeader::from_bytes(&buf).unwrap(), header);
    }

    #[test]
    fn test_set_marker() {
        let header = RtpHeader {
            marker: false,
            payload_type: VIDEO_PAYLOAD_TYPE,
            sequence: SeqNumber::new(7),
            timestamp: 3000,
            ssrc: 42,
        };
        let mut buf = [0u8; RTP_HEADER_LEN];
        header.write_to(&mut buf).unwrap();
        assert!(!RtpHeader::from_bytes(&buf).unwrap().marker);

        set_marker(&mut buf);
        let parsed = RtpHeader::from_bytes(&buf).unwrap();
        assert!(parsed.marker);
        assert_eq!(parsed.payload_type, VIDEO_PAYLOAD_TYPE);
    }

    #[test]
    fn test_short_buffers() {
        let header = RtpHeader {
            marker: false,
            payload_type: 96,
            sequence: SeqNumber::new(0),
            timestamp: 0,
            ssrc: 0,
        };
        let mut small = [0u8; 4];
        assert!(matches!(
            header.write_to(&mut small),
            Err(PacketError::BufferTooSmall { needed: 12, available: 4 })
        ));
        assert!(matches!(
            RtpHeader::from_bytes(&small),
            Err(PacketError::InsufficientData { expected: 12, actual: 4 })
        ));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut buf = [0u8; RTP_HEADER_LEN];
        buf[0] = 0x40;
        assert_eq!(
            RtpHeader::from_bytes(&buf),
            Err(PacketError::UnsupportedVersion(1))
        );
    }
}
