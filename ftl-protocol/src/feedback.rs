//! RTCP Generic NACK Feedback
//!
//! The ingest reports lost media packets with transport-layer feedback
//! messages (RFC 4585 §6.2.1):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P| FMT=1   |    PT=205     |            length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  SSRC of packet sender                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  SSRC of media source                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            PID                |             BLP               |  (repeated)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `length` counts 32-bit words minus one. Each PID/BLP pair reports PID as
//! lost plus `PID + i + 1` for every set bit `i` of BLP.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// RTCP packet type for transport-layer feedback
pub const RTCP_PT_RTPFB: u8 = 205;

/// Feedback message type of a generic NACK
pub const FMT_GENERIC_NACK: u8 = 1;

/// Fixed part of a feedback message: common header plus both SSRCs
pub const NACK_HEADER_LEN: usize = 12;

const FMT_MASK: u8 = 0x1F;
const RTCP_VERSION_BITS: u8 = 2 << 6;

/// Feedback parsing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("Feedback packet too small: {0} bytes")]
    TooShort(usize),

    #[error("Declared length {declared} bytes exceeds received {actual} bytes")]
    Truncated { declared: usize, actual: usize },

    #[error("Declared length of {0} words cannot hold a NACK header")]
    InvalidLength(u16),
}

/// One PID/BLP pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackEntry {
    /// Packet ID of the first lost packet
    pub pid: SeqNumber,
    /// Bitmask of following lost packets
    pub blp: u16,
}

impl NackEntry {
    /// Sequence numbers this entry reports lost, in ascending order
    pub fn lost(&self) -> impl Iterator<Item = SeqNumber> + '_ {
        let pid = self.pid;
        let blp = self.blp;
        std::iter::once(pid).chain(
            (0..16u16)
                .filter(move |i| blp & (1 << i) != 0)
                .map(move |i| pid + (i + 1)),
        )
    }

    /// Pack ascending sequence numbers into as few entries as possible
    pub fn pack(sequences: &[SeqNumber]) -> Vec<NackEntry> {
        let mut entries: Vec<NackEntry> = Vec::new();

        for &seq in sequences {
            if let Some(last) = entries.last_mut() {
                let offset = last.pid.forward_distance(seq);
                if (1..=16).contains(&offset) {
                    last.blp |= 1 << (offset - 1);
                    continue;
                }
                if offset == 0 {
                    continue;
                }
            }
            entries.push(NackEntry { pid: seq, blp: 0 });
        }

        entries
    }
}

/// Parsed generic NACK report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackReport {
    /// SSRC of the feedback sender (the ingest)
    pub sender_ssrc: u32,
    /// SSRC of the media stream the losses belong to
    pub media_ssrc: u32,
    /// PID/BLP pairs
    pub entries: Vec<NackEntry>,
}

impl NackReport {
    pub fn new(sender_ssrc: u32, media_ssrc: u32, entries: Vec<NackEntry>) -> Self {
        NackReport {
            sender_ssrc,
            media_ssrc,
            entries,
        }
    }

    /// Parse a datagram
    ///
    /// Returns `Ok(None)` for well-formed feedback of any other kind.
    pub fn parse(datagram: &[u8]) -> Result<Option<Self>, FeedbackError> {
        if datagram.len() < 2 {
            return Err(FeedbackError::TooShort(datagram.len()));
        }

        let fmt = datagram[0] & FMT_MASK;
        let packet_type = datagram[1];
        if fmt != FMT_GENERIC_NACK || packet_type != RTCP_PT_RTPFB {
            return Ok(None);
        }

        if datagram.len() < 4 {
            return Err(FeedbackError::TooShort(datagram.len()));
        }

        let mut buf = &datagram[2..];
        let length = buf.get_u16();
        let declared = (length as usize + 1) * 4;
        if datagram.len() < declared {
            return Err(FeedbackError::Truncated {
                declared,
                actual: datagram.len(),
            });
        }
        if length < 2 {
            return Err(FeedbackError::InvalidLength(length));
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();

        let entries = (0..length - 2)
            .map(|_| NackEntry {
                pid: SeqNumber::new(buf.get_u16()),
                blp: buf.get_u16(),
            })
            .collect();

        Ok(Some(NackReport {
            sender_ssrc,
            media_ssrc,
            entries,
        }))
    }

    /// Serialize to wire format
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NACK_HEADER_LEN + 4 * self.entries.len());
        buf.put_u8(RTCP_VERSION_BITS | FMT_GENERIC_NACK);
        buf.put_u8(RTCP_PT_RTPFB);
        buf.put_u16(2 + self.entries.len() as u16);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for entry in &self.entries {
            buf.put_u16(entry.pid.as_raw());
            buf.put_u16(entry.blp);
        }
        buf.freeze()
    }

    /// Every sequence number the report asks to resend
    pub fn lost_sequences(&self) -> impl Iterator<Item = SeqNumber> + '_ {
        self.entries.iter().flat_map(|entry| entry.lost())
    }
}
