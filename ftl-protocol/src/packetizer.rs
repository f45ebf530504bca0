//! RTP Packetizers
//!
//! Turns encoded media into wire packets, one packet per call, writing
//! directly into a caller-supplied buffer (normally a retransmission ring
//! slot). Callers loop on the returned `consumed` count until the input is
//! exhausted.
//!
//! Audio frames always travel in a single packet with the marker bit set.
//! H.264 NAL units are sent whole when they fit the MTU and are otherwise
//! split into FU-A fragments (RFC 6184 §5.8):
//!
//! ```text
//!  FU indicator        FU header
//! +-+-+-+-+-+-+-+-+   +-+-+-+-+-+-+-+-+
//! |F|NRI|  Type=28|   |S|E|R|  Type   |
//! +-+-+-+-+-+-+-+-+   +-+-+-+-+-+-+-+-+
//! ```

use crate::packet::{
    PacketError, RtpHeader, FU_A_HEADER_LEN, MAX_PACKET_BUFFER, RTP_HEADER_LEN,
};
use crate::sequence::SeqNumber;
use bytes::Bytes;

/// NAL unit type of an FU-A fragment
pub const FU_A_NAL_TYPE: u8 = 28;

/// NAL unit type of a sequence parameter set
pub const NAL_TYPE_SPS: u8 = 7;

/// Forbidden-zero bit and NRI of a NAL header
const NAL_HIGH_BITS_MASK: u8 = 0xE0;

/// Type field of a NAL header
const NAL_TYPE_MASK: u8 = 0x1F;

const FU_START_BIT: u8 = 0x80;
const FU_END_BIT: u8 = 0x40;

/// Smallest MTU that leaves room for one payload byte after both headers
pub const MIN_MTU: usize = RTP_HEADER_LEN + FU_A_HEADER_LEN + 1;

/// Get the H.264 NAL unit type from the first byte of a NAL
#[inline]
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & NAL_TYPE_MASK)
}

/// Per-stream RTP clock and numbering state
#[derive(Debug, Clone)]
pub struct RtpStreamState {
    /// Synchronization source, fixed for the stream lifetime
    pub ssrc: u32,
    /// Payload type, fixed per stream kind
    pub payload_type: u8,
    /// Next sequence number to assign
    pub next_sequence: SeqNumber,
    /// Current media timestamp
    pub timestamp: u32,
    /// Timestamp increment per frame (video) or packet (audio)
    pub timestamp_step: u32,
}

impl RtpStreamState {
    pub fn new(ssrc: u32, payload_type: u8, timestamp_step: u32) -> Self {
        RtpStreamState {
            ssrc,
            payload_type,
            next_sequence: SeqNumber::new(0),
            timestamp: 0,
            timestamp_step,
        }
    }

    /// Write a header for the next sequence number and post-increment it
    fn write_header(&mut self, marker: bool, out: &mut [u8]) -> Result<SeqNumber, PacketError> {
        let sequence = self.next_sequence;
        RtpHeader {
            marker,
            payload_type: self.payload_type,
            sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
        }
        .write_to(out)?;
        self.next_sequence.increment();
        Ok(sequence)
    }

    /// Advance the media clock by one step
    #[inline]
    pub fn advance_timestamp(&mut self) {
        self.timestamp = self.timestamp.wrapping_add(self.timestamp_step);
    }
}

/// Position of a packet within its NAL unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    /// Whole NAL in one packet, no FU header
    Single,
    /// First FU-A fragment (S bit)
    Start,
    /// Neither first nor last fragment
    Middle,
    /// Last FU-A fragment (E bit)
    End,
}

/// Result of building one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packetized {
    /// Sequence number written into the packet
    pub sequence: SeqNumber,
    /// Input bytes consumed by this packet
    pub consumed: usize,
    /// Total packet length (header included)
    pub len: usize,
    /// Whether the RTP marker bit was set
    pub marker: bool,
    /// Fragment position (always `Single` for audio)
    pub fragment: Fragment,
}

/// Audio packetizer: one complete frame per packet
#[derive(Debug, Clone)]
pub struct AudioPacketizer {
    state: RtpStreamState,
}

impl AudioPacketizer {
    pub fn new(state: RtpStreamState) -> Self {
        AudioPacketizer { state }
    }

    pub fn state(&self) -> &RtpStreamState {
        &self.state
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence(&self) -> SeqNumber {
        self.state.next_sequence
    }

    /// Build one packet carrying the whole of `input`
    pub fn packetize(&mut self, input: &[u8], out: &mut [u8]) -> Result<Packetized, PacketError> {
        let len = RTP_HEADER_LEN + input.len();
        if len > out.len() {
            return Err(PacketError::PayloadTooLarge {
                size: input.len(),
                max: out.len().saturating_sub(RTP_HEADER_LEN),
            });
        }

        let sequence = self.state.write_header(true, out)?;
        out[RTP_HEADER_LEN..len].copy_from_slice(input);
        self.state.advance_timestamp();

        Ok(Packetized {
            sequence,
            consumed: input.len(),
            len,
            marker: true,
            fragment: Fragment::Single,
        })
    }
}

/// H.264 video packetizer with FU-A fragmentation
#[derive(Debug, Clone)]
pub struct VideoPacketizer {
    state: RtpStreamState,
    mtu: usize,
    /// NAL header of the unit currently being fragmented
    fu_nal_header: u8,
}

impl VideoPacketizer {
    /// Create a packetizer for the given path MTU
    pub fn new(state: RtpStreamState, mtu: usize) -> Result<Self, PacketError> {
        if !(MIN_MTU..=MAX_PACKET_BUFFER).contains(&mtu) {
            return Err(PacketError::InvalidMtu {
                mtu,
                min: MIN_MTU,
                max: MAX_PACKET_BUFFER,
            });
        }

        Ok(VideoPacketizer {
            state,
            mtu,
            fu_nal_header: 0,
        })
    }

    pub fn state(&self) -> &RtpStreamState {
        &self.state
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence(&self) -> SeqNumber {
        self.state.next_sequence
    }

    /// Largest FU-A payload per packet
    #[inline]
    pub fn max_fragment_len(&self) -> usize {
        self.mtu - RTP_HEADER_LEN - FU_A_HEADER_LEN
    }

    /// Account for a frame that was dropped instead of sent
    pub fn skip_frame(&mut self) {
        self.state.advance_timestamp();
    }

    /// Build one packet from the remaining bytes of a NAL unit
    ///
    /// `first` marks the first call for a NAL. The marker bit is set (and the
    /// timestamp advanced) only on the packet that consumes the last byte of
    /// the NAL when `end_of_frame` is true.
    pub fn packetize(
        &mut self,
        input: &[u8],
        first: bool,
        end_of_frame: bool,
        out: &mut [u8],
    ) -> Result<Packetized, PacketError> {
        if input.is_empty() {
            return Err(PacketError::InsufficientData {
                expected: 1,
                actual: 0,
            });
        }
        if out.len() < self.mtu {
            return Err(PacketError::BufferTooSmall {
                needed: self.mtu,
                available: out.len(),
            });
        }

        if first && RTP_HEADER_LEN + input.len() <= self.mtu {
            let len = RTP_HEADER_LEN + input.len();
            let sequence = self.state.write_header(end_of_frame, out)?;
            out[RTP_HEADER_LEN..len].copy_from_slice(input);
            if end_of_frame {
                self.state.advance_timestamp();
            }

            return Ok(Packetized {
                sequence,
                consumed: input.len(),
                len,
                marker: end_of_frame,
                fragment: Fragment::Single,
            });
        }

        let payload = if first {
            self.fu_nal_header = input[0];
            &input[1..]
        } else {
            input
        };

        let frag_len = payload.len().min(self.max_fragment_len());
        let last = frag_len == payload.len();
        let marker = last && end_of_frame;

        let sequence = self.state.write_header(marker, out)?;

        let mut fu_header = self.fu_nal_header & NAL_TYPE_MASK;
        if first {
            fu_header |= FU_START_BIT;
        }
        if last {
            fu_header |= FU_END_BIT;
        }
        out[RTP_HEADER_LEN] = (self.fu_nal_header & NAL_HIGH_BITS_MASK) | FU_A_NAL_TYPE;
        out[RTP_HEADER_LEN + 1] = fu_header;

        let start = RTP_HEADER_LEN + FU_A_HEADER_LEN;
        out[start..start + frag_len].copy_from_slice(&payload[..frag_len]);

        if marker {
            self.state.advance_timestamp();
        }

        let fragment = match (first, last) {
            (true, _) => Fragment::Start,
            (false, true) => Fragment::End,
            (false, false) => Fragment::Middle,
        };

        Ok(Packetized {
            sequence,
            consumed: frag_len + usize::from(first),
            len: start + frag_len,
            marker,
            fragment,
        })
    }

    /// Packetize a whole NAL unit into freshly allocated packets
    pub fn packetize_nal(&mut self, nal: &[u8], end_of_frame: bool) -> Result<Vec<Bytes>, PacketError> {
        let mut packets = Vec::new();
        let mut scratch = [0u8; MAX_PACKET_BUFFER];
        let mut offset = 0;

        while offset < nal.len() {
            let built = self.packetize(&nal[offset..], offset == 0, end_of_frame, &mut scratch)?;
            packets.push(Bytes::copy_from_slice(&scratch[..built.len]));
            offset += built.consumed;
        }

        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{RtpPacket, VIDEO_PAYLOAD_TYPE};

    fn video(mtu: usize) -> VideoPacketizer {
        VideoPacketizer::new(RtpStreamState::new(0xABCD, VIDEO_PAYLOAD_TYPE, 3000), mtu).unwrap()
    }

    #[test]
    fn test_audio_packet() {
        let mut audio = AudioPacketizer::new(RtpStreamState::new(1, 97, 960));
        let mut out = [0u8; MAX_PACKET_BUFFER];

        let first = audio.packetize(b"opus-frame", &mut out).unwrap();
        assert_eq!(first.consumed, 10);
        assert_eq!(first.len, RTP_HEADER_LEN + 10);
        assert!(first.marker);

        let parsed = RtpPacket::parse(&out[..first.len]).unwrap();
        assert!(parsed.header.marker);
        assert_eq!(parsed.header.timestamp, 0);
        assert_eq!(parsed.payload, b"opus-frame");

        let second = audio.packetize(b"next", &mut out).unwrap();
        assert_eq!(second.sequence, SeqNumber::new(1));
        assert_eq!(RtpHeader::from_bytes(&out).unwrap().timestamp, 960);
    }

    #[test]
    fn test_audio_too_large() {
        let mut audio = AudioPacketizer::new(RtpStreamState::new(1, 97, 960));
        let mut out = [0u8; 64];
        let err = audio.packetize(&[0u8; 60], &mut out).unwrap_err();
        assert_eq!(err, PacketError::PayloadTooLarge { size: 60, max: 52 });
        assert_eq!(audio.next_sequence(), SeqNumber::new(0));
    }

    #[test]
    fn test_single_nal() {
        let mut video = video(1200);
        let mut out = [0u8; MAX_PACKET_BUFFER];
        let nal = [0x65, 1, 2, 3];

        let built = video.packetize(&nal, true, true, &mut out).unwrap();
        assert_eq!(built.fragment, Fragment::Single);
        assert_eq!(built.consumed, 4);
        assert!(built.marker);
        assert_eq!(&out[RTP_HEADER_LEN..built.len], &nal);
        assert_eq!(video.state().timestamp, 3000);
    }

    #[test]
    fn test_single_nal_without_end_of_frame_keeps_timestamp() {
        let mut video = video(1200);
        let mut out = [0u8; MAX_PACKET_BUFFER];

        let built = video.packetize(&[0x67, 0x42], true, false, &mut out).unwrap();
        assert!(!built.marker);
        assert_eq!(video.state().timestamp, 0);
    }

    #[test]
    fn test_fu_a_fragmentation() {
        let mut video = video(1200);
        let mut nal = vec![0x65u8];
        nal.extend((0..2999).map(|i| i as u8));

        let packets = video.packetize_nal(&nal, true).unwrap();
        assert_eq!(packets.len(), 3);

        let payload_lens: Vec<_> = packets
            .iter()
            .map(|p| p.len() - RTP_HEADER_LEN - FU_A_HEADER_LEN)
            .collect();
        assert_eq!(payload_lens, vec![1186, 1186, 627]);

        for (i, packet) in packets.iter().enumerate() {
            let parsed = RtpPacket::parse(packet).unwrap();
            assert_eq!(parsed.header.timestamp, 0);
            assert_eq!(parsed.header.sequence, SeqNumber::new(i as u16));
            assert_eq!(parsed.payload[0], 0x60 | FU_A_NAL_TYPE);
            assert_eq!(parsed.payload[1] & NAL_TYPE_MASK, 5);
        }

        assert_eq!(packets[0][RTP_HEADER_LEN + 1] & 0xC0, FU_START_BIT);
        assert_eq!(packets[1][RTP_HEADER_LEN + 1] & 0xC0, 0);
        assert_eq!(packets[2][RTP_HEADER_LEN + 1] & 0xC0, FU_END_BIT);
        assert!(RtpPacket::parse(&packets[2]).unwrap().header.marker);
        assert!(!RtpPacket::parse(&packets[1]).unwrap().header.marker);

        assert_eq!(video.state().timestamp, 3000);
    }

    #[test]
    fn test_invalid_mtu() {
        let state = RtpStreamState::new(1, 96, 3000);
        assert!(VideoPacketizer::new(state.clone(), 10).is_err());
        assert!(VideoPacketizer::new(state, MAX_PACKET_BUFFER + 1).is_err());
    }

    #[test]
    fn test_nal_unit_type() {
        assert_eq!(nal_unit_type(&[0x67]), Some(NAL_TYPE_SPS));
        assert_eq!(nal_unit_type(&[0x65]), Some(5));
        assert_eq!(nal_unit_type(&[]), None);
    }
}
