//! Property-based tests for packetization, feedback and the ring
//!
//! These tests use proptest to check the packetizer's framing rules and the
//! ring's backpressure across arbitrary sizes, MTUs and sequence positions.

use proptest::prelude::*;
use ftl_protocol::buffer::{BufferError, PacingPolicy, RetransmitRing};
use ftl_protocol::feedback::{NackEntry, NackReport};
use ftl_protocol::packet::{RtpPacket, FU_A_HEADER_LEN, MAX_PACKET_BUFFER, RTP_HEADER_LEN};
use ftl_protocol::packetizer::{RtpStreamState, VideoPacketizer, FU_A_NAL_TYPE, MIN_MTU};
use ftl_protocol::sequence::SeqNumber;
use std::time::Instant;

const STEP: u32 = 3000;

// Property test strategies

fn nal_strategy() -> impl Strategy<Value = Vec<u8>> {
    (1u8..=23, prop::collection::vec(any::<u8>(), 0..6000)).prop_map(|(nal_type, body)| {
        let mut nal = vec![0x60 | nal_type];
        nal.extend(body);
        nal
    })
}

fn mtu_strategy() -> impl Strategy<Value = usize> {
    MIN_MTU..=MAX_PACKET_BUFFER
}

fn packetizer(mtu: usize, start_seq: u16, start_ts: u32) -> VideoPacketizer {
    let mut state = RtpStreamState::new(7, 96, STEP);
    state.next_sequence = SeqNumber::new(start_seq);
    state.timestamp = start_ts;
    VideoPacketizer::new(state, mtu).unwrap()
}

/// Rebuild the NAL from its packets
fn depacketize(packets: &[bytes::Bytes]) -> Vec<u8> {
    let first = RtpPacket::parse(&packets[0]).unwrap();
    if packets.len() == 1 && first.payload[0] & 0x1F != FU_A_NAL_TYPE {
        return first.payload.to_vec();
    }

    let indicator = first.payload[0];
    let header = first.payload[1];
    let mut nal = vec![(indicator & 0xE0) | (header & 0x1F)];
    for packet in packets {
        let parsed = RtpPacket::parse(packet).unwrap();
        nal.extend_from_slice(&parsed.payload[FU_A_HEADER_LEN..]);
    }
    nal
}

// Property tests

proptest! {
    #[test]
    fn prop_fragments_reassemble(nal in nal_strategy(), mtu in mtu_strategy()) {
        let mut video = packetizer(mtu, 0, 0);
        let packets = video.packetize_nal(&nal, true).unwrap();

        prop_assert_eq!(depacketize(&packets), nal);
        for packet in &packets {
            prop_assert!(packet.len() <= mtu);
        }
    }

    #[test]
    fn prop_fragment_bits(nal in nal_strategy(), mtu in mtu_strategy(), end_of_frame in any::<bool>()) {
        let mut video = packetizer(mtu, 0, 0);
        let packets = video.packetize_nal(&nal, end_of_frame).unwrap();

        let markers: Vec<bool> = packets
            .iter()
            .map(|p| RtpPacket::parse(p).unwrap().header.marker)
            .collect();
        let last = packets.len() - 1;
        for (i, marker) in markers.iter().enumerate() {
            prop_assert_eq!(*marker, end_of_frame && i == last);
        }

        if RTP_HEADER_LEN + nal.len() <= mtu {
            prop_assert_eq!(packets.len(), 1);
        } else {
            let fu_headers: Vec<u8> = packets.iter().map(|p| p[RTP_HEADER_LEN + 1]).collect();
            prop_assert_eq!(fu_headers.iter().filter(|h| *h & 0x80 != 0).count(), 1);
            prop_assert_eq!(fu_headers.iter().filter(|h| *h & 0x40 != 0).count(), 1);
            prop_assert!(fu_headers[0] & 0x80 != 0);
            prop_assert!(fu_headers[last] & 0x40 != 0);
        }
    }

    #[test]
    fn prop_sequence_and_timestamp(
        nal in nal_strategy(),
        mtu in mtu_strategy(),
        start_seq in any::<u16>(),
        start_ts in any::<u32>(),
        end_of_frame in any::<bool>(),
    ) {
        let mut video = packetizer(mtu, start_seq, start_ts);
        let packets = video.packetize_nal(&nal, end_of_frame).unwrap();

        for (i, packet) in packets.iter().enumerate() {
            let header = RtpPacket::parse(packet).unwrap().header;
            prop_assert_eq!(header.sequence, SeqNumber::new(start_seq.wrapping_add(i as u16)));
            prop_assert_eq!(header.timestamp, start_ts);
        }

        let expected_ts = if end_of_frame { start_ts.wrapping_add(STEP) } else { start_ts };
        prop_assert_eq!(video.state().timestamp, expected_ts);
        prop_assert_eq!(
            video.next_sequence(),
            SeqNumber::new(start_seq.wrapping_add(packets.len() as u16))
        );
    }

    #[test]
    fn prop_nack_pack_covers_losses(start in any::<u16>(), offsets in prop::collection::btree_set(0u16..200, 1..40)) {
        let lost: Vec<SeqNumber> = offsets.iter().map(|&o| SeqNumber::new(start.wrapping_add(o))).collect();
        let entries = NackEntry::pack(&lost);
        prop_assert!(entries.len() <= lost.len());

        let report = NackReport::parse(&NackReport::new(1, 2, entries).to_bytes()).unwrap().unwrap();
        let expanded: Vec<SeqNumber> = report.lost_sequences().collect();
        prop_assert_eq!(expanded, lost);
    }

    #[test]
    fn prop_ring_backpressure(capacity_log in 1u32..8, cursor in any::<u16>(), ahead in 0u16..300) {
        let ring = RetransmitRing::new(1 << capacity_log, PacingPolicy::Paced);
        let capacity = ring.capacity() as u16;

        // Move the cursor without transmitting anything
        for _ in 0..(cursor % 512) {
            ring.advance_cursor();
        }
        let cursor = ring.next_transmit();
        let sequence = cursor + ahead;

        let acquired = ring.acquire(sequence);
        match acquired {
            Ok(mut guard) => {
                prop_assert!(ahead < capacity);
                guard.buffer_mut()[0] = 1;
                guard.commit(1, Instant::now()).unwrap();
                prop_assert!(ring.slot(sequence).is_ok());
            }
            Err(BufferError::Full { pending }) => {
                prop_assert!(ahead >= capacity);
                prop_assert_eq!(pending, ahead as usize);
            }
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        };
    }
}

#[test]
fn test_three_fragment_frame() {
    let mut nal = vec![0x65u8];
    nal.extend(std::iter::repeat(0x5A).take(2999));

    let mut video = packetizer(1200, 100, 9000);
    let packets = video.packetize_nal(&nal, true).unwrap();

    let sizes: Vec<usize> = packets
        .iter()
        .map(|p| p.len() - RTP_HEADER_LEN - FU_A_HEADER_LEN)
        .collect();
    assert_eq!(sizes, vec![1186, 1186, 627]);
    assert_eq!(video.state().timestamp, 9000 + STEP);
    assert_eq!(depacketize(&packets), nal);
}
