//! Shared fixtures for the FTL integration tests
//!
//! [`LoopbackIngest`] stands in for an ingest server on 127.0.0.1: it
//! receives the session's RTP packets and can send NACKs back.

use ftl::{AudioCodec, SessionParams, VideoCodec};
use ftl_io::MediaSocket;
use ftl_protocol::feedback::{NackEntry, NackReport};
use ftl_protocol::packet::{RtpPacket, MAX_PACKET_BUFFER};
use ftl_protocol::sequence::SeqNumber;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

/// Channel id used by the fixtures; audio SSRC = id, video SSRC = id + 1
pub const CHANNEL_ID: u32 = 4242;

pub const AUDIO_SSRC: u32 = CHANNEL_ID;
pub const VIDEO_SSRC: u32 = CHANNEL_ID + 1;

/// A received datagram
#[derive(Debug, Clone)]
pub struct Received {
    pub bytes: Vec<u8>,
    pub from: SocketAddr,
}

impl Received {
    pub fn rtp(&self) -> RtpPacket<'_> {
        RtpPacket::parse(&self.bytes).expect("valid RTP packet")
    }
}

pub struct LoopbackIngest {
    socket: MediaSocket,
}

impl LoopbackIngest {
    pub fn bind() -> Self {
        let socket = MediaSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .expect("bind loopback ingest");
        socket
            .set_read_timeout(Duration::from_millis(20))
            .expect("set read timeout");
        LoopbackIngest { socket }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().expect("local addr").port()
    }

    /// Session parameters pointing at this ingest
    pub fn params(&self, video_kbps: u32) -> SessionParams {
        SessionParams {
            ingest_ip: Ipv4Addr::LOCALHOST.into(),
            media_port: self.port(),
            channel_id: CHANNEL_ID,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Opus,
            video_kbps,
            frame_rate: 30.0,
        }
    }

    /// Next datagram, or `None` once `timeout` passes without one
    pub fn recv(&self, timeout: Duration) -> Option<Received> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_PACKET_BUFFER];
        while Instant::now() < deadline {
            if let Ok((len, from)) = self.socket.recv_from(&mut buf) {
                return Some(Received {
                    bytes: buf[..len].to_vec(),
                    from,
                });
            }
        }
        None
    }

    /// Receive exactly `count` datagrams within `timeout`
    pub fn recv_many(&self, count: usize, timeout: Duration) -> Vec<Received> {
        let deadline = Instant::now() + timeout;
        let mut packets = Vec::with_capacity(count);
        while packets.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.recv(remaining) {
                Some(packet) => packets.push(packet),
                None => break,
            }
        }
        packets
    }

    /// Send a generic NACK for `lost` on stream `media_ssrc` to `to`
    pub fn send_nack(&self, to: SocketAddr, media_ssrc: u32, lost: &[u16]) {
        let sequences: Vec<SeqNumber> = lost.iter().copied().map(SeqNumber::new).collect();
        let report = NackReport::new(0, media_ssrc, NackEntry::pack(&sequences));
        self.socket
            .send_to(&report.to_bytes(), to)
            .expect("send NACK");
    }

    pub fn send_raw(&self, to: SocketAddr, datagram: &[u8]) {
        self.socket.send_to(datagram, to).expect("send datagram");
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// H.264 NAL of the given type and total length
pub fn nal(nal_type: u8, len: usize) -> Vec<u8> {
    let mut unit = Vec::with_capacity(len);
    unit.push(0x60 | (nal_type & 0x1F));
    unit.extend((1..len).map(|i| (i % 251) as u8));
    unit
}
