//! Feedback listener thread
//!
//! Receives RTCP from the ingest on the media socket and resends every
//! packet a generic NACK asks for, as long as its ring slot still holds it.

use crate::stream::{MediaStream, StreamStats};
use crate::transport::Transport;
use ftl_io::{Clock, MediaSocket};
use ftl_protocol::buffer::BufferError;
use ftl_protocol::feedback::NackReport;
use ftl_protocol::packet::MAX_PACKET_BUFFER;
use ftl_protocol::sequence::SeqNumber;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub struct FeedbackListener {
    socket: Arc<MediaSocket>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    streams: Vec<Arc<MediaStream>>,
    running: Arc<AtomicBool>,
}

impl FeedbackListener {
    pub fn new(
        socket: Arc<MediaSocket>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        streams: Vec<Arc<MediaStream>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        FeedbackListener {
            socket,
            transport,
            clock,
            streams,
            running,
        }
    }

    /// Thread body; polls the running flag between bounded receives
    pub fn run(self) {
        info!("Feedback listener started");
        let mut buf = [0u8; MAX_PACKET_BUFFER];

        while self.running.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    trace!(len, %from, "Received feedback datagram");
                    self.handle_datagram(&buf[..len]);
                }
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    // ICMP errors surface here on some platforms; keep listening
                    debug!("Feedback receive failed: {}", e);
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }

        info!("Feedback listener stopped");
    }

    /// Process one datagram; returns the number of packets resent
    pub fn handle_datagram(&self, datagram: &[u8]) -> usize {
        let report = match NackReport::parse(datagram) {
            Ok(Some(report)) => report,
            Ok(None) => {
                trace!("Ignoring non-NACK feedback");
                return 0;
            }
            Err(e) => {
                warn!("Malformed feedback: {}", e);
                return 0;
            }
        };

        let Some(stream) = self.streams.iter().find(|s| s.ssrc() == report.media_ssrc) else {
            warn!(ssrc = report.media_ssrc, "NACK for unknown SSRC");
            return 0;
        };

        report
            .lost_sequences()
            .filter(|&sequence| self.resend(stream, sequence))
            .count()
    }

    fn resend(&self, stream: &MediaStream, sequence: SeqNumber) -> bool {
        let stats = stream.stats();
        StreamStats::incr(&stats.nack_requests);

        let mut slot = match stream.ring().slot(sequence) {
            Ok(slot) => slot,
            Err(BufferError::Stale { found, .. }) => {
                StreamStats::incr(&stats.stale_nacks);
                warn!(
                    kind = %stream.kind(),
                    seq = %sequence,
                    ?found,
                    "NACK for packet no longer buffered"
                );
                return false;
            }
            Err(e) => {
                error!(seq = %sequence, "Retransmit lookup failed: {}", e);
                return false;
            }
        };

        match self.transport.send(slot.packet()) {
            Ok(sent) => {
                let now = self.clock.now();
                let delay_ms = slot.age(now).map(|age| age.as_millis() as u64);
                slot.mark_transmitted(now);
                StreamStats::incr(&stats.retransmitted);
                debug!(
                    kind = %stream.kind(),
                    seq = %sequence,
                    len = sent,
                    ?delay_ms,
                    "Retransmitted packet"
                );
                true
            }
            Err(e) => {
                error!(seq = %sequence, "Failed to retransmit packet: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MediaKind;
    use crate::transport::RecordingTransport;
    use ftl_io::ManualClock;
    use ftl_protocol::feedback::NackEntry;
    use std::time::Instant;

    struct Fixture {
        listener: FeedbackListener,
        audio: Arc<MediaStream>,
        video: Arc<MediaStream>,
        transport: Arc<RecordingTransport>,
    }

    fn fixture() -> Fixture {
        let audio = Arc::new(MediaStream::new(MediaKind::Audio, 1000, 97, 8));
        let video = Arc::new(MediaStream::new(MediaKind::Video, 1001, 96, 8));
        let transport = Arc::new(RecordingTransport::default());
        let socket = Arc::new(MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let listener = FeedbackListener::new(
            socket,
            transport.clone(),
            Arc::new(ManualClock::new()),
            vec![audio.clone(), video.clone()],
            Arc::new(AtomicBool::new(true)),
        );
        Fixture {
            listener,
            audio,
            video,
            transport,
        }
    }

    fn store(stream: &MediaStream, seq: u16, tag: u8) {
        let mut guard = stream.ring().acquire(SeqNumber::new(seq)).unwrap();
        guard.buffer_mut()[0] = tag;
        guard.commit(1, Instant::now()).unwrap();
        if stream.kind() == MediaKind::Video {
            stream.ring().advance_cursor();
        }
    }

    fn nack(media_ssrc: u32, pid: u16, blp: u16) -> Vec<u8> {
        NackReport::new(
            0,
            media_ssrc,
            vec![NackEntry {
                pid: SeqNumber::new(pid),
                blp,
            }],
        )
        .to_bytes()
        .to_vec()
    }

    #[test]
    fn test_resends_requested_packets() {
        let f = fixture();
        for seq in 0..4 {
            store(&f.video, seq, 0x10 + seq as u8);
        }

        // 1 and 3
        assert_eq!(f.listener.handle_datagram(&nack(1001, 1, 0b10)), 2);
        let tags: Vec<u8> = f.transport.sent().iter().map(|p| p[0]).collect();
        assert_eq!(tags, vec![0x11, 0x13]);

        let stats = f.video.stats().snapshot();
        assert_eq!(stats.nack_requests, 2);
        assert_eq!(stats.retransmitted, 2);
    }

    #[test]
    fn test_routes_by_ssrc() {
        let f = fixture();
        store(&f.audio, 0, 0xA0);
        store(&f.video, 0, 0xB0);

        assert_eq!(f.listener.handle_datagram(&nack(1000, 0, 0)), 1);
        assert_eq!(f.transport.sent()[0][0], 0xA0);

        assert_eq!(f.listener.handle_datagram(&nack(4242, 0, 0)), 0);
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[test]
    fn test_stale_request_is_noop() {
        let f = fixture();
        // Ring of 8: sequence 9 overwrites slot of sequence 1
        for seq in 0..10 {
            store(&f.audio, seq, seq as u8);
        }

        assert_eq!(f.listener.handle_datagram(&nack(1000, 1, 0)), 0);
        assert!(f.transport.sent().is_empty());
        assert_eq!(f.audio.stats().snapshot().stale_nacks, 1);
    }

    #[test]
    fn test_ignores_garbage() {
        let f = fixture();
        assert_eq!(f.listener.handle_datagram(&[0x81]), 0);
        assert_eq!(f.listener.handle_datagram(&[0x81, 201, 0, 1, 0, 0, 0, 0]), 0);
        assert!(f.transport.sent().is_empty());
    }
}
