//! Video producer
//!
//! Packetizes H.264 NAL units straight into ring slots and wakes the pacer
//! once per queued packet. Until the first SPS arrives (and again after the
//! ring overflowed) everything is dropped, so the ingest never receives a
//! stream it cannot decode.

use crate::stream::{MediaStream, StreamStats};
use crate::status::{StatsReporter, StatusQueue};
use crossbeam::channel::Sender;
use ftl_io::Clock;
use ftl_protocol::buffer::BufferError;
use ftl_protocol::packetizer::{nal_unit_type, VideoPacketizer, NAL_TYPE_SPS};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct VideoSender {
    packetizer: VideoPacketizer,
    stream: Arc<MediaStream>,
    wake: Sender<()>,
    clock: Arc<dyn Clock>,
    status: Arc<StatusQueue>,
    reporter: StatsReporter,
    awaiting_keyframe: bool,
    /// Current frame already counted as dropped
    frame_dropped: bool,
    /// Bytes of the current frame accepted so far
    frame_bytes: usize,
}

impl VideoSender {
    pub fn new(
        packetizer: VideoPacketizer,
        stream: Arc<MediaStream>,
        wake: Sender<()>,
        clock: Arc<dyn Clock>,
        status: Arc<StatusQueue>,
        reporter: StatsReporter,
    ) -> Self {
        VideoSender {
            packetizer,
            stream,
            wake,
            clock,
            status,
            reporter,
            awaiting_keyframe: true,
            frame_dropped: false,
            frame_bytes: 0,
        }
    }

    pub fn awaiting_keyframe(&self) -> bool {
        self.awaiting_keyframe
    }

    pub fn packetizer(&self) -> &VideoPacketizer {
        &self.packetizer
    }

    /// Queue one NAL unit; returns the packet bytes queued for the pacer
    ///
    /// `end_of_frame` marks the last NAL of an access unit.
    pub fn send(&mut self, nal: &[u8], end_of_frame: bool) -> usize {
        let now = self.clock.now();
        let stream = Arc::clone(&self.stream);
        let stats = stream.stats();
        if end_of_frame {
            StreamStats::incr(&stats.frames_received);
        }

        if nal.is_empty() {
            return 0;
        }

        if self.awaiting_keyframe {
            if nal_unit_type(nal) == Some(NAL_TYPE_SPS) {
                info!(ssrc = self.stream.ssrc(), "Keyframe received, resuming video");
                self.awaiting_keyframe = false;
                // Earlier NALs of this frame (AUD, SEI) were gated; the frame is sent after all
                if self.frame_dropped {
                    StreamStats::decr(&stats.frames_dropped);
                    self.frame_dropped = false;
                }
            } else {
                debug!(len = nal.len(), "Waiting for keyframe, dropping NAL");
                self.drop_frame(end_of_frame);
                self.reporter.maybe_report(now, &self.stream, &self.status);
                return 0;
            }
        }

        let queued = match self.queue_nal(nal, end_of_frame, now) {
            Ok(queued) => queued,
            Err(queued) => {
                self.reporter.maybe_report(now, &self.stream, &self.status);
                return queued;
            }
        };

        self.frame_bytes += nal.len();
        if end_of_frame {
            StreamStats::incr(&stats.frames_queued);
            stats.record_frame_size(self.frame_bytes as u64);
            self.reporter.record_frame(self.frame_bytes as u64);
            self.frame_bytes = 0;
            self.frame_dropped = false;
        }

        self.reporter.maybe_report(now, &self.stream, &self.status);
        queued
    }

    /// Packetize into the ring; `Err` carries the bytes queued before giving up
    fn queue_nal(&mut self, nal: &[u8], end_of_frame: bool, now: Instant) -> Result<usize, usize> {
        let stream = Arc::clone(&self.stream);
        let ring = stream.ring();
        let stats = stream.stats();
        let mut offset = 0;
        let mut queued = 0;

        while offset < nal.len() {
            let sequence = self.packetizer.next_sequence();
            let mut guard = match ring.acquire(sequence) {
                Ok(guard) => guard,
                Err(BufferError::Full { pending }) => {
                    warn!(
                        seq = %sequence,
                        pending,
                        "Video ring full, dropping frame until next keyframe"
                    );
                    self.awaiting_keyframe = true;
                    self.drop_frame(end_of_frame);
                    return Err(queued);
                }
                Err(e) => {
                    error!(seq = %sequence, "Failed to acquire video slot: {}", e);
                    return Err(queued);
                }
            };

            let built = match self.packetizer.packetize(
                &nal[offset..],
                offset == 0,
                end_of_frame,
                guard.buffer_mut(),
            ) {
                Ok(built) => built,
                Err(e) => {
                    error!(seq = %sequence, "Failed to packetize video: {}", e);
                    return Err(queued);
                }
            };

            if let Err(e) = guard.commit(built.len, now) {
                error!(seq = %sequence, "Failed to commit video packet: {}", e);
                return Err(queued);
            }

            StreamStats::incr(&stats.packets_queued);
            StreamStats::add(&stats.bytes_queued, built.len as u64);
            // The pacer only ends after the session drops its sender
            let _ = self.wake.send(());

            offset += built.consumed;
            queued += built.len;
        }

        Ok(queued)
    }

    fn drop_frame(&mut self, end_of_frame: bool) {
        if !self.frame_dropped {
            StreamStats::incr(&self.stream.stats().frames_dropped);
            self.frame_dropped = true;
        }
        if end_of_frame {
            self.packetizer.skip_frame();
            self.frame_dropped = false;
            self.frame_bytes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MediaKind;
    use crossbeam::channel::{self, Receiver};
    use ftl_io::ManualClock;
    use ftl_protocol::packet::{RtpPacket, VIDEO_PAYLOAD_TYPE};
    use ftl_protocol::packetizer::RtpStreamState;
    use ftl_protocol::sequence::SeqNumber;
    use std::time::Duration;

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1f];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00];
    const NON_IDR: &[u8] = &[0x41, 0x9a, 0x02];

    fn sender(ring_size: usize, mtu: usize) -> (VideoSender, Receiver<()>, Arc<StatusQueue>) {
        let stream = Arc::new(MediaStream::new(MediaKind::Video, 2, VIDEO_PAYLOAD_TYPE, ring_size));
        let packetizer =
            VideoPacketizer::new(RtpStreamState::new(2, VIDEO_PAYLOAD_TYPE, 3000), mtu).unwrap();
        let (tx, rx) = channel::unbounded();
        let clock = Arc::new(ManualClock::new());
        let status = Arc::new(StatusQueue::new(10));
        let reporter = StatsReporter::new(Duration::from_secs(5), clock.now());
        (
            VideoSender::new(packetizer, stream, tx, clock, status.clone(), reporter),
            rx,
            status,
        )
    }

    #[test]
    fn test_drops_until_sps() {
        let (mut video, wakes, _) = sender(16, 1200);

        assert_eq!(video.send(NON_IDR, true), 0);
        assert!(video.awaiting_keyframe());
        assert_eq!(video.packetizer().state().timestamp, 3000);
        assert_eq!(wakes.len(), 0);

        assert!(video.send(SPS, false) > 0);
        assert!(!video.awaiting_keyframe());
        assert!(video.send(IDR, true) > 0);
        assert_eq!(wakes.len(), 2);

        let stats = video.stream.stats().snapshot();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_queued, 1);
        assert_eq!(video.packetizer().state().timestamp, 6000);
    }

    #[test]
    fn test_queued_packets_carry_frame_timestamp() {
        let (mut video, wakes, _) = sender(16, 1200);
        video.send(SPS, false);
        video.send(IDR, true);

        let ring = video.stream.ring();
        let sps = ring.slot(SeqNumber::new(0)).unwrap();
        let parsed = RtpPacket::parse(sps.packet()).unwrap();
        assert!(!parsed.header.marker);
        assert_eq!(parsed.header.timestamp, 0);
        assert_eq!(parsed.header.ssrc, 2);
        drop(sps);

        let idr = ring.slot(SeqNumber::new(1)).unwrap();
        let parsed = RtpPacket::parse(idr.packet()).unwrap();
        assert!(parsed.header.marker);
        assert_eq!(parsed.header.timestamp, 0);
        assert_eq!(wakes.len(), 2);
    }

    #[test]
    fn test_ring_full_mid_frame() {
        let (mut video, wakes, _) = sender(4, 100);
        video.send(SPS, false);

        // 400 byte NAL needs 5 fragments at MTU 100, only 3 slots remain
        let mut idr = vec![0x65u8];
        idr.extend(std::iter::repeat(0xAB).take(399));
        let queued = video.send(&idr, true);

        assert_eq!(queued, 3 * 100);
        assert_eq!(wakes.len(), 4);
        assert!(video.awaiting_keyframe());
        assert_eq!(video.packetizer().state().timestamp, 3000);
        assert_eq!(video.stream.stats().snapshot().frames_dropped, 1);

        // Still gated: the next non-SPS frame is dropped without another Full
        assert_eq!(video.send(NON_IDR, true), 0);
        assert_eq!(video.stream.stats().snapshot().frames_dropped, 2);
        assert_eq!(video.packetizer().state().timestamp, 6000);
    }

    #[test]
    fn test_undrained_ring_reports_full_on_ninth_packet() {
        let (mut video, wakes, _) = sender(8, 1200);
        assert!(video.send(SPS, false) > 0);
        for _ in 0..7 {
            assert!(video.send(IDR, true) > 0);
        }
        assert_eq!(video.stream.ring().pending(), 8);

        assert_eq!(video.send(IDR, true), 0);
        assert!(video.awaiting_keyframe());
        assert_eq!(video.send(IDR, true), 0);
        assert_eq!(wakes.len(), 8);
        assert_eq!(video.stream.stats().snapshot().frames_dropped, 2);
    }

    #[test]
    fn test_drop_counted_once_per_frame() {
        let (mut video, _, _) = sender(16, 1200);
        video.send(NON_IDR, false);
        video.send(NON_IDR, false);
        video.send(NON_IDR, true);
        assert_eq!(video.stream.stats().snapshot().frames_dropped, 1);
        assert_eq!(video.packetizer().state().timestamp, 3000);
    }

    #[test]
    fn test_sps_after_aud_counts_frame_once() {
        let (mut video, wakes, _) = sender(16, 1200);
        assert_eq!(video.send(&[0x09, 0x10], false), 0);
        assert!(video.send(SPS, false) > 0);
        assert!(video.send(IDR, true) > 0);

        let stats = video.stream.stats().snapshot();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.frames_queued, 1);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(wakes.len(), 2);
    }

    #[test]
    fn test_empty_nal_ignored() {
        let (mut video, wakes, _) = sender(16, 1200);
        assert_eq!(video.send(&[], true), 0);
        assert_eq!(wakes.len(), 0);
        assert!(video.awaiting_keyframe());
    }
}
