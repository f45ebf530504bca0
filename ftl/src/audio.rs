//! Audio producer
//!
//! Audio is small and latency sensitive, so it skips the pacer: each frame
//! is built in its ring slot and sent inline while the slot is still held.

use crate::status::{StatsReporter, StatusQueue};
use crate::stream::{MediaStream, StreamStats};
use crate::transport::Transport;
use ftl_io::Clock;
use ftl_protocol::packetizer::AudioPacketizer;
use std::sync::Arc;
use tracing::{debug, error};

pub struct AudioSender {
    packetizer: AudioPacketizer,
    stream: Arc<MediaStream>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    status: Arc<StatusQueue>,
    reporter: StatsReporter,
}

impl AudioSender {
    pub fn new(
        packetizer: AudioPacketizer,
        stream: Arc<MediaStream>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        status: Arc<StatusQueue>,
        reporter: StatsReporter,
    ) -> Self {
        AudioSender {
            packetizer,
            stream,
            transport,
            clock,
            status,
            reporter,
        }
    }

    pub fn packetizer(&self) -> &AudioPacketizer {
        &self.packetizer
    }

    /// Send one audio frame; returns the bytes written to the socket
    pub fn send(&mut self, frame: &[u8]) -> usize {
        let now = self.clock.now();
        let sent = self.send_frame(frame, now);
        self.reporter.maybe_report(now, &self.stream, &self.status);
        sent
    }

    fn send_frame(&mut self, frame: &[u8], now: std::time::Instant) -> usize {
        let stream = Arc::clone(&self.stream);
        let stats = stream.stats();
        StreamStats::incr(&stats.frames_received);

        let sequence = self.packetizer.next_sequence();
        let mut guard = match stream.ring().acquire(sequence) {
            Ok(guard) => guard,
            Err(e) => {
                error!(seq = %sequence, "Failed to acquire audio slot: {}", e);
                return 0;
            }
        };

        let built = match self.packetizer.packetize(frame, guard.buffer_mut()) {
            Ok(built) => built,
            Err(e) => {
                error!(seq = %sequence, len = frame.len(), "Failed to packetize audio: {}", e);
                return 0;
            }
        };

        let mut slot = match guard.commit_held(built.len, now) {
            Ok(slot) => slot,
            Err(e) => {
                error!(seq = %sequence, "Failed to commit audio packet: {}", e);
                return 0;
            }
        };
        StreamStats::incr(&stats.frames_queued);
        StreamStats::incr(&stats.packets_queued);
        StreamStats::add(&stats.bytes_queued, built.len as u64);

        match self.transport.send(slot.packet()) {
            Ok(sent) => {
                slot.mark_transmitted(now);
                StreamStats::incr(&stats.packets_sent);
                StreamStats::add(&stats.bytes_sent, sent as u64);
                debug!(seq = %sequence, len = sent, "Sent audio packet");
                sent
            }
            Err(e) => {
                error!(seq = %sequence, "Failed to send audio packet: {}", e);
                0
            }
        }
    }
}
