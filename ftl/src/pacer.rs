//! Video pacing thread
//!
//! The video producer posts one wake per queued packet. For every wake the
//! pacer waits until the leaky bucket has a positive balance, then sends the
//! packet at the transmit cursor and moves the cursor on. One packet per
//! wake keeps the cursor in lockstep with the producer's queue head.

use crate::stream::{MediaStream, StreamStats};
use crate::transport::Transport;
use crossbeam::channel::Receiver;
use ftl_io::{Clock, LeakyBucket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Pacer {
    stream: Arc<MediaStream>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    bucket: LeakyBucket,
    wake: Receiver<()>,
    running: Arc<AtomicBool>,
}

impl Pacer {
    pub fn new(
        stream: Arc<MediaStream>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        kbps: u32,
        max_burst_ms: u32,
        wake: Receiver<()>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let bucket = LeakyBucket::new(kbps, max_burst_ms, clock.now());
        Pacer {
            stream,
            transport,
            clock,
            bucket,
            wake,
            running,
        }
    }

    pub fn bucket(&self) -> &LeakyBucket {
        &self.bucket
    }

    /// Thread body; returns once the running flag is cleared and a wake arrives
    pub fn run(mut self) {
        info!(
            ssrc = self.stream.ssrc(),
            bytes_per_ms = self.bucket.bytes_per_ms(),
            "Pacer started"
        );

        while self.wake.recv().is_ok() {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            self.service_wake();
        }

        info!(pending = self.stream.ring().pending(), "Pacer stopped");
    }

    /// Wait for budget, then send one packet
    pub fn service_wake(&mut self) -> Option<usize> {
        loop {
            if !self.bucket.has_tokens() {
                self.clock.sleep(self.bucket.time_until_positive());
            }
            self.bucket.refill(self.clock.now());

            if self.bucket.has_tokens() {
                return self.transmit_next();
            }
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
        }
    }

    /// Send the packet at the transmit cursor, if one is queued
    ///
    /// Returns the packet length charged against the bucket.
    pub fn transmit_next(&mut self) -> Option<usize> {
        let ring = self.stream.ring();
        if ring.pending() == 0 {
            return None;
        }

        let sequence = ring.next_transmit();
        let charged = match ring.slot(sequence) {
            Ok(mut slot) => {
                let len = slot.len();
                match self.transport.send(slot.packet()) {
                    Ok(sent) => {
                        let stats = self.stream.stats();
                        StreamStats::incr(&stats.packets_sent);
                        StreamStats::add(&stats.bytes_sent, sent as u64);
                        debug!(seq = %sequence, len, "Sent video packet");
                    }
                    Err(e) => error!(seq = %sequence, "Failed to send video packet: {}", e),
                }
                slot.mark_transmitted(self.clock.now());
                self.bucket.consume(len);
                Some(len)
            }
            Err(e) => {
                warn!(seq = %sequence, "Skipping unsendable slot: {}", e);
                None
            }
        };

        ring.advance_cursor();
        charged
    }
}
