//! Status queue
//!
//! Bounded FIFO of events and periodic statistics for the application.
//! Producers never block: pushing into a full queue discards the oldest
//! message.

use crate::stream::{MediaKind, MediaStream, StreamStatsSnapshot};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use ftl_io::Timer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReason {
    None,
    /// The application asked for the session to end
    ApiRequest,
}

/// Video throughput over one reporting period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoStats {
    pub period: Duration,
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub average_fps: f32,
    pub max_frame_size: u64,
}

/// Packet and retransmission counters for one stream over one period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketStats {
    pub stream: MediaKind,
    pub period: Duration,
    pub sent: u64,
    pub nack_requests: u64,
    pub retransmitted: u64,
    pub stale: u64,
    pub average_pps: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusMessage {
    Event { kind: EventKind, reason: EventReason },
    VideoStats(VideoStats),
    PacketStats(PacketStats),
}

/// Bounded drop-oldest message queue
pub struct StatusQueue {
    tx: Sender<StatusMessage>,
    rx: Receiver<StatusMessage>,
    dropped: AtomicU64,
}

impl StatusQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity.max(1));
        StatusQueue {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a message, discarding the oldest one if the queue is full
    pub fn push(&self, message: StatusMessage) {
        let mut message = message;
        loop {
            match self.tx.try_send(message) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Status queue full, dropped oldest message");
                    }
                    message = rejected;
                }
                // Both ends live in this struct
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Take the oldest message, waiting up to `timeout`
    pub fn pop(&self, timeout: Duration) -> Option<StatusMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<StatusMessage> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Messages discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Periodic per-stream stats reporting, driven by the stream's producer
pub struct StatsReporter {
    timer: Timer,
    last: StreamStatsSnapshot,
    max_frame_size: u64,
}

impl StatsReporter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        StatsReporter {
            timer: Timer::new(interval, now),
            last: StreamStatsSnapshot::default(),
            max_frame_size: 0,
        }
    }

    /// Track the largest frame of the current period
    pub fn record_frame(&mut self, size: u64) {
        self.max_frame_size = self.max_frame_size.max(size);
    }

    /// Push the period's stats if the interval elapsed; returns whether it did
    pub fn maybe_report(&mut self, now: Instant, stream: &MediaStream, queue: &StatusQueue) -> bool {
        let Some(period) = self.timer.try_fire(now) else {
            return false;
        };

        let current = stream.stats().snapshot();
        let delta = current.since(&self.last);
        self.last = current;
        let seconds = period.as_secs_f32().max(f32::EPSILON);

        if stream.kind() == MediaKind::Video {
            queue.push(StatusMessage::VideoStats(VideoStats {
                period,
                frames_queued: delta.frames_queued,
                frames_dropped: delta.frames_dropped,
                bytes_sent: delta.bytes_sent,
                average_fps: delta.frames_queued as f32 / seconds,
                max_frame_size: self.max_frame_size,
            }));
            self.max_frame_size = 0;
        }

        queue.push(StatusMessage::PacketStats(PacketStats {
            stream: stream.kind(),
            period,
            sent: delta.packets_sent,
            nack_requests: delta.nack_requests,
            retransmitted: delta.retransmitted,
            stale: delta.stale_nacks,
            average_pps: delta.packets_sent as f32 / seconds,
        }));

        true
    }
}
