//! Media streams and their counters
//!
//! A [`MediaStream`] is what the producer, the pacer and the feedback
//! listener share for one media kind: identity, the retransmission ring and
//! lock-free counters. Producer-only state (packetizer, keyframe gating)
//! lives in the sender that owns it.

use ftl_protocol::buffer::{PacingPolicy, RetransmitRing};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of media carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Cumulative per-stream counters
///
/// Each counter has a single writer (producer, pacer or listener), readers
/// take relaxed snapshots.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub frames_received: AtomicU64,
    pub frames_queued: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub packets_queued: AtomicU64,
    pub bytes_queued: AtomicU64,
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub max_frame_size: AtomicU64,
    pub nack_requests: AtomicU64,
    pub retransmitted: AtomicU64,
    pub stale_nacks: AtomicU64,
}

impl StreamStats {
    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn decr(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_frame_size(&self, size: u64) {
        self.max_frame_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamStatsSnapshot {
            frames_received: load(&self.frames_received),
            frames_queued: load(&self.frames_queued),
            frames_dropped: load(&self.frames_dropped),
            packets_queued: load(&self.packets_queued),
            bytes_queued: load(&self.bytes_queued),
            packets_sent: load(&self.packets_sent),
            bytes_sent: load(&self.bytes_sent),
            max_frame_size: load(&self.max_frame_size),
            nack_requests: load(&self.nack_requests),
            retransmitted: load(&self.retransmitted),
            stale_nacks: load(&self.stale_nacks),
        }
    }
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub frames_received: u64,
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub packets_queued: u64,
    pub bytes_queued: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub max_frame_size: u64,
    pub nack_requests: u64,
    pub retransmitted: u64,
    pub stale_nacks: u64,
}

impl StreamStatsSnapshot {
    /// Counter growth since `earlier`; `max_frame_size` is carried as is
    pub fn since(&self, earlier: &StreamStatsSnapshot) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            frames_received: self.frames_received - earlier.frames_received,
            frames_queued: self.frames_queued - earlier.frames_queued,
            frames_dropped: self.frames_dropped - earlier.frames_dropped,
            packets_queued: self.packets_queued - earlier.packets_queued,
            bytes_queued: self.bytes_queued - earlier.bytes_queued,
            packets_sent: self.packets_sent - earlier.packets_sent,
            bytes_sent: self.bytes_sent - earlier.bytes_sent,
            max_frame_size: self.max_frame_size,
            nack_requests: self.nack_requests - earlier.nack_requests,
            retransmitted: self.retransmitted - earlier.retransmitted,
            stale_nacks: self.stale_nacks - earlier.stale_nacks,
        }
    }
}

/// State shared by everything that touches one media stream
pub struct MediaStream {
    kind: MediaKind,
    ssrc: u32,
    payload_type: u8,
    ring: RetransmitRing,
    stats: StreamStats,
}

impl MediaStream {
    /// Create a stream; video is paced, audio is sent immediately
    pub fn new(kind: MediaKind, ssrc: u32, payload_type: u8, ring_size: usize) -> Self {
        let policy = match kind {
            MediaKind::Video => PacingPolicy::Paced,
            MediaKind::Audio => PacingPolicy::Immediate,
        };

        MediaStream {
            kind,
            ssrc,
            payload_type,
            ring: RetransmitRing::new(ring_size, policy),
            stats: StreamStats::default(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn ring(&self) -> &RetransmitRing {
        &self.ring
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("kind", &self.kind)
            .field("ssrc", &self.ssrc)
            .field("payload_type", &self.payload_type)
            .field("capacity", &self.ring.capacity())
            .field("pending", &self.ring.pending())
            .finish()
    }
}
