//! Retransmission Ring
//!
//! Every outgoing packet is built directly into a slot of a fixed ring
//! indexed by `sequence mod N`, and stays there until the slot is reused,
//! so the feedback listener can resend it on request.
//!
//! Each slot has its own lock. The producer holds a slot while filling it,
//! the pacer while transmitting it and the listener while resending it; other
//! slots stay available meanwhile. A slot remembers which sequence number it
//! currently holds and every reader checks it before trusting the bytes.
//!
//! Paced rings track how far the pacer has got (the transmit cursor) and
//! refuse to hand out a slot that would overwrite a packet still waiting to
//! be sent. That refusal is the only backpressure producers ever see.

use crate::packet::MAX_PACKET_BUFFER;
use crate::sequence::SeqNumber;
use parking_lot::{Mutex, MutexGuard};
use std::ops::Deref;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default ring size per stream
pub const DEFAULT_RING_SIZE: usize = 2048;

/// Largest ring that still lets wraparound comparisons work
pub const MAX_RING_SIZE: usize = 1 << 15;

/// Buffer errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BufferError {
    #[error("Ring is full: {pending} packets waiting for transmission")]
    Full { pending: usize },

    #[error("Slot for sequence {requested} holds {found:?}")]
    Stale {
        requested: SeqNumber,
        found: Option<SeqNumber>,
    },

    #[error("Packet length {len} exceeds slot size {max}")]
    TooLong { len: usize, max: usize },
}

/// How packets leave the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingPolicy {
    /// Sent by the producer right after it is built
    Immediate,
    /// Queued for the pacer, which sends in sequence order
    Paced,
}

/// One reusable packet buffer
pub struct Slot {
    buffer: Box<[u8; MAX_PACKET_BUFFER]>,
    len: usize,
    sequence: Option<SeqNumber>,
    enqueued_at: Option<Instant>,
    transmitted_at: Option<Instant>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            buffer: Box::new([0u8; MAX_PACKET_BUFFER]),
            len: 0,
            sequence: None,
            enqueued_at: None,
            transmitted_at: None,
        }
    }

    /// The stored packet bytes
    pub fn packet(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sequence number currently held, if any
    pub fn sequence(&self) -> Option<SeqNumber> {
        self.sequence
    }

    pub fn enqueued_at(&self) -> Option<Instant> {
        self.enqueued_at
    }

    /// Time since the packet was committed; the request delay of a NACK
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.enqueued_at.map(|at| now.saturating_duration_since(at))
    }

    pub fn transmitted_at(&self) -> Option<Instant> {
        self.transmitted_at
    }

    /// Record a transmission of the stored packet
    pub fn mark_transmitted(&mut self, at: Instant) {
        self.transmitted_at = Some(at);
    }
}

/// Exclusive write access to a slot
///
/// The slot is invalidated when acquired. Dropping the guard without
/// [`SlotGuard::commit`] leaves it empty, so a half-written packet is never
/// resent.
pub struct SlotGuard<'a> {
    ring: &'a RetransmitRing,
    slot: MutexGuard<'a, Slot>,
    sequence: SeqNumber,
}

impl<'a> SlotGuard<'a> {
    /// Sequence number this slot is being filled for
    pub fn sequence(&self) -> SeqNumber {
        self.sequence
    }

    /// Writable packet buffer
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.slot.buffer[..]
    }

    /// Record the packet and release the slot
    ///
    /// For paced rings the packet becomes visible to the pacer.
    pub fn commit(mut self, len: usize, at: Instant) -> Result<(), BufferError> {
        if len > MAX_PACKET_BUFFER {
            return Err(BufferError::TooLong {
                len,
                max: MAX_PACKET_BUFFER,
            });
        }

        self.slot.len = len;
        self.slot.sequence = Some(self.sequence);
        self.slot.enqueued_at = Some(at);
        self.slot.transmitted_at = None;

        let next = self.sequence.next();
        let ring = self.ring;
        drop(self);
        ring.head.store(next.as_raw(), Ordering::Release);
        Ok(())
    }

    /// Record the packet and keep holding the slot (immediate send path)
    pub fn commit_held(mut self, len: usize, at: Instant) -> Result<SlotRef<'a>, BufferError> {
        if len > MAX_PACKET_BUFFER {
            return Err(BufferError::TooLong {
                len,
                max: MAX_PACKET_BUFFER,
            });
        }

        self.slot.len = len;
        self.slot.sequence = Some(self.sequence);
        self.slot.enqueued_at = Some(at);
        self.slot.transmitted_at = None;
        self.ring
            .head
            .store(self.sequence.next().as_raw(), Ordering::Release);

        Ok(SlotRef { slot: self.slot })
    }
}

/// Locked access to a slot that holds the requested sequence number
pub struct SlotRef<'a> {
    slot: MutexGuard<'a, Slot>,
}

impl SlotRef<'_> {
    pub fn mark_transmitted(&mut self, at: Instant) {
        self.slot.mark_transmitted(at);
    }
}

impl Deref for SlotRef<'_> {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.slot
    }
}

/// Fixed ring of packet slots for one media stream
pub struct RetransmitRing {
    slots: Box<[Mutex<Slot>]>,
    policy: PacingPolicy,
    /// Next sequence number after the last committed packet
    head: AtomicU16,
    /// Next sequence number the pacer will transmit (written by the pacer only)
    cursor: AtomicU16,
}

impl RetransmitRing {
    /// Create a new ring
    ///
    /// `capacity` is rounded up to a power of two so that `sequence mod N`
    /// stays continuous across the 16-bit wrap, and capped at [`MAX_RING_SIZE`].
    pub fn new(capacity: usize, policy: PacingPolicy) -> Self {
        let capacity = capacity.max(1).next_power_of_two().min(MAX_RING_SIZE);
        let slots = (0..capacity).map(|_| Mutex::new(Slot::new())).collect();

        RetransmitRing {
            slots,
            policy,
            head: AtomicU16::new(0),
            cursor: AtomicU16::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn policy(&self) -> PacingPolicy {
        self.policy
    }

    /// Lock the slot for `sequence` for writing
    ///
    /// Paced rings report [`BufferError::Full`] when writing would overwrite a
    /// packet the pacer has not sent yet.
    pub fn acquire(&self, sequence: SeqNumber) -> Result<SlotGuard<'_>, BufferError> {
        if self.policy == PacingPolicy::Paced {
            let cursor = self.next_transmit();
            let ahead = cursor.forward_distance(sequence) as usize;
            if ahead >= self.capacity() {
                return Err(BufferError::Full { pending: ahead });
            }
        }

        let mut slot = self.slots[sequence.slot_index(self.capacity())].lock();
        slot.sequence = None;
        slot.len = 0;

        Ok(SlotGuard {
            ring: self,
            slot,
            sequence,
        })
    }

    /// Lock the slot holding `sequence` for reading
    ///
    /// Fails with [`BufferError::Stale`] when the slot has been reused or
    /// never held that sequence.
    pub fn slot(&self, sequence: SeqNumber) -> Result<SlotRef<'_>, BufferError> {
        let slot = self.slots[sequence.slot_index(self.capacity())].lock();
        match slot.sequence {
            Some(found) if found == sequence => Ok(SlotRef { slot }),
            found => Err(BufferError::Stale {
                requested: sequence,
                found,
            }),
        }
    }

    /// Next sequence number the pacer will transmit
    pub fn next_transmit(&self) -> SeqNumber {
        SeqNumber::new(self.cursor.load(Ordering::Acquire))
    }

    /// Next sequence number after the last committed packet
    pub fn head(&self) -> SeqNumber {
        SeqNumber::new(self.head.load(Ordering::Acquire))
    }

    /// Packets committed but not yet transmitted by the pacer
    pub fn pending(&self) -> usize {
        match self.policy {
            PacingPolicy::Paced => self.next_transmit().forward_distance(self.head()) as usize,
            PacingPolicy::Immediate => 0,
        }
    }

    /// Move the transmit cursor past the packet just sent
    ///
    /// Only the pacer may call this.
    pub fn advance_cursor(&self) {
        let next = self.next_transmit().next();
        self.cursor.store(next.as_raw(), Ordering::Release);
    }
}
