//! Receiver-side loss tracking
//!
//! Watches the sequence numbers arriving on one RTP stream, records gaps as
//! ranges and decides which of them to report in the next generic NACK.

use crate::feedback::NackEntry;
use crate::sequence::SeqNumber;
use std::time::{Duration, Instant};

/// Loss sequence range (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossRange {
    pub start: SeqNumber,
    pub end: SeqNumber,
}

impl LossRange {
    pub fn new(start: SeqNumber, end: SeqNumber) -> Self {
        LossRange { start, end }
    }

    pub fn single(seq: SeqNumber) -> Self {
        LossRange {
            start: seq,
            end: seq,
        }
    }

    pub fn contains(&self, seq: SeqNumber) -> bool {
        seq.ge(self.start) && seq.le(self.end)
    }

    pub fn len(&self) -> usize {
        self.start.forward_distance(self.end) as usize + 1
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Sequence numbers in the range, ascending
    pub fn sequences(&self) -> impl Iterator<Item = SeqNumber> {
        let start = self.start;
        (0..self.len()).map(move |i| start + i as u16)
    }
}

/// How an arriving packet relates to what was seen before
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// First packet of the stream
    First,
    /// Next expected sequence number
    InOrder,
    /// Ahead of the expected sequence; `lost` packets were skipped
    Gap { lost: usize },
    /// Fills a previously recorded gap
    Recovered,
    /// Already received, or too old to be tracked
    Duplicate,
}

#[derive(Debug, Clone)]
struct LossEntry {
    range: LossRange,
    detected_at: Instant,
    last_nack_at: Option<Instant>,
    nack_count: u32,
}

/// Loss tracker for one incoming RTP stream
pub struct LossTracker {
    /// Highest sequence number received so far
    highest: Option<SeqNumber>,
    /// Outstanding losses, oldest first
    losses: Vec<LossEntry>,
    /// Maximum NACKs sent for the same loss
    max_nack_count: u32,
    /// Minimum interval between NACKs for the same loss
    nack_interval: Duration,
    /// Losses further than this behind the highest sequence are forgotten
    window: u16,
}

impl LossTracker {
    /// Create a new loss tracker
    ///
    /// # Arguments
    /// * `max_nack_count` - Maximum times a single loss is reported
    /// * `nack_interval` - Minimum interval between reports of the same loss
    /// * `window` - How far behind the newest packet losses stay tracked
    pub fn new(max_nack_count: u32, nack_interval: Duration, window: u16) -> Self {
        LossTracker {
            highest: None,
            losses: Vec::new(),
            max_nack_count,
            nack_interval,
            window: window.clamp(1, i16::MAX as u16),
        }
    }

    /// Highest sequence number received so far
    pub fn highest(&self) -> Option<SeqNumber> {
        self.highest
    }

    /// Record an arriving packet
    pub fn on_packet(&mut self, seq: SeqNumber, now: Instant) -> Arrival {
        let highest = match self.highest {
            Some(highest) => highest,
            None => {
                self.highest = Some(seq);
                return Arrival::First;
            }
        };

        let distance = highest.distance_to(seq);
        if distance == 1 {
            self.highest = Some(seq);
            self.expire(seq);
            return Arrival::InOrder;
        }

        if distance > 1 {
            let range = LossRange::new(highest.next(), seq - 1);
            let lost = range.len();
            self.losses.push(LossEntry {
                range,
                detected_at: now,
                last_nack_at: None,
                nack_count: 0,
            });
            self.highest = Some(seq);
            self.expire(seq);
            return Arrival::Gap { lost };
        }

        if self.remove(seq) {
            Arrival::Recovered
        } else {
            Arrival::Duplicate
        }
    }

    /// Remove a recovered packet, splitting its range if needed
    fn remove(&mut self, seq: SeqNumber) -> bool {
        let Some(index) = self.losses.iter().position(|e| e.range.contains(seq)) else {
            return false;
        };

        let entry = self.losses.remove(index);
        let range = entry.range;
        if range.is_single() {
            return true;
        }

        let mut parts = Vec::with_capacity(2);
        if seq != range.start {
            parts.push(LossRange::new(range.start, seq - 1));
        }
        if seq != range.end {
            parts.push(LossRange::new(seq.next(), range.end));
        }
        for (offset, part) in parts.into_iter().enumerate() {
            self.losses.insert(
                index + offset,
                LossEntry {
                    range: part,
                    ..entry.clone()
                },
            );
        }
        true
    }

    /// Forget losses that fell out of the tracking window
    fn expire(&mut self, highest: SeqNumber) {
        let oldest = highest - self.window;
        self.losses.retain_mut(|entry| {
            if entry.range.end.lt(oldest) {
                return false;
            }
            if entry.range.start.lt(oldest) {
                entry.range.start = oldest;
            }
            true
        });
    }

    /// Losses due for a (re)report, packed into PID/BLP pairs
    ///
    /// Each reported loss has its NACK count bumped. A loss that used up its
    /// reports stays tracked, so a late retransmission is still recognised,
    /// until it arrives or leaves the window.
    pub fn due_nacks(&mut self, now: Instant) -> Vec<NackEntry> {
        let mut due = Vec::new();

        for entry in &mut self.losses {
            let ready = match entry.last_nack_at {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= self.nack_interval,
            };
            if ready && entry.nack_count < self.max_nack_count {
                due.extend(entry.range.sequences());
                entry.last_nack_at = Some(now);
                entry.nack_count += 1;
            }
        }

        NackEntry::pack(&due)
    }

    /// Outstanding loss ranges, oldest first
    pub fn ranges(&self) -> Vec<LossRange> {
        self.losses.iter().map(|e| e.range).collect()
    }

    /// Age of the oldest outstanding loss
    pub fn oldest_loss_age(&self, now: Instant) -> Option<Duration> {
        self.losses
            .iter()
            .map(|e| now.saturating_duration_since(e.detected_at))
            .max()
    }

    /// Number of packets currently considered lost
    pub fn len(&self) -> usize {
        self.losses.iter().map(|e| e.range.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    pub fn contains(&self, seq: SeqNumber) -> bool {
        self.losses.iter().any(|e| e.range.contains(seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(value: u16) -> SeqNumber {
        SeqNumber::new(value)
    }

    fn tracker() -> LossTracker {
        LossTracker::new(3, Duration::from_millis(20), 1024)
    }

    #[test]
    fn test_in_order() {
        let mut tracker = tracker();
        let now = Instant::now();
        assert_eq!(tracker.on_packet(seq(5), now), Arrival::First);
        assert_eq!(tracker.on_packet(seq(6), now), Arrival::InOrder);
        assert_eq!(tracker.on_packet(seq(6), now), Arrival::Duplicate);
        assert!(tracker.is_empty());
        assert_eq!(tracker.highest(), Some(seq(6)));
    }

    #[test]
    fn test_gap_and_recovery() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.on_packet(seq(10), now);
        assert_eq!(tracker.on_packet(seq(14), now), Arrival::Gap { lost: 3 });
        assert_eq!(tracker.len(), 3);

        assert_eq!(tracker.on_packet(seq(12), now), Arrival::Recovered);
        assert_eq!(
            tracker.ranges(),
            vec![
                LossRange::single(seq(11)),
                LossRange::single(seq(13))
            ]
        );
        assert!(!tracker.contains(seq(12)));
    }

    #[test]
    fn test_gap_across_wrap() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.on_packet(seq(u16::MAX - 1), now);
        assert_eq!(tracker.on_packet(seq(2), now), Arrival::Gap { lost: 3 });
        let lost: Vec<u16> = tracker.ranges()[0]
            .sequences()
            .map(SeqNumber::as_raw)
            .collect();
        assert_eq!(lost, vec![u16::MAX, 0, 1]);
    }

    #[test]
    fn test_due_nacks_respects_interval_and_count() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.on_packet(seq(0), start);
        tracker.on_packet(seq(3), start);

        let entries = tracker.due_nacks(start);
        assert_eq!(
            entries,
            vec![NackEntry {
                pid: seq(1),
                blp: 0b1
            }]
        );

        // Too soon for a repeat
        assert!(tracker.due_nacks(start + Duration::from_millis(5)).is_empty());

        assert_eq!(tracker.due_nacks(start + Duration::from_millis(25)).len(), 1);
        assert_eq!(tracker.due_nacks(start + Duration::from_millis(50)).len(), 1);

        // Third report was the last
        assert!(tracker.due_nacks(start + Duration::from_millis(100)).is_empty());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_retransmission_after_last_nack() {
        let mut tracker = LossTracker::new(1, Duration::from_millis(20), 1024);
        let now = Instant::now();
        tracker.on_packet(seq(0), now);
        tracker.on_packet(seq(2), now);

        assert_eq!(
            tracker.due_nacks(now),
            vec![NackEntry {
                pid: seq(1),
                blp: 0
            }]
        );
        assert!(tracker.due_nacks(now + Duration::from_millis(50)).is_empty());

        assert_eq!(tracker.on_packet(seq(1), now), Arrival::Recovered);
        assert!(tracker.is_empty());
        assert_eq!(tracker.on_packet(seq(1), now), Arrival::Duplicate);
    }

    #[test]
    fn test_window_expiry() {
        let mut tracker = LossTracker::new(3, Duration::from_millis(20), 8);
        let now = Instant::now();
        tracker.on_packet(seq(0), now);
        tracker.on_packet(seq(4), now);
        assert_eq!(tracker.len(), 3);

        tracker.on_packet(seq(10), now);
        // 10 - 8 = 2: only 2 and 3 remain from the first gap, plus 5..=9
        assert_eq!(tracker.ranges()[0], LossRange::new(seq(2), seq(3)));
        assert_eq!(tracker.len(), 2 + 5);
    }
}
