//! Time utilities for the media path
//!
//! A [`Clock`] abstraction so the pacer can be driven by a manual clock in
//! tests, a periodic [`Timer`] and the [`LeakyBucket`] that paces video.

use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Headroom applied on top of the configured bitrate
pub const PACING_HEADROOM: f64 = 1.10;

/// Source of monotonic time and sleeping
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Manually advanced clock
///
/// `sleep` advances the clock instead of blocking, so code that sleeps until
/// it may proceed runs instantly under test.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Timer for periodic operations (stats reporting)
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    last_fire: Instant,
}

impl Timer {
    /// Create a timer whose first period starts at `now`
    pub fn new(interval: Duration, now: Instant) -> Self {
        Timer {
            interval,
            last_fire: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the timer has expired
    pub fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_fire) >= self.interval
    }

    /// Time elapsed in the current period
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_fire)
    }

    pub fn reset(&mut self, now: Instant) {
        self.last_fire = now;
    }

    /// Fire the timer if expired, returning the length of the period that ended
    pub fn try_fire(&mut self, now: Instant) -> Option<Duration> {
        if self.expired(now) {
            let period = self.elapsed(now);
            self.reset(now);
            Some(period)
        } else {
            None
        }
    }
}

/// Leaky-bucket byte budget
///
/// Tokens are bytes. The bucket refills at the configured bitrate plus
/// [`PACING_HEADROOM`], never holds more than `max_burst_ms` worth of tokens,
/// and starts empty. A rate of zero disables the bucket: it always reports
/// tokens available and never needs to wait.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    bytes_per_ms: f64,
    max_tokens: f64,
    tokens: f64,
    last_refill: Instant,
}

impl LeakyBucket {
    /// Create an empty bucket
    ///
    /// # Arguments
    /// * `kbps` - Target bitrate in kilobits per second (0 = unlimited)
    /// * `max_burst_ms` - Burst allowance expressed as milliseconds at the target rate
    /// * `now` - Start of the first refill period
    pub fn new(kbps: u32, max_burst_ms: u32, now: Instant) -> Self {
        let bytes_per_ms = kbps as f64 * 1000.0 / 8.0 / 1000.0 * PACING_HEADROOM;

        LeakyBucket {
            bytes_per_ms,
            max_tokens: max_burst_ms as f64 * bytes_per_ms,
            tokens: 0.0,
            last_refill: now,
        }
    }

    /// Whether the bucket is a pass-through
    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.bytes_per_ms == 0.0
    }

    pub fn bytes_per_ms(&self) -> f64 {
        self.bytes_per_ms
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Add the tokens earned since the last refill, capped at the burst size
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;

        let earned = elapsed.as_secs_f64() * 1000.0 * self.bytes_per_ms;
        self.tokens = (self.tokens + earned).min(self.max_tokens);
    }

    /// Whether a packet may be sent now
    #[inline]
    pub fn has_tokens(&self) -> bool {
        self.is_unlimited() || self.tokens > 0.0
    }

    /// Charge `bytes` against the budget; the balance may go negative
    pub fn consume(&mut self, bytes: usize) {
        if !self.is_unlimited() {
            self.tokens -= bytes as f64;
        }
    }

    /// Time to wait until the balance becomes positive (at least 1 ms)
    pub fn time_until_positive(&self) -> Duration {
        if self.has_tokens() {
            return Duration::ZERO;
        }
        let ms = ((-self.tokens) / self.bytes_per_ms).floor() as u64 + 1;
        Duration::from_millis(ms.max(1))
    }
}
