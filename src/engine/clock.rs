//! Audio timeline clock
//!
//! The scheduler, pre-roll timer and prompt throttler all read "now" from a
//! [`Clock`]. Hosts with a real output device advance a [`ManualClock`] by
//! the frames they hand to the device; tests drive it by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of the current audio-timeline position in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock time since construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Externally advanced clock; clones share the same position
///
/// # Example
/// ```
/// use promptdj::engine::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let shared = clock.clone();
/// clock.advance(0.5);
/// assert_eq!(shared.now(), 0.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(seconds: f64) -> Self {
        let clock = Self::new();
        clock.set(seconds);
        clock
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }

    /// Advance by a number of frames at the given sample rate
    pub fn advance_frames(&self, frames: usize, sample_rate: u32) {
        self.advance(frames as f64 / sample_rate as f64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_starts_at_zero() {
        assert_eq!(ManualClock::new().now(), 0.0);
    }

    #[test]
    fn test_manual_clock_advance_frames() {
        let clock = ManualClock::starting_at(1.0);
        clock.advance_frames(24000, 48000);
        assert!((clock.now() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
