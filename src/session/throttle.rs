//! Prompt Throttler
//!
//! Coalesces prompt updates to at most one delivery per interval. The first
//! update after a quiet period goes out immediately; updates inside the
//! window replace each other and the last one is delivered when the window
//! closes.

#[derive(Debug, Clone)]
pub struct PromptThrottler<T> {
    /// Minimum spacing between deliveries, in seconds
    interval: f64,
    last_delivery: Option<f64>,
    pending: Option<T>,
}

impl<T> PromptThrottler<T> {
    pub fn new(interval: f64) -> Self {
        Self {
            interval: interval.max(0.0),
            last_delivery: None,
            pending: None,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    fn window_open(&self, now: f64) -> bool {
        self.last_delivery
            .map_or(true, |last| now - last >= self.interval)
    }

    /// Offer a new value
    ///
    /// Returns it for immediate delivery if the window is open, otherwise
    /// keeps it (replacing any older pending value).
    pub fn submit(&mut self, value: T, now: f64) -> Option<T> {
        if self.window_open(now) {
            self.last_delivery = Some(now);
            self.pending = None;
            Some(value)
        } else {
            self.pending = Some(value);
            None
        }
    }

    /// Take the pending value once its window has opened
    pub fn poll(&mut self, now: f64) -> Option<T> {
        if self.pending.is_some() && self.window_open(now) {
            self.last_delivery = Some(now);
            self.pending.take()
        } else {
            None
        }
    }

    /// When the pending value becomes deliverable
    pub fn next_due(&self) -> Option<f64> {
        self.pending.as_ref()?;
        Some(self.last_delivery.map_or(0.0, |last| last + self.interval))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending value and reopen the window
    pub fn clear(&mut self) {
        self.pending = None;
        self.last_delivery = None;
    }
}
