//! Stream Scheduler
//!
//! Places decoded buffers back to back on the audio timeline in arrival
//! order. The first buffer after a reset starts one pre-roll (`buffer_time`)
//! in the future, which absorbs backend jitter. When real time overtakes the
//! scheduled horizon the scheduler resets and drops the late buffer instead
//! of piling up a backlog.
//!
//! Scheduled start times never decrease.

use std::collections::VecDeque;

use crate::engine::buffer::AudioBuffer;

/// Result of handing a buffer to [`StreamScheduler::schedule`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleOutcome {
    /// First buffer after a reset; the pre-roll timer fires at `playing_at`
    Started { start: f64, playing_at: f64 },
    /// Appended to the timeline
    Scheduled { start: f64 },
    /// The horizon fell behind `now`; the buffer was dropped and the
    /// scheduler reset
    Underrun { horizon: f64, now: f64 },
}

/// A buffer waiting for (or in the middle of) playback
#[derive(Debug, Clone)]
pub struct ScheduledBuffer {
    pub start: f64,
    pub buffer: AudioBuffer,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.buffer.duration_secs()
    }
}

#[derive(Debug, Clone)]
pub struct StreamScheduler {
    /// Pre-roll in seconds
    buffer_time: f64,
    /// Where the next buffer starts; 0 = unset
    next_start_time: f64,
    /// One-shot `loading -> playing` timer
    preroll_deadline: Option<f64>,
    queue: VecDeque<ScheduledBuffer>,
}

impl StreamScheduler {
    pub fn new(buffer_time: f64) -> Self {
        Self {
            buffer_time,
            next_start_time: 0.0,
            preroll_deadline: None,
            queue: VecDeque::new(),
        }
    }

    pub fn buffer_time(&self) -> f64 {
        self.buffer_time
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn preroll_deadline(&self) -> Option<f64> {
        self.preroll_deadline
    }

    /// Schedule `buffer` given the current time `now`
    pub fn schedule(&mut self, buffer: AudioBuffer, now: f64) -> ScheduleOutcome {
        let started = if self.next_start_time == 0.0 {
            self.next_start_time = now + self.buffer_time;
            self.preroll_deadline = Some(self.next_start_time);
            true
        } else if self.next_start_time < now {
            let horizon = self.next_start_time;
            self.reset();
            tracing::debug!(horizon, now, "scheduler underrun, dropping buffer");
            return ScheduleOutcome::Underrun { horizon, now };
        } else {
            false
        };

        let start = self.next_start_time;
        debug_assert!(self.queue.back().map_or(true, |last| last.start <= start));
        self.next_start_time += buffer.duration_secs();
        self.queue.push_back(ScheduledBuffer { start, buffer });

        if started {
            ScheduleOutcome::Started {
                start,
                playing_at: start,
            }
        } else {
            ScheduleOutcome::Scheduled { start }
        }
    }

    /// Fire the pre-roll timer if it is due
    ///
    /// Returns true exactly once per armed timer, at or after the deadline.
    pub fn poll_preroll(&mut self, now: f64) -> bool {
        match self.preroll_deadline {
            Some(deadline) if now >= deadline => {
                self.preroll_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Forget the horizon and disarm the pre-roll timer
    ///
    /// Already scheduled buffers stay on the timeline.
    pub fn reset(&mut self) {
        self.next_start_time = 0.0;
        self.preroll_deadline = None;
    }

    /// Drop every buffer that has not started by `now`
    ///
    /// Buffers already sounding keep playing so a master fade can cover them.
    pub fn cancel_pending(&mut self, now: f64) -> usize {
        let before = self.queue.len();
        self.queue.retain(|scheduled| scheduled.start <= now);
        before - self.queue.len()
    }

    /// Drop everything, sounding or not
    pub fn clear(&mut self) {
        self.queue.clear();
        self.reset();
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn scheduled(&self) -> impl Iterator<Item = &ScheduledBuffer> {
        self.queue.iter()
    }

    /// Mix the timeline window starting at `window_start` into `out`
    ///
    /// Positions are rounded to whole frames of `out.sample_rate`, so
    /// back-to-back buffers join without gaps or overlap. Buffers that end
    /// inside the window are released.
    pub fn render(&mut self, window_start: f64, out: &mut AudioBuffer) {
        let rate = out.sample_rate as f64;
        let window_start_frame = (window_start * rate).round() as i64;
        let window_end_frame = window_start_frame + out.len() as i64;

        for scheduled in &self.queue {
            let start_frame = (scheduled.start * rate).round() as i64;
            if start_frame >= window_end_frame {
                break;
            }
            let end_frame = start_frame + scheduled.buffer.len() as i64;
            if end_frame <= window_start_frame {
                continue;
            }

            let rel = start_frame - window_start_frame;
            let (src_offset, dst_offset) = if rel >= 0 {
                (0, rel as usize)
            } else {
                ((-rel) as usize, 0)
            };
            out.mix_from(&scheduled.buffer, src_offset, dst_offset, out.len(), 1.0);
        }

        self.queue.retain(|scheduled| {
            let start_frame = (scheduled.start * rate).round() as i64;
            start_frame + scheduled.buffer.len() as i64 > window_end_frame
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn second_of(value: f32) -> AudioBuffer {
        AudioBuffer::from_channels(vec![vec![value; 48000], vec![value; 48000]], 48000).unwrap()
    }

    #[test]
    fn test_first_buffer_starts_after_preroll() {
        let mut scheduler = StreamScheduler::new(2.0);
        let outcome = scheduler.schedule(second_of(0.1), 10.0);

        assert_eq!(
            outcome,
            ScheduleOutcome::Started {
                start: 12.0,
                playing_at: 12.0
            }
        );
        assert_relative_eq!(scheduler.next_start_time(), 13.0);
    }

    #[test]
    fn test_buffers_are_back_to_back() {
        let mut scheduler = StreamScheduler::new(2.0);
        scheduler.schedule(second_of(0.1), 0.5);
        assert_eq!(
            scheduler.schedule(second_of(0.2), 1.0),
            ScheduleOutcome::Scheduled { start: 3.5 }
        );
        assert_eq!(
            scheduler.schedule(second_of(0.3), 1.5),
            ScheduleOutcome::Scheduled { start: 4.5 }
        );

        let starts: Vec<f64> = scheduler.scheduled().map(|s| s.start).collect();
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_underrun_resets_and_drops() {
        let mut scheduler = StreamScheduler::new(2.0);
        scheduler.schedule(second_of(0.1), 1.0); // horizon now 4.0

        let outcome = scheduler.schedule(second_of(0.2), 4.5);
        assert_eq!(outcome, ScheduleOutcome::Underrun { horizon: 4.0, now: 4.5 });
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(scheduler.pending_len(), 1);

        // The next buffer gets a fresh pre-roll
        assert_eq!(
            scheduler.schedule(second_of(0.3), 5.0),
            ScheduleOutcome::Started {
                start: 7.0,
                playing_at: 7.0
            }
        );
    }

    #[test]
    fn test_buffer_exactly_at_horizon_is_not_an_underrun() {
        let mut scheduler = StreamScheduler::new(2.0);
        scheduler.schedule(second_of(0.1), 0.0);
        assert_eq!(
            scheduler.schedule(second_of(0.1), 3.0),
            ScheduleOutcome::Scheduled { start: 3.0 }
        );
    }

    #[test]
    fn test_preroll_fires_once_at_deadline() {
        let mut scheduler = StreamScheduler::new(2.0);
        scheduler.schedule(second_of(0.1), 1.0);

        assert!(!scheduler.poll_preroll(2.999));
        assert!(scheduler.poll_preroll(3.0));
        assert!(!scheduler.poll_preroll(3.5));
    }

    #[test]
    fn test_reset_disarms_preroll() {
        let mut scheduler = StreamScheduler::new(2.0);
        scheduler.schedule(second_of(0.1), 1.0);
        scheduler.reset();
        assert!(!scheduler.poll_preroll(10.0));
    }

    #[test]
    fn test_cancel_pending_keeps_sounding_buffers() {
        let mut scheduler = StreamScheduler::new(2.0);
        scheduler.schedule(second_of(0.1), 0.0); // 2.0..3.0
        scheduler.schedule(second_of(0.1), 0.5); // 3.0..4.0

        assert_eq!(scheduler.cancel_pending(2.5), 1);
        assert_eq!(scheduler.pending_len(), 1);
    }

    #[test]
    fn test_render_window_is_gapless() {
        let mut scheduler = StreamScheduler::new(0.5);
        scheduler.schedule(second_of(0.25), 0.0); // 0.5..1.5
        scheduler.schedule(second_of(0.5), 0.1); // 1.5..2.5

        // Window straddles the seam between the two buffers
        let mut out = AudioBuffer::silent(2, 4800, 48000);
        scheduler.render(1.45, &mut out);

        assert_eq!(out.channel(0)[0], 0.25);
        assert_eq!(out.channel(0)[2399], 0.25);
        assert_eq!(out.channel(0)[2400], 0.5);
        assert_eq!(out.channel(1)[4799], 0.5);
        // First buffer ended inside the window and was released
        assert_eq!(scheduler.pending_len(), 1);
    }

    #[test]
    fn test_render_before_start_is_silent() {
        let mut scheduler = StreamScheduler::new(2.0);
        scheduler.schedule(second_of(0.5), 0.0);

        let mut out = AudioBuffer::silent(2, 480, 48000);
        scheduler.render(0.0, &mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
        assert_eq!(scheduler.pending_len(), 1);
    }
}
