//! Delay Effect
//!
//! Single feedback delay line per channel. The node outputs only the
//! delayed signal; the graph's wet gain decides how much of it is heard.
//! Feedback is ramped like every other graph parameter.

use crate::dsp::effect::Effect;
use crate::dsp::ramp::RampedParam;
use crate::engine::AudioBuffer;

/// Feedback is kept strictly below unity so the loop always decays
const MAX_FEEDBACK: f32 = 0.95;

#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    /// Delay time in seconds (clamped to the line capacity)
    delay_time: f32,
    /// Line capacity in seconds
    max_delay: f32,
    feedback: RampedParam,
    /// One circular buffer per channel
    lines: Vec<Vec<f32>>,
    write_pos: usize,
    delay_samples: usize,
    sample_rate: u32,
}

impl FeedbackDelay {
    /// Create a delay line
    ///
    /// # Arguments
    /// * `delay_time` - Delay in seconds (clamped to `max_delay`)
    /// * `max_delay` - Line capacity in seconds
    /// * `ramp_frames` - Ramp length for feedback changes
    pub fn new(delay_time: f32, max_delay: f32, ramp_frames: usize) -> Self {
        let max_delay = max_delay.max(0.0);
        Self {
            delay_time: delay_time.clamp(0.0, max_delay),
            max_delay,
            feedback: RampedParam::new(0.0, ramp_frames),
            lines: Vec::new(),
            write_pos: 0,
            delay_samples: 1,
            sample_rate: 0,
        }
    }

    pub fn delay_time(&self) -> f32 {
        self.delay_time
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    pub fn feedback(&self) -> f32 {
        self.feedback.target()
    }

    /// Ramp feedback toward `feedback` (clamped to 0-0.95)
    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback.set_target(feedback.clamp(0.0, MAX_FEEDBACK));
    }

    fn capacity(&self) -> usize {
        (self.max_delay * self.sample_rate as f32).ceil() as usize + 1
    }
}

impl Effect for FeedbackDelay {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if buffer.sample_rate != self.sample_rate || buffer.num_channels() != self.lines.len() {
            self.prepare(buffer.sample_rate, buffer.num_channels());
        }
        let size = self.lines.first().map_or(0, Vec::len);
        if size == 0 {
            return;
        }

        for i in 0..buffer.len() {
            let feedback = self.feedback.next();
            let read_pos = (self.write_pos + size - self.delay_samples) % size;
            for (line, channel) in self.lines.iter_mut().zip(buffer.samples.iter_mut()) {
                let delayed = line[read_pos];
                line[self.write_pos] = channel[i] + delayed * feedback;
                channel[i] = delayed;
            }
            self.write_pos = (self.write_pos + 1) % size;
        }
    }

    fn prepare(&mut self, sample_rate: u32, channels: usize) {
        self.sample_rate = sample_rate;
        let capacity = self.capacity();
        self.lines = vec![vec![0.0; capacity]; channels];
        self.write_pos = 0;
        self.delay_samples = ((self.delay_time * sample_rate as f32).round() as usize)
            .clamp(1, capacity.saturating_sub(1).max(1));
        tracing::debug!(
            delay_samples = self.delay_samples,
            capacity,
            channels,
            "delay line prepared"
        );
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.write_pos = 0;
    }

    fn effect_type(&self) -> &'static str {
        "delay"
    }
}
