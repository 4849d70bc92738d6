//! Linear parameter ramp
//!
//! Every gain and feedback change in the effects graph goes through a
//! [`RampedParam`] so values glide over a few tens of milliseconds instead
//! of stepping, which would click.

/// A value that moves linearly toward its target, one step per frame
#[derive(Debug, Clone, PartialEq)]
pub struct RampedParam {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
    /// Default ramp length in frames
    ramp_frames: usize,
}

impl RampedParam {
    pub fn new(value: f32, ramp_frames: usize) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
            ramp_frames,
        }
    }

    /// Current (possibly mid-ramp) value
    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn ramp_frames(&self) -> usize {
        self.ramp_frames
    }

    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }

    /// Ramp to `target` over the default ramp length
    pub fn set_target(&mut self, target: f32) {
        self.set_target_over(target, self.ramp_frames);
    }

    /// Ramp to `target` over `frames` frames; zero frames jumps
    pub fn set_target_over(&mut self, target: f32, frames: usize) {
        if frames == 0 {
            self.jump(target);
            return;
        }
        self.target = target;
        self.remaining = frames;
        self.step = (target - self.current) / frames as f32;
    }

    /// Set the value immediately
    pub fn jump(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.remaining = 0;
    }

    /// Advance one frame and return the new value
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    /// Write the next `out.len()` values into `out`
    pub fn fill(&mut self, out: &mut [f32]) {
        if self.is_settled() {
            out.fill(self.current);
            return;
        }
        for value in out.iter_mut() {
            *value = self.next();
        }
    }
}
