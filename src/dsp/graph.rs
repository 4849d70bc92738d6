//! Effects Graph
//!
//! Fixed routing, built once and reused for the engine's lifetime:
//!
//! ```text
//!          +-> dry gain --------------------------+
//!          +-> distortion -> distortion wet gain -+
//! input ---+-> delay (feedback) -> delay wet gain +-> sum -> master -> output
//!          +-> convolution reverb -> reverb wet --+              \-> analysis tap
//! ```
//!
//! Every gain (and the delay feedback) is a [`RampedParam`]; setters only
//! move targets.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::dsp::delay::FeedbackDelay;
use crate::dsp::distortion::Distortion;
use crate::dsp::effect::Effect;
use crate::dsp::ramp::RampedParam;
use crate::dsp::reverb::{ConvolutionReverb, ReverbKernel, DEFAULT_BLOCK_SIZE};
use crate::engine::buffer::{calculate_peak, calculate_rms};
use crate::engine::AudioBuffer;

/// User-facing effect levels, each 0-1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSettings {
    pub distortion: f32,
    pub delay: f32,
    pub reverb: f32,
    pub master_volume: f32,
}

/// Output levels from the analysis tap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub peak_db: f32,
    pub rms_db: f32,
}

/// Secondary output: a copy of the last master block
#[derive(Debug, Clone)]
pub struct AnalysisTap {
    pub block: AudioBuffer,
    pub levels: Levels,
}

#[inline]
fn unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub struct EffectsGraph {
    sample_rate: u32,
    channels: usize,
    feedback_ratio: f32,
    settings: EffectSettings,

    dry: RampedParam,
    distortion: Distortion,
    distortion_wet: RampedParam,
    delay: FeedbackDelay,
    delay_wet: RampedParam,
    reverb: ConvolutionReverb,
    reverb_wet: RampedParam,
    /// Volume times fade state
    master: RampedParam,
    /// True after `fade_out` until the next `fade_in`
    muted: bool,
    /// Reverb branch skipped while its wet gain rests at zero
    reverb_idle: bool,

    branch: AudioBuffer,
    gains: Vec<f32>,
    tap: Option<AnalysisTap>,
}

impl EffectsGraph {
    /// Build the graph with every wet level at 0 and the master muted
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_block_size(config, DEFAULT_BLOCK_SIZE)
    }

    /// Build the graph with a custom reverb partition size
    pub fn with_block_size(config: &EngineConfig, reverb_block: usize) -> Self {
        let ramp = config.ramp_frames();
        let mut delay = FeedbackDelay::new(config.delay_time_secs, config.max_delay_secs, ramp);
        delay.prepare(config.sample_rate, config.channels);
        let mut reverb = ConvolutionReverb::new(reverb_block);
        reverb.prepare(config.sample_rate, config.channels);

        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            feedback_ratio: config.delay_feedback_ratio,
            settings: EffectSettings {
                distortion: 0.0,
                delay: 0.0,
                reverb: 0.0,
                master_volume: unit(config.master_volume),
            },
            dry: RampedParam::new(1.0, ramp),
            distortion: Distortion::new(config.distortion_strength),
            distortion_wet: RampedParam::new(0.0, ramp),
            delay,
            delay_wet: RampedParam::new(0.0, ramp),
            reverb,
            reverb_wet: RampedParam::new(0.0, ramp),
            master: RampedParam::new(0.0, ramp),
            muted: true,
            reverb_idle: true,
            branch: AudioBuffer::silent(config.channels, 0, config.sample_rate),
            gains: Vec::new(),
            tap: None,
        }
    }

    pub fn settings(&self) -> EffectSettings {
        self.settings
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    // ------------------------------------------------------------------------
    // Parameter setters
    // ------------------------------------------------------------------------

    /// Distortion amount drives both the curve and the branch's wet gain
    pub fn set_distortion(&mut self, amount: f32) {
        let amount = unit(amount);
        self.settings.distortion = amount;
        self.distortion.set_amount(amount);
        self.distortion_wet.set_target(amount);
    }

    /// Delay wet level; feedback follows as `wet * ratio`
    pub fn set_delay(&mut self, wet: f32) {
        let wet = unit(wet);
        self.settings.delay = wet;
        self.delay_wet.set_target(wet);
        self.delay.set_feedback(wet * self.feedback_ratio);
    }

    pub fn set_reverb(&mut self, wet: f32) {
        let wet = unit(wet);
        self.settings.reverb = wet;
        self.reverb_wet.set_target(wet);
    }

    /// Master volume; while faded out only the stored level changes
    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = unit(volume);
        self.settings.master_volume = volume;
        if !self.muted {
            self.master.set_target(volume);
        }
    }

    /// Ramp the master up to the current volume
    pub fn fade_in(&mut self, frames: usize) {
        self.muted = false;
        self.master
            .set_target_over(self.settings.master_volume, frames);
    }

    /// Ramp the master down to silence
    pub fn fade_out(&mut self, frames: usize) {
        self.muted = true;
        self.master.set_target_over(0.0, frames);
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Current master gain (mid-ramp value)
    pub fn master_gain(&self) -> f32 {
        self.master.value()
    }

    pub fn delay_feedback(&self) -> f32 {
        self.delay.feedback()
    }

    pub fn distortion_curve_version(&self) -> u64 {
        self.distortion.curve_version()
    }

    // ------------------------------------------------------------------------
    // Reverb kernel
    // ------------------------------------------------------------------------

    pub fn set_reverb_kernel(&mut self, kernel: ReverbKernel) -> bool {
        self.reverb.set_kernel(kernel)
    }

    pub fn has_reverb_kernel(&self) -> bool {
        self.reverb.has_kernel()
    }

    // ------------------------------------------------------------------------
    // Analysis tap
    // ------------------------------------------------------------------------

    pub fn enable_analysis(&mut self, enabled: bool) {
        if enabled {
            self.tap.get_or_insert_with(|| AnalysisTap {
                block: AudioBuffer::silent(0, 0, self.sample_rate),
                levels: Levels {
                    peak_db: f32::NEG_INFINITY,
                    rms_db: f32::NEG_INFINITY,
                },
            });
        } else {
            self.tap = None;
        }
    }

    pub fn analysis(&self) -> Option<&AnalysisTap> {
        self.tap.as_ref()
    }

    pub fn levels(&self) -> Option<Levels> {
        self.tap.as_ref().map(|tap| tap.levels)
    }

    /// Clear delay and reverb history
    pub fn reset(&mut self) {
        self.delay.reset();
        self.reverb.reset();
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    /// Run one block through the graph and return the master output
    pub fn process(&mut self, input: &AudioBuffer) -> AudioBuffer {
        let frames = input.len();
        let input = if input.num_channels() == self.channels {
            input.clone()
        } else {
            let mut fitted = AudioBuffer::silent(self.channels, frames, self.sample_rate);
            fitted.mix_from(input, 0, 0, frames, 1.0);
            fitted
        };

        let mut out = AudioBuffer::silent(self.channels, frames, self.sample_rate);
        self.gains.resize(frames, 0.0);

        self.dry.fill(&mut self.gains);
        accumulate(&mut out, &input, &self.gains);

        self.distortion_wet.fill(&mut self.gains);
        self.branch.clone_from(&input);
        self.distortion.process(&mut self.branch);
        accumulate(&mut out, &self.branch, &self.gains);

        // The delay line always runs so feedback tails stay continuous
        self.delay_wet.fill(&mut self.gains);
        self.branch.clone_from(&input);
        self.delay.process(&mut self.branch);
        accumulate(&mut out, &self.branch, &self.gains);

        let reverb_silent =
            self.reverb_wet.is_settled() && self.reverb_wet.value() == 0.0;
        if reverb_silent || !self.reverb.has_kernel() {
            self.reverb_wet.fill(&mut self.gains);
            if !self.reverb_idle {
                self.reverb.reset();
                self.reverb_idle = true;
            }
        } else {
            self.reverb_idle = false;
            self.reverb_wet.fill(&mut self.gains);
            self.branch.clone_from(&input);
            self.reverb.process(&mut self.branch);
            accumulate(&mut out, &self.branch, &self.gains);
        }

        self.master.fill(&mut self.gains);
        for channel in &mut out.samples {
            for (sample, gain) in channel.iter_mut().zip(&self.gains) {
                *sample *= gain;
            }
        }

        if let Some(tap) = self.tap.as_mut() {
            tap.block.clone_from(&out);
            tap.levels = Levels {
                peak_db: calculate_peak(&out),
                rms_db: calculate_rms(&out),
            };
        }

        out
    }
}

/// `out += branch * gains`, one gain per frame shared by all channels
fn accumulate(out: &mut AudioBuffer, branch: &AudioBuffer, gains: &[f32]) {
    for (dst, src) in out.samples.iter_mut().zip(&branch.samples) {
        for ((d, s), g) in dst.iter_mut().zip(src).zip(gains) {
            *d += s * g;
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
