//! DSP Effects
//!
//! Processing nodes of the fixed effects graph: waveshaper distortion,
//! feedback delay and convolution reverb, plus the linear parameter ramp
//! they all share.

mod delay;
mod distortion;
mod effect;
mod graph;
mod ramp;
mod reverb;

pub use delay::FeedbackDelay;
pub use distortion::{make_curve, Distortion, CURVE_SIZE, DEFAULT_STRENGTH};
pub use effect::Effect;
pub use graph::{AnalysisTap, EffectSettings, EffectsGraph, Levels};
pub use ramp::RampedParam;
pub use reverb::{
    generate_impulse_response, spawn_impulse_response, ConvolutionReverb, ReverbKernel,
    DEFAULT_BLOCK_SIZE,
};
