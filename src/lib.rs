//! PromptDJ - Real-time Generative Music Playback
//!
//! PromptDJ plays music streamed from a generation backend steered by a set
//! of weighted text prompts. Decoded chunks are scheduled gaplessly behind a
//! pre-roll, run through a mixable effects graph and can be captured to WAV.
//!
//! # Architecture
//!
//! - `session`: weighted prompts, the backend interface, the connector that
//!   downgrades to local loops, and the prompt throttler
//! - `engine`: clock, codec, scheduler, state machine, recorder and the
//!   `Engine` that ties them together
//! - `dsp`: the effects graph (distortion, feedback delay, convolution
//!   reverb, master fade)

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod session;

pub use config::EngineConfig;
pub use engine::{Engine, EngineCommand, EngineEvent, PlaybackState};
pub use error::{EngineError, Result};
