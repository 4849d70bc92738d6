//! Playback Engine Module
//!
//! Core playback pipeline including:
//! - Audio buffers and the audio-timeline clock
//! - Chunk decoding and WAV encoding
//! - Gapless stream scheduling with pre-roll
//! - Playback state machine
//! - Recording capture
//! - The `Engine` orchestrator and its event bus

pub mod buffer;
pub mod clock;
pub mod codec;
pub mod events;
pub mod player;
pub mod recorder;
pub mod scheduler;
pub mod transport;

pub use buffer::AudioBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{decode_chunk, encode_pcm16, encode_wav, import_wav, write_wav};
pub use events::{EngineEvent, EventBus};
pub use player::{Engine, EngineCommand};
pub use recorder::{Recorder, Recording};
pub use scheduler::{ScheduleOutcome, ScheduledBuffer, StreamScheduler};
pub use transport::{PlaybackState, PlaybackStateMachine, ToggleAction};
