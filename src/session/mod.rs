//! Sessions
//!
//! This module provides:
//! - Weighted prompts and the active-prompt rule
//! - The generation backend interface and its callback handle
//! - `SessionConnector`, which downgrades to local loops on failure
//! - The fallback loop player
//! - The prompt throttler
//! - Mock backends for demos and tests

pub mod backend;
pub mod connector;
pub mod fallback;
pub mod mock;
pub mod prompt;
pub mod throttle;

pub use backend::{
    AudioChunk, BackendMessage, ConnectFuture, GenerationBackend, LiveSession, SessionEvents,
    SessionInput,
};
pub use connector::{Connection, Session, SessionConnector, SessionKind};
pub use fallback::{FallbackLibrary, FallbackPlayer};
pub use mock::{ConnectGate, ScriptedBackend, ScriptedCall, ToneBackend, UnreachableBackend};
pub use prompt::{ActivePrompt, Prompt, WeightedPromptSet, MAX_WEIGHT};
pub use throttle::PromptThrottler;
