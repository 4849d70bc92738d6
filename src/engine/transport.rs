//! Playback State Machine
//!
//! `stopped | loading | playing | paused`, driven by host commands and by
//! scheduler/session events. The machine only validates and records
//! transitions; the engine performs the side effects.
//!
//! Allowed transitions:
//! - `stopped`/`paused` -> `loading` (play)
//! - `loading` -> `playing` (pre-roll elapsed, or fallback session started)
//! - `playing` -> `loading` (scheduler underrun)
//! - `playing`/`loading` -> `paused`
//! - any -> `stopped`

use std::fmt;

use serde::{Deserialize, Serialize};

/// Playback states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No session (default state)
    #[default]
    Stopped,
    /// Waiting for a session or for pre-roll to fill
    Loading,
    /// Audio is audible
    Playing,
    /// Session kept, output faded out
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// What the single play/pause/stop toggle does in each state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Play,
    Pause,
    /// Loading collapses into stop semantics
    Stop,
}

/// Tracks the current playback state and rejects invalid transitions
#[derive(Debug, Clone, Default)]
pub struct PlaybackStateMachine {
    state: PlaybackState,
}

impl PlaybackStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_loading(&self) -> bool {
        self.state == PlaybackState::Loading
    }

    /// Paused or stopped: incoming audio is ignored
    pub fn is_idle(&self) -> bool {
        matches!(self.state, PlaybackState::Paused | PlaybackState::Stopped)
    }

    /// Check whether `next` is reachable from the current state
    pub fn can_transition(&self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        match (self.state, next) {
            (_, Stopped) => true,
            (Stopped | Paused, Loading) => true,
            (Loading, Playing) => true,
            (Playing, Loading) => true,
            (Playing | Loading, Paused) => true,
            _ => false,
        }
    }

    /// Move to `next`
    ///
    /// Returns true if the state changed. Self-transitions and invalid
    /// transitions leave the state untouched.
    pub fn transition(&mut self, next: PlaybackState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.can_transition(next) {
            tracing::warn!(from = %self.state, to = %next, "ignoring invalid playback transition");
            return false;
        }
        tracing::info!(from = %self.state, to = %next, "playback state changed");
        self.state = next;
        true
    }

    /// Action for the combined play/pause/stop control
    pub fn toggle_action(&self) -> ToggleAction {
        match self.state {
            PlaybackState::Playing => ToggleAction::Pause,
            PlaybackState::Paused | PlaybackState::Stopped => ToggleAction::Play,
            PlaybackState::Loading => ToggleAction::Stop,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
