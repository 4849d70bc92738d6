//! Engine events
//!
//! Everything the host UI observes: playback and recording state changes,
//! filtered prompts and user-facing error/warning messages. Published on a
//! tokio broadcast channel; lagging or absent subscribers never block the
//! engine.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::engine::transport::PlaybackState;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PlaybackStateChanged { state: PlaybackState },
    RecordingStateChanged { recording: bool },
    /// The backend refused a prompt; it is excluded from later deliveries
    FilteredPrompt { text: String, reason: String },
    Error { message: String, code: String },
    Warning { message: String },
}

impl EngineEvent {
    pub fn error(err: &EngineError) -> Self {
        EngineEvent::Error {
            message: err.to_string(),
            code: err.error_code().to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EngineEvent::Error { .. })
    }
}

/// Broadcast fan-out of [`EngineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        tracing::trace!(?event, "engine event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn emit_error(&self, err: &EngineError) {
        if err.is_recoverable() {
            tracing::warn!(code = err.error_code(), "{err}");
        } else {
            tracing::error!(code = err.error_code(), "{err}");
        }
        self.emit(EngineEvent::error(err));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(EngineEvent::Warning {
            message: "nobody listening".into(),
        });
    }

    #[test]
    fn test_error_event_carries_code() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit_error(&EngineError::NoActivePrompts);

        match rx.try_recv().unwrap() {
            EngineEvent::Error { code, .. } => assert_eq!(code, "NO_ACTIVE_PROMPTS"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_serializes_tagged() {
        let json = serde_json::to_string(&EngineEvent::PlaybackStateChanged {
            state: PlaybackState::Playing,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"playback_state_changed","state":"playing"}"#);
    }
}
