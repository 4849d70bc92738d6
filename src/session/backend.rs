//! Generation backend interface
//!
//! A backend connects a live session for a model and an initial prompt set.
//! Everything the backend later reports (audio, filtered prompts, errors)
//! travels through [`SessionEvents`], tagged with the epoch of the `play()`
//! that started the connect, into the engine's inbox.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::session::connector::Connection;
use crate::session::prompt::ActivePrompt;

/// Opaque encoded audio payload from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// Something a live session reported
#[derive(Debug, Clone)]
pub enum BackendMessage {
    AudioChunks(Vec<AudioChunk>),
    FilteredPrompt { text: String, reason: String },
    Error(String),
}

/// An item in the engine inbox
pub enum SessionInput {
    /// A connect attempt finished (live or fallback)
    Connected { epoch: u64, connection: Connection },
    Message { epoch: u64, message: BackendMessage },
}

impl SessionInput {
    pub fn epoch(&self) -> u64 {
        match self {
            SessionInput::Connected { epoch, .. } | SessionInput::Message { epoch, .. } => *epoch,
        }
    }
}

/// Callback handle given to a backend on connect
///
/// Every method returns false once the engine is gone.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl SessionEvents {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, message: BackendMessage) -> bool {
        self.tx
            .send(SessionInput::Message {
                epoch: self.epoch,
                message,
            })
            .is_ok()
    }

    pub fn audio_chunks(&self, chunks: Vec<AudioChunk>) -> bool {
        self.send(BackendMessage::AudioChunks(chunks))
    }

    pub fn filtered_prompt(&self, text: impl Into<String>, reason: impl Into<String>) -> bool {
        self.send(BackendMessage::FilteredPrompt {
            text: text.into(),
            reason: reason.into(),
        })
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.send(BackendMessage::Error(message.into()))
    }
}

/// Control surface of a connected live session
pub trait LiveSession: Send {
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Tear the session down; it is never used again
    fn stop(&mut self);

    /// Replace the prompt set steering generation
    fn set_weighted_prompts(&mut self, prompts: &[ActivePrompt]) -> Result<()>;
}

/// Future returned by [`GenerationBackend::connect`]
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Box<dyn LiveSession>>> + Send>>;

/// A generation service the engine can stream from
pub trait GenerationBackend: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Open a live session
    ///
    /// Any error makes the connector fall back to local loops.
    fn connect(&self, model: &str, prompts: &[ActivePrompt], events: SessionEvents)
        -> ConnectFuture;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged_with_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = SessionEvents::new(7, tx);
        assert!(events.filtered_prompt("rain", "blocked"));

        let input = rx.try_recv().unwrap();
        assert_eq!(input.epoch(), 7);
        match input {
            SessionInput::Message {
                message: BackendMessage::FilteredPrompt { text, .. },
                ..
            } => assert_eq!(text, "rain"),
            _ => panic!("unexpected input"),
        }
    }

    #[test]
    fn test_send_after_receiver_dropped_reports_false() {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = SessionEvents::new(0, tx);
        drop(rx);
        assert!(events.is_closed());
        assert!(!events.audio_chunks(vec![AudioChunk::new(vec![0, 0])]));
    }
}
