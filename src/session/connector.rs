//! Session Connector
//!
//! Opens a session for `play()`. A live connect that fails for any reason
//! (no backend, timeout, protocol error, rejection) is never surfaced as an
//! error to the caller: the connector returns a fallback session over the
//! local loop library instead, together with the reason for the downgrade.
//! The fallback stays in place until the session is stopped.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::session::backend::{GenerationBackend, LiveSession, SessionEvents};
use crate::session::fallback::{FallbackLibrary, FallbackPlayer};
use crate::session::prompt::ActivePrompt;

/// Which variant a session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Live,
    Fallback,
}

/// The active session; exactly one variant at a time
pub enum Session {
    Live(Box<dyn LiveSession>),
    Fallback(FallbackPlayer),
}

impl Session {
    pub fn kind(&self) -> SessionKind {
        match self {
            Session::Live(_) => SessionKind::Live,
            Session::Fallback(_) => SessionKind::Fallback,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Session::Live(_))
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Session::Fallback(_))
    }

    pub fn play(&mut self) -> Result<()> {
        match self {
            Session::Live(session) => session.play(),
            Session::Fallback(player) => {
                player.play();
                Ok(())
            }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        match self {
            Session::Live(session) => session.pause(),
            Session::Fallback(player) => {
                player.pause();
                Ok(())
            }
        }
    }

    pub fn stop(&mut self) {
        match self {
            Session::Live(session) => session.stop(),
            Session::Fallback(player) => player.stop(),
        }
    }

    pub fn set_weighted_prompts(&mut self, prompts: &[ActivePrompt]) -> Result<()> {
        match self {
            Session::Live(session) => session.set_weighted_prompts(prompts),
            Session::Fallback(player) => {
                player.set_weighted_prompts(prompts);
                Ok(())
            }
        }
    }

    pub fn as_fallback(&self) -> Option<&FallbackPlayer> {
        match self {
            Session::Fallback(player) => Some(player),
            Session::Live(_) => None,
        }
    }

    pub fn as_fallback_mut(&mut self) -> Option<&mut FallbackPlayer> {
        match self {
            Session::Fallback(player) => Some(player),
            Session::Live(_) => None,
        }
    }
}

/// Outcome of a connect attempt
pub struct Connection {
    pub session: Session,
    /// Why the live connect was abandoned, for fallback sessions
    pub downgrade: Option<EngineError>,
}

/// Connects live sessions, falling back to local loops
#[derive(Clone)]
pub struct SessionConnector {
    backend: Option<Arc<dyn GenerationBackend>>,
    library: Arc<FallbackLibrary>,
    model: String,
    timeout: Duration,
    ramp_frames: usize,
}

impl SessionConnector {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        library: FallbackLibrary,
        config: &EngineConfig,
    ) -> Self {
        Self {
            backend: Some(backend),
            ..Self::offline(library, config)
        }
    }

    /// A connector without a backend; every session is a fallback
    pub fn offline(library: FallbackLibrary, config: &EngineConfig) -> Self {
        Self {
            backend: None,
            library: Arc::new(library),
            model: config.model.clone(),
            timeout: config.connect_timeout(),
            ramp_frames: config.ramp_frames(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn library(&self) -> &FallbackLibrary {
        &self.library
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Try a live session, returning a fallback one on any failure
    pub async fn connect(&self, prompts: Vec<ActivePrompt>, events: SessionEvents) -> Connection {
        let Some(backend) = self.backend.as_ref() else {
            return self.fallback(EngineError::Connection {
                reason: "no generation backend configured".to_string(),
            });
        };

        let epoch = events.epoch();
        tracing::info!(backend = backend.name(), model = %self.model, epoch, "connecting live session");

        let attempt = backend.connect(&self.model, &prompts, events);
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(session)) => {
                tracing::info!(epoch, "live session connected");
                Connection {
                    session: Session::Live(session),
                    downgrade: None,
                }
            }
            Ok(Err(err)) => self.fallback(match err {
                EngineError::Connection { .. } => err,
                other => EngineError::Connection {
                    reason: other.to_string(),
                },
            }),
            Err(_) => self.fallback(EngineError::Connection {
                reason: format!("connect timed out after {} ms", self.timeout.as_millis()),
            }),
        }
    }

    /// A fallback session over the loop library
    pub fn fallback(&self, reason: EngineError) -> Connection {
        tracing::warn!(reason = %reason, assets = self.library.len(), "falling back to local loops");
        Connection {
            session: Session::Fallback(FallbackPlayer::new(&self.library, self.ramp_frames)),
            downgrade: Some(reason),
        }
    }
}
