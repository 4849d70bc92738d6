//! Mock generation backends
//!
//! These backends don't talk to a real generation service but behave like
//! one from the engine's point of view:
//! - [`ToneBackend`] streams synthesized PCM chunks in real time
//! - [`UnreachableBackend`] never connects
//! - [`ScriptedBackend`] is driven by hand from tests

use std::collections::{HashMap, VecDeque};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::codec::encode_pcm16;
use crate::engine::AudioBuffer;
use crate::error::{EngineError, Result};
use crate::session::backend::{
    AudioChunk, ConnectFuture, GenerationBackend, LiveSession, SessionEvents,
};
use crate::session::prompt::ActivePrompt;

// ============================================================================
// Tone Backend
// ============================================================================

/// Streams one sine voice per active prompt
#[derive(Debug, Clone)]
pub struct ToneBackend {
    sample_rate: u32,
    channels: usize,
    chunk_secs: f64,
    latency: Duration,
    blocked_terms: Vec<String>,
}

impl ToneBackend {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            chunk_secs: 0.5,
            latency: Duration::ZERO,
            blocked_terms: Vec::new(),
        }
    }

    /// Seconds of audio per chunk (and between chunks)
    pub fn with_chunk_secs(mut self, secs: f64) -> Self {
        self.chunk_secs = secs.max(0.01);
        self
    }

    /// Simulated connect latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Prompts containing `term` (case-insensitive) are reported as filtered
    pub fn block_term(mut self, term: impl Into<String>) -> Self {
        self.blocked_terms.push(term.into().to_lowercase());
        self
    }

    fn is_blocked(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.blocked_terms.iter().any(|term| text.contains(term))
    }
}

impl GenerationBackend for ToneBackend {
    fn name(&self) -> &str {
        "tone"
    }

    fn connect(&self, model: &str, prompts: &[ActivePrompt], events: SessionEvents) -> ConnectFuture {
        let backend = self.clone();
        let prompts = prompts.to_vec();
        tracing::debug!(model, prompts = prompts.len(), "tone backend connecting");

        Box::pin(async move {
            if !backend.latency.is_zero() {
                tokio::time::sleep(backend.latency).await;
            }
            let mut session = ToneSession::start(backend, events);
            session.set_weighted_prompts(&prompts)?;
            Ok(Box::new(session) as Box<dyn LiveSession>)
        })
    }
}

#[derive(Debug, Clone, Default)]
struct ToneControl {
    playing: bool,
    stopped: bool,
    prompts: Vec<ActivePrompt>,
}

struct ToneSession {
    backend: ToneBackend,
    control: watch::Sender<ToneControl>,
    events: SessionEvents,
    task: JoinHandle<()>,
}

impl ToneSession {
    fn start(backend: ToneBackend, events: SessionEvents) -> Self {
        let (control, rx) = watch::channel(ToneControl::default());
        let task = tokio::spawn(stream_tones(backend.clone(), rx, events.clone()));
        Self {
            backend,
            control,
            events,
            task,
        }
    }
}

impl LiveSession for ToneSession {
    fn play(&mut self) -> Result<()> {
        self.control.send_modify(|c| c.playing = true);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.control.send_modify(|c| c.playing = false);
        Ok(())
    }

    fn stop(&mut self) {
        self.control.send_modify(|c| c.stopped = true);
        self.task.abort();
    }

    fn set_weighted_prompts(&mut self, prompts: &[ActivePrompt]) -> Result<()> {
        let mut allowed = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            if self.backend.is_blocked(&prompt.text) {
                self.events
                    .filtered_prompt(prompt.text.clone(), "prompt contains a blocked term");
            } else {
                allowed.push(prompt.clone());
            }
        }
        self.control.send_modify(|c| c.prompts = allowed);
        Ok(())
    }
}

impl Drop for ToneSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn stream_tones(
    backend: ToneBackend,
    mut control: watch::Receiver<ToneControl>,
    events: SessionEvents,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(backend.chunk_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut phases: HashMap<String, f64> = HashMap::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        let state = control.borrow().clone();
        if state.stopped {
            break;
        }
        if !state.playing {
            continue;
        }

        let chunk = synthesize_chunk(&backend, &state.prompts, &mut phases);
        if !events.audio_chunks(vec![chunk]) {
            break;
        }
    }
    tracing::debug!(epoch = events.epoch(), "tone stream finished");
}

/// Pitch for a prompt: a semitone above A2 picked from the text
fn prompt_frequency(text: &str) -> f64 {
    let seed = text
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    110.0 * 2f64.powf((seed % 24) as f64 / 12.0)
}

fn synthesize_chunk(
    backend: &ToneBackend,
    prompts: &[ActivePrompt],
    phases: &mut HashMap<String, f64>,
) -> AudioChunk {
    let frames = (backend.chunk_secs * backend.sample_rate as f64).round() as usize;
    let mut mono = vec![0.0f32; frames];
    let voices = prompts.len().max(1) as f32;

    for prompt in prompts {
        let step = 2.0 * PI * prompt_frequency(&prompt.text) / backend.sample_rate as f64;
        let amplitude = 0.4 * prompt.weight.min(1.0) / voices;
        let phase = phases.entry(prompt.text.clone()).or_insert(0.0);
        for sample in &mut mono {
            *sample += amplitude * phase.sin() as f32;
            *phase = (*phase + step) % (2.0 * PI);
        }
    }

    let buffer = AudioBuffer {
        samples: vec![mono; backend.channels.max(1)],
        sample_rate: backend.sample_rate,
    };
    AudioChunk::new(encode_pcm16(&buffer))
}

// ============================================================================
// Unreachable Backend
// ============================================================================

/// A backend whose connects always fail
#[derive(Debug, Clone)]
pub struct UnreachableBackend {
    reason: String,
}

impl UnreachableBackend {
    pub fn new() -> Self {
        Self {
            reason: "generation backend unreachable".to_string(),
        }
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for UnreachableBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationBackend for UnreachableBackend {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn connect(&self, _model: &str, _prompts: &[ActivePrompt], _events: SessionEvents) -> ConnectFuture {
        let reason = self.reason.clone();
        Box::pin(async move { Err(EngineError::Connection { reason }) })
    }
}

// ============================================================================
// Scripted Backend
// ============================================================================

/// A call observed by [`ScriptedBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedCall {
    Connect {
        model: String,
        prompts: Vec<ActivePrompt>,
        epoch: u64,
    },
    Play,
    Pause,
    Stop,
    SetWeightedPrompts(Vec<ActivePrompt>),
}

#[derive(Default)]
struct ScriptedState {
    calls: Vec<ScriptedCall>,
    events: Vec<SessionEvents>,
    gates: VecDeque<oneshot::Receiver<()>>,
    fail_connect: bool,
    reject_prompts: bool,
}

fn lock(state: &Mutex<ScriptedState>) -> MutexGuard<'_, ScriptedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the next connect in flight until released or dropped
pub struct ConnectGate {
    tx: oneshot::Sender<()>,
}

impl ConnectGate {
    pub fn release(self) {
        let _ = self.tx.send(());
    }
}

/// Backend driven by hand: push chunks, hold connects, inspect calls
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next connect wait for the returned gate
    pub fn hold_connect(&self) -> ConnectGate {
        let (tx, rx) = oneshot::channel();
        lock(&self.state).gates.push_back(rx);
        ConnectGate { tx }
    }

    pub fn fail_connects(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }

    /// Make `set_weighted_prompts` return a delivery error
    pub fn reject_prompts(&self, reject: bool) {
        lock(&self.state).reject_prompts = reject;
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        lock(&self.state).calls.clone()
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, ScriptedCall::Connect { .. }))
            .count()
    }

    /// Callback handle of the most recent connect
    pub fn last_events(&self) -> Option<SessionEvents> {
        lock(&self.state).events.last().cloned()
    }

    /// Callback handle of the connect started in `epoch`
    pub fn events_for(&self, epoch: u64) -> Option<SessionEvents> {
        lock(&self.state)
            .events
            .iter()
            .rev()
            .find(|events| events.epoch() == epoch)
            .cloned()
    }

    pub fn push_chunk(&self, chunk: AudioChunk) -> bool {
        self.last_events()
            .is_some_and(|events| events.audio_chunks(vec![chunk]))
    }

    pub fn push_filtered(&self, text: &str, reason: &str) -> bool {
        self.last_events()
            .is_some_and(|events| events.filtered_prompt(text, reason))
    }

    pub fn push_error(&self, message: &str) -> bool {
        self.last_events().is_some_and(|events| events.error(message))
    }
}

impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn connect(&self, model: &str, prompts: &[ActivePrompt], events: SessionEvents) -> ConnectFuture {
        let state = Arc::clone(&self.state);
        let gate = {
            let mut guard = lock(&state);
            guard.calls.push(ScriptedCall::Connect {
                model: model.to_string(),
                prompts: prompts.to_vec(),
                epoch: events.epoch(),
            });
            guard.events.push(events);
            guard.gates.pop_front()
        };

        Box::pin(async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if lock(&state).fail_connect {
                return Err(EngineError::Connection {
                    reason: "scripted connect failure".to_string(),
                });
            }
            Ok(Box::new(ScriptedSession { state }) as Box<dyn LiveSession>)
        })
    }
}

struct ScriptedSession {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedSession {
    fn record(&self, call: ScriptedCall) {
        lock(&self.state).calls.push(call);
    }
}

impl LiveSession for ScriptedSession {
    fn play(&mut self) -> Result<()> {
        self.record(ScriptedCall::Play);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.record(ScriptedCall::Pause);
        Ok(())
    }

    fn stop(&mut self) {
        self.record(ScriptedCall::Stop);
    }

    fn set_weighted_prompts(&mut self, prompts: &[ActivePrompt]) -> Result<()> {
        self.record(ScriptedCall::SetWeightedPrompts(prompts.to_vec()));
        if lock(&self.state).reject_prompts {
            return Err(EngineError::Delivery {
                reason: "scripted rejection".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::codec::decode_chunk;
    use crate::session::backend::{BackendMessage, SessionInput};
    use tokio::sync::mpsc;

    fn prompt(text: &str, weight: f32) -> ActivePrompt {
        ActivePrompt {
            text: text.to_string(),
            weight,
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_errors() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = UnreachableBackend::new()
            .connect("m", &[], SessionEvents::new(0, tx))
            .await;
        assert!(matches!(result, Err(EngineError::Connection { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tone_backend_streams_decodable_chunks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = ToneBackend::new(8000, 2).with_chunk_secs(0.25);
        let mut session = backend
            .connect("m", &[prompt("Piano", 1.0)], SessionEvents::new(3, tx))
            .await
            .unwrap();
        session.play().unwrap();

        let input = rx.recv().await.unwrap();
        assert_eq!(input.epoch(), 3);
        let SessionInput::Message {
            message: BackendMessage::AudioChunks(chunks),
            ..
        } = input
        else {
            panic!("expected audio");
        };
        let buffer = decode_chunk(&chunks[0].data, 8000, 2).unwrap();
        assert_eq!(buffer.len(), 2000);
        assert!(buffer.channel(0).iter().any(|&s| s != 0.0));
        session.stop();
    }

    #[tokio::test]
    async fn test_tone_backend_reports_blocked_prompts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = ToneBackend::new(8000, 2).block_term("violence");
        let mut session = backend
            .connect(
                "m",
                &[prompt("Calm Piano", 1.0), prompt("Violence Metal", 1.0)],
                SessionEvents::new(0, tx),
            )
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            SessionInput::Message {
                message: BackendMessage::FilteredPrompt { text, .. },
                ..
            } => assert_eq!(text, "Violence Metal"),
            _ => panic!("expected a filtered prompt"),
        }
        session.stop();
    }

    #[tokio::test]
    async fn test_scripted_backend_records_calls() {
        let backend = ScriptedBackend::new();
        backend.reject_prompts(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = backend
            .connect("model-x", &[prompt("Funk", 1.0)], SessionEvents::new(5, tx))
            .await
            .unwrap();

        session.play().unwrap();
        assert!(session.set_weighted_prompts(&[prompt("Funk", 0.5)]).is_err());
        session.stop();

        let calls = backend.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[0],
            ScriptedCall::Connect {
                model: "model-x".into(),
                prompts: vec![prompt("Funk", 1.0)],
                epoch: 5
            }
        );
        assert_eq!(calls[3], ScriptedCall::Stop);
        assert!(backend.events_for(5).is_some());
    }
}
