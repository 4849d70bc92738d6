//! Playback engine
//!
//! [`Engine`] owns the effects graph, the stream scheduler, the playback
//! state machine, the recorder, the prompt throttler and the active session.
//! It is driven from a single task:
//! - host commands (`play`, `pause`, `set_reverb`, ...) or [`EngineCommand`]s
//! - [`Engine::process_next`] / [`Engine::drain`] for session completions
//!   and backend callbacks arriving on the inbox
//! - [`Engine::tick`] for the pre-roll timer and throttled deliveries
//! - [`Engine::render`] to pull output audio
//!
//! Every asynchronous completion carries the epoch of the `play()` that
//! started it; `stop()` bumps the epoch so anything older is discarded.

use std::collections::{BTreeMap, HashSet};
use std::sync::mpsc as std_mpsc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::config::EngineConfig;
use crate::dsp::{spawn_impulse_response, EffectSettings, EffectsGraph, Levels, ReverbKernel, DEFAULT_BLOCK_SIZE};
use crate::engine::buffer::AudioBuffer;
use crate::engine::clock::Clock;
use crate::engine::codec::decode_chunk;
use crate::engine::events::{EngineEvent, EventBus};
use crate::engine::recorder::{Recorder, Recording};
use crate::engine::scheduler::{ScheduleOutcome, StreamScheduler};
use crate::engine::transport::{PlaybackState, PlaybackStateMachine, ToggleAction};
use crate::error::{EngineError, Result};
use crate::session::{
    ActivePrompt, AudioChunk, BackendMessage, Connection, FallbackPlayer, Prompt,
    PromptThrottler, Session, SessionConnector, SessionEvents, SessionInput, SessionKind,
    WeightedPromptSet,
};

// ============================================================================
// Commands
// ============================================================================

/// Host commands as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EngineCommand {
    Play,
    Pause,
    Stop,
    PlayPause,
    SetWeightedPrompts { prompts: Vec<Prompt> },
    SetDistortion { value: f32 },
    SetDelay { value: f32 },
    SetReverb { value: f32 },
    SetMasterVolume { value: f32 },
    StartRecording,
    StopRecordingAndDownload,
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine<C: Clock> {
    config: EngineConfig,
    clock: C,
    connector: SessionConnector,

    graph: EffectsGraph,
    scheduler: StreamScheduler,
    machine: PlaybackStateMachine,
    recorder: Recorder,
    throttler: PromptThrottler<WeightedPromptSet>,

    prompts: WeightedPromptSet,
    filtered: HashSet<String>,

    session: Option<Session>,
    /// Stopped fallback loops still fading under the master
    fallback_tail: Option<FallbackPlayer>,
    connecting: bool,
    epoch: u64,

    inbox_tx: mpsc::UnboundedSender<SessionInput>,
    inbox_rx: mpsc::UnboundedReceiver<SessionInput>,
    reverb_rx: Option<std_mpsc::Receiver<ReverbKernel>>,
    events: EventBus,
}

impl<C: Clock> Engine<C> {
    /// Build the engine and start generating the reverb impulse response
    ///
    /// # Errors
    /// * `Config` - the configuration does not validate
    pub fn new(config: EngineConfig, clock: C, connector: SessionConnector) -> Result<Self> {
        config.validate()?;

        let reverb_rx = spawn_impulse_response(
            config.channels,
            config.sample_rate,
            config.reverb_seconds,
            config.reverb_decay,
            DEFAULT_BLOCK_SIZE,
        );

        let mut graph = EffectsGraph::new(&config);
        graph.set_master_volume(config.master_volume);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        tracing::info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            buffer_time = config.buffer_time_secs,
            live = connector.has_backend(),
            "engine created"
        );

        Ok(Self {
            scheduler: StreamScheduler::new(config.buffer_time_secs),
            throttler: PromptThrottler::new(config.throttle_interval_secs()),
            config,
            clock,
            connector,
            graph,
            machine: PlaybackStateMachine::new(),
            recorder: Recorder::new(),
            prompts: WeightedPromptSet::new(),
            filtered: HashSet::new(),
            session: None,
            fallback_tail: None,
            connecting: false,
            epoch: 0,
            inbox_tx,
            inbox_rx,
            reverb_rx: Some(reverb_rx),
            events: EventBus::default(),
        })
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.machine.state()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }

    pub fn session_kind(&self) -> Option<SessionKind> {
        self.session.as_ref().map(Session::kind)
    }

    pub fn prompts(&self) -> &WeightedPromptSet {
        &self.prompts
    }

    pub fn filtered_prompts(&self) -> &HashSet<String> {
        &self.filtered
    }

    pub fn active_prompts(&self) -> Vec<ActivePrompt> {
        self.prompts.active(&self.filtered)
    }

    pub fn scheduler(&self) -> &StreamScheduler {
        &self.scheduler
    }

    pub fn effect_settings(&self) -> EffectSettings {
        self.graph.settings()
    }

    pub fn master_gain(&self) -> f32 {
        self.graph.master_gain()
    }

    pub fn has_reverb(&self) -> bool {
        self.graph.has_reverb_kernel()
    }

    /// Target gain per fallback loop, when a fallback session is active
    pub fn fallback_gains(&self) -> Option<BTreeMap<String, f32>> {
        self.session
            .as_ref()
            .and_then(Session::as_fallback)
            .map(|player| player.gains())
    }

    pub fn enable_analysis(&mut self, enabled: bool) {
        self.graph.enable_analysis(enabled);
    }

    /// Peak/RMS of the last rendered block, if analysis is enabled
    pub fn levels(&self) -> Option<Levels> {
        self.graph.levels()
    }

    // ------------------------------------------------------------------------
    // Transport commands
    // ------------------------------------------------------------------------

    /// Start or resume playback
    ///
    /// No-op while already loading or playing. Needs a tokio runtime to
    /// connect a new session.
    ///
    /// # Errors
    /// * `NoActivePrompts` - nothing to play; the state is left unchanged
    pub fn play(&mut self) -> Result<()> {
        if matches!(self.state(), PlaybackState::Playing | PlaybackState::Loading) {
            return Ok(());
        }

        let active = self.active_prompts();
        if active.is_empty() {
            let err = EngineError::NoActivePrompts;
            self.events.emit_error(&err);
            return Err(err);
        }

        self.set_state(PlaybackState::Loading);
        self.graph.fade_in(self.config.fade_frames());

        if self.session.is_some() {
            let prompts = self.prompts.clone();
            if self.deliver_prompts(&prompts) {
                self.start_session();
            }
        } else if !self.connecting {
            self.begin_connect(active);
        }
        Ok(())
    }

    /// Fade out and hold the session; accepted while playing or loading
    pub fn pause(&mut self) {
        if !matches!(self.state(), PlaybackState::Playing | PlaybackState::Loading) {
            return;
        }
        let fade_frames = self.config.fade_frames();
        match self.session.as_mut() {
            Some(Session::Fallback(player)) => player.pause_over(fade_frames),
            Some(session) => {
                if let Err(err) = session.pause() {
                    tracing::warn!(error = %err, "session pause failed");
                }
            }
            None => {}
        }
        self.set_state(PlaybackState::Paused);
        self.graph.fade_out(fade_frames);
        self.scheduler.reset();
        let cancelled = self.scheduler.cancel_pending(self.clock.now());
        tracing::debug!(cancelled, "paused");
    }

    /// Tear everything down; safe from any state
    pub fn stop(&mut self) {
        let fade_frames = self.config.fade_frames();
        match self.session.take() {
            Some(Session::Fallback(mut player)) => {
                player.stop_over(fade_frames);
                self.fallback_tail = player.is_playing().then_some(player);
            }
            Some(mut session) => session.stop(),
            None => {}
        }
        self.connecting = false;
        self.epoch += 1;
        self.throttler.clear();

        self.graph.fade_out(fade_frames);
        self.scheduler.reset();
        let cancelled = self.scheduler.cancel_pending(self.clock.now());

        if self.recorder.is_active() {
            self.recorder.discard();
            self.events
                .emit(EngineEvent::RecordingStateChanged { recording: false });
        }

        self.set_state(PlaybackState::Stopped);
        tracing::debug!(epoch = self.epoch, cancelled, "stopped");
    }

    /// Single play/pause/stop control
    ///
    /// Loading is treated as stop.
    pub fn play_pause(&mut self) -> Result<()> {
        match self.machine.toggle_action() {
            ToggleAction::Play => self.play(),
            ToggleAction::Pause => {
                self.pause();
                Ok(())
            }
            ToggleAction::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Prompts and effects
    // ------------------------------------------------------------------------

    /// Replace the prompt set; delivery to the session is throttled
    pub fn set_weighted_prompts(&mut self, prompts: WeightedPromptSet) {
        self.prompts = prompts.clone();
        let now = self.clock.now();
        if let Some(due) = self.throttler.submit(prompts, now) {
            self.deliver_prompts(&due);
        }
    }

    pub fn set_distortion(&mut self, amount: f32) {
        self.graph.set_distortion(amount);
    }

    pub fn set_delay(&mut self, wet: f32) {
        self.graph.set_delay(wet);
    }

    pub fn set_reverb(&mut self, wet: f32) {
        self.graph.set_reverb(wet);
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.graph.set_master_volume(volume);
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    /// Start capturing decoded buffers
    ///
    /// # Errors
    /// * `RecordingNotAllowed` - no live session, or not loading/playing
    pub fn start_recording(&mut self) -> Result<()> {
        let reason = match (&self.session, self.state()) {
            (Some(Session::Fallback(_)), _) => Some("recording is not available in fallback mode"),
            (Some(Session::Live(_)), PlaybackState::Playing | PlaybackState::Loading) => None,
            _ => Some("recording needs a live session that is loading or playing"),
        };
        if let Some(reason) = reason {
            let err = EngineError::RecordingNotAllowed {
                reason: reason.to_string(),
            };
            self.events.emit_error(&err);
            return Err(err);
        }

        if !self.recorder.is_active() {
            self.recorder.start();
            tracing::info!("recording started");
            self.events
                .emit(EngineEvent::RecordingStateChanged { recording: true });
        }
        Ok(())
    }

    /// Stop capturing and encode the capture as WAV
    ///
    /// The capture is cleared either way.
    ///
    /// # Errors
    /// * `EmptyRecording` - nothing was captured
    /// * `RecordingFormatMismatch` - captured buffers disagree on format
    pub fn stop_recording_and_download(&mut self) -> Result<Recording> {
        let was_recording = self.recorder.is_active();
        let result = self.recorder.finish();
        if was_recording {
            self.events
                .emit(EngineEvent::RecordingStateChanged { recording: false });
        }

        match result {
            Ok(recording) => {
                tracing::info!(
                    file = %recording.file_name,
                    frames = recording.frames,
                    bytes = recording.bytes.len(),
                    "recording finished"
                );
                Ok(recording)
            }
            Err(err) => {
                self.events.emit_error(&err);
                Err(err)
            }
        }
    }

    /// Dispatch a command; a finished recording is returned for
    /// `StopRecordingAndDownload`
    pub fn apply(&mut self, command: EngineCommand) -> Result<Option<Recording>> {
        tracing::debug!(?command, "applying command");
        match command {
            EngineCommand::Play => self.play()?,
            EngineCommand::Pause => self.pause(),
            EngineCommand::Stop => self.stop(),
            EngineCommand::PlayPause => self.play_pause()?,
            EngineCommand::SetWeightedPrompts { prompts } => {
                self.set_weighted_prompts(prompts.into_iter().collect())
            }
            EngineCommand::SetDistortion { value } => self.set_distortion(value),
            EngineCommand::SetDelay { value } => self.set_delay(value),
            EngineCommand::SetReverb { value } => self.set_reverb(value),
            EngineCommand::SetMasterVolume { value } => self.set_master_volume(value),
            EngineCommand::StartRecording => self.start_recording()?,
            EngineCommand::StopRecordingAndDownload => {
                return self.stop_recording_and_download().map(Some)
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Pumping
    // ------------------------------------------------------------------------

    /// Wait for the next inbox item and handle it
    pub async fn process_next(&mut self) {
        if let Some(input) = self.inbox_rx.recv().await {
            self.handle_input(input);
        }
        self.tick();
    }

    /// Handle everything already waiting in the inbox, then tick
    ///
    /// Returns the number of items handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(input) = self.inbox_rx.try_recv() {
            self.handle_input(input);
            handled += 1;
        }
        self.tick();
        handled
    }

    /// Fire due timers: pre-roll completion and throttled deliveries
    pub fn tick(&mut self) {
        self.poll_reverb_kernel();
        let now = self.clock.now();

        if self.scheduler.poll_preroll(now) && self.machine.is_loading() {
            self.set_state(PlaybackState::Playing);
        }

        if let Some(prompts) = self.throttler.poll(now) {
            self.deliver_prompts(&prompts);
        }
    }

    /// Render the window `[now, now + frames / sample_rate)` through the
    /// effects graph
    ///
    /// The caller advances the clock afterwards.
    pub fn render(&mut self, frames: usize) -> AudioBuffer {
        self.poll_reverb_kernel();
        let now = self.clock.now();
        let mut input = AudioBuffer::silent(self.config.channels, frames, self.config.sample_rate);

        if let Some(player) = self.session.as_mut().and_then(Session::as_fallback_mut) {
            player.render(&mut input);
        }
        if let Some(tail) = self.fallback_tail.as_mut() {
            tail.render(&mut input);
            if !tail.is_playing() {
                self.fallback_tail = None;
            }
        }
        self.scheduler.render(now, &mut input);

        self.graph.process(&input)
    }

    /// Block until the impulse response is installed
    pub fn wait_for_reverb(&mut self) -> bool {
        if let Some(rx) = self.reverb_rx.take() {
            if let Ok(kernel) = rx.recv() {
                self.graph.set_reverb_kernel(kernel);
            }
        }
        self.graph.has_reverb_kernel()
    }

    fn poll_reverb_kernel(&mut self) {
        let Some(rx) = self.reverb_rx.as_ref() else {
            return;
        };
        match rx.try_recv() {
            Ok(kernel) => {
                self.graph.set_reverb_kernel(kernel);
                self.reverb_rx = None;
                tracing::debug!("reverb impulse response installed");
            }
            Err(std_mpsc::TryRecvError::Empty) => {}
            Err(std_mpsc::TryRecvError::Disconnected) => self.reverb_rx = None,
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn set_state(&mut self, next: PlaybackState) {
        if self.machine.transition(next) {
            self.events
                .emit(EngineEvent::PlaybackStateChanged { state: next });
        }
    }

    fn begin_connect(&mut self, prompts: Vec<ActivePrompt>) {
        self.connecting = true;
        let epoch = self.epoch;
        let connector = self.connector.clone();
        let tx = self.inbox_tx.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let events = SessionEvents::new(epoch, tx.clone());
                    let connection = connector.connect(prompts, events).await;
                    let _ = tx.send(SessionInput::Connected { epoch, connection });
                });
            }
            Err(_) => {
                let connection = connector.fallback(EngineError::Connection {
                    reason: "no async runtime available for a live connect".to_string(),
                });
                let _ = tx.send(SessionInput::Connected { epoch, connection });
            }
        }
    }

    fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Connected { epoch, connection } => self.on_connected(epoch, connection),
            SessionInput::Message { epoch, message } => {
                if epoch != self.epoch {
                    tracing::debug!(epoch, current = self.epoch, "dropping stale backend message");
                    return;
                }
                match message {
                    BackendMessage::AudioChunks(chunks) => {
                        for chunk in &chunks {
                            self.on_audio_chunk(chunk);
                        }
                    }
                    BackendMessage::FilteredPrompt { text, reason } => {
                        self.on_filtered_prompt(text, reason)
                    }
                    BackendMessage::Error(message) => self.on_backend_error(message),
                }
            }
        }
    }

    fn on_connected(&mut self, epoch: u64, connection: Connection) {
        let Connection {
            mut session,
            downgrade,
        } = connection;

        if epoch != self.epoch || !self.connecting {
            tracing::debug!(epoch, current = self.epoch, "discarding stale session");
            session.stop();
            return;
        }
        self.connecting = false;

        if let Some(reason) = downgrade {
            self.events.emit(EngineEvent::Warning {
                message: format!("Live generation unavailable, playing local loops: {reason}"),
            });
        }
        self.session = Some(session);

        if self.state() == PlaybackState::Paused {
            tracing::info!(epoch, "session ready while paused");
            return;
        }

        let prompts = self.prompts.clone();
        if self.deliver_prompts(&prompts) {
            self.start_session();
        }
    }

    fn start_session(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(err) = session.play() {
            self.events.emit_error(&err);
            self.stop();
            return;
        }
        if session.is_fallback() {
            self.set_state(PlaybackState::Playing);
        }
    }

    /// Send the active subset of `prompts` to the session
    ///
    /// Returns false if delivery failed (the engine is then paused).
    fn deliver_prompts(&mut self, prompts: &WeightedPromptSet) -> bool {
        let active = prompts.active(&self.filtered);
        if active.is_empty() {
            if matches!(self.state(), PlaybackState::Playing | PlaybackState::Loading) {
                let err = EngineError::Delivery {
                    reason: "no active prompts".to_string(),
                };
                self.events.emit_error(&err);
                self.pause();
            }
            return false;
        }

        let Some(session) = self.session.as_mut() else {
            return true;
        };
        match session.set_weighted_prompts(&active) {
            Ok(()) => true,
            Err(err) => {
                let err = match err {
                    EngineError::Delivery { .. } => err,
                    other => EngineError::Delivery {
                        reason: other.to_string(),
                    },
                };
                self.events.emit_error(&err);
                self.pause();
                false
            }
        }
    }

    fn on_audio_chunk(&mut self, chunk: &AudioChunk) {
        if self.machine.is_idle() {
            return;
        }

        let buffer = match decode_chunk(&chunk.data, self.config.sample_rate, self.config.channels) {
            Ok(buffer) => buffer,
            Err(err) => {
                self.events.emit_error(&err);
                return;
            }
        };

        self.recorder.capture(&buffer);

        let now = self.clock.now();
        match self.scheduler.schedule(buffer, now) {
            ScheduleOutcome::Started { start, playing_at } => {
                tracing::debug!(start, playing_at, "pre-roll started");
            }
            ScheduleOutcome::Scheduled { .. } => {}
            ScheduleOutcome::Underrun { horizon, now } => {
                tracing::debug!(horizon, now, "underrun, back to loading");
                self.set_state(PlaybackState::Loading);
            }
        }
    }

    fn on_filtered_prompt(&mut self, text: String, reason: String) {
        tracing::warn!(text = %text, reason = %reason, "prompt filtered by backend");
        self.filtered.insert(text.clone());
        self.events.emit(EngineEvent::FilteredPrompt { text, reason });
    }

    fn on_backend_error(&mut self, message: String) {
        let err = EngineError::Backend { message };
        self.events.emit_error(&err);
        self.stop();
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::session::FallbackLibrary;

    fn offline_engine() -> Engine<ManualClock> {
        let config = EngineConfig::default();
        let library = FallbackLibrary::synthesized(["Funk", "Sitar"], config.sample_rate, config.channels);
        let connector = SessionConnector::offline(library, &config);
        Engine::new(config, ManualClock::new(), connector).unwrap()
    }

    #[test]
    fn test_new_engine_is_stopped() {
        let engine = offline_engine();
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(engine.epoch(), 0);
        assert!(engine.session_kind().is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            channels: 0,
            ..EngineConfig::default()
        };
        let connector = SessionConnector::offline(FallbackLibrary::new(), &config);
        assert!(Engine::new(config, ManualClock::new(), connector).is_err());
    }

    #[test]
    fn test_play_without_runtime_falls_back() {
        let mut engine = offline_engine();
        engine.set_weighted_prompts(std::iter::once(Prompt::new("Funk", 1.0)).collect());
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Loading);

        engine.drain();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.session_kind(), Some(SessionKind::Fallback));
    }

    #[test]
    fn test_stop_bumps_epoch_every_time() {
        let mut engine = offline_engine();
        engine.stop();
        engine.stop();
        assert_eq!(engine.epoch(), 2);
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_command_json_round_trip() {
        let json = r#"{"command":"set_reverb","value":0.5}"#;
        let command: EngineCommand = serde_json::from_str(json).unwrap();
        assert_eq!(command, EngineCommand::SetReverb { value: 0.5 });
    }

    #[test]
    fn test_apply_dispatches_effects() {
        let mut engine = offline_engine();
        engine.apply(EngineCommand::SetDelay { value: 0.4 }).unwrap();
        engine.apply(EngineCommand::SetMasterVolume { value: 0.8 }).unwrap();
        let settings = engine.effect_settings();
        assert_eq!(settings.delay, 0.4);
        assert_eq!(settings.master_volume, 0.8);
    }

    #[test]
    fn test_pause_from_stopped_is_ignored() {
        let mut engine = offline_engine();
        engine.pause();
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }
}
